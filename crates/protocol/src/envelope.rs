use serde::{Deserialize, Serialize};

use crate::ProtocolError;

/// Message type identifier carried in every control frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    // Room channel
    #[serde(rename = "WELCOME")]
    Welcome,
    #[serde(rename = "JOIN")]
    Join,
    #[serde(rename = "MESSAGE")]
    Message,
    #[serde(rename = "RECEIVED")]
    Received,

    // Transaction control channel
    #[serde(rename = "TRANSACTION_INFOS")]
    TransactionInfos,
    #[serde(rename = "TRANSACTION_INFOS_RECEIVED")]
    TransactionInfosReceived,
    #[serde(rename = "TRANSACTION_JOIN")]
    TransactionJoin,
    #[serde(rename = "TRANSACTION_ACCEPT")]
    TransactionAccept,
    #[serde(rename = "TRANSACTION_ACCEPT_RECEIVED")]
    TransactionAcceptReceived,
    #[serde(rename = "TRANSACTION_START")]
    TransactionStart,
    #[serde(rename = "TRANSACTION_START_RECEIVED")]
    TransactionStartReceived,
    #[serde(rename = "TRANSACTION_UPLOAD")]
    TransactionUpload,
    #[serde(rename = "TRANSACTION_UPLOAD_RECEIVED")]
    TransactionUploadReceived,
    #[serde(rename = "TRANSACTION_END")]
    TransactionEnd,
    #[serde(rename = "TRANSACTION_END_RECEIVED")]
    TransactionEndReceived,

    // Sent by the relay on both channel kinds when the remote party leaves.
    #[serde(rename = "LEAVE")]
    Leave,

    /// Any type string this client does not know. Never serialized; decoding
    /// must not fail on it because the relay is free to grow new types.
    #[serde(other)]
    Unknown,
}

/// File metadata exchanged at offer time.
///
/// The sender derives it from the local filesystem; the receiver learns it
/// from the `TRANSACTION_INFOS` payload and treats `filesize` as the
/// authoritative completion mark for the byte stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub filename: String,
    pub filesize: u64,
}

/// Envelope for all control-channel communication.
///
/// `body` is always serialized (`null` for bare control messages) because
/// that is the frame shape the relay expects. `alias` and `peers` only
/// appear on room frames coming from the relay and are omitted on output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub msg_type: MessageType,
    #[serde(default)]
    pub body: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub peers: Vec<String>,
}

impl Envelope {
    /// Creates a bodyless control message (`{"type": ..., "body": null}`).
    pub fn control(msg_type: MessageType) -> Self {
        Self {
            msg_type,
            body: None,
            alias: None,
            peers: Vec::new(),
        }
    }

    /// Creates a room chat message carrying `text` as its body.
    pub fn chat(text: &str) -> Self {
        Self {
            msg_type: MessageType::Message,
            body: Some(serde_json::Value::String(text.to_owned())),
            alias: None,
            peers: Vec::new(),
        }
    }

    /// Creates a `TRANSACTION_INFOS` message carrying the file metadata.
    pub fn infos(info: &FileInfo) -> Result<Self, ProtocolError> {
        Ok(Self {
            msg_type: MessageType::TransactionInfos,
            body: Some(serde_json::to_value(info)?),
            alias: None,
            peers: Vec::new(),
        })
    }

    /// Serializes the envelope into a text frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parses a text frame.
    ///
    /// Fails with [`ProtocolError::Malformed`] on anything that is not a
    /// JSON object with a string `type` field.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }

    /// Parses the body as [`FileInfo`].
    pub fn file_info(&self) -> Result<FileInfo, ProtocolError> {
        let body = self
            .body
            .clone()
            .ok_or_else(|| ProtocolError::Malformed("missing file infos body".into()))?;
        serde_json::from_value(body).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }

    /// The alias carried by a room frame, or `""`.
    pub fn alias(&self) -> &str {
        self.alias.as_deref().unwrap_or_default()
    }

    /// The chat text carried by a room frame, or `""`.
    pub fn chat_text(&self) -> &str {
        self.body
            .as_ref()
            .and_then(|b| b.as_str())
            .unwrap_or_default()
    }
}

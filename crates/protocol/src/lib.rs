//! Wire protocol for the handoff relay channels.
//!
//! Everything that crosses a relay socket is defined here: the JSON control
//! envelope and its closed set of message types, the file metadata payload,
//! refusal translation for rejected connections, and the endpoint shapes of
//! the three channel kinds (room, transaction control, transaction binary).

mod endpoints;
mod envelope;
mod refusal;

pub use endpoints::{DEFAULT_ORIGIN, ORIGIN_ENV, RelayConfig};
pub use envelope::{Envelope, FileInfo, MessageType};
pub use refusal::Refusal;

/// Size of one binary frame on a transaction's binary channel.
///
/// The sender never puts more than this many bytes into a single frame; the
/// last frame of a file may be shorter. Receivers treat frame boundaries as
/// progress units only, not as a format.
pub const CHUNK_SIZE: usize = 2048;

/// Errors produced while encoding or decoding control frames.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The frame is not valid JSON, or lacks a usable `type` field, or a
    /// typed payload does not have the shape its message type requires.
    /// Fatal for the session that received it.
    #[error("malformed control frame: {0}")]
    Malformed(String),

    #[error("could not encode control frame: {0}")]
    Encode(#[from] serde_json::Error),
}

//! WebSocket transport plumbing shared by the handoff channels.
//!
//! Every relay channel — room control, transaction control, transaction
//! binary — is one WebSocket connection. This crate owns the connect path
//! and the type aliases for the split halves; the session crates drive the
//! halves from their own run loops so tests can substitute fake transports.

use futures_util::StreamExt;
use futures_util::stream::{SplitSink, SplitStream};
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, tungstenite};
use tracing::debug;

pub type WsMessage = tungstenite::Message;
pub type WsError = tungstenite::Error;

/// Write half of a relay connection.
pub type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;
/// Read half of a relay connection.
pub type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Upper bound on a single inbound frame. Control frames are small JSON
/// objects and binary frames are capped at the chunk size, so anything near
/// this limit is a misbehaving relay.
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Errors from establishing a relay connection.
///
/// The display text of the underlying handshake error is what refusal
/// translation pattern-matches, so it is preserved verbatim.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("WebSocket handshake failed: {0}")]
    Handshake(#[from] tungstenite::Error),
}

/// Connects to a relay endpoint and splits the stream into its two halves.
pub async fn connect(url: &str) -> Result<(WsSink, WsStream), ConnectError> {
    let mut ws_config = tungstenite::protocol::WebSocketConfig::default();
    ws_config.max_message_size = Some(MAX_MESSAGE_SIZE);
    ws_config.max_frame_size = Some(MAX_MESSAGE_SIZE);

    let (ws_stream, _) =
        tokio_tungstenite::connect_async_with_config(url, Some(ws_config), false).await?;
    debug!(url, "relay connection established");
    Ok(ws_stream.split())
}

//! The room control session and its dispatch loop.

use std::sync::{Arc, Mutex};

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use handoff_protocol::{Envelope, MessageType, Refusal, RelayConfig};
use handoff_socket::{WsError, WsMessage};

/// Capacity of the event channel handed to the caller.
const EVENT_CHANNEL_SIZE: usize = 256;

/// One entry in the room feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    /// Alias of the peer the relay attributes the event to.
    pub alias: String,
    /// The literal chat body, or a synthesized presence sentence.
    pub text: String,
    /// True for join/leave/welcome events, false for peer chat text.
    pub presence: bool,
}

/// Events emitted by a room session.
#[derive(Debug, Clone, PartialEq)]
pub enum RoomEvent {
    /// Fresh snapshot of the room's occupants, replacing any previous one.
    PeersUpdated(Vec<String>),
    Chat(ChatMessage),
    /// The relay rejected the connection. The session closes afterwards.
    Refused(Refusal),
    /// An undecodable control frame arrived. Fatal; the session closes.
    ProtocolViolation(String),
    /// The control socket is gone. Always the last event of a session.
    Closed,
}

#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    /// The session task is no longer running.
    #[error("room session closed")]
    Closed,
}

enum RoomCommand {
    SendChat(String),
}

/// Handle onto one room's control socket.
///
/// The socket itself lives in a spawned task; the handle carries commands in
/// and keeps the latest occupant snapshot. Dropping the handle closes the
/// session.
pub struct RoomSession {
    room_id: String,
    alias: String,
    peers: Arc<Mutex<Vec<String>>>,
    cmd_tx: mpsc::UnboundedSender<RoomCommand>,
    cancel: CancellationToken,
}

impl RoomSession {
    /// Opens the control socket for `room_id` and starts the session task.
    ///
    /// Returns immediately; connection progress and failures arrive on the
    /// event channel. An empty `alias` lets the relay pick one.
    pub fn open(
        config: &RelayConfig,
        room_id: &str,
        alias: &str,
    ) -> (Self, mpsc::Receiver<RoomEvent>) {
        let url = config.room_url(room_id, alias);
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let peers = Arc::new(Mutex::new(Vec::new()));
        let cancel = CancellationToken::new();

        let session = Self {
            room_id: room_id.to_owned(),
            alias: alias.to_owned(),
            peers: Arc::clone(&peers),
            cmd_tx,
            cancel: cancel.clone(),
        };

        tokio::spawn(async move {
            match handoff_socket::connect(&url).await {
                Ok((sink, stream)) => {
                    debug!(url, "room session connected");
                    run_session(sink, stream, peers, cmd_rx, events_tx, cancel).await;
                }
                Err(e) => {
                    let text = e.to_string();
                    warn!(url, error = %text, "room connection failed");
                    if let Some(refusal) = Refusal::from_room_error(&text) {
                        let _ = events_tx.send(RoomEvent::Refused(refusal)).await;
                    }
                    let _ = events_tx.send(RoomEvent::Closed).await;
                }
            }
        });

        (session, events_rx)
    }

    /// Encodes `text` as a `MESSAGE` envelope and queues it for sending.
    ///
    /// There is no local echo: the relay sends the message back as a
    /// `RECEIVED` frame and that echo is what shows up in the feed.
    pub fn send_chat(&self, text: &str) -> Result<(), RoomError> {
        self.cmd_tx
            .send(RoomCommand::SendChat(text.to_owned()))
            .map_err(|_| RoomError::Closed)
    }

    /// Latest occupant snapshot delivered by the relay.
    pub fn peers(&self) -> Vec<String> {
        self.peers.lock().unwrap().clone()
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// Closes the control socket. Safe to call any number of times.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

/// Select loop over the socket halves, the command channel, and cancellation.
async fn run_session<Si, St>(
    mut sink: Si,
    mut stream: St,
    peers: Arc<Mutex<Vec<String>>>,
    mut cmd_rx: mpsc::UnboundedReceiver<RoomCommand>,
    events: mpsc::Sender<RoomEvent>,
    cancel: CancellationToken,
) where
    Si: Sink<WsMessage, Error = WsError> + Unpin,
    St: Stream<Item = Result<WsMessage, WsError>> + Unpin,
{
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            cmd = cmd_rx.recv() => match cmd {
                Some(RoomCommand::SendChat(text)) => {
                    let frame = match Envelope::chat(&text).encode() {
                        Ok(frame) => frame,
                        Err(e) => {
                            warn!("could not encode chat message: {e}");
                            continue;
                        }
                    };
                    if let Err(e) = sink.send(WsMessage::Text(frame.into())).await {
                        warn!("chat send failed: {e}");
                        break;
                    }
                }
                // All handles dropped.
                None => break,
            },

            frame = stream.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => {
                    if !dispatch_frame(text.as_str(), &peers, &events).await {
                        break;
                    }
                }
                Some(Ok(WsMessage::Close(_))) | None => break,
                // Ping/pong is answered by the transport; binary frames have
                // no meaning on a room socket.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    let text = e.to_string();
                    warn!(error = %text, "room socket error");
                    if let Some(refusal) = Refusal::from_room_error(&text) {
                        let _ = events.send(RoomEvent::Refused(refusal)).await;
                    }
                    break;
                }
            },
        }
    }

    let _ = sink.send(WsMessage::Close(None)).await;
    let _ = events.send(RoomEvent::Closed).await;
}

/// Decodes one inbound frame and emits the resulting events.
///
/// Returns `false` when the session must stop (undecodable frame, or the
/// event receiver is gone).
async fn dispatch_frame(
    text: &str,
    peers: &Arc<Mutex<Vec<String>>>,
    events: &mpsc::Sender<RoomEvent>,
) -> bool {
    let env = match Envelope::decode(text) {
        Ok(env) => env,
        Err(e) => {
            warn!("undecodable room frame: {e}");
            let _ = events
                .send(RoomEvent::ProtocolViolation(e.to_string()))
                .await;
            return false;
        }
    };

    // Every frame carries the full occupant list; replace, never merge.
    *peers.lock().unwrap() = env.peers.clone();
    if events
        .send(RoomEvent::PeersUpdated(env.peers.clone()))
        .await
        .is_err()
    {
        return false;
    }

    let chat = match env.msg_type {
        MessageType::Welcome | MessageType::Join => Some(ChatMessage {
            alias: env.alias().to_owned(),
            text: format!("{} has joined the room.", env.alias()),
            presence: true,
        }),
        MessageType::Message | MessageType::Received => Some(ChatMessage {
            alias: env.alias().to_owned(),
            text: env.chat_text().to_owned(),
            presence: false,
        }),
        MessageType::Leave => Some(ChatMessage {
            alias: env.alias().to_owned(),
            text: format!("{} has left the room.", env.alias()),
            presence: true,
        }),
        // Anything else updates the occupant list only.
        _ => None,
    };

    if let Some(chat) = chat {
        if events.send(RoomEvent::Chat(chat)).await.is_err() {
            return false;
        }
    }
    true
}

//! Plumbing shared by the two transaction roles: the state guarded behind
//! each handle, control-frame dispatch, and transport-error translation.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use futures_util::{Sink, SinkExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use handoff_protocol::{Envelope, FileInfo, Refusal};
use handoff_socket::{WsError, WsMessage};

use crate::TransactionEvent;
use crate::state::Lifecycle;

/// Capacity of the event channel handed to the caller.
pub(crate) const EVENT_CHANNEL_SIZE: usize = 256;

/// State shared between a transaction handle and its session task.
pub(crate) struct Shared {
    pub(crate) lifecycle: Lifecycle,
    pub(crate) file: Option<FileInfo>,
    pub(crate) destination: Option<PathBuf>,
    /// Cancellation for the binary channel, present once a Streamer or
    /// Collector has been launched. Deliberately independent of the control
    /// socket's token: closing the session does not tear down a transfer.
    pub(crate) transfer_cancel: Option<CancellationToken>,
}

pub(crate) type SharedHandle = Arc<Mutex<Shared>>;

impl Shared {
    pub(crate) fn new() -> SharedHandle {
        Arc::new(Mutex::new(Self {
            lifecycle: Lifecycle::new(),
            file: None,
            destination: None,
            transfer_cancel: None,
        }))
    }
}

/// Encodes and writes one control envelope.
pub(crate) async fn send_envelope<Si>(sink: &mut Si, env: &Envelope) -> Result<(), WsError>
where
    Si: Sink<WsMessage, Error = WsError> + Unpin,
{
    match env.encode() {
        Ok(frame) => sink.send(WsMessage::Text(frame.into())).await,
        Err(e) => {
            warn!("could not encode control frame: {e}");
            Ok(())
        }
    }
}

/// Whether the session loop should keep running after a frame.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum FrameOutcome {
    Continue,
    Stop,
}

/// Handles one item from the control stream: dispatches text frames through
/// the lifecycle, translates transport errors into refusals, and decides
/// whether the session survives.
pub(crate) async fn handle_inbound(
    frame: Option<Result<WsMessage, WsError>>,
    shared: &SharedHandle,
    events: &mpsc::Sender<TransactionEvent>,
) -> FrameOutcome {
    match frame {
        Some(Ok(WsMessage::Text(text))) => {
            dispatch_frame(text.as_str(), shared, events).await
        }
        Some(Ok(WsMessage::Close(_))) | None => FrameOutcome::Stop,
        // Ping/pong is answered by the transport; binary frames belong on
        // the binary channel, not here.
        Some(Ok(_)) => FrameOutcome::Continue,
        Some(Err(e)) => {
            let text = e.to_string();
            warn!(error = %text, "transaction socket error");
            if let Some(refusal) = Refusal::from_transaction_error(&text) {
                let _ = events.send(TransactionEvent::Refused(refusal)).await;
            }
            FrameOutcome::Stop
        }
    }
}

async fn dispatch_frame(
    text: &str,
    shared: &SharedHandle,
    events: &mpsc::Sender<TransactionEvent>,
) -> FrameOutcome {
    let env = match Envelope::decode(text) {
        Ok(env) => env,
        Err(e) => {
            warn!("undecodable transaction frame: {e}");
            let _ = events
                .send(TransactionEvent::ProtocolViolation(e.to_string()))
                .await;
            return FrameOutcome::Stop;
        }
    };

    let applied = shared.lock().unwrap().lifecycle.apply(&env);
    let produced = match applied {
        Ok(produced) => produced,
        Err(e) => {
            warn!("invalid transaction frame payload: {e}");
            let _ = events
                .send(TransactionEvent::ProtocolViolation(e.to_string()))
                .await;
            return FrameOutcome::Stop;
        }
    };

    for event in produced {
        if let TransactionEvent::InfosReceived(info) = &event {
            shared.lock().unwrap().file = Some(info.clone());
        }
        if events.send(event).await.is_err() {
            return FrameOutcome::Stop;
        }
    }
    FrameOutcome::Continue
}

/// Surfaces a failed control connection: refusals become events, anything
/// else is logged and swallowed.
pub(crate) async fn surface_connect_error(
    text: &str,
    events: &mpsc::Sender<TransactionEvent>,
) {
    warn!(error = %text, "transaction connection failed");
    if let Some(refusal) = Refusal::from_transaction_error(text) {
        let _ = events.send(TransactionEvent::Refused(refusal)).await;
    }
}

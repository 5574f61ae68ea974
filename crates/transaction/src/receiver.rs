//! The receiving role of a transaction.

use std::path::PathBuf;
use std::sync::Arc;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use handoff_protocol::{Envelope, FileInfo, MessageType, RelayConfig};
use handoff_socket::{WsError, WsMessage};

use crate::session::{
    EVENT_CHANNEL_SIZE, FrameOutcome, Shared, SharedHandle, handle_inbound, send_envelope,
    surface_connect_error,
};
use crate::state::TransactionState;
use crate::{TransactionError, TransactionEvent, collector};

pub(crate) enum ReceiverCommand {
    Accept,
    Finish,
}

/// Handle onto the receiving side of a transaction.
///
/// Created with [`join`](Self::join). The file metadata arrives as an
/// [`InfosReceived`](TransactionEvent::InfosReceived) event; after that, and
/// after [`set_destination`](Self::set_destination), the transfer can be
/// [`accept`](Self::accept)ed. The caller watches
/// [`Progressed`](TransactionEvent::Progressed) increments and calls
/// [`finish`](Self::finish) exactly when their sum reaches the announced
/// filesize — socket closure alone never means the file is complete.
pub struct ReceiverTransaction {
    transaction_id: String,
    shared: SharedHandle,
    cmd_tx: mpsc::UnboundedSender<ReceiverCommand>,
    cancel: CancellationToken,
}

impl ReceiverTransaction {
    /// Joins the transaction `transaction_id` as the receiver.
    ///
    /// Returns immediately; the session task connects with `sender=false`.
    /// Connection refusals (unknown transaction, transaction already full)
    /// arrive on the event channel.
    pub fn join(
        config: &RelayConfig,
        transaction_id: &str,
    ) -> (Self, mpsc::Receiver<TransactionEvent>) {
        let control_url = config.transaction_url(transaction_id, false);
        let binary_url = config.transaction_binary_url(transaction_id, false);

        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let shared = Shared::new();
        let cancel = CancellationToken::new();

        let session = Self {
            transaction_id: transaction_id.to_owned(),
            shared: Arc::clone(&shared),
            cmd_tx,
            cancel: cancel.clone(),
        };

        tokio::spawn(async move {
            match handoff_socket::connect(&control_url).await {
                Ok((sink, stream)) => {
                    debug!(control_url, "receiver session connected");
                    run_receiver(sink, stream, binary_url, shared, cmd_rx, events_tx, cancel)
                        .await;
                }
                Err(e) => {
                    surface_connect_error(&e.to_string(), &events_tx).await;
                    let _ = events_tx.send(TransactionEvent::Closed).await;
                }
            }
        });

        (session, events_rx)
    }

    /// Records where the received file will be written.
    ///
    /// Must be called before [`accept`](Self::accept). The file itself is
    /// only created (and truncated) when the transfer is accepted.
    pub fn set_destination(&self, path: impl Into<PathBuf>) {
        self.shared.lock().unwrap().destination = Some(path.into());
    }

    /// Accepts the offered transfer: sends `TRANSACTION_ACCEPT` and launches
    /// the collector on the binary channel.
    pub fn accept(&self) -> Result<(), TransactionError> {
        {
            let s = self.shared.lock().unwrap();
            if s.file.is_none() {
                return Err(TransactionError::InvalidState(
                    "accept() before the file infos arrived",
                ));
            }
            if s.destination.is_none() {
                return Err(TransactionError::InvalidState(
                    "accept() before a destination was chosen",
                ));
            }
        }
        self.cmd_tx
            .send(ReceiverCommand::Accept)
            .map_err(|_| TransactionError::Closed)
    }

    /// Confirms the complete file: sends `TRANSACTION_END` and closes the
    /// collector's socket.
    pub fn finish(&self) -> Result<(), TransactionError> {
        if self.shared.lock().unwrap().transfer_cancel.is_none() {
            return Err(TransactionError::InvalidState(
                "finish() before the transfer was accepted",
            ));
        }
        self.cmd_tx
            .send(ReceiverCommand::Finish)
            .map_err(|_| TransactionError::Closed)
    }

    pub fn transaction_id(&self) -> &str {
        &self.transaction_id
    }

    pub fn state(&self) -> TransactionState {
        self.shared.lock().unwrap().lifecycle.state()
    }

    /// Metadata announced by the sender, once known.
    pub fn file_info(&self) -> Option<FileInfo> {
        self.shared.lock().unwrap().file.clone()
    }

    /// Closes the control socket. Safe to call any number of times. Does
    /// not tear down an in-flight transfer; see
    /// [`cancel_transfer`](Self::cancel_transfer).
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Closes the binary socket of an in-flight transfer, if any. The
    /// partially written destination file is left on disk as-is.
    pub fn cancel_transfer(&self) {
        if let Some(tc) = self.shared.lock().unwrap().transfer_cancel.clone() {
            tc.cancel();
        }
    }
}

/// Select loop for the receiver's control socket.
pub(crate) async fn run_receiver<Si, St>(
    mut sink: Si,
    mut stream: St,
    binary_url: String,
    shared: SharedHandle,
    mut cmd_rx: mpsc::UnboundedReceiver<ReceiverCommand>,
    events: mpsc::Sender<TransactionEvent>,
    cancel: CancellationToken,
) where
    Si: Sink<WsMessage, Error = WsError> + Unpin,
    St: Stream<Item = Result<WsMessage, WsError>> + Unpin,
{
    shared.lock().unwrap().lifecycle.advance(TransactionState::Open);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            cmd = cmd_rx.recv() => match cmd {
                Some(ReceiverCommand::Accept) => {
                    let destination = shared.lock().unwrap().destination.clone();
                    let Some(destination) = destination else {
                        warn!("accept with no destination recorded");
                        continue;
                    };
                    if send_envelope(&mut sink, &Envelope::control(MessageType::TransactionAccept))
                        .await
                        .is_err()
                    {
                        break;
                    }
                    let advanced = shared
                        .lock()
                        .unwrap()
                        .lifecycle
                        .advance(TransactionState::Accepted);
                    if advanced && events.send(TransactionEvent::Accepted).await.is_err() {
                        break;
                    }

                    let transfer_cancel = CancellationToken::new();
                    shared.lock().unwrap().transfer_cancel = Some(transfer_cancel.clone());

                    let url = binary_url.clone();
                    let events = events.clone();
                    tokio::spawn(async move {
                        if let Err(e) =
                            collector::run(url, destination, events.clone(), transfer_cancel).await
                        {
                            let _ = events
                                .send(TransactionEvent::StreamFailed(e.to_string()))
                                .await;
                        }
                    });
                }
                Some(ReceiverCommand::Finish) => {
                    if send_envelope(&mut sink, &Envelope::control(MessageType::TransactionEnd))
                        .await
                        .is_err()
                    {
                        break;
                    }
                    // The byte stream is complete; the binary socket has no
                    // further purpose.
                    if let Some(tc) = shared.lock().unwrap().transfer_cancel.clone() {
                        tc.cancel();
                    }
                    let advanced = shared
                        .lock()
                        .unwrap()
                        .lifecycle
                        .advance(TransactionState::Finished);
                    if advanced && events.send(TransactionEvent::Finished).await.is_err() {
                        break;
                    }
                }
                None => break,
            },

            frame = stream.next() => {
                if handle_inbound(frame, &shared, &events).await == FrameOutcome::Stop {
                    break;
                }
            }
        }
    }

    let _ = sink.send(WsMessage::Close(None)).await;
    let _ = events.send(TransactionEvent::Closed).await;
}

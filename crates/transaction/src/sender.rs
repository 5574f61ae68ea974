//! The sending role of a transaction.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use handoff_protocol::{Envelope, FileInfo, MessageType, RelayConfig};
use handoff_socket::{ConnectError, WsError, WsMessage};

use crate::session::{
    EVENT_CHANNEL_SIZE, FrameOutcome, Shared, SharedHandle, handle_inbound, send_envelope,
    surface_connect_error,
};
use crate::state::TransactionState;
use crate::{TransactionError, TransactionEvent, streamer};

pub(crate) enum SenderCommand {
    Start,
    StreamerDone,
    StreamerFailed(String),
}

/// Handle onto the sending side of a transaction.
///
/// Created with [`offer`](Self::offer), which registers the transaction on
/// the relay and announces the file. Once the receiver accepts,
/// [`start`](Self::start) launches the chunked transfer on a dedicated
/// binary socket while the control socket stays responsive.
pub struct SenderTransaction {
    transaction_id: String,
    shared: SharedHandle,
    cmd_tx: mpsc::UnboundedSender<SenderCommand>,
    cancel: CancellationToken,
}

impl SenderTransaction {
    /// Offers `path` under `transaction_id`.
    ///
    /// Reads the file metadata up front (failing with an I/O error if the
    /// file is unreadable), then returns immediately; the session task
    /// connects with `sender=true` and sends `TRANSACTION_INFOS` as soon as
    /// the socket opens. Connection refusals arrive on the event channel.
    pub async fn offer(
        config: &RelayConfig,
        transaction_id: &str,
        path: impl Into<PathBuf>,
    ) -> Result<(Self, mpsc::Receiver<TransactionEvent>), TransactionError> {
        let path = path.into();
        let info = probe_file(&path).await?;

        let control_url = config.transaction_url(transaction_id, true);
        let binary_url = config.transaction_binary_url(transaction_id, true);

        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let shared = Shared::new();
        let cancel = CancellationToken::new();

        let session = Self {
            transaction_id: transaction_id.to_owned(),
            shared: Arc::clone(&shared),
            cmd_tx: cmd_tx.clone(),
            cancel: cancel.clone(),
        };

        tokio::spawn(async move {
            match handoff_socket::connect(&control_url).await {
                Ok((sink, stream)) => {
                    debug!(control_url, "sender session connected");
                    let open_binary = move || async move {
                        handoff_socket::connect(&binary_url)
                            .await
                            .map(|(sink, _stream)| sink)
                    };
                    run_sender(
                        sink, stream, open_binary, info, path, shared, cmd_tx, cmd_rx, events_tx,
                        cancel,
                    )
                    .await;
                }
                Err(e) => {
                    surface_connect_error(&e.to_string(), &events_tx).await;
                    let _ = events_tx.send(TransactionEvent::Closed).await;
                }
            }
        });

        Ok((session, events_rx))
    }

    /// Signals the start of the transfer and launches the streamer.
    ///
    /// Valid only once the receiver has accepted. The `TRANSACTION_START`
    /// control message is fully written before the first binary frame goes
    /// out, so the receiving side can rely on that ordering.
    pub fn start(&self) -> Result<(), TransactionError> {
        let state = self.shared.lock().unwrap().lifecycle.state();
        if state != TransactionState::Accepted {
            return Err(TransactionError::InvalidState(
                "start() requires the receiver to have accepted",
            ));
        }
        self.cmd_tx
            .send(SenderCommand::Start)
            .map_err(|_| TransactionError::Closed)
    }

    pub fn transaction_id(&self) -> &str {
        &self.transaction_id
    }

    pub fn state(&self) -> TransactionState {
        self.shared.lock().unwrap().lifecycle.state()
    }

    /// Metadata of the offered file.
    pub fn file_info(&self) -> Option<FileInfo> {
        self.shared.lock().unwrap().file.clone()
    }

    /// Closes the control socket. Safe to call any number of times. Does
    /// not tear down an in-flight transfer; see
    /// [`cancel_transfer`](Self::cancel_transfer).
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Closes the binary socket of an in-flight transfer, if any.
    pub fn cancel_transfer(&self) {
        if let Some(tc) = self.shared.lock().unwrap().transfer_cancel.clone() {
            tc.cancel();
        }
    }
}

/// Derives the offered metadata from the local filesystem.
async fn probe_file(path: &Path) -> Result<FileInfo, TransactionError> {
    let metadata = tokio::fs::metadata(path).await?;
    if !metadata.is_file() {
        return Err(TransactionError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "not a regular file",
        )));
    }
    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_owned)
        .ok_or_else(|| {
            TransactionError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "path has no file name",
            ))
        })?;
    Ok(FileInfo {
        filename,
        filesize: metadata.len(),
    })
}

/// Select loop for the sender's control socket.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn run_sender<Si, St, F, Fut, Bi>(
    mut sink: Si,
    mut stream: St,
    open_binary: F,
    info: FileInfo,
    path: PathBuf,
    shared: SharedHandle,
    cmd_tx: mpsc::UnboundedSender<SenderCommand>,
    mut cmd_rx: mpsc::UnboundedReceiver<SenderCommand>,
    events: mpsc::Sender<TransactionEvent>,
    cancel: CancellationToken,
) where
    Si: Sink<WsMessage, Error = WsError> + Unpin,
    St: Stream<Item = Result<WsMessage, WsError>> + Unpin,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Bi, ConnectError>> + Send + 'static,
    Bi: Sink<WsMessage, Error = WsError> + Unpin + Send + 'static,
{
    {
        let mut s = shared.lock().unwrap();
        s.lifecycle.advance(TransactionState::Open);
        s.file = Some(info.clone());
    }

    // The relay learns about the file as soon as the control socket opens.
    match Envelope::infos(&info) {
        Ok(env) => {
            if send_envelope(&mut sink, &env).await.is_err() {
                let _ = events.send(TransactionEvent::Closed).await;
                return;
            }
        }
        Err(e) => warn!("could not encode file infos: {e}"),
    }

    let mut open_binary = Some(open_binary);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            cmd = cmd_rx.recv() => match cmd {
                Some(SenderCommand::Start) => {
                    // The start signal must be fully written before the
                    // streamer is allowed to produce its first frame.
                    if send_envelope(&mut sink, &Envelope::control(MessageType::TransactionStart))
                        .await
                        .is_err()
                    {
                        break;
                    }
                    shared.lock().unwrap().lifecycle.advance(TransactionState::Started);

                    let Some(open) = open_binary.take() else {
                        warn!("transfer already launched");
                        continue;
                    };
                    let transfer_cancel = CancellationToken::new();
                    shared.lock().unwrap().transfer_cancel = Some(transfer_cancel.clone());

                    let events = events.clone();
                    let cmd_tx = cmd_tx.clone();
                    let path = path.clone();
                    tokio::spawn(async move {
                        match streamer::run(open(), &path, &events, &transfer_cancel).await {
                            Ok(_) => {
                                let _ = cmd_tx.send(SenderCommand::StreamerDone);
                            }
                            Err(e) => {
                                let _ = cmd_tx.send(SenderCommand::StreamerFailed(e.to_string()));
                            }
                        }
                    });
                }
                Some(SenderCommand::StreamerDone) => {
                    if send_envelope(&mut sink, &Envelope::control(MessageType::TransactionUpload))
                        .await
                        .is_err()
                    {
                        break;
                    }
                    let advanced = shared
                        .lock()
                        .unwrap()
                        .lifecycle
                        .advance(TransactionState::Uploaded);
                    if advanced && events.send(TransactionEvent::Uploaded).await.is_err() {
                        break;
                    }
                }
                Some(SenderCommand::StreamerFailed(error)) => {
                    // Surfaced only. The control socket stays open so the
                    // caller can still cancel explicitly; there is no retry.
                    if events.send(TransactionEvent::StreamFailed(error)).await.is_err() {
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

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{sink, stream};
    use std::sync::Mutex;

    type FrameLog = Arc<Mutex<Vec<(&'static str, WsMessage)>>>;

    fn labeled_sink(
        label: &'static str,
        log: FrameLog,
    ) -> impl Sink<WsMessage, Error = WsError> + Unpin + Send + 'static {
        Box::pin(sink::unfold(
            (label, log),
            |(label, log), msg: WsMessage| async move {
                log.lock().unwrap().push((label, msg));
                Ok::<_, WsError>((label, log))
            },
        ))
    }

    fn control_text(msg: &WsMessage) -> Option<&str> {
        match msg {
            WsMessage::Text(text) => Some(text.as_str()),
            _ => None,
        }
    }

    fn sample_file(len: usize) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payload.bin");
        std::fs::write(&path, vec![0xA5u8; len]).unwrap();
        (dir, path)
    }

    #[tokio::test]
    async fn probe_file_uses_final_path_segment_and_size() {
        let (_dir, path) = sample_file(321);
        let info = probe_file(&path).await.unwrap();
        assert_eq!(info.filename, "payload.bin");
        assert_eq!(info.filesize, 321);
    }

    #[tokio::test]
    async fn probe_file_surfaces_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = probe_file(&dir.path().join("nope.bin")).await;
        assert!(matches!(result, Err(TransactionError::Io(_))));
    }

    #[tokio::test]
    async fn infos_are_announced_when_the_socket_opens() {
        let (_dir, path) = sample_file(64);
        let log: FrameLog = Arc::new(Mutex::new(Vec::new()));
        let (events_tx, mut events_rx) = mpsc::channel(256);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let binary_log = Arc::clone(&log);
        let c = cancel.clone();
        let handle = tokio::spawn(run_sender(
            labeled_sink("control", Arc::clone(&log)),
            stream::pending(),
            move || async move { Ok(labeled_sink("binary", binary_log)) },
            FileInfo {
                filename: "payload.bin".into(),
                filesize: 64,
            },
            path,
            Shared::new(),
            cmd_tx,
            cmd_rx,
            events_tx,
            c,
        ));

        // Give the session a moment to write the offer, then shut down.
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        cancel.cancel();
        handle.await.unwrap();

        let log = log.lock().unwrap();
        let first = control_text(&log[0].1).unwrap();
        assert!(first.contains("TRANSACTION_INFOS"));
        assert!(first.contains("payload.bin"));
        assert!(first.contains("64"));

        // The caller sees the session close, nothing else.
        let mut saw_closed = false;
        while let Ok(event) = events_rx.try_recv() {
            saw_closed |= event == TransactionEvent::Closed;
        }
        assert!(saw_closed);
    }

    #[tokio::test]
    async fn start_signal_precedes_first_binary_frame() {
        let (_dir, path) = sample_file(5000);
        let log: FrameLog = Arc::new(Mutex::new(Vec::new()));
        let (events_tx, mut events_rx) = mpsc::channel(256);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let binary_log = Arc::clone(&log);
        let c = cancel.clone();
        let handle = tokio::spawn(run_sender(
            labeled_sink("control", Arc::clone(&log)),
            stream::pending(),
            move || async move { Ok(labeled_sink("binary", binary_log)) },
            FileInfo {
                filename: "payload.bin".into(),
                filesize: 5000,
            },
            path,
            Shared::new(),
            cmd_tx.clone(),
            cmd_rx,
            events_tx,
            c,
        ));

        cmd_tx.send(SenderCommand::Start).unwrap();

        // The upload notification marks the end of the whole sequence.
        let mut progressed = 0u64;
        loop {
            match events_rx.recv().await.unwrap() {
                TransactionEvent::Progressed(n) => progressed += n,
                TransactionEvent::Uploaded => break,
                _ => {}
            }
        }
        cancel.cancel();
        handle.await.unwrap();
        assert_eq!(progressed, 5000);

        let log = log.lock().unwrap();
        let start_idx = log
            .iter()
            .position(|(label, msg)| {
                *label == "control"
                    && control_text(msg).is_some_and(|t| t.contains("TRANSACTION_START"))
            })
            .expect("start frame sent");
        let first_binary_idx = log
            .iter()
            .position(|(label, msg)| *label == "binary" && matches!(msg, WsMessage::Binary(_)))
            .expect("binary frames sent");
        assert!(
            start_idx < first_binary_idx,
            "start signal must be on the wire before the first chunk"
        );

        // ⌈5000/2048⌉ chunks, then the upload confirmation on the control
        // channel after the last of them.
        let binary_frames = log
            .iter()
            .filter(|(label, msg)| *label == "binary" && matches!(msg, WsMessage::Binary(_)))
            .count();
        assert_eq!(binary_frames, 3);
        let upload_idx = log
            .iter()
            .position(|(label, msg)| {
                *label == "control"
                    && control_text(msg).is_some_and(|t| t.contains("TRANSACTION_UPLOAD"))
            })
            .expect("upload frame sent");
        let last_binary_idx = log
            .iter()
            .rposition(|(label, msg)| *label == "binary" && matches!(msg, WsMessage::Binary(_)))
            .unwrap();
        assert!(last_binary_idx < upload_idx);
    }

    #[tokio::test]
    async fn unreadable_file_surfaces_stream_failure_and_keeps_the_session() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("vanished.bin");
        let log: FrameLog = Arc::new(Mutex::new(Vec::new()));
        let (events_tx, mut events_rx) = mpsc::channel(256);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let binary_log = Arc::clone(&log);
        let c = cancel.clone();
        let handle = tokio::spawn(run_sender(
            labeled_sink("control", Arc::clone(&log)),
            stream::pending(),
            move || async move { Ok(labeled_sink("binary", binary_log)) },
            FileInfo {
                filename: "vanished.bin".into(),
                filesize: 9,
            },
            missing,
            Shared::new(),
            cmd_tx.clone(),
            cmd_rx,
            events_tx,
            c,
        ));

        cmd_tx.send(SenderCommand::Start).unwrap();

        loop {
            match events_rx.recv().await.unwrap() {
                TransactionEvent::StreamFailed(_) => break,
                TransactionEvent::Closed => panic!("session must survive a failed stream"),
                _ => {}
            }
        }

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn start_requires_an_accepted_transaction() {
        let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel();
        let session = SenderTransaction {
            transaction_id: "t-1".into(),
            shared: Shared::new(),
            cmd_tx,
            cancel: CancellationToken::new(),
        };

        assert!(matches!(
            session.start(),
            Err(TransactionError::InvalidState(_))
        ));

        session
            .shared
            .lock()
            .unwrap()
            .lifecycle
            .advance(TransactionState::Accepted);
        session.start().unwrap();
        assert!(matches!(cmd_rx.try_recv(), Ok(SenderCommand::Start)));
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (cmd_tx, _cmd_rx) = mpsc::unbounded_channel();
        let session = SenderTransaction {
            transaction_id: "t-1".into(),
            shared: Shared::new(),
            cmd_tx,
            cancel: CancellationToken::new(),
        };
        session.close();
        session.close();
        session.cancel_transfer();
        session.cancel_transfer();
        assert!(session.cancel.is_cancelled());
    }
}

//! Collection of inbound binary frames into the destination file.

use std::path::PathBuf;

use futures_util::{SinkExt, Stream, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use handoff_socket::{WsError, WsMessage};

use crate::{TransactionError, TransactionEvent};

/// Truncates the destination, opens the binary channel, and appends frames
/// until the socket closes or the transfer is cancelled.
///
/// Returns the number of bytes written. A partially written file is left on
/// disk as-is; whether the file is complete is decided by the control
/// channel's filesize, never by socket closure.
pub(crate) async fn run(
    url: String,
    path: PathBuf,
    events: mpsc::Sender<TransactionEvent>,
    cancel: CancellationToken,
) -> Result<u64, TransactionError> {
    // Truncate before any byte can arrive.
    let mut file = tokio::fs::File::create(&path).await?;

    let (mut sink, stream) = handoff_socket::connect(&url)
        .await
        .map_err(|e| TransactionError::Transport(e.to_string()))?;

    let total = collect(stream, &mut file, &events, &cancel).await?;
    let _ = sink.send(WsMessage::Close(None)).await;
    let _ = sink.close().await;
    debug!(total, path = %path.display(), "file collected");
    Ok(total)
}

/// Appends every inbound binary frame to `file` in arrival order, emitting a
/// progress increment per frame. Frames are never reordered or buffered;
/// ordering within the single socket is the transport's job.
pub(crate) async fn collect<St>(
    mut stream: St,
    file: &mut tokio::fs::File,
    events: &mpsc::Sender<TransactionEvent>,
    cancel: &CancellationToken,
) -> Result<u64, TransactionError>
where
    St: Stream<Item = Result<WsMessage, WsError>> + Unpin,
{
    let mut total: u64 = 0;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            frame = stream.next() => match frame {
                Some(Ok(WsMessage::Binary(chunk))) => {
                    file.write_all(&chunk).await?;
                    total += chunk.len() as u64;
                    if events
                        .send(TransactionEvent::Progressed(chunk.len() as u64))
                        .await
                        .is_err()
                    {
                        return Err(TransactionError::Closed);
                    }
                }
                // Closure is not completion.
                Some(Ok(WsMessage::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("binary socket error: {e}");
                    break;
                }
            },
        }
    }
    file.flush().await?;
    Ok(total)
}

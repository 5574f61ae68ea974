//! Chunked streaming of the source file onto a transaction's binary channel.

use std::path::Path;

use futures_util::{Sink, SinkExt};
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use handoff_protocol::CHUNK_SIZE;
use handoff_socket::{ConnectError, WsError, WsMessage};

use crate::{TransactionError, TransactionEvent};

/// Opens the binary channel, streams the whole file, then closes the socket.
///
/// Returns the number of bytes sent. The socket is single-use: one file,
/// then gone.
pub(crate) async fn run<Fut, Bi>(
    open: Fut,
    path: &Path,
    events: &mpsc::Sender<TransactionEvent>,
    cancel: &CancellationToken,
) -> Result<u64, TransactionError>
where
    Fut: Future<Output = Result<Bi, ConnectError>>,
    Bi: Sink<WsMessage, Error = WsError> + Unpin,
{
    let mut sink = open
        .await
        .map_err(|e| TransactionError::Transport(e.to_string()))?;
    let total = stream_chunks(&mut sink, path, events, cancel).await?;
    let _ = sink.send(WsMessage::Close(None)).await;
    let _ = sink.close().await;
    debug!(total, "file streamed");
    Ok(total)
}

/// Reads `path` sequentially and writes one binary frame per chunk, in
/// order, emitting a progress increment after each frame.
///
/// Every frame carries exactly [`CHUNK_SIZE`] bytes except the last, which
/// carries the remainder: a file of `S` bytes becomes `⌈S/CHUNK_SIZE⌉`
/// frames and as many progress increments.
pub(crate) async fn stream_chunks<Si>(
    sink: &mut Si,
    path: &Path,
    events: &mpsc::Sender<TransactionEvent>,
    cancel: &CancellationToken,
) -> Result<u64, TransactionError>
where
    Si: Sink<WsMessage, Error = WsError> + Unpin,
{
    let mut file = tokio::fs::File::open(path).await?;
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut total: u64 = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(TransactionError::Cancelled);
        }

        // Fill the chunk completely; only the final chunk may be short.
        let mut n = 0;
        while n < CHUNK_SIZE {
            let read = file.read(&mut buf[n..]).await?;
            if read == 0 {
                break;
            }
            n += read;
        }
        if n == 0 {
            break;
        }

        sink.send(WsMessage::Binary(buf[..n].to_vec().into()))
            .await
            .map_err(|e| TransactionError::Transport(e.to_string()))?;
        total += n as u64;
        if events
            .send(TransactionEvent::Progressed(n as u64))
            .await
            .is_err()
        {
            return Err(TransactionError::Closed);
        }
    }
    Ok(total)
}

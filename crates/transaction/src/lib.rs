//! File transactions over the handoff relay.
//!
//! A transaction moves exactly one file from a sender to a receiver through
//! two relay sockets: a JSON control channel that carries the lifecycle
//! choreography, and a raw binary channel that carries the bytes in
//! fixed-size chunks. [`SenderTransaction`] and [`ReceiverTransaction`] are
//! the two roles; both surface the same [`TransactionEvent`] stream and both
//! run their sockets in spawned tasks so the caller is never blocked behind
//! transfer I/O.

mod collector;
mod events;
mod receiver;
mod sender;
mod session;
mod state;
mod streamer;

pub use events::TransactionEvent;
pub use receiver::ReceiverTransaction;
pub use sender::SenderTransaction;
pub use state::TransactionState;

/// Errors returned by transaction handles and transfer tasks.
#[derive(Debug, thiserror::Error)]
pub enum TransactionError {
    /// An operation was invoked out of order. Programming error on the
    /// caller's side; nothing was sent.
    #[error("invalid operation for the current transaction state: {0}")]
    InvalidState(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transport error: {0}")]
    Transport(String),

    /// The transfer was cancelled by closing its socket.
    #[error("transfer cancelled")]
    Cancelled,

    /// The session task is no longer running.
    #[error("transaction session closed")]
    Closed,
}

/// Generates a fresh transaction id.
///
/// Ids are minted on the sender's machine and shared with the receiver out
/// of band; the relay accepts any UUID-shaped string.
pub fn new_transaction_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_ids_are_unique_uuids() {
        let a = new_transaction_id();
        let b = new_transaction_id();
        assert_ne!(a, b);
        assert!(uuid::Uuid::parse_str(&a).is_ok());
    }
}

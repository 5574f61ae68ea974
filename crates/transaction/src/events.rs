use handoff_protocol::{FileInfo, Refusal};

/// Events emitted by a transaction session, identical for both roles.
#[derive(Debug, Clone, PartialEq)]
pub enum TransactionEvent {
    /// The file metadata is known: the offer itself on the receiver, the
    /// relay's confirmation echo on the sender.
    InfosReceived(FileInfo),
    /// The receiver accepted the transaction.
    Accepted,
    /// Every byte of the file has been placed on the binary channel.
    Uploaded,
    /// The transaction ran to completion.
    Finished,
    /// The remote party left before completion.
    PeerLeft,
    /// The relay rejected the connection. The session closes afterwards.
    Refused(Refusal),
    /// `n` more bytes moved on the binary channel.
    Progressed(u64),
    /// A human-readable line for a feed or log. Carries no state.
    Notice(String),
    /// The binary transfer failed locally. The control socket stays open so
    /// the caller can still cancel explicitly; there is no automatic retry.
    StreamFailed(String),
    /// An undecodable control frame arrived. Fatal; the session closes.
    ProtocolViolation(String),
    /// The control socket is gone. Always the last event of a session.
    Closed,
}

//! The role-agnostic lifecycle state machine of a transaction's control
//! channel.

use handoff_protocol::{Envelope, MessageType, ProtocolError};

use crate::TransactionEvent;

/// Position of a transaction in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Control socket not yet established.
    Connecting,
    /// Offered (sender) or joined (receiver); metadata may still be in
    /// flight.
    Open,
    /// The receiver accepted; the transfer may start.
    Accepted,
    /// Bytes are moving on the binary channel.
    Started,
    /// The sender has placed the whole file on the binary channel.
    Uploaded,
    /// The receiver confirmed the complete file. Terminal.
    Finished,
    /// The remote party left before completion. Terminal.
    PeerLeft,
}

fn rank(state: TransactionState) -> u8 {
    match state {
        TransactionState::Connecting => 0,
        TransactionState::Open => 1,
        TransactionState::Accepted => 2,
        TransactionState::Started => 3,
        TransactionState::Uploaded => 4,
        TransactionState::Finished => 5,
        TransactionState::PeerLeft => 6,
    }
}

/// Folds control envelopes and local actions into a [`TransactionState`].
///
/// Transitions are edge-triggered and monotonic: a duplicate or stale
/// envelope confirms the current state without re-emitting its event, and a
/// terminal state never regresses.
#[derive(Debug)]
pub(crate) struct Lifecycle {
    state: TransactionState,
}

impl Lifecycle {
    pub(crate) fn new() -> Self {
        Self {
            state: TransactionState::Connecting,
        }
    }

    pub(crate) fn state(&self) -> TransactionState {
        self.state
    }

    /// Moves forward to `to` if that is actually an advance.
    ///
    /// Used for transitions this side is the authority on: the sender
    /// starting and completing its upload, the receiver accepting and
    /// finishing. Returns whether the state changed.
    pub(crate) fn advance(&mut self, to: TransactionState) -> bool {
        if rank(to) > rank(self.state) {
            self.state = to;
            true
        } else {
            false
        }
    }

    /// Applies one inbound control envelope and returns the events to
    /// surface, display notice included.
    pub(crate) fn apply(
        &mut self,
        env: &Envelope,
    ) -> Result<Vec<TransactionEvent>, ProtocolError> {
        let mut events = Vec::new();
        match env.msg_type {
            MessageType::TransactionInfos | MessageType::TransactionInfosReceived => {
                let info = env.file_info()?;
                let notice = if env.msg_type == MessageType::TransactionInfosReceived {
                    "Transaction infos have been updated on server.".to_owned()
                } else {
                    format!(
                        "Transaction infos received from server: file is {} ({} bytes)",
                        info.filename, info.filesize
                    )
                };
                events.push(TransactionEvent::Notice(notice));
                events.push(TransactionEvent::InfosReceived(info));
                self.advance(TransactionState::Open);
            }
            MessageType::TransactionJoin => {
                events.push(TransactionEvent::Notice(
                    "Receiver has joined the transaction.".to_owned(),
                ));
            }
            MessageType::TransactionAccept | MessageType::TransactionAcceptReceived => {
                events.push(TransactionEvent::Notice(
                    "Receiver has accepted the transaction.".to_owned(),
                ));
                if self.advance(TransactionState::Accepted) {
                    events.push(TransactionEvent::Accepted);
                }
            }
            MessageType::TransactionStart | MessageType::TransactionStartReceived => {
                // Informational only: `Started` is owned by the side that
                // actually begins streaming.
                events.push(TransactionEvent::Notice(
                    "Sender has started the transaction.".to_owned(),
                ));
            }
            MessageType::TransactionUpload | MessageType::TransactionUploadReceived => {
                events.push(TransactionEvent::Notice(
                    "Receiver starts downloading the file.".to_owned(),
                ));
                if self.advance(TransactionState::Uploaded) {
                    events.push(TransactionEvent::Uploaded);
                }
            }
            MessageType::TransactionEnd | MessageType::TransactionEndReceived => {
                events.push(TransactionEvent::Notice(
                    "Transaction is finished.".to_owned(),
                ));
                if self.advance(TransactionState::Finished) {
                    events.push(TransactionEvent::Finished);
                }
            }
            MessageType::Leave => {
                events.push(TransactionEvent::Notice(
                    "The remote party closed the transaction.".to_owned(),
                ));
                // A peer closing after a completed transfer is ordinary
                // teardown, not a failure.
                if self.state != TransactionState::Finished
                    && self.advance(TransactionState::PeerLeft)
                {
                    events.push(TransactionEvent::PeerLeft);
                }
            }
            // Room-flavored and unknown types carry nothing on this channel.
            _ => {}
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use handoff_protocol::FileInfo;

    fn control(msg_type: MessageType) -> Envelope {
        Envelope::control(msg_type)
    }

    fn infos_envelope() -> Envelope {
        Envelope::infos(&FileInfo {
            filename: "a.bin".into(),
            filesize: 10,
        })
        .unwrap()
    }

    #[test]
    fn typical_receiver_run() {
        let mut lc = Lifecycle::new();

        let events = lc.apply(&infos_envelope()).unwrap();
        assert!(matches!(events[1], TransactionEvent::InfosReceived(_)));
        assert_eq!(lc.state(), TransactionState::Open);

        assert!(lc.advance(TransactionState::Accepted));

        let events = lc
            .apply(&control(MessageType::TransactionUploadReceived))
            .unwrap();
        assert!(events.contains(&TransactionEvent::Uploaded));
        assert_eq!(lc.state(), TransactionState::Uploaded);

        assert!(lc.advance(TransactionState::Finished));
        assert_eq!(lc.state(), TransactionState::Finished);
    }

    #[test]
    fn leave_before_completion_is_terminal() {
        let mut lc = Lifecycle::new();
        lc.apply(&infos_envelope()).unwrap();

        let events = lc.apply(&control(MessageType::Leave)).unwrap();
        assert!(events.contains(&TransactionEvent::PeerLeft));
        assert_eq!(lc.state(), TransactionState::PeerLeft);

        // Nothing moves a departed transaction forward again.
        assert!(!lc.advance(TransactionState::Finished));
        assert_eq!(lc.state(), TransactionState::PeerLeft);
    }

    #[test]
    fn leave_after_finish_does_not_flip_to_peer_left() {
        let mut lc = Lifecycle::new();
        lc.apply(&infos_envelope()).unwrap();
        lc.apply(&control(MessageType::TransactionEndReceived))
            .unwrap();
        assert_eq!(lc.state(), TransactionState::Finished);

        let events = lc.apply(&control(MessageType::Leave)).unwrap();
        assert_eq!(lc.state(), TransactionState::Finished);
        assert!(!events.contains(&TransactionEvent::PeerLeft));
        // The departure still shows up in the feed.
        assert!(
            events
                .iter()
                .any(|e| matches!(e, TransactionEvent::Notice(_)))
        );
    }

    #[test]
    fn duplicate_accept_emits_once() {
        let mut lc = Lifecycle::new();
        lc.apply(&infos_envelope()).unwrap();

        let first = lc
            .apply(&control(MessageType::TransactionAcceptReceived))
            .unwrap();
        assert!(first.contains(&TransactionEvent::Accepted));

        let second = lc
            .apply(&control(MessageType::TransactionAcceptReceived))
            .unwrap();
        assert!(!second.contains(&TransactionEvent::Accepted));
        // The notice is still worth a feed line.
        assert!(
            second
                .iter()
                .any(|e| matches!(e, TransactionEvent::Notice(_)))
        );
    }

    #[test]
    fn stale_upload_echo_does_not_regress_a_finished_transaction() {
        let mut lc = Lifecycle::new();
        lc.apply(&infos_envelope()).unwrap();
        lc.apply(&control(MessageType::TransactionEndReceived))
            .unwrap();

        let events = lc
            .apply(&control(MessageType::TransactionUploadReceived))
            .unwrap();
        assert_eq!(lc.state(), TransactionState::Finished);
        assert!(!events.contains(&TransactionEvent::Uploaded));
    }

    #[test]
    fn start_is_informational() {
        let mut lc = Lifecycle::new();
        lc.apply(&infos_envelope()).unwrap();
        lc.apply(&control(MessageType::TransactionAcceptReceived))
            .unwrap();

        let events = lc
            .apply(&control(MessageType::TransactionStartReceived))
            .unwrap();
        assert_eq!(lc.state(), TransactionState::Accepted);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], TransactionEvent::Notice(_)));
    }

    #[test]
    fn join_is_informational() {
        let mut lc = Lifecycle::new();
        let events = lc.apply(&control(MessageType::TransactionJoin)).unwrap();
        assert_eq!(lc.state(), TransactionState::Connecting);
        assert_eq!(
            events,
            vec![TransactionEvent::Notice(
                "Receiver has joined the transaction.".into()
            )]
        );
    }

    #[test]
    fn malformed_infos_body_is_an_error() {
        let mut lc = Lifecycle::new();
        let env = Envelope::control(MessageType::TransactionInfos);
        assert!(lc.apply(&env).is_err());
        assert_eq!(lc.state(), TransactionState::Connecting);
    }
}

//! Translation of relay transport errors into structured refusals.
//!
//! The relay signals a rejected connection through the transport's error
//! text rather than an in-band message, so the raw text has to be pattern
//! matched. All matching lives here; sessions only ever see [`Refusal`]
//! values. The markers are relay-implementation constants, not protocol
//! semantics, and can be swapped without touching session logic.

use std::fmt;

/// Marker found in room connection errors when the alias is already taken.
const CONFLICT_MARKER: &str = "409";

/// Marker found in transaction connection errors when no such transaction
/// exists on the relay.
const NOT_FOUND_MARKER: &str = "404";

/// Markers found in transaction connection errors when the transaction
/// already has both parties. The relay answers with an authentication
/// challenge, so either the status code or the challenge header may show up
/// in the error text depending on the transport.
const UNAUTHORIZED_MARKERS: [&str; 2] = ["401", "WWW-Authenticate"];

/// A rejected connection attempt, surfaced to the caller as a recoverable
/// event rather than a raw transport string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refusal {
    /// The alias is already in use in the room.
    Conflict,
    /// The transaction does not exist on the relay.
    NotFound,
    /// The transaction already has both a sender and a receiver.
    Unauthorized,
}

impl Refusal {
    /// The HTTP status the relay uses for this refusal.
    pub fn code(self) -> u16 {
        match self {
            Refusal::Conflict => 409,
            Refusal::NotFound => 404,
            Refusal::Unauthorized => 401,
        }
    }

    /// Matches a room-connection error text. Only the alias conflict is a
    /// refusal on this channel; anything else is ordinary transport trouble.
    pub fn from_room_error(text: &str) -> Option<Self> {
        text.contains(CONFLICT_MARKER).then_some(Refusal::Conflict)
    }

    /// Matches a transaction-connection error text.
    pub fn from_transaction_error(text: &str) -> Option<Self> {
        if text.contains(NOT_FOUND_MARKER) {
            Some(Refusal::NotFound)
        } else if UNAUTHORIZED_MARKERS.iter().any(|m| text.contains(m)) {
            Some(Refusal::Unauthorized)
        } else {
            None
        }
    }
}

impl fmt::Display for Refusal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Refusal::Conflict => write!(f, "alias already in use"),
            Refusal::NotFound => write!(f, "transaction not found"),
            Refusal::Unauthorized => write!(f, "transaction already full"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_conflict_matches() {
        assert_eq!(
            Refusal::from_room_error("HTTP error: 409 Conflict"),
            Some(Refusal::Conflict)
        );
    }

    #[test]
    fn room_ignores_other_errors() {
        assert_eq!(Refusal::from_room_error("connection reset by peer"), None);
        // Transaction-style codes mean nothing on a room connection.
        assert_eq!(Refusal::from_room_error("HTTP error: 404 Not Found"), None);
    }

    #[test]
    fn transaction_not_found_matches() {
        assert_eq!(
            Refusal::from_transaction_error("HTTP error: 404 Not Found"),
            Some(Refusal::NotFound)
        );
    }

    #[test]
    fn transaction_unauthorized_matches_code_and_challenge() {
        assert_eq!(
            Refusal::from_transaction_error("HTTP error: 401 Unauthorized"),
            Some(Refusal::Unauthorized)
        );
        assert_eq!(
            Refusal::from_transaction_error("handshake failed: WWW-Authenticate: Basic"),
            Some(Refusal::Unauthorized)
        );
    }

    #[test]
    fn transaction_ignores_unrelated_errors() {
        assert_eq!(Refusal::from_transaction_error("connection timed out"), None);
    }

    #[test]
    fn codes_round_trip() {
        assert_eq!(Refusal::Conflict.code(), 409);
        assert_eq!(Refusal::NotFound.code(), 404);
        assert_eq!(Refusal::Unauthorized.code(), 401);
    }
}

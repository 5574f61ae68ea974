//! Room membership and chat over a relay control socket.
//!
//! A [`RoomSession`] joins one room on the relay and turns its frames into
//! [`RoomEvent`]s: chat text, presence sentences, and occupant snapshots.
//! Sending chat goes back out through the same socket; the relay echoes it,
//! and the echo is the only copy the caller ever renders.

mod session;

pub use session::{ChatMessage, RoomError, RoomEvent, RoomSession};

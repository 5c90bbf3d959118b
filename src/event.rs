//! Events emitted by the session to its presentation layer.
//!
//! Each variant is a view-model update. [`render`](crate::display::render)
//! maps them onto a [`DisplaySink`](crate::display::DisplaySink); consumers
//! can also match on them directly.

use crate::protocol::{PlayerId, TransformTable};
use crate::session::SessionPhase;

/// A view-model update produced by the session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The channel opened. Always the first event of a connection.
    Connected,
    /// The server assigned this client its identity.
    PlayerIdAssigned { player_id: PlayerId },
    /// A line for the bounded message log.
    LogMessage { text: String },
    /// The room list was replaced. Pick one with
    /// [`SessionClient::select_room`](crate::SessionClient::select_room).
    RoomList { rooms: Vec<String> },
    /// The session moved to a new phase.
    PhaseChanged { phase: SessionPhase },
    /// Countdown display update.
    CountdownTick { seconds_remaining: u64 },
    /// The countdown display should be hidden.
    CountdownHidden,
    /// Latest transforms of every player in the room.
    TransformTable { transforms: TransformTable },
    /// A message with a missing or unrecognized `step` was ignored.
    UnknownMessage { raw: String },
    /// A structurally invalid message was ignored.
    MalformedMessage { raw: String, error: String },
    /// All view state should be cleared.
    Reset,
    /// The connection ended. Always the last event of a connection.
    Disconnected { reason: Option<String> },
}

//! Error types for the room layer.

use partyhall_game::GameFault;
use partyhall_protocol::{LifecycleState, PlayerId, RoomId};

/// Errors returned to the caller of a room operation.
#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    /// The room does not exist (or has already closed and been removed).
    #[error("room {0} not found")]
    NotFound(RoomId),

    /// Every seat is taken.
    #[error("room {0} is full")]
    RoomFull(RoomId),

    /// The room is finishing or closed and takes no new players.
    #[error("room {0} is closed")]
    RoomClosed(RoomId),

    /// The player already has a seat in this room.
    #[error("player {0} is already seated in room {1}")]
    AlreadySeated(PlayerId, RoomId),

    /// The player is seated in another room. A player holds at most one seat.
    #[error("player {0} is already in room {1}")]
    AlreadyInRoom(PlayerId, RoomId),

    #[error("player {0} not in room {1}")]
    NotInRoom(PlayerId, RoomId),

    #[error("wrong password for room {0}")]
    WrongPassword(RoomId),

    #[error("only the host of room {0} can do that")]
    NotHost(RoomId),

    #[error("room needs {need} players to start, has {have}")]
    NotEnoughPlayers { have: usize, need: usize },

    #[error("not every player is ready")]
    NotReady,

    /// The room's lifecycle doesn't allow this operation.
    #[error("not allowed while the room is {0}")]
    InvalidState(LifecycleState),

    /// The room's command queue stayed full; the command was dropped.
    #[error("room {0} is busy, try again")]
    Busy(RoomId),

    /// A room option the mode does not accept.
    #[error("invalid room option: {0}")]
    InvalidOption(String),

    /// The room's command channel is closed; the actor has stopped.
    #[error("room {0} is unavailable")]
    Unavailable(RoomId),

    #[error(transparent)]
    Capacity(#[from] CapacityError),

    #[error(transparent)]
    Fatal(#[from] FatalRoomError),
}

/// A server-wide limit was reached.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CapacityError {
    #[error("server is at its limit of {max} rooms")]
    TooManyRooms { max: usize },
}

/// The game rules failed in a way the room cannot recover from. The room
/// aborts its match and closes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FatalRoomError {
    #[error("game rules panicked in {hook}")]
    RulesPanicked { hook: &'static str },

    #[error(transparent)]
    Fault(#[from] GameFault),
}

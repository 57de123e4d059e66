//! Unified error type for the partyhall server.

use partyhall_protocol::{codes, ProtocolError};
use partyhall_room::RoomError;
use partyhall_session::SessionError;
use partyhall_transport::TransportError;

/// Top-level error that wraps every layer's errors.
///
/// The router turns any of these into a `ServerMessage::Error` with the
/// code from [`code()`](Self::code); the connection keeps running unless
/// the transport itself failed.
#[derive(Debug, thiserror::Error)]
pub enum PartyhallError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Room(#[from] RoomError),

    /// Anything but a heartbeat arrived before `Login`.
    #[error("log in first")]
    LoginRequired,

    #[error("already logged in as {0}")]
    AlreadyLoggedIn(partyhall_protocol::PlayerId),
}

impl PartyhallError {
    /// The wire error code for this error.
    pub fn code(&self) -> u16 {
        match self {
            Self::Protocol(_) => codes::MALFORMED,
            Self::LoginRequired => codes::LOGIN_REQUIRED,
            Self::AlreadyLoggedIn(_) => codes::CONFLICT,
            Self::Transport(_) => codes::INTERNAL,
            Self::Session(err) => match err {
                SessionError::NotFound(_) => codes::NOT_FOUND,
                _ => codes::AUTH_FAILED,
            },
            Self::Room(err) => room_code(err),
        }
    }
}

fn room_code(err: &RoomError) -> u16 {
    match err {
        RoomError::NotFound(_) | RoomError::NotInRoom(..) | RoomError::Unavailable(_) => {
            codes::NOT_FOUND
        }
        RoomError::RoomFull(_) | RoomError::Capacity(_) | RoomError::Busy(_) => codes::CAPACITY,
        RoomError::InvalidOption(_) => codes::MALFORMED,
        RoomError::WrongPassword(_) => codes::AUTH_FAILED,
        RoomError::RoomClosed(_)
        | RoomError::AlreadySeated(..)
        | RoomError::AlreadyInRoom(..)
        | RoomError::NotHost(_)
        | RoomError::NotEnoughPlayers { .. }
        | RoomError::NotReady
        | RoomError::InvalidState(_) => codes::CONFLICT,
        RoomError::Fatal(_) => codes::INTERNAL,
    }
}

//! Why a login, resume or session lookup was refused.

use partyhall_protocol::PlayerId;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Rejected by the [`Authenticator`](crate::Authenticator).
    #[error("login rejected: {0}")]
    AuthFailed(String),

    /// Malformed, forged, or signed with another secret.
    #[error("session token signature does not verify")]
    BadSignature,

    /// The server was configured with an unusable signing secret.
    #[error("session signing secret must not be empty")]
    InvalidSecret,

    #[error("session token has expired")]
    TokenExpired,

    #[error("no session for player {0}")]
    NotFound(PlayerId),

    /// Resume token the server never issued or has already forgotten.
    #[error("unknown resume token")]
    InvalidToken,

    /// The reconnect grace ran out before the player came back.
    #[error("player {0} did not return within the reconnect grace")]
    SessionExpired(PlayerId),
}

//! What the server remembers about a logged-in player between connections.

use std::time::{Duration, Instant};

use partyhall_protocol::PlayerId;

/// Session tuning.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long a dropped player may come back with their resume token.
    /// Zero turns resuming off.
    pub reconnect_grace: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reconnect_grace: Duration::from_secs(30),
        }
    }
}

/// Where a session is in its life.
///
/// ```text
///   Connected ── drop ──▶ Disconnected ── grace runs out ──▶ Expired
///       ▲                      │
///       └────── resume ────────┘
/// ```
#[derive(Debug, Clone)]
pub enum SessionState {
    Connected,
    /// The socket went away at `since`.
    Disconnected { since: Instant },
    /// Waiting for the sweep to delete it.
    Expired,
}

/// One player's session.
#[derive(Debug, Clone)]
pub struct Session {
    pub player_id: PlayerId,
    pub name: String,
    pub state: SessionState,
    /// Presented in `Credentials::resume` after a drop. 32 hex characters.
    pub reconnect_token: String,
}

impl Session {
    pub fn is_connected(&self) -> bool {
        matches!(self.state, SessionState::Connected)
    }

    /// `true` once a Disconnected session has been gone longer than
    /// `grace`. Connected and Expired sessions answer `false`.
    pub fn outlived_grace(&self, grace: Duration) -> bool {
        match self.state {
            SessionState::Disconnected { since } => since.elapsed() > grace,
            _ => false,
        }
    }
}

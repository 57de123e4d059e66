//! Room and registry settings.

use std::time::Duration;

use partyhall_game::modes::gomoku;
use partyhall_game::ModeInfo;
use partyhall_protocol::GameMode;

use crate::RoomError;

// ---------------------------------------------------------------------------
// RegistryConfig
// ---------------------------------------------------------------------------

/// Process-wide limits shared by every room.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Rooms that may exist at once, in any lifecycle state.
    pub max_rooms: usize,

    /// How long a seat is held for a player who dropped mid-game.
    pub reconnect_grace: Duration,

    /// How long a finished room stays in `Resolving` before it closes.
    pub resolve_grace: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_rooms: 1000,
            reconnect_grace: Duration::from_secs(30),
            resolve_grace: Duration::from_secs(10),
        }
    }
}

// ---------------------------------------------------------------------------
// RoomConfig
// ---------------------------------------------------------------------------

/// Settings for one room, fixed at creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomConfig {
    pub mode: GameMode,

    /// Minimum seated players before the host may start.
    pub min_players: usize,

    /// Number of seats.
    pub max_players: usize,

    /// Tick rate in Hz. 0 means the room advances on actions only.
    pub tick_rate_hz: u32,

    pub reconnect_grace: Duration,
    pub resolve_grace: Duration,
}

impl RoomConfig {
    /// Sizes a room from the mode's rules.
    pub fn for_mode(mode: GameMode, registry: &RegistryConfig) -> Self {
        let info = ModeInfo::for_mode(mode);
        Self {
            mode,
            min_players: info.min_players,
            max_players: info.max_players,
            tick_rate_hz: info.tick_rate_hz,
            reconnect_grace: registry.reconnect_grace,
            resolve_grace: registry.resolve_grace,
        }
    }

    pub fn is_tick_driven(&self) -> bool {
        self.tick_rate_hz > 0
    }
}

// ---------------------------------------------------------------------------
// RoomOptions
// ---------------------------------------------------------------------------

/// What the host chose when creating the room.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomOptions {
    /// Display name in the lobby; defaults to "<mode> room".
    pub name: Option<String>,
    /// Private rooms require this password to join and are skipped by
    /// quick match.
    pub password: Option<String>,
    /// Gomoku board edge length; other modes refuse it.
    pub board_size: Option<usize>,
}

impl RoomOptions {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_board_size(mut self, board_size: usize) -> Self {
        self.board_size = Some(board_size);
        self
    }

    /// Rejects options `mode` has no use for.
    pub(crate) fn check(&self, mode: GameMode) -> Result<(), RoomError> {
        match self.board_size {
            Some(size) if mode != GameMode::Gomoku => Err(RoomError::InvalidOption(format!(
                "{mode} has no board size (got {size})"
            ))),
            Some(size) if !gomoku::BOARD_SIZES.contains(&size) => Err(RoomError::InvalidOption(
                format!("board size {size} outside {:?}", gomoku::BOARD_SIZES),
            )),
            _ => Ok(()),
        }
    }
}

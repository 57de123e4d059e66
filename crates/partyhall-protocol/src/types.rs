//! Core protocol types for partyhall's JSON control channel.
//!
//! Every control message is internally tagged: `{"type": "JoinRoom", ...}`.
//! Lobby-level and room-level traffic share the same two enums,
//! [`ClientMessage`] and [`ServerMessage`]; high-frequency tick traffic
//! uses the binary [`TickFrame`](crate::TickFrame) instead.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ProtocolError;

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// A unique identifier for a player.
///
/// Newtype over `u64` so a `RoomId` can never be passed where a player is
/// expected. `#[serde(transparent)]` keeps the wire form a plain number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(pub u64);

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P-{}", self.0)
    }
}

/// A unique identifier for a room. Never reused while the process lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(pub u64);

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Game modes
// ---------------------------------------------------------------------------

/// The closed set of game modes this server can host.
///
/// Selected by configuration string (`"gomoku"`, `"shooter"`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameMode {
    Gomoku,
    #[serde(alias = "shooter2d")]
    Shooter,
    Werewolf,
    Monopoly,
    Racing,
}

impl GameMode {
    /// Every mode, in a stable order.
    pub const ALL: [GameMode; 5] = [
        Self::Gomoku,
        Self::Shooter,
        Self::Werewolf,
        Self::Monopoly,
        Self::Racing,
    ];

    /// The configuration string for this mode.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gomoku => "gomoku",
            Self::Shooter => "shooter",
            Self::Werewolf => "werewolf",
            Self::Monopoly => "monopoly",
            Self::Racing => "racing",
        }
    }
}

impl fmt::Display for GameMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GameMode {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gomoku" => Ok(Self::Gomoku),
            "shooter" | "shooter2d" => Ok(Self::Shooter),
            "werewolf" => Ok(Self::Werewolf),
            "monopoly" => Ok(Self::Monopoly),
            "racing" => Ok(Self::Racing),
            other => Err(ProtocolError::UnknownMode(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Room lifecycle
// ---------------------------------------------------------------------------

/// The lifecycle state of a room.
///
/// Transitions are strictly ordered:
///
/// ```text
/// Lobby → Active → Resolving → Closed
/// ```
///
/// A room may also jump straight to `Closed` when it empties out or is
/// force-closed after a fault; see [`LifecycleState::can_transition_to`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleState {
    /// Seats are open; players ready up and the host starts the game.
    Lobby,
    /// The game is running.
    Active,
    /// A terminal condition was reached; the result has been broadcast
    /// and the room waits out its grace period.
    Resolving,
    /// The room is gone.
    Closed,
}

impl LifecycleState {
    /// Returns `true` if new players may take a seat.
    pub fn is_joinable(self) -> bool {
        matches!(self, Self::Lobby)
    }

    /// Returns `true` while the game is being played.
    pub fn is_running(self) -> bool {
        matches!(self, Self::Active)
    }

    /// The next state in the normal progression.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Lobby => Some(Self::Active),
            Self::Active => Some(Self::Resolving),
            Self::Resolving => Some(Self::Closed),
            Self::Closed => None,
        }
    }

    /// Returns `true` if moving to `target` is a legal transition.
    pub fn can_transition_to(self, target: Self) -> bool {
        self.next() == Some(target) || (target == Self::Closed && self != Self::Closed)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Lobby => "Lobby",
            Self::Active => "Active",
            Self::Resolving => "Resolving",
            Self::Closed => "Closed",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Recipient
// ---------------------------------------------------------------------------

/// Who should receive a game effect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Recipient {
    /// Every player seated in the room.
    All,
    /// One player only; used for hidden information.
    Player(PlayerId),
    /// Everyone except the given player.
    AllExcept(PlayerId),
}

impl Recipient {
    /// Returns `true` if `player` is part of this audience.
    pub fn includes(&self, player: PlayerId) -> bool {
        match self {
            Self::All => true,
            Self::Player(target) => *target == player,
            Self::AllExcept(excluded) => *excluded != player,
        }
    }
}

// ---------------------------------------------------------------------------
// Lobby data
// ---------------------------------------------------------------------------

/// Login credentials.
///
/// At least one of the fields must identify the player:
/// - `resume` is the resume token from a previous `LoginOk`, valid while
///   the old session is inside its grace period;
/// - `token` is a signed session token;
/// - `name` alone is a guest login, when the server allows guests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub resume: Option<String>,
}

/// One seat as shown in a [`ServerMessage::RoomUpdate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatInfo {
    pub seat: usize,
    pub player_id: PlayerId,
    pub name: String,
    pub ready: bool,
    pub connected: bool,
    pub is_host: bool,
}

/// A room as listed to lobby browsers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSummary {
    pub room_id: RoomId,
    pub mode: GameMode,
    pub name: String,
    pub lifecycle: LifecycleState,
    pub players: usize,
    pub max_players: usize,
    pub has_password: bool,
    pub host: Option<PlayerId>,
}

impl RoomSummary {
    /// Returns `true` if a new player could take a seat right now.
    pub fn has_open_seat(&self) -> bool {
        self.lifecycle.is_joinable() && self.players < self.max_players
    }
}

/// The final result of a match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Outcome {
    /// One or more players won. `ranking` lists every player best-first
    /// for modes that rank (racing, monopoly); it is empty otherwise.
    Win {
        winners: Vec<PlayerId>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        ranking: Vec<PlayerId>,
        reason: String,
    },
    /// Nobody won.
    Draw { reason: String },
    /// The room was force-closed before a result.
    Aborted { reason: String },
}

/// A full or incremental view of game state, as sent to one recipient.
///
/// Views are JSON objects; a patch replaces whole top-level keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StateDelta {
    /// The complete view.
    Full { state: Value },
    /// Top-level keys that changed since the view at `base_tick`.
    Patch {
        base_tick: u64,
        changed: Map<String, Value>,
        removed: Vec<String>,
    },
}

impl StateDelta {
    /// Returns `true` for a full snapshot.
    pub fn is_full(&self) -> bool {
        matches!(self, Self::Full { .. })
    }
}

// ---------------------------------------------------------------------------
// Client → Server
// ---------------------------------------------------------------------------

/// Every control message a client can send.
///
/// `#[serde(tag = "type")]` gives `{"type": "CreateRoom", "mode": "gomoku"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Authenticate the connection. Must come before anything but heartbeats.
    Login { credentials: Credentials },
    /// End the session; the connection closes.
    Logout,
    /// Keep-alive. Echoed back in [`ServerMessage::HeartbeatAck`].
    Heartbeat { client_time: u64 },
    /// Open a new room and take seat 0 as host.
    CreateRoom {
        mode: GameMode,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        password: Option<String>,
        /// Gomoku only: board edge length.
        #[serde(default)]
        board_size: Option<usize>,
    },
    /// Take a seat in an existing room.
    JoinRoom {
        room_id: RoomId,
        #[serde(default)]
        password: Option<String>,
    },
    /// Join any open public room of this mode, or create one.
    QuickMatch { mode: GameMode },
    /// Give up the seat.
    LeaveRoom { room_id: RoomId },
    /// Ask for the lobby list, optionally for one mode.
    ListRooms {
        #[serde(default)]
        mode: Option<GameMode>,
    },
    /// Toggle the ready flag in the lobby.
    SetReady { room_id: RoomId, ready: bool },
    /// Host only: move the room from Lobby to Active.
    StartGame { room_id: RoomId },
    /// A game action for turn-based modes. `payload` is mode specific.
    Action {
        room_id: RoomId,
        seq: u64,
        payload: Value,
    },
    /// The client has applied the snapshot for `tick`.
    AckSnapshot { room_id: RoomId, tick: u64 },
    /// The client's prediction diverged; it needs a full snapshot.
    ReportDesync { room_id: RoomId, tick: u64 },
}

// ---------------------------------------------------------------------------
// Server → Client
// ---------------------------------------------------------------------------

/// Every control message the server can send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Login accepted. `room` is set when the player still holds a seat.
    LoginOk {
        player_id: PlayerId,
        name: String,
        session_token: String,
        resume_token: String,
        room: Option<RoomId>,
    },
    HeartbeatAck { client_time: u64, server_time: u64 },
    RoomList { rooms: Vec<RoomSummary> },
    /// Lobby event: a room appeared or changed.
    RoomListed { room: RoomSummary },
    /// Lobby event: a room closed.
    RoomRemoved { room_id: RoomId },
    RoomJoined {
        room_id: RoomId,
        seat: usize,
        mode: GameMode,
    },
    RoomLeft { room_id: RoomId },
    RoomUpdate {
        room_id: RoomId,
        lifecycle_state: LifecycleState,
        seats: Vec<SeatInfo>,
    },
    Snapshot {
        room_id: RoomId,
        tick: u64,
        state_delta: StateDelta,
    },
    /// A public game event (a stone was placed, a player died, ...).
    GameEvent { room_id: RoomId, event: Value },
    /// Hidden information for this recipient only (roles, seer results).
    PrivateEvent { room_id: RoomId, event: Value },
    ActionRejected {
        room_id: RoomId,
        seq: u64,
        reason: String,
    },
    Outcome { room_id: RoomId, result: Outcome },
    Disconnected { room_id: RoomId, player_id: PlayerId },
    Reconnected { room_id: RoomId, player_id: PlayerId },
    Error { code: u16, message: String },
}

/// Numeric codes carried in [`ServerMessage::Error`].
pub mod codes {
    /// The message could not be decoded.
    pub const MALFORMED: u16 = 4000;
    /// The connection has not logged in.
    pub const LOGIN_REQUIRED: u16 = 4003;
    /// The referenced room or session does not exist.
    pub const NOT_FOUND: u16 = 4004;
    /// The room is full, closed, or the player is already seated.
    pub const CAPACITY: u16 = 4009;
    /// The request conflicts with the current room or session state.
    pub const CONFLICT: u16 = 4010;
    /// Credentials were rejected.
    pub const AUTH_FAILED: u16 = 4011;
    /// Something broke on the server side.
    pub const INTERNAL: u16 = 5000;
}

// =========================================================================
// Tests
// =========================================================================

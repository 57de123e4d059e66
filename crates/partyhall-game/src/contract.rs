//! The `GameRules` trait: the contract every game mode implements.
//!
//! A mode is a set of pure functions over its own state type. The room
//! actor owns the state and is the only caller; rules never do I/O, never
//! read the clock and never hold on to the state between calls. Each
//! mutating hook takes the current state by reference and hands back the
//! next one, so a rejected action is a no-op by construction.
//!
//! ```text
//!             initialize
//!                 │
//!                 ▼
//!   ┌──────── State ◄──────────────┐
//!   │          │  │                │
//!   │ validate_action  tick  on_timeout / forfeit
//!   │          │  │                │
//!   └──────────┴──┴──► next State ─┘
//!                 │
//!            is_terminal → Outcome
//! ```

use std::fmt;
use std::time::Duration;

use partyhall_protocol::{GameMode, InputFrame, Outcome, PlayerId, Recipient, RoomId, BUTTON_PRIMARY};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::{GameFault, ValidationError};

// ---------------------------------------------------------------------------
// Inputs to the rules
// ---------------------------------------------------------------------------

/// A player in a seat when the match starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeatedPlayer {
    /// Seat index; lower seats move first.
    pub seat: usize,
    pub player_id: PlayerId,
    pub name: String,
}

/// Per-match settings fixed when the room starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchConfig {
    pub room_id: RoomId,
    /// Seeds every random draw in the match (dice, role shuffle). Two
    /// matches with the same seed and inputs play out identically.
    pub seed: u64,
    /// Board edge length for board modes; `None` takes the mode default.
    pub board_size: Option<usize>,
}

impl MatchConfig {
    /// Config for the `start_count`-th match played in `room_id`.
    pub fn for_room(room_id: RoomId, start_count: u64) -> Self {
        Self {
            room_id,
            seed: mix(room_id.0 ^ mix(start_count)),
            board_size: None,
        }
    }

    pub fn with_board_size(mut self, board_size: Option<usize>) -> Self {
        self.board_size = board_size;
        self
    }
}

/// SplitMix64 finalizer. Spreads nearby integers (room ids, turn numbers)
/// into unrelated seeds.
pub fn mix(value: u64) -> u64 {
    let mut z = value.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Analog input from a binary [`InputFrame`], decoded to floats.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ControlInput {
    pub axes: [f32; 4],
    pub buttons: u16,
}

impl ControlInput {
    pub fn axis(&self, index: usize) -> f32 {
        self.axes.get(index).copied().unwrap_or(0.0)
    }

    /// Returns `true` if the primary button (fire) is held.
    pub fn primary(&self) -> bool {
        self.buttons & BUTTON_PRIMARY != 0
    }
}

impl From<&InputFrame> for ControlInput {
    fn from(frame: &InputFrame) -> Self {
        Self {
            axes: [frame.axis(0), frame.axis(1), frame.axis(2), frame.axis(3)],
            buttons: frame.buttons,
        }
    }
}

// ---------------------------------------------------------------------------
// Outputs from the rules
// ---------------------------------------------------------------------------

/// A game event addressed to part of the room.
///
/// Events to [`Recipient::Player`] carry hidden information (a werewolf
/// role, a seer result) and are only ever delivered to that player.
#[derive(Debug, Clone, PartialEq)]
pub struct Effect {
    pub to: Recipient,
    pub event: Value,
}

impl Effect {
    /// An event for everyone in the room.
    pub fn broadcast(event: Value) -> Self {
        Self {
            to: Recipient::All,
            event,
        }
    }

    /// An event for one player only.
    pub fn private(player: PlayerId, event: Value) -> Self {
        Self {
            to: Recipient::Player(player),
            event,
        }
    }
}

/// The next state plus the events it produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Step<S> {
    pub state: S,
    pub effects: Vec<Effect>,
}

impl<S> Step<S> {
    pub fn new(state: S, effects: Vec<Effect>) -> Self {
        Self { state, effects }
    }

    /// A step with no events.
    pub fn quiet(state: S) -> Self {
        Self {
            state,
            effects: Vec::new(),
        }
    }
}

/// The answer to [`GameRules::validate_action`].
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict<S> {
    Accepted { state: S, effects: Vec<Effect> },
    Rejected(ValidationError),
}

impl<S> Verdict<S> {
    pub fn accept(step: Step<S>) -> Self {
        Self::Accepted {
            state: step.state,
            effects: step.effects,
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }
}

impl<S> From<Result<Step<S>, ValidationError>> for Verdict<S> {
    fn from(result: Result<Step<S>, ValidationError>) -> Self {
        match result {
            Ok(step) => Self::accept(step),
            Err(err) => Self::Rejected(err),
        }
    }
}

// ---------------------------------------------------------------------------
// GameRules
// ---------------------------------------------------------------------------

/// Rules for one game mode.
///
/// Implementors are zero-sized marker types; all hooks are associated
/// functions. Only `initialize`, `validate_action`, `is_terminal`,
/// `visibility_filter` and `forfeit` are required; the rest have defaults
/// that fit a mode without that feature (no timer, no tick, no binary input).
pub trait GameRules: Send + Sync + 'static {
    /// Authoritative state. `PartialEq` makes replays and no-op checks cheap
    /// to assert.
    type State: Clone + PartialEq + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static;

    /// What a player can do, decoded from the `payload` of an `Action` message.
    type Action: Clone + fmt::Debug + DeserializeOwned + Send + 'static;

    const MODE: GameMode;
    const MIN_PLAYERS: usize;
    const MAX_PLAYERS: usize;

    /// Simulation rate for tick-driven modes; 0 for turn-based ones.
    const TICK_RATE_HZ: u32 = 0;

    /// Builds the opening state. `seats` is in seat order.
    fn initialize(seats: &[SeatedPlayer], config: &MatchConfig) -> Result<Self::State, GameFault>;

    /// Events to send right after [`initialize`](Self::initialize), such as
    /// privately dealt roles.
    fn opening(_state: &Self::State) -> Vec<Effect> {
        Vec::new()
    }

    /// Checks and applies one action. Must not panic on any input.
    fn validate_action(state: &Self::State, actor: PlayerId, action: Self::Action) -> Verdict<Self::State>;

    /// Advances the simulation by a fixed `dt`. Only called when
    /// `TICK_RATE_HZ > 0`.
    fn tick(state: &Self::State, _dt: Duration) -> Result<Step<Self::State>, GameFault> {
        Ok(Step::quiet(state.clone()))
    }

    /// `Some` once the match is over.
    fn is_terminal(state: &Self::State) -> Option<Outcome>;

    /// The part of `state` that `viewer` may see. `None` is a spectator.
    fn visibility_filter(state: &Self::State, viewer: Option<PlayerId>) -> Value;

    /// How long the current turn or phase may last before
    /// [`on_timeout`](Self::on_timeout) fires.
    fn action_timeout(_state: &Self::State) -> Option<Duration> {
        None
    }

    /// Identifies the current turn or phase. The room restarts the action
    /// timer whenever this changes.
    fn turn_marker(_state: &Self::State) -> u64 {
        0
    }

    /// Resolves an expired turn or phase.
    fn on_timeout(state: &Self::State) -> Step<Self::State> {
        Step::quiet(state.clone())
    }

    /// Removes a player who is gone for good.
    fn forfeit(state: &Self::State, player: PlayerId) -> Step<Self::State>;

    /// Maps one tick of binary input to an action. `None` means idle.
    fn input_action(_input: &ControlInput) -> Option<Self::Action> {
        None
    }

    /// How far two states have drifted apart, used by client prediction.
    /// 0.0 means identical.
    fn divergence(a: &Self::State, b: &Self::State) -> f32 {
        if a == b { 0.0 } else { 1.0 }
    }
}

/// Serializes a state for a view. State types are plain data, so this only
/// fails on a non-finite float; such a field shows as `null`.
pub(crate) fn to_view<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_room_same_inputs_same_seed() {
        let a = MatchConfig::for_room(RoomId(4), 1);
        let b = MatchConfig::for_room(RoomId(4), 1);
        assert_eq!(a, b);
    }

    #[test]
    fn test_for_room_restart_changes_seed() {
        let first = MatchConfig::for_room(RoomId(4), 1);
        let second = MatchConfig::for_room(RoomId(4), 2);
        let other_room = MatchConfig::for_room(RoomId(5), 1);
        assert_ne!(first.seed, second.seed);
        assert_ne!(first.seed, other_room.seed);
    }

    #[test]
    fn test_control_input_from_frame_decodes_axes() {
        let frame = InputFrame::new(1, 1, 0, [0.5, -1.0, 0.0, 1.0], BUTTON_PRIMARY);
        let input = ControlInput::from(&frame);
        assert!((input.axis(0) - 0.5).abs() < 1e-3);
        assert_eq!(input.axis(1), -1.0);
        assert!(input.primary());
        assert_eq!(input.axis(9), 0.0);
    }

    #[test]
    fn test_verdict_from_result() {
        let ok: Verdict<u8> = Ok(Step::quiet(1)).into();
        let err: Verdict<u8> = Err(ValidationError::NotYourTurn).into();
        assert!(ok.is_accepted());
        assert!(matches!(err, Verdict::Rejected(ValidationError::NotYourTurn)));
    }
}

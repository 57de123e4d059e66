//! Running matches.
//!
//! [`Match<G>`] owns one mode's state and swaps in each step the rules hand
//! back. [`GameInstance`] closes over the five built-in modes so the room
//! actor can hold any of them without generics or boxing.

use std::fmt;
use std::time::Duration;

use partyhall_protocol::{GameMode, Outcome, PlayerId};
use serde::Deserialize;
use serde_json::Value;
use tracing::trace;

use crate::modes::{Gomoku, Monopoly, Racing, Shooter, Werewolf};
use crate::{
    ControlInput, Effect, GameFault, GameRules, MatchConfig, SeatedPlayer, ValidationError, Verdict,
};

// ---------------------------------------------------------------------------
// Match<G>
// ---------------------------------------------------------------------------

/// One match of mode `G`.
pub struct Match<G: GameRules> {
    state: G::State,
}

impl<G: GameRules> Match<G> {
    /// Initializes the match and returns it with its opening effects.
    pub fn start(seats: &[SeatedPlayer], config: &MatchConfig) -> Result<(Self, Vec<Effect>), GameFault> {
        let state = G::initialize(seats, config)?;
        let opening = G::opening(&state);
        Ok((Self { state }, opening))
    }

    /// Wraps an existing state, as a replay or a predictor does.
    pub fn from_state(state: G::State) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &G::State {
        &self.state
    }

    pub fn into_state(self) -> G::State {
        self.state
    }

    /// Decodes a JSON action payload and applies it.
    ///
    /// # Errors
    /// `Malformed` when the payload isn't an action of this mode, otherwise
    /// whatever the rules rejected the action with. The state is unchanged
    /// on error.
    pub fn apply_action(&mut self, actor: PlayerId, payload: &Value) -> Result<Vec<Effect>, ValidationError> {
        let action =
            G::Action::deserialize(payload).map_err(|e| ValidationError::Malformed(e.to_string()))?;
        self.apply(actor, action)
    }

    /// Applies an already decoded action.
    pub fn apply(&mut self, actor: PlayerId, action: G::Action) -> Result<Vec<Effect>, ValidationError> {
        match G::validate_action(&self.state, actor, action) {
            Verdict::Accepted { state, effects } => {
                self.state = state;
                Ok(effects)
            }
            Verdict::Rejected(err) => Err(err),
        }
    }

    /// Applies one tick of binary input. Input the mode has no mapping for,
    /// or that the rules refuse (a dead fighter still pressing keys), is
    /// dropped.
    pub fn apply_input(&mut self, actor: PlayerId, input: &ControlInput) -> Vec<Effect> {
        let Some(action) = G::input_action(input) else {
            return Vec::new();
        };
        self.apply(actor, action).unwrap_or_else(|err| {
            trace!(%actor, %err, "tick input dropped");
            Vec::new()
        })
    }

    /// Advances one fixed step.
    pub fn tick(&mut self, dt: Duration) -> Result<Vec<Effect>, GameFault> {
        let step = G::tick(&self.state, dt)?;
        self.state = step.state;
        Ok(step.effects)
    }

    /// Resolves an expired turn or phase.
    pub fn timeout(&mut self) -> Vec<Effect> {
        let step = G::on_timeout(&self.state);
        self.state = step.state;
        step.effects
    }

    pub fn forfeit(&mut self, player: PlayerId) -> Vec<Effect> {
        let step = G::forfeit(&self.state, player);
        self.state = step.state;
        step.effects
    }

    pub fn outcome(&self) -> Option<Outcome> {
        G::is_terminal(&self.state)
    }

    pub fn view(&self, viewer: Option<PlayerId>) -> Value {
        G::visibility_filter(&self.state, viewer)
    }

    pub fn action_timeout(&self) -> Option<Duration> {
        G::action_timeout(&self.state)
    }

    pub fn turn_marker(&self) -> u64 {
        G::turn_marker(&self.state)
    }
}

impl<G: GameRules> Clone for Match<G> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

impl<G: GameRules> fmt::Debug for Match<G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Match")
            .field("mode", &G::MODE)
            .field("state", &self.state)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Mode table
// ---------------------------------------------------------------------------

/// Static facts about a mode, used to size rooms before a match exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeInfo {
    pub mode: GameMode,
    pub min_players: usize,
    pub max_players: usize,
    /// 0 for turn-based modes.
    pub tick_rate_hz: u32,
}

impl ModeInfo {
    fn of<G: GameRules>() -> Self {
        Self {
            mode: G::MODE,
            min_players: G::MIN_PLAYERS,
            max_players: G::MAX_PLAYERS,
            tick_rate_hz: G::TICK_RATE_HZ,
        }
    }

    pub fn for_mode(mode: GameMode) -> Self {
        match mode {
            GameMode::Gomoku => Self::of::<Gomoku>(),
            GameMode::Shooter => Self::of::<Shooter>(),
            GameMode::Werewolf => Self::of::<Werewolf>(),
            GameMode::Monopoly => Self::of::<Monopoly>(),
            GameMode::Racing => Self::of::<Racing>(),
        }
    }

    pub fn is_tick_driven(&self) -> bool {
        self.tick_rate_hz > 0
    }
}

// ---------------------------------------------------------------------------
// GameInstance
// ---------------------------------------------------------------------------

/// A running match of any built-in mode.
#[derive(Debug, Clone)]
pub enum GameInstance {
    Gomoku(Match<Gomoku>),
    Shooter(Match<Shooter>),
    Werewolf(Match<Werewolf>),
    Monopoly(Match<Monopoly>),
    Racing(Match<Racing>),
}

/// Runs `$body` with `$m` bound to the inner `Match` of whichever variant
/// `$instance` is.
macro_rules! dispatch {
    ($instance:expr, $m:ident => $body:expr) => {
        match $instance {
            GameInstance::Gomoku($m) => $body,
            GameInstance::Shooter($m) => $body,
            GameInstance::Werewolf($m) => $body,
            GameInstance::Monopoly($m) => $body,
            GameInstance::Racing($m) => $body,
        }
    };
}

impl GameInstance {
    /// Starts a match of `mode` with the given seats.
    pub fn start(
        mode: GameMode,
        seats: &[SeatedPlayer],
        config: &MatchConfig,
    ) -> Result<(Self, Vec<Effect>), GameFault> {
        Ok(match mode {
            GameMode::Gomoku => wrap(Match::start(seats, config)?, Self::Gomoku),
            GameMode::Shooter => wrap(Match::start(seats, config)?, Self::Shooter),
            GameMode::Werewolf => wrap(Match::start(seats, config)?, Self::Werewolf),
            GameMode::Monopoly => wrap(Match::start(seats, config)?, Self::Monopoly),
            GameMode::Racing => wrap(Match::start(seats, config)?, Self::Racing),
        })
    }

    pub fn mode(&self) -> GameMode {
        match self {
            Self::Gomoku(_) => GameMode::Gomoku,
            Self::Shooter(_) => GameMode::Shooter,
            Self::Werewolf(_) => GameMode::Werewolf,
            Self::Monopoly(_) => GameMode::Monopoly,
            Self::Racing(_) => GameMode::Racing,
        }
    }

    pub fn info(&self) -> ModeInfo {
        ModeInfo::for_mode(self.mode())
    }

    pub fn tick_rate_hz(&self) -> u32 {
        self.info().tick_rate_hz
    }

    pub fn is_tick_driven(&self) -> bool {
        self.info().is_tick_driven()
    }

    pub fn apply_action(&mut self, actor: PlayerId, payload: &Value) -> Result<Vec<Effect>, ValidationError> {
        dispatch!(self, m => m.apply_action(actor, payload))
    }

    pub fn apply_input(&mut self, actor: PlayerId, input: &ControlInput) -> Vec<Effect> {
        dispatch!(self, m => m.apply_input(actor, input))
    }

    pub fn tick(&mut self, dt: Duration) -> Result<Vec<Effect>, GameFault> {
        dispatch!(self, m => m.tick(dt))
    }

    pub fn timeout(&mut self) -> Vec<Effect> {
        dispatch!(self, m => m.timeout())
    }

    pub fn forfeit(&mut self, player: PlayerId) -> Vec<Effect> {
        dispatch!(self, m => m.forfeit(player))
    }

    pub fn outcome(&self) -> Option<Outcome> {
        dispatch!(self, m => m.outcome())
    }

    pub fn view(&self, viewer: Option<PlayerId>) -> Value {
        dispatch!(self, m => m.view(viewer))
    }

    pub fn action_timeout(&self) -> Option<Duration> {
        dispatch!(self, m => m.action_timeout())
    }

    pub fn turn_marker(&self) -> u64 {
        dispatch!(self, m => m.turn_marker())
    }
}

fn wrap<G: GameRules>(
    (game, opening): (Match<G>, Vec<Effect>),
    variant: fn(Match<G>) -> GameInstance,
) -> (GameInstance, Vec<Effect>) {
    (variant(game), opening)
}

#[cfg(test)]
mod tests {
    use partyhall_protocol::{Recipient, RoomId};
    use serde_json::json;

    use super::*;

    fn seats(n: u64) -> Vec<SeatedPlayer> {
        (0..n)
            .map(|i| SeatedPlayer {
                seat: i as usize,
                player_id: PlayerId(i + 1),
                name: format!("p{}", i + 1),
            })
            .collect()
    }

    fn config() -> MatchConfig {
        MatchConfig::for_room(RoomId(1), 1)
    }

    #[test]
    fn test_start_every_mode_at_minimum_players() {
        for mode in GameMode::ALL {
            let info = ModeInfo::for_mode(mode);
            let (game, _) = GameInstance::start(mode, &seats(info.min_players as u64), &config()).unwrap();
            assert_eq!(game.mode(), mode);
            assert!(game.outcome().is_none());
        }
    }

    #[test]
    fn test_start_too_few_players_returns_fault() {
        let result = GameInstance::start(GameMode::Werewolf, &seats(3), &config());
        assert!(matches!(result, Err(GameFault::PlayerCount { got: 3, min: 6, .. })));
    }

    #[test]
    fn test_mode_info_tick_rates() {
        assert!(!ModeInfo::for_mode(GameMode::Gomoku).is_tick_driven());
        assert_eq!(ModeInfo::for_mode(GameMode::Shooter).tick_rate_hz, 20);
        assert_eq!(ModeInfo::for_mode(GameMode::Racing).tick_rate_hz, 30);
    }

    #[test]
    fn test_apply_action_malformed_payload_rejected() {
        let (mut game, _) = GameInstance::start(GameMode::Gomoku, &seats(2), &config()).unwrap();
        let before = game.view(None);

        let result = game.apply_action(PlayerId(1), &json!({ "action": "teleport" }));

        assert!(matches!(result, Err(ValidationError::Malformed(_))));
        assert_eq!(game.view(None), before);
    }

    #[test]
    fn test_apply_action_accepted_changes_turn_marker() {
        let (mut game, _) = GameInstance::start(GameMode::Gomoku, &seats(2), &config()).unwrap();

        let effects = game
            .apply_action(PlayerId(1), &json!({ "action": "place", "row": 7, "col": 7 }))
            .unwrap();

        assert_eq!(effects.len(), 1);
        assert_eq!(effects[0].to, Recipient::All);
        assert_eq!(game.turn_marker(), 1);
    }

    #[test]
    fn test_start_werewolf_deals_private_roles() {
        let (_, opening) = GameInstance::start(GameMode::Werewolf, &seats(6), &config()).unwrap();
        assert_eq!(opening.len(), 6);
        assert!(opening.iter().all(|e| matches!(e.to, Recipient::Player(_))));
    }
}

//! Werewolf: hidden roles, night kills and day votes.
//!
//! ```text
//! Night ──► DayDiscussion ──► DayVote ──┬──────────► Resolution ──► Night
//!  20s          20s             15s     │ tie             5s
//!                                       └──► Runoff ──┘
//!                                             15s
//! ```
//!
//! Every phase ends on its timer (the room's action clock calls
//! `on_timeout`); a vote also ends early once every living player has
//! voted. Tie-breaks are fixed so a replay with the same seed and inputs
//! always agrees:
//!
//! - Night: the target with a strict plurality of wolf votes dies. A tie
//!   kills nobody.
//! - Day: a tie sends the tied candidates to a single runoff. A second tie
//!   eliminates nobody.

use std::collections::BTreeMap;
use std::time::Duration;

use partyhall_protocol::{GameMode, Outcome, PlayerId};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{
    Effect, GameFault, GameRules, MatchConfig, SeatedPlayer, Step, ValidationError, Verdict,
};

const NIGHT: Duration = Duration::from_secs(20);
const DISCUSSION: Duration = Duration::from_secs(20);
const VOTE: Duration = Duration::from_secs(15);
const RUNOFF: Duration = Duration::from_secs(15);
const RESOLUTION: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Werewolf,
    Seer,
    Villager,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Night,
    DayDiscussion,
    DayVote,
    Runoff,
    Resolution,
}

impl Phase {
    fn duration(self) -> Duration {
        match self {
            Self::Night => NIGHT,
            Self::DayDiscussion => DISCUSSION,
            Self::DayVote => VOTE,
            Self::Runoff => RUNOFF,
            Self::Resolution => RESOLUTION,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Villager {
    pub player_id: PlayerId,
    pub name: String,
    pub role: Role,
    pub alive: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WerewolfState {
    /// In seat order.
    pub players: Vec<Villager>,
    pub phase: Phase,
    /// Bumped on every phase change.
    pub phase_counter: u64,
    pub day: u32,
    /// Wolf → chosen victim, for the current night.
    pub wolf_votes: BTreeMap<PlayerId, PlayerId>,
    pub seer_checked: bool,
    /// Voter → candidate, for the current vote or runoff.
    pub votes: BTreeMap<PlayerId, PlayerId>,
    /// Candidates in the runoff; empty outside it.
    pub runoff: Vec<PlayerId>,
    pub last_killed: Option<PlayerId>,
    pub last_eliminated: Option<PlayerId>,
    pub result: Option<Outcome>,
}

impl WerewolfState {
    fn player(&self, id: PlayerId) -> Option<&Villager> {
        self.players.iter().find(|p| p.player_id == id)
    }

    fn is_alive(&self, id: PlayerId) -> bool {
        self.player(id).is_some_and(|p| p.alive)
    }

    fn is_wolf(&self, id: PlayerId) -> bool {
        self.player(id).is_some_and(|p| p.role == Role::Werewolf)
    }

    fn kill(&mut self, id: PlayerId) {
        if let Some(p) = self.players.iter_mut().find(|p| p.player_id == id) {
            p.alive = false;
        }
    }

    fn living(&self) -> impl Iterator<Item = &Villager> {
        self.players.iter().filter(|p| p.alive)
    }

    fn wolves(&self) -> Vec<PlayerId> {
        self.players
            .iter()
            .filter(|p| p.role == Role::Werewolf)
            .map(|p| p.player_id)
            .collect()
    }

    fn enter(&mut self, phase: Phase) -> Effect {
        self.phase = phase;
        self.phase_counter += 1;
        Effect::broadcast(json!({ "event": "phase", "phase": phase, "day": self.day }))
    }

    /// Every living player who still has someone to vote for has voted. A
    /// lone runoff candidate has nobody.
    fn all_voted(&self) -> bool {
        self.living()
            .filter(|p| self.phase != Phase::Runoff || self.runoff.iter().any(|c| *c != p.player_id))
            .all(|p| self.votes.contains_key(&p.player_id))
    }

    /// Ends the match if one side has won.
    fn check_win(&mut self) -> bool {
        let wolves = self.living().filter(|p| p.role == Role::Werewolf).count();
        let others = self.living().count() - wolves;
        let (team_wolf, reason) = if wolves == 0 {
            (false, "all werewolves eliminated")
        } else if wolves >= others {
            (true, "werewolves outnumber the village")
        } else {
            return false;
        };
        let winners = self
            .players
            .iter()
            .filter(|p| (p.role == Role::Werewolf) == team_wolf)
            .map(|p| p.player_id)
            .collect();
        self.result = Some(Outcome::Win {
            winners,
            ranking: Vec::new(),
            reason: reason.into(),
        });
        true
    }
}

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum WerewolfAction {
    WolfKill { target: PlayerId },
    SeerCheck { target: PlayerId },
    Vote { target: PlayerId },
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct Werewolf;

impl GameRules for Werewolf {
    type State = WerewolfState;
    type Action = WerewolfAction;

    const MODE: GameMode = GameMode::Werewolf;
    const MIN_PLAYERS: usize = 6;
    const MAX_PLAYERS: usize = 12;

    fn initialize(seats: &[SeatedPlayer], config: &MatchConfig) -> Result<WerewolfState, GameFault> {
        super::check_seats::<Self>(seats)?;

        let n = seats.len();
        let wolves = (n / 3).max(1);
        let mut roles: Vec<Role> = std::iter::repeat_n(Role::Werewolf, wolves)
            .chain(std::iter::once(Role::Seer))
            .chain(std::iter::repeat(Role::Villager))
            .take(n)
            .collect();
        roles.shuffle(&mut StdRng::seed_from_u64(config.seed));

        let players = seats
            .iter()
            .zip(roles)
            .map(|(seat, role)| Villager {
                player_id: seat.player_id,
                name: seat.name.clone(),
                role,
                alive: true,
            })
            .collect();

        Ok(WerewolfState {
            players,
            phase: Phase::Night,
            phase_counter: 0,
            day: 1,
            wolf_votes: BTreeMap::new(),
            seer_checked: false,
            votes: BTreeMap::new(),
            runoff: Vec::new(),
            last_killed: None,
            last_eliminated: None,
            result: None,
        })
    }

    /// Deals each player their role; wolves also learn their pack.
    fn opening(state: &WerewolfState) -> Vec<Effect> {
        let pack = state.wolves();
        state
            .players
            .iter()
            .map(|p| {
                let pack = if p.role == Role::Werewolf { pack.clone() } else { Vec::new() };
                Effect::private(
                    p.player_id,
                    json!({ "event": "role", "role": p.role, "pack": pack }),
                )
            })
            .collect()
    }

    fn validate_action(state: &WerewolfState, actor: PlayerId, action: WerewolfAction) -> Verdict<WerewolfState> {
        if state.result.is_some() {
            return Verdict::Rejected(ValidationError::GameOver);
        }
        let Some(me) = state.player(actor) else {
            return Verdict::Rejected(ValidationError::NotSeated);
        };
        if !me.alive {
            return Verdict::Rejected(ValidationError::Eliminated);
        }

        let step = match action {
            WerewolfAction::WolfKill { target } => wolf_kill(state, actor, me.role, target),
            WerewolfAction::SeerCheck { target } => seer_check(state, actor, me.role, target),
            WerewolfAction::Vote { target } => vote(state, actor, target),
        };
        step.into()
    }

    fn is_terminal(state: &WerewolfState) -> Option<Outcome> {
        state.result.clone()
    }

    /// Roles are hidden except: your own, your pack's if you are a wolf, and
    /// those of dead players. The wolves' night choices are wolf-only.
    fn visibility_filter(state: &WerewolfState, viewer: Option<PlayerId>) -> Value {
        let viewer_is_wolf = viewer.is_some_and(|v| state.is_wolf(v));
        let players: Vec<Value> = state
            .players
            .iter()
            .map(|p| {
                let visible = !p.alive
                    || Some(p.player_id) == viewer
                    || (viewer_is_wolf && p.role == Role::Werewolf)
                    || state.result.is_some();
                json!({
                    "player_id": p.player_id,
                    "name": p.name,
                    "alive": p.alive,
                    "role": visible.then_some(p.role),
                })
            })
            .collect();

        let mut view = json!({
            "phase": state.phase,
            "phase_counter": state.phase_counter,
            "day": state.day,
            "players": players,
            "votes": state.votes,
            "runoff": state.runoff,
            "last_killed": state.last_killed,
            "last_eliminated": state.last_eliminated,
            "result": state.result,
        });
        if viewer_is_wolf {
            view["wolf_votes"] = json!(state.wolf_votes);
        }
        view
    }

    fn action_timeout(state: &WerewolfState) -> Option<Duration> {
        state.result.is_none().then(|| state.phase.duration())
    }

    fn turn_marker(state: &WerewolfState) -> u64 {
        state.phase_counter
    }

    fn on_timeout(state: &WerewolfState) -> Step<WerewolfState> {
        if state.result.is_some() {
            return Step::quiet(state.clone());
        }
        let mut next = state.clone();
        let effects = match state.phase {
            Phase::Night => resolve_night(&mut next),
            Phase::DayDiscussion => {
                next.votes.clear();
                vec![next.enter(Phase::DayVote)]
            }
            Phase::DayVote | Phase::Runoff => resolve_vote(&mut next),
            Phase::Resolution => begin_night(&mut next),
        };
        Step::new(next, effects)
    }

    fn forfeit(state: &WerewolfState, player: PlayerId) -> Step<WerewolfState> {
        if state.result.is_some() || !state.is_alive(player) {
            return Step::quiet(state.clone());
        }
        let mut next = state.clone();
        next.kill(player);
        next.votes.remove(&player);
        next.wolf_votes.remove(&player);
        next.runoff.retain(|candidate| *candidate != player);
        next.votes.retain(|_, target| *target != player);
        let mut effects = vec![Effect::broadcast(json!({ "event": "left", "player": player }))];
        if !next.check_win() && matches!(next.phase, Phase::DayVote | Phase::Runoff) && next.all_voted() {
            effects.extend(resolve_vote(&mut next));
        }
        Step::new(next, effects)
    }
}

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

fn wolf_kill(
    state: &WerewolfState,
    actor: PlayerId,
    role: Role,
    target: PlayerId,
) -> Result<Step<WerewolfState>, ValidationError> {
    if state.phase != Phase::Night {
        return Err(ValidationError::WrongPhase("day".into()));
    }
    if role != Role::Werewolf {
        return Err(ValidationError::NotAllowed("only werewolves hunt".into()));
    }
    if !state.is_alive(target) || state.is_wolf(target) {
        return Err(ValidationError::InvalidTarget("pick a living villager".into()));
    }

    let mut next = state.clone();
    next.wolf_votes.insert(actor, target);
    // Only the pack hears about it.
    let effects = state
        .living()
        .filter(|p| p.role == Role::Werewolf)
        .map(|p| {
            Effect::private(
                p.player_id,
                json!({ "event": "wolf_vote", "wolf": actor, "target": target }),
            )
        })
        .collect();
    Ok(Step::new(next, effects))
}

fn seer_check(
    state: &WerewolfState,
    actor: PlayerId,
    role: Role,
    target: PlayerId,
) -> Result<Step<WerewolfState>, ValidationError> {
    if state.phase != Phase::Night {
        return Err(ValidationError::WrongPhase("day".into()));
    }
    if role != Role::Seer {
        return Err(ValidationError::NotAllowed("only the seer can check".into()));
    }
    if state.seer_checked {
        return Err(ValidationError::NotAllowed("already checked tonight".into()));
    }
    if target == actor || !state.is_alive(target) {
        return Err(ValidationError::InvalidTarget("pick another living player".into()));
    }

    let mut next = state.clone();
    next.seer_checked = true;
    let event = json!({ "event": "seer_result", "target": target, "is_wolf": state.is_wolf(target) });
    Ok(Step::new(next, vec![Effect::private(actor, event)]))
}

fn vote(state: &WerewolfState, actor: PlayerId, target: PlayerId) -> Result<Step<WerewolfState>, ValidationError> {
    match state.phase {
        Phase::DayVote => {
            if target == actor || !state.is_alive(target) {
                return Err(ValidationError::InvalidTarget("vote for another living player".into()));
            }
        }
        Phase::Runoff => {
            if target == actor || !state.is_alive(target) || !state.runoff.contains(&target) {
                return Err(ValidationError::InvalidTarget("vote for another runoff candidate".into()));
            }
        }
        _ => return Err(ValidationError::WrongPhase("voting closed".into())),
    }

    let mut next = state.clone();
    next.votes.insert(actor, target);
    let mut effects = vec![Effect::broadcast(json!({ "event": "voted", "voter": actor, "target": target }))];
    if next.all_voted() {
        effects.extend(resolve_vote(&mut next));
    }
    Ok(Step::new(next, effects))
}

// ---------------------------------------------------------------------------
// Phase resolution
// ---------------------------------------------------------------------------

/// Candidates with the most votes, in ascending id order.
fn leaders(votes: &BTreeMap<PlayerId, PlayerId>) -> Vec<PlayerId> {
    let mut tally: BTreeMap<PlayerId, usize> = BTreeMap::new();
    for target in votes.values() {
        *tally.entry(*target).or_default() += 1;
    }
    let Some(top) = tally.values().copied().max() else {
        return Vec::new();
    };
    tally
        .into_iter()
        .filter(|(_, count)| *count == top)
        .map(|(target, _)| target)
        .collect()
}

fn resolve_night(state: &mut WerewolfState) -> Vec<Effect> {
    let votes: BTreeMap<PlayerId, PlayerId> = state
        .wolf_votes
        .iter()
        .filter(|(wolf, target)| state.is_alive(**wolf) && state.is_alive(**target))
        .map(|(wolf, target)| (*wolf, *target))
        .collect();

    let victim = match leaders(&votes).as_slice() {
        [one] => Some(*one),
        _ => None,
    };
    if let Some(victim) = victim {
        state.kill(victim);
    }
    state.last_killed = victim;
    state.wolf_votes.clear();

    let mut effects = vec![Effect::broadcast(json!({ "event": "dawn", "killed": victim }))];
    if !state.check_win() {
        effects.push(state.enter(Phase::DayDiscussion));
    }
    effects
}

fn resolve_vote(state: &mut WerewolfState) -> Vec<Effect> {
    let leading = leaders(&state.votes);
    let in_runoff = state.phase == Phase::Runoff;
    state.votes.clear();

    if leading.len() > 1 && !in_runoff {
        state.runoff = leading.clone();
        let tie = Effect::broadcast(json!({ "event": "tie", "candidates": leading }));
        return vec![tie, state.enter(Phase::Runoff)];
    }

    let eliminated = match leading.as_slice() {
        [one] => Some(*one),
        _ => None,
    };
    if let Some(player) = eliminated {
        state.kill(player);
    }
    state.last_eliminated = eliminated;
    state.runoff.clear();

    let mut effects = vec![Effect::broadcast(json!({
        "event": "vote_result",
        "eliminated": eliminated,
        "tied": leading.len() > 1,
    }))];
    if !state.check_win() {
        effects.push(state.enter(Phase::Resolution));
    }
    effects
}

fn begin_night(state: &mut WerewolfState) -> Vec<Effect> {
    state.day += 1;
    state.seer_checked = false;
    state.wolf_votes.clear();
    state.last_killed = None;
    state.last_eliminated = None;
    vec![state.enter(Phase::Night)]
}

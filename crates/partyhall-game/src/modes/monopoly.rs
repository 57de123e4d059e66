//! Monopoly: a short loop of ten tiles, dice, rent and bankruptcy.
//!
//! Each turn is two phases. In `Rolling` the current player rolls two dice
//! and the landing tile resolves (rent, tax, a card). In `Action` they may
//! buy the tile they are standing on, then end the turn.
//!
//! Dice come from a generator seeded with the match seed and the turn
//! number, so a replay of the same actions rolls the same numbers.

use std::time::Duration;

use partyhall_protocol::{GameMode, Outcome, PlayerId};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::contract::{mix, to_view};
use crate::{
    Effect, GameFault, GameRules, MatchConfig, SeatedPlayer, Step, ValidationError, Verdict,
};

const STARTING_MONEY: i64 = 15_000;
const START_BONUS: i64 = 2_000;
const ROLL_TIMEOUT: Duration = Duration::from_secs(20);
const ACTION_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Board
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TileKind {
    Start,
    Property { price: i64, rent: i64 },
    Station { price: i64, rent: i64 },
    Tax { amount: i64 },
    Chest { amount: i64 },
    /// Gain or lose `amount`, decided by the turn's dice generator.
    Chance { amount: i64 },
}

impl TileKind {
    fn price(&self) -> Option<i64> {
        match self {
            Self::Property { price, .. } | Self::Station { price, .. } => Some(*price),
            _ => None,
        }
    }

    fn rent(&self) -> Option<i64> {
        match self {
            Self::Property { rent, .. } | Self::Station { rent, .. } => Some(*rent),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tile {
    pub name: String,
    pub kind: TileKind,
    pub owner: Option<PlayerId>,
}

fn board() -> Vec<Tile> {
    let tile = |name: &str, kind| Tile {
        name: name.to_string(),
        kind,
        owner: None,
    };
    vec![
        tile("Start", TileKind::Start),
        tile("Harbor Road", TileKind::Property { price: 1_000, rent: 200 }),
        tile("Mill Lane", TileKind::Property { price: 1_200, rent: 240 }),
        tile("Market Square", TileKind::Property { price: 1_600, rent: 320 }),
        tile("Community Chest", TileKind::Chest { amount: 500 }),
        tile("Income Tax", TileKind::Tax { amount: 200 }),
        tile("Central Station", TileKind::Station { price: 2_000, rent: 250 }),
        tile("Chance", TileKind::Chance { amount: 300 }),
        tile("Park Avenue", TileKind::Property { price: 1_800, rent: 360 }),
        tile("Castle Hill", TileKind::Property { price: 2_200, rent: 440 }),
    ]
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnPhase {
    Rolling,
    Action,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tycoon {
    pub player_id: PlayerId,
    pub name: String,
    pub position: usize,
    pub money: i64,
    pub bankrupt: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonopolyState {
    pub tiles: Vec<Tile>,
    pub players: Vec<Tycoon>,
    /// Index into `players` of the player whose turn it is.
    pub current: usize,
    pub phase: TurnPhase,
    pub turn: u64,
    pub seed: u64,
    pub last_roll: Option<(u8, u8)>,
    /// In the order they went bankrupt.
    pub bankrupt_order: Vec<PlayerId>,
    pub result: Option<Outcome>,
}

impl MonopolyState {
    fn index_of(&self, player: PlayerId) -> Option<usize> {
        self.players.iter().position(|p| p.player_id == player)
    }

    fn solvent(&self) -> impl Iterator<Item = &Tycoon> {
        self.players.iter().filter(|p| !p.bankrupt)
    }

    fn turn_rng(&self) -> StdRng {
        StdRng::seed_from_u64(self.seed ^ mix(self.turn))
    }

    /// Moves `amount` (at most what the payer has) from `from` to `to`.
    /// Returns what was actually paid.
    fn pay(&mut self, from: usize, to: Option<usize>, amount: i64) -> i64 {
        let paid = amount.min(self.players[from].money.max(0));
        self.players[from].money -= paid;
        if let Some(to) = to {
            self.players[to].money += paid;
        }
        paid
    }

    /// Bankrupts `index` if they are out of money.
    fn settle_debts(&mut self, index: usize, effects: &mut Vec<Effect>) {
        if self.players[index].money > 0 || self.players[index].bankrupt {
            return;
        }
        self.bankrupt(index);
        effects.push(Effect::broadcast(json!({
            "event": "bankrupt",
            "player": self.players[index].player_id,
        })));
    }

    fn bankrupt(&mut self, index: usize) {
        let player = self.players[index].player_id;
        self.players[index].bankrupt = true;
        self.players[index].money = 0;
        self.bankrupt_order.push(player);
        for tile in &mut self.tiles {
            if tile.owner == Some(player) {
                tile.owner = None;
            }
        }
    }

    /// Passes the turn to the next solvent player.
    fn advance_turn(&mut self) -> Option<Effect> {
        if self.check_end() {
            return None;
        }
        let n = self.players.len();
        let next = (1..=n)
            .map(|offset| (self.current + offset) % n)
            .find(|i| !self.players[*i].bankrupt)?;
        self.current = next;
        self.phase = TurnPhase::Rolling;
        self.turn += 1;
        self.last_roll = None;
        Some(Effect::broadcast(json!({
            "event": "turn",
            "player": self.players[next].player_id,
            "turn": self.turn,
        })))
    }

    /// Ends the match once at most one player is solvent.
    fn check_end(&mut self) -> bool {
        if self.result.is_some() {
            return true;
        }
        let solvent: Vec<PlayerId> = self.solvent().map(|p| p.player_id).collect();
        if solvent.len() > 1 {
            return false;
        }
        let ranking = solvent
            .iter()
            .copied()
            .chain(self.bankrupt_order.iter().rev().copied())
            .collect();
        self.result = Some(Outcome::Win {
            winners: solvent,
            ranking,
            reason: "last player solvent".into(),
        });
        true
    }
}

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum MonopolyAction {
    RollDice,
    BuyProperty,
    EndTurn,
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct Monopoly;

impl GameRules for Monopoly {
    type State = MonopolyState;
    type Action = MonopolyAction;

    const MODE: GameMode = GameMode::Monopoly;
    const MIN_PLAYERS: usize = 2;
    const MAX_PLAYERS: usize = 4;

    fn initialize(seats: &[SeatedPlayer], config: &MatchConfig) -> Result<MonopolyState, GameFault> {
        super::check_seats::<Self>(seats)?;
        Ok(MonopolyState {
            tiles: board(),
            players: seats
                .iter()
                .map(|seat| Tycoon {
                    player_id: seat.player_id,
                    name: seat.name.clone(),
                    position: 0,
                    money: STARTING_MONEY,
                    bankrupt: false,
                })
                .collect(),
            current: 0,
            phase: TurnPhase::Rolling,
            turn: 0,
            seed: config.seed,
            last_roll: None,
            bankrupt_order: Vec::new(),
            result: None,
        })
    }

    fn validate_action(state: &MonopolyState, actor: PlayerId, action: MonopolyAction) -> Verdict<MonopolyState> {
        if state.result.is_some() {
            return Verdict::Rejected(ValidationError::GameOver);
        }
        let Some(index) = state.index_of(actor) else {
            return Verdict::Rejected(ValidationError::NotSeated);
        };
        if state.players[index].bankrupt {
            return Verdict::Rejected(ValidationError::Eliminated);
        }
        if index != state.current {
            return Verdict::Rejected(ValidationError::NotYourTurn);
        }

        let step = match action {
            MonopolyAction::RollDice => roll(state),
            MonopolyAction::BuyProperty => buy(state),
            MonopolyAction::EndTurn => end_turn(state),
        };
        step.into()
    }

    fn is_terminal(state: &MonopolyState) -> Option<Outcome> {
        state.result.clone()
    }

    fn visibility_filter(state: &MonopolyState, _viewer: Option<PlayerId>) -> Value {
        to_view(state)
    }

    fn action_timeout(state: &MonopolyState) -> Option<Duration> {
        if state.result.is_some() {
            return None;
        }
        Some(match state.phase {
            TurnPhase::Rolling => ROLL_TIMEOUT,
            TurnPhase::Action => ACTION_TIMEOUT,
        })
    }

    fn turn_marker(state: &MonopolyState) -> u64 {
        state.turn * 2 + u64::from(state.phase == TurnPhase::Action)
    }

    /// A stalled roll is rolled for the player; a stalled action phase ends
    /// the turn without buying.
    fn on_timeout(state: &MonopolyState) -> Step<MonopolyState> {
        if state.result.is_some() {
            return Step::quiet(state.clone());
        }
        let step = match state.phase {
            TurnPhase::Rolling => roll(state),
            TurnPhase::Action => end_turn(state),
        };
        step.unwrap_or_else(|_| Step::quiet(state.clone()))
    }

    fn forfeit(state: &MonopolyState, player: PlayerId) -> Step<MonopolyState> {
        let Some(index) = state.index_of(player) else {
            return Step::quiet(state.clone());
        };
        if state.result.is_some() || state.players[index].bankrupt {
            return Step::quiet(state.clone());
        }

        let mut next = state.clone();
        next.bankrupt(index);
        let mut effects = vec![Effect::broadcast(json!({ "event": "bankrupt", "player": player }))];
        if index == state.current {
            effects.extend(next.advance_turn());
        } else {
            next.check_end();
        }
        Step::new(next, effects)
    }
}

// ---------------------------------------------------------------------------
// Turn steps
// ---------------------------------------------------------------------------

fn roll(state: &MonopolyState) -> Result<Step<MonopolyState>, ValidationError> {
    if state.phase != TurnPhase::Rolling {
        return Err(ValidationError::WrongPhase("action".into()));
    }

    let mut next = state.clone();
    let mut rng = next.turn_rng();
    let dice: (u8, u8) = (rng.random_range(1..=6), rng.random_range(1..=6));
    let steps = usize::from(dice.0 + dice.1);
    let me = next.current;
    let player = next.players[me].player_id;

    let from = next.players[me].position;
    let to = (from + steps) % next.tiles.len();
    next.players[me].position = to;
    next.last_roll = Some(dice);
    next.phase = TurnPhase::Action;

    let mut effects = vec![Effect::broadcast(json!({
        "event": "rolled",
        "player": player,
        "dice": [dice.0, dice.1],
        "position": to,
    }))];

    if from + steps >= next.tiles.len() {
        next.players[me].money += START_BONUS;
        effects.push(Effect::broadcast(json!({ "event": "passed_start", "player": player, "amount": START_BONUS })));
    }

    let tile = next.tiles[to].clone();
    match tile.kind {
        TileKind::Property { rent, .. } | TileKind::Station { rent, .. } => {
            let owner = tile.owner.and_then(|o| next.index_of(o));
            if let Some(owner) = owner.filter(|o| *o != me) {
                let paid = next.pay(me, Some(owner), rent);
                effects.push(Effect::broadcast(json!({
                    "event": "rent",
                    "from": player,
                    "to": next.players[owner].player_id,
                    "amount": paid,
                })));
            }
        }
        TileKind::Tax { amount } => {
            let paid = next.pay(me, None, amount);
            effects.push(Effect::broadcast(json!({ "event": "tax", "player": player, "amount": paid })));
        }
        TileKind::Chest { amount } => {
            next.players[me].money += amount;
            effects.push(Effect::broadcast(json!({ "event": "chest", "player": player, "amount": amount })));
        }
        TileKind::Chance { amount } => {
            let delta = if rng.random_bool(0.5) {
                next.players[me].money += amount;
                amount
            } else {
                -next.pay(me, None, amount)
            };
            effects.push(Effect::broadcast(json!({ "event": "chance", "player": player, "amount": delta })));
        }
        TileKind::Start => {}
    }

    next.settle_debts(me, &mut effects);
    if next.players[me].bankrupt {
        effects.extend(next.advance_turn());
    }
    Ok(Step::new(next, effects))
}

fn buy(state: &MonopolyState) -> Result<Step<MonopolyState>, ValidationError> {
    if state.phase != TurnPhase::Action {
        return Err(ValidationError::WrongPhase("rolling".into()));
    }
    let me = state.current;
    let position = state.players[me].position;
    let tile = &state.tiles[position];
    let Some(price) = tile.kind.price() else {
        return Err(ValidationError::InvalidTarget(format!("{} is not for sale", tile.name)));
    };
    if tile.owner.is_some() {
        return Err(ValidationError::InvalidTarget(format!("{} is already owned", tile.name)));
    }
    // Buying may not leave the player broke.
    if state.players[me].money <= price {
        return Err(ValidationError::InsufficientFunds);
    }

    let mut next = state.clone();
    let player = next.players[me].player_id;
    next.players[me].money -= price;
    next.tiles[position].owner = Some(player);
    let event = json!({
        "event": "bought",
        "player": player,
        "tile": position,
        "price": price,
        "rent": tile.kind.rent(),
    });
    Ok(Step::new(next, vec![Effect::broadcast(event)]))
}

fn end_turn(state: &MonopolyState) -> Result<Step<MonopolyState>, ValidationError> {
    if state.phase != TurnPhase::Action {
        return Err(ValidationError::WrongPhase("rolling".into()));
    }
    let mut next = state.clone();
    let effects = next.advance_turn().into_iter().collect();
    Ok(Step::new(next, effects))
}

//! Gomoku: five in a row on a square board, 15×15 unless the room asks
//! for another size.
//!
//! Seat 0 plays black (stone `1`) and moves first; seat 1 plays white
//! (stone `2`). The first line of five or more stones in any of the four
//! axes wins; a full board with no line is a draw.

use std::ops::RangeInclusive;
use std::time::Duration;

use partyhall_protocol::{GameMode, Outcome, PlayerId};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::contract::to_view;
use crate::{
    Effect, GameFault, GameRules, MatchConfig, SeatedPlayer, Step, ValidationError, Verdict,
};

pub const DEFAULT_BOARD_SIZE: usize = 15;
/// Board sizes a room may configure.
pub const BOARD_SIZES: RangeInclusive<usize> = WIN_LENGTH..=25;
const WIN_LENGTH: usize = 5;
const TURN_TIMEOUT: Duration = Duration::from_secs(30);

/// Horizontal, vertical, and both diagonals.
const AXES: [(isize, isize); 4] = [(0, 1), (1, 0), (1, 1), (1, -1)];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GomokuState {
    /// Edge length of the square board.
    pub size: usize,
    /// `board[row][col]`: 0 empty, 1 black, 2 white.
    pub board: Vec<Vec<u8>>,
    /// Black, then white.
    pub players: [PlayerId; 2],
    /// Index into `players` of the side to move.
    pub to_move: usize,
    pub moves: u32,
    /// Every placed stone as `(row, col)`, oldest first.
    pub history: Vec<(usize, usize)>,
    pub result: Option<Outcome>,
}

impl GomokuState {
    pub fn last_move(&self) -> Option<(usize, usize)> {
        self.history.last().copied()
    }

    fn side_of(&self, player: PlayerId) -> Option<usize> {
        self.players.iter().position(|p| *p == player)
    }

    fn stone_at(&self, row: isize, col: isize) -> Option<u8> {
        let (row, col) = (usize::try_from(row).ok()?, usize::try_from(col).ok()?);
        self.board.get(row)?.get(col).copied()
    }

    /// Length of the line through `(row, col)` along `(dr, dc)`.
    fn run_length(&self, row: usize, col: usize, (dr, dc): (isize, isize)) -> usize {
        let stone = self.board[row][col];
        let count_towards = |sign: isize| {
            (1..)
                .take_while(|step| {
                    let r = row as isize + sign * dr * step;
                    let c = col as isize + sign * dc * step;
                    self.stone_at(r, c) == Some(stone)
                })
                .count()
        };
        1 + count_towards(1) + count_towards(-1)
    }

    fn wins_at(&self, row: usize, col: usize) -> bool {
        AXES.iter()
            .any(|axis| self.run_length(row, col, *axis) >= WIN_LENGTH)
    }

    fn win_for(&self, side: usize, reason: &str) -> Outcome {
        Outcome::Win {
            winners: vec![self.players[side]],
            ranking: Vec::new(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum GomokuAction {
    /// Signed so that negative coordinates are an out-of-bounds move
    /// rather than a decode error.
    Place { row: i64, col: i64 },
    Surrender,
}

/// Marker type for the Gomoku rules.
#[derive(Debug)]
pub struct Gomoku;

impl GameRules for Gomoku {
    type State = GomokuState;
    type Action = GomokuAction;

    const MODE: GameMode = GameMode::Gomoku;
    const MIN_PLAYERS: usize = 2;
    const MAX_PLAYERS: usize = 2;

    fn initialize(seats: &[SeatedPlayer], config: &MatchConfig) -> Result<GomokuState, GameFault> {
        super::check_seats::<Self>(seats)?;
        let size = config.board_size.unwrap_or(DEFAULT_BOARD_SIZE);
        if !BOARD_SIZES.contains(&size) {
            return Err(GameFault::Invariant(format!("board size {size} outside {BOARD_SIZES:?}")));
        }
        Ok(GomokuState {
            size,
            board: vec![vec![0; size]; size],
            players: [seats[0].player_id, seats[1].player_id],
            to_move: 0,
            moves: 0,
            history: Vec::new(),
            result: None,
        })
    }

    fn validate_action(state: &GomokuState, actor: PlayerId, action: GomokuAction) -> Verdict<GomokuState> {
        if state.result.is_some() {
            return Verdict::Rejected(ValidationError::GameOver);
        }
        let Some(side) = state.side_of(actor) else {
            return Verdict::Rejected(ValidationError::NotSeated);
        };

        match action {
            GomokuAction::Surrender => Verdict::accept(resign(state, side, "surrender")),
            GomokuAction::Place { row, col } => place(state, side, row, col).into(),
        }
    }

    fn is_terminal(state: &GomokuState) -> Option<Outcome> {
        state.result.clone()
    }

    fn visibility_filter(state: &GomokuState, _viewer: Option<PlayerId>) -> Value {
        to_view(state)
    }

    fn action_timeout(state: &GomokuState) -> Option<Duration> {
        state.result.is_none().then_some(TURN_TIMEOUT)
    }

    fn turn_marker(state: &GomokuState) -> u64 {
        u64::from(state.moves)
    }

    fn on_timeout(state: &GomokuState) -> Step<GomokuState> {
        if state.result.is_some() {
            return Step::quiet(state.clone());
        }
        resign(state, state.to_move, "timeout")
    }

    fn forfeit(state: &GomokuState, player: PlayerId) -> Step<GomokuState> {
        match state.side_of(player) {
            Some(side) if state.result.is_none() => resign(state, side, "forfeit"),
            _ => Step::quiet(state.clone()),
        }
    }

    fn divergence(a: &GomokuState, b: &GomokuState) -> f32 {
        let differing = a
            .board
            .iter()
            .flatten()
            .zip(b.board.iter().flatten())
            .filter(|(x, y)| x != y)
            .count();
        differing as f32
    }
}

fn place(state: &GomokuState, side: usize, row: i64, col: i64) -> Result<Step<GomokuState>, ValidationError> {
    if side != state.to_move {
        return Err(ValidationError::NotYourTurn);
    }
    let in_range = |v: i64| usize::try_from(v).ok().filter(|v| *v < state.size);
    let (Some(row), Some(col)) = (in_range(row), in_range(col)) else {
        return Err(ValidationError::OutOfBounds);
    };
    if state.board[row][col] != 0 {
        return Err(ValidationError::Occupied);
    }

    let mut next = state.clone();
    let stone = side as u8 + 1;
    next.board[row][col] = stone;
    next.moves += 1;
    next.history.push((row, col));

    if next.wins_at(row, col) {
        next.result = Some(next.win_for(side, "five in a row"));
    } else if next.moves as usize == state.size * state.size {
        next.result = Some(Outcome::Draw {
            reason: "board full".into(),
        });
    } else {
        next.to_move = 1 - side;
    }

    let event = json!({
        "event": "placed",
        "player": state.players[side],
        "row": row,
        "col": col,
        "stone": stone,
    });
    Ok(Step::new(next, vec![Effect::broadcast(event)]))
}

/// `side` loses; the other side wins.
fn resign(state: &GomokuState, side: usize, reason: &str) -> Step<GomokuState> {
    let mut next = state.clone();
    next.result = Some(next.win_for(1 - side, reason));
    let event = json!({
        "event": "resigned",
        "player": state.players[side],
        "reason": reason,
    });
    Step::new(next, vec![Effect::broadcast(event)])
}

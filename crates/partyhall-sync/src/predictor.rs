//! Client-side prediction.
//!
//! A client applies its own inputs right away instead of waiting a round
//! trip for the server. Every input is remembered together with the state
//! it produced. When an authoritative snapshot arrives the client adopts
//! it, drops the inputs the server has applied, and replays the rest on
//! top. If the server's state is too far from what the client predicted
//! for the same input, the prediction is reported as desynced.
//!
//! ```text
//! apply_local(seq 7) ──► predicted
//! apply_local(seq 8) ──► predicted
//!                          reconcile(server, acked = 7)
//!                              confirmed = server
//!                              predicted = server + replay(seq 8)
//! ```

use std::collections::VecDeque;
use std::time::Duration;

use partyhall_game::{GameRules, Verdict};
use partyhall_protocol::PlayerId;
use tracing::debug;

use crate::DesyncError;

const MAX_PENDING: usize = 128;

#[derive(Debug)]
struct PendingInput<G: GameRules> {
    seq: u64,
    action: G::Action,
    /// The predicted state right after this input (and its tick).
    predicted_after: G::State,
}

/// Predicts one player's view of a match of mode `G`.
#[derive(Debug)]
pub struct Predictor<G: GameRules> {
    player: PlayerId,
    confirmed: G::State,
    predicted: G::State,
    pending: VecDeque<PendingInput<G>>,
    last_acked: u64,
    tolerance: f32,
    /// Fixed step per input for tick-driven modes.
    dt: Option<Duration>,
}

impl<G: GameRules> Predictor<G> {
    /// Starts predicting from an authoritative `state`. `tolerance` is in
    /// the units of [`GameRules::divergence`].
    pub fn new(player: PlayerId, state: G::State, tolerance: f32) -> Self {
        let dt = (G::TICK_RATE_HZ > 0).then(|| Duration::from_secs_f64(1.0 / f64::from(G::TICK_RATE_HZ)));
        Self {
            player,
            predicted: state.clone(),
            confirmed: state,
            pending: VecDeque::new(),
            last_acked: 0,
            tolerance,
            dt,
        }
    }

    /// Applies a local input on top of the current prediction. For
    /// tick-driven modes each input also advances one tick.
    pub fn apply_local(&mut self, seq: u64, action: G::Action) -> &G::State {
        self.predicted = self.step(&self.predicted, action.clone());
        self.pending.push_back(PendingInput {
            seq,
            action,
            predicted_after: self.predicted.clone(),
        });
        while self.pending.len() > MAX_PENDING {
            self.pending.pop_front();
        }
        &self.predicted
    }

    /// Adopts the server's `state`, which includes every input up to
    /// `acked_seq`, and replays the inputs after it.
    ///
    /// # Errors
    /// `DesyncError` when the prediction made for `acked_seq` differs from
    /// `state` by more than the tolerance. The server state is adopted
    /// either way.
    pub fn reconcile(&mut self, state: G::State, acked_seq: u64) -> Result<&G::State, DesyncError> {
        if acked_seq < self.last_acked {
            debug!(acked_seq, last = self.last_acked, "ignoring out-of-order snapshot");
            return Ok(&self.predicted);
        }
        self.last_acked = acked_seq;

        let divergence = self
            .pending
            .iter()
            .find(|p| p.seq == acked_seq)
            .map(|p| G::divergence(&p.predicted_after, &state));
        while self.pending.front().is_some_and(|p| p.seq <= acked_seq) {
            self.pending.pop_front();
        }

        let mut predicted = state.clone();
        for input in &mut self.pending {
            predicted = step::<G>(self.player, self.dt, &predicted, input.action.clone());
            input.predicted_after = predicted.clone();
        }
        self.confirmed = state;
        self.predicted = predicted;

        match divergence {
            Some(divergence) if divergence > self.tolerance => Err(DesyncError {
                seq: acked_seq,
                divergence,
                tolerance: self.tolerance,
            }),
            _ => Ok(&self.predicted),
        }
    }

    pub fn predicted(&self) -> &G::State {
        &self.predicted
    }

    /// The last state received from the server.
    pub fn confirmed(&self) -> &G::State {
        &self.confirmed
    }

    /// Inputs sent but not yet acknowledged.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    fn step(&self, state: &G::State, action: G::Action) -> G::State {
        step::<G>(self.player, self.dt, state, action)
    }
}

fn step<G: GameRules>(player: PlayerId, dt: Option<Duration>, state: &G::State, action: G::Action) -> G::State {
    let mut next = match G::validate_action(state, player, action) {
        Verdict::Accepted { state, .. } => state,
        Verdict::Rejected(_) => state.clone(),
    };
    if let Some(dt) = dt {
        if let Ok(step) = G::tick(&next, dt) {
            next = step.state;
        }
    }
    next
}

//! Per-action deadline for turn and phase timers.

use std::time::Duration;

use tokio::time::{self, Instant};
use tracing::trace;

/// A single deadline keyed by a "turn marker".
///
/// The room re-arms the clock after every state change, passing a marker
/// that identifies the current turn or phase (e.g. `"turn:7"`). The
/// deadline only restarts when the marker changes, so unrelated actions in
/// the same phase (a werewolf vote, a monopoly purchase) don't extend it.
///
/// Equality on the marker is all the clock needs; any `PartialEq` type works.
#[derive(Debug)]
pub struct ActionClock<M> {
    armed: Option<(M, Instant)>,
}

impl<M: PartialEq + Clone> Default for ActionClock<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: PartialEq + Clone> ActionClock<M> {
    pub fn new() -> Self {
        Self { armed: None }
    }

    /// Starts a `timeout` deadline for `marker`, unless the clock is already
    /// armed for an equal marker.
    ///
    /// Returns `true` if the deadline was (re)started.
    pub fn arm(&mut self, marker: M, timeout: Duration) -> bool {
        if matches!(&self.armed, Some((current, _)) if *current == marker) {
            return false;
        }
        let deadline = Instant::now() + timeout;
        trace!(timeout_ms = timeout.as_millis() as u64, "action clock armed");
        self.armed = Some((marker, deadline));
        true
    }

    /// Clears the deadline.
    pub fn disarm(&mut self) {
        self.armed = None;
    }

    pub fn is_armed(&self) -> bool {
        self.armed.is_some()
    }

    /// The marker the clock is armed for.
    pub fn marker(&self) -> Option<&M> {
        self.armed.as_ref().map(|(marker, _)| marker)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.armed.as_ref().map(|(_, deadline)| *deadline)
    }

    /// Time left before expiry; zero once the deadline has passed.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline()
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Resolves with the expired marker when the deadline passes, and
    /// disarms the clock. Pends forever while unarmed.
    ///
    /// Cancel safe; intended as a `select!` branch.
    pub async fn expired(&mut self) -> M {
        let Some(deadline) = self.deadline() else {
            return std::future::pending().await;
        };
        time::sleep_until(deadline).await;
        match self.armed.take() {
            Some((marker, _)) => marker,
            None => std::future::pending().await,
        }
    }
}

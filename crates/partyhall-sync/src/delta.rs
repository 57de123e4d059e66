//! Snapshot deltas.
//!
//! Each recipient has its own [`DeltaTracker`], fed with that recipient's
//! filtered view every time a snapshot goes out. The tracker remembers the
//! recent views and which one the client acknowledged, and encodes the new
//! view as a patch against that baseline. Without a usable baseline it
//! falls back to a full snapshot.
//!
//! Patches work at the level of top-level keys: a key whose value changed
//! is sent whole. Views are small enough that finer diffs aren't worth it.

use std::collections::VecDeque;

use partyhall_protocol::StateDelta;
use serde_json::{Map, Value};

/// Views kept per recipient while waiting for an ack.
const HISTORY: usize = 64;

#[derive(Debug)]
pub struct DeltaTracker {
    /// Sent views, oldest first.
    history: VecDeque<(u64, Value)>,
    acked: Option<u64>,
    /// Treat every sent view as acknowledged; for reliable channels.
    auto_ack: bool,
    full_requested: bool,
}

impl DeltaTracker {
    /// A tracker for an unreliable channel: patches are based on the last
    /// view the client acknowledged with [`ack`](Self::ack).
    pub fn new() -> Self {
        Self {
            history: VecDeque::new(),
            acked: None,
            auto_ack: false,
            full_requested: false,
        }
    }

    /// A tracker for a reliable channel, where every sent view becomes the
    /// next baseline.
    pub fn reliable() -> Self {
        Self {
            auto_ack: true,
            ..Self::new()
        }
    }

    /// Encodes `view` for the snapshot at `tick` and records it.
    pub fn encode(&mut self, tick: u64, view: Value) -> StateDelta {
        let baseline = if self.full_requested {
            None
        } else {
            self.acked
                .and_then(|acked| self.history.iter().find(|(t, _)| *t == acked))
        };

        let delta = match baseline {
            Some((base_tick, base)) => diff(*base_tick, base, &view),
            None => None,
        }
        .unwrap_or_else(|| StateDelta::Full { state: view.clone() });

        self.full_requested = false;
        self.history.push_back((tick, view));
        if self.auto_ack {
            self.acked = Some(tick);
            self.prune();
        }
        while self.history.len() > HISTORY {
            self.history.pop_front();
        }
        delta
    }

    /// The client has applied the snapshot at `tick`. Acks for views that
    /// were never sent, or older than the current baseline, are ignored.
    pub fn ack(&mut self, tick: u64) -> bool {
        if self.acked.is_some_and(|acked| tick <= acked) {
            return false;
        }
        if !self.history.iter().any(|(t, _)| *t == tick) {
            return false;
        }
        self.acked = Some(tick);
        self.prune();
        true
    }

    /// The next snapshot will be full, whatever the baseline.
    pub fn force_full(&mut self) {
        self.full_requested = true;
    }

    /// Forgets every baseline, as after a reconnect.
    pub fn reset(&mut self) {
        self.history.clear();
        self.acked = None;
        self.full_requested = false;
    }

    pub fn baseline(&self) -> Option<u64> {
        self.acked
    }

    /// Drops views older than the acknowledged one; they can never be a
    /// baseline again.
    fn prune(&mut self) {
        if let Some(acked) = self.acked {
            while self.history.front().is_some_and(|(t, _)| *t < acked) {
                self.history.pop_front();
            }
        }
    }
}

impl Default for DeltaTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Top-level changes from `base` to `view`, or `None` when either is not a
/// JSON object.
fn diff(base_tick: u64, base: &Value, view: &Value) -> Option<StateDelta> {
    let (Value::Object(base), Value::Object(view)) = (base, view) else {
        return None;
    };

    let changed: Map<String, Value> = view
        .iter()
        .filter(|(key, value)| base.get(*key) != Some(*value))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    let removed = base
        .keys()
        .filter(|key| !view.contains_key(*key))
        .cloned()
        .collect();

    Some(StateDelta::Patch {
        base_tick,
        changed,
        removed,
    })
}

/// Rebuilds a view from a delta, as a client does.
///
/// A patch needs the view it was based on; `None` means the client no
/// longer has it and must ask for a full snapshot.
pub fn apply_delta(base: Option<&Value>, delta: &StateDelta) -> Option<Value> {
    match delta {
        StateDelta::Full { state } => Some(state.clone()),
        StateDelta::Patch { changed, removed, .. } => {
            let Value::Object(base) = base? else {
                return None;
            };
            let mut view = base.clone();
            for key in removed {
                view.remove(key);
            }
            for (key, value) in changed {
                view.insert(key.clone(), value.clone());
            }
            Some(Value::Object(view))
        }
    }
}

//! Per-player input queues for tick-driven rooms.
//!
//! Clients send one input per tick, tagged with a monotonic `seq`. The
//! network may deliver them late, twice or out of order, so the room parks
//! them here and takes the oldest pending input for each player once per
//! tick.

use std::collections::{BTreeMap, HashMap};

use partyhall_protocol::PlayerId;
use tracing::debug;

use crate::SequenceError;

/// Pending inputs kept per player before the oldest are dropped.
pub const DEFAULT_CAPACITY: usize = 32;

#[derive(Debug)]
struct PlayerQueue<I> {
    pending: BTreeMap<u64, I>,
    /// Highest seq taken out of the queue; 0 before the first.
    applied: u64,
}

impl<I> Default for PlayerQueue<I> {
    fn default() -> Self {
        Self {
            pending: BTreeMap::new(),
            applied: 0,
        }
    }
}

/// Buffered inputs, keyed by player then seq.
#[derive(Debug)]
pub struct InputBuffer<I> {
    queues: HashMap<PlayerId, PlayerQueue<I>>,
    capacity: usize,
}

impl<I> InputBuffer<I> {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// A buffer holding at most `capacity` pending inputs per player.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            queues: HashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Parks an input until its tick.
    ///
    /// # Errors
    /// `Stale` when `seq` is not newer than the last applied input,
    /// `Duplicate` when the same seq is already waiting.
    pub fn submit(&mut self, player: PlayerId, seq: u64, input: I) -> Result<(), SequenceError> {
        let queue = self.queues.entry(player).or_default();
        if seq <= queue.applied {
            return Err(SequenceError::Stale {
                player,
                seq,
                last: queue.applied,
            });
        }
        if queue.pending.contains_key(&seq) {
            return Err(SequenceError::Duplicate { player, seq });
        }

        queue.pending.insert(seq, input);
        while queue.pending.len() > self.capacity {
            if let Some((dropped, _)) = queue.pending.pop_first() {
                // Never applied; later inputs supersede it.
                queue.applied = queue.applied.max(dropped);
                debug!(%player, seq = dropped, "input buffer full, dropped oldest");
            }
        }
        Ok(())
    }

    /// Removes and returns the oldest pending input for `player`.
    pub fn take(&mut self, player: PlayerId) -> Option<(u64, I)> {
        let queue = self.queues.get_mut(&player)?;
        let (seq, input) = queue.pending.pop_first()?;
        queue.applied = seq;
        Some((seq, input))
    }

    /// Highest seq applied (or dropped) for `player`; sent back to the
    /// client as its input ack.
    pub fn acked(&self, player: PlayerId) -> u64 {
        self.queues.get(&player).map_or(0, |q| q.applied)
    }

    pub fn pending(&self, player: PlayerId) -> usize {
        self.queues.get(&player).map_or(0, |q| q.pending.len())
    }

    /// Forgets a player entirely. A later submit starts from seq 0 again.
    pub fn remove(&mut self, player: PlayerId) {
        self.queues.remove(&player);
    }

    /// Drops pending inputs but keeps the applied seq, so old packets
    /// arriving after a reconnect are still recognized as stale.
    pub fn clear_pending(&mut self, player: PlayerId) {
        if let Some(queue) = self.queues.get_mut(&player) {
            queue.pending.clear();
        }
    }
}

impl<I> Default for InputBuffer<I> {
    fn default() -> Self {
        Self::new()
    }
}

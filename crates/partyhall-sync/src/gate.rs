//! Sequence checks for turn-based actions.

use std::collections::HashMap;

use partyhall_protocol::PlayerId;

use crate::SequenceError;

/// Accepts each player's action seqs only in strictly increasing order.
///
/// A seq that passes is recorded whether or not the game then accepts the
/// action, so a client never reuses a seq for a retry.
#[derive(Debug, Default)]
pub struct SequenceGate {
    last: HashMap<PlayerId, u64>,
}

impl SequenceGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `seq` for `player` if it is newer than the last one.
    ///
    /// # Errors
    /// `Duplicate` for a repeat of the last seq, `Stale` for anything older.
    pub fn check(&mut self, player: PlayerId, seq: u64) -> Result<(), SequenceError> {
        match self.last.get(&player).copied() {
            Some(last) if seq == last => Err(SequenceError::Duplicate { player, seq }),
            Some(last) if seq < last => Err(SequenceError::Stale { player, seq, last }),
            _ => {
                self.last.insert(player, seq);
                Ok(())
            }
        }
    }

    pub fn last(&self, player: PlayerId) -> Option<u64> {
        self.last.get(&player).copied()
    }

    /// Forgets `player`; used when they leave the room.
    pub fn reset(&mut self, player: PlayerId) {
        self.last.remove(&player);
    }
}

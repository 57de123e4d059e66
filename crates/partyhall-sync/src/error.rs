//! Error types for the synchronization layer.

use partyhall_protocol::PlayerId;

/// A sequence number that can't be accepted. The input or action is
/// dropped; nothing else happens.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SequenceError {
    /// Older than something already applied.
    #[error("stale seq {seq} from {player} (last applied {last})")]
    Stale { player: PlayerId, seq: u64, last: u64 },

    /// Already buffered or applied.
    #[error("duplicate seq {seq} from {player}")]
    Duplicate { player: PlayerId, seq: u64 },
}

/// The client's prediction drifted past its tolerance. The client adopts
/// the server state and asks for a full snapshot.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("prediction for seq {seq} diverged by {divergence} (tolerance {tolerance})")]
pub struct DesyncError {
    pub seq: u64,
    pub divergence: f32,
    pub tolerance: f32,
}

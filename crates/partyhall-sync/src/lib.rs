//! Synchronization helpers for partyhall rooms and clients.
//!
//! Everything here is plain data structures; the room actor decides when
//! to call them.
//!
//! - [`InputBuffer`] parks binary tick inputs per player, drops stale and
//!   duplicate seqs, and hands out the oldest pending input each tick.
//! - [`SequenceGate`] does the same ordering check for turn-based actions,
//!   which are applied on arrival.
//! - [`DeltaTracker`] encodes each recipient's view as a patch against the
//!   last view they acknowledged, or as a full snapshot.
//! - [`Predictor`] is the client half: local prediction, reconciliation
//!   against server snapshots, and desync detection.
//!
//! ```text
//!  client ── InputFrame ──► InputBuffer ──► GameRules::tick ──► view
//!    ▲                                                          │
//!    └──── SnapshotFrame ◄── DeltaTracker::encode ◄─────────────┘
//! ```

mod delta;
mod error;
mod gate;
mod input;
mod predictor;

pub use delta::{apply_delta, DeltaTracker};
pub use error::{DesyncError, SequenceError};
pub use gate::SequenceGate;
pub use input::{InputBuffer, DEFAULT_CAPACITY};
pub use predictor::Predictor;

//! Timing for partyhall rooms.
//!
//! Two kinds of clock drive a room:
//!
//! - [`TickScheduler`]: a fixed-timestep loop for real-time modes (shooter
//!   at 20 Hz, racing at 30 Hz). Every tick carries the same `dt`, so the
//!   simulation is reproducible from its inputs.
//! - [`ActionClock`]: a single deadline for turn-based modes. It restarts
//!   when the turn or phase changes and fires the mode's timeout rule.
//!
//! Both expose a future that pends forever when there is nothing to wait
//! for, so the room can always keep them as `tokio::select!` branches.

mod clock;
mod scheduler;

pub use clock::ActionClock;
pub use scheduler::{TickInfo, TickScheduler, TickStats, MAX_TICK_RATE_HZ};

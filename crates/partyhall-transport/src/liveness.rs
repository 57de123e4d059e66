//! Per-connection liveness tracking.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::Instant;

/// Records when a peer last sent anything.
///
/// The timestamp is kept as milliseconds since creation in an atomic, so
/// the reader half of a connection can touch it while the router reads it
/// from another task without a lock. Uses Tokio's clock, which lets tests
/// drive it with paused time.
#[derive(Debug)]
pub struct Liveness {
    origin: Instant,
    last_seen_ms: AtomicU64,
}

impl Liveness {
    /// Starts tracking from "now".
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            last_seen_ms: AtomicU64::new(0),
        }
    }

    /// Marks the peer as seen right now.
    pub fn touch(&self) {
        let ms = self.origin.elapsed().as_millis() as u64;
        self.last_seen_ms.fetch_max(ms, Ordering::Relaxed);
    }

    /// The instant of the last inbound frame.
    pub fn last_seen(&self) -> Instant {
        self.origin
            + Duration::from_millis(self.last_seen_ms.load(Ordering::Relaxed))
    }

    /// How long the peer has been silent.
    pub fn idle_for(&self) -> Duration {
        Instant::now().saturating_duration_since(self.last_seen())
    }

    /// `true` once the peer has been silent for longer than `timeout`.
    pub fn is_stale(&self, timeout: Duration) -> bool {
        self.idle_for() > timeout
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

//! Fixed-timestep scheduler for tick-driven rooms.

use std::time::Duration;

use tokio::time::{self, Instant};
use tracing::{debug, trace, warn};

/// Highest rate a room may request.
pub const MAX_TICK_RATE_HZ: u32 = 128;

/// A tick's work taking this share of the period logs a warning.
const BUDGET_WARN_SHARE: f64 = 0.8;

/// One fired tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickInfo {
    /// Tick number, starting at 1.
    pub tick: u64,
    /// Fixed step for the simulation. Never the wall-clock delta.
    pub dt: Duration,
    /// `true` if the room woke at least one whole period late.
    pub overrun: bool,
    /// Periods dropped because of the overrun. They are not replayed.
    pub ticks_skipped: u64,
}

/// Running totals, for logs and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickStats {
    pub fired: u64,
    pub overruns: u64,
    pub skipped: u64,
    /// Longest work time reported through [`TickScheduler::record_tick_end`].
    pub slowest: Duration,
}

/// Fires ticks at a fixed rate inside a room actor's `select!` loop.
///
/// ```ignore
/// loop {
///     tokio::select! {
///         Some(cmd) = commands.recv() => handle(cmd),
///         info = scheduler.wait_for_tick() => {
///             step_simulation(info.dt);
///             scheduler.record_tick_end();
///         }
///     }
/// }
/// ```
///
/// For a rate of 0, or while paused, [`wait_for_tick`](Self::wait_for_tick)
/// never resolves, so the branch is inert. A late wake-up never produces a
/// burst: missed periods are counted and dropped, and the next deadline is
/// one period after the tick that did fire.
#[derive(Debug)]
pub struct TickScheduler {
    period: Option<Duration>,
    tick: u64,
    deadline: Option<Instant>,
    started: Option<Instant>,
    paused: bool,
    stats: TickStats,
}

impl TickScheduler {
    /// Scheduler for `tick_rate_hz`, clamped to [`MAX_TICK_RATE_HZ`]. The
    /// first tick is one period from now.
    pub fn with_rate(tick_rate_hz: u32) -> Self {
        let rate = if tick_rate_hz > MAX_TICK_RATE_HZ {
            warn!(rate = tick_rate_hz, max = MAX_TICK_RATE_HZ, "tick rate above maximum, clamping");
            MAX_TICK_RATE_HZ
        } else {
            tick_rate_hz
        };
        let period = (rate > 0).then(|| Duration::from_secs_f64(1.0 / f64::from(rate)));
        debug!(rate_hz = rate, "tick scheduler created");

        Self {
            period,
            tick: 0,
            deadline: period.map(|p| Instant::now() + p),
            started: None,
            paused: false,
            stats: TickStats::default(),
        }
    }

    /// Waits for the next tick and schedules the one after it.
    ///
    /// Cancel safe: dropping the future before it resolves leaves the
    /// deadline untouched.
    pub async fn wait_for_tick(&mut self) -> TickInfo {
        let (deadline, period) = match (self.deadline, self.period) {
            (Some(deadline), Some(period)) if !self.paused => (deadline, period),
            _ => std::future::pending().await,
        };

        time::sleep_until(deadline).await;

        let now = Instant::now();
        let missed = (now.saturating_duration_since(deadline).as_nanos() / period.as_nanos()) as u64;
        self.tick += 1;
        self.started = Some(now);
        self.deadline = Some(if missed > 0 { now + period } else { deadline + period });

        self.stats.fired += 1;
        if missed > 0 {
            self.stats.overruns += 1;
            self.stats.skipped += missed;
            warn!(tick = self.tick, skipped = missed, "tick overrun, skipping ahead");
        }
        trace!(tick = self.tick, "tick fired");

        TickInfo {
            tick: self.tick,
            dt: period,
            overrun: missed > 0,
            ticks_skipped: missed,
        }
    }

    /// Marks the end of the current tick's work. Slow ticks are logged.
    pub fn record_tick_end(&mut self) {
        let (Some(started), Some(period)) = (self.started.take(), self.period) else {
            return;
        };
        let work = started.elapsed();
        self.stats.slowest = self.stats.slowest.max(work);

        if work.as_secs_f64() >= period.as_secs_f64() * BUDGET_WARN_SHARE {
            warn!(
                tick = self.tick,
                work_ms = work.as_secs_f64() * 1000.0,
                period_ms = period.as_secs_f64() * 1000.0,
                "tick close to or over budget"
            );
        }
    }

    /// Stops ticking until [`resume`](Self::resume).
    pub fn pause(&mut self) {
        if !self.paused {
            self.paused = true;
            debug!(tick = self.tick, "tick scheduler paused");
        }
    }

    /// Restarts one period from now; paused time is not made up.
    pub fn resume(&mut self) {
        if self.paused {
            self.paused = false;
            self.deadline = self.period.map(|p| Instant::now() + p);
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// `true` for a rate of 0.
    pub fn is_event_driven(&self) -> bool {
        self.period.is_none()
    }

    /// Ticks fired so far.
    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn period(&self) -> Option<Duration> {
        self.period
    }

    pub fn stats(&self) -> TickStats {
        self.stats
    }
}

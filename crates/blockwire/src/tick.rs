//! Fixed-rate server tick.
//!
//! Every tick pulses each live session: tick-dispatched handlers run,
//! keep-alives are checked and queued packets are handed to the writer
//! tasks. Roughly once a second the tick also evicts idle broadcast cache
//! entries.
//!
//! Ticks that fall behind are skipped rather than replayed.

use std::sync::Arc;
use std::time::Duration;

use blockwire_protocol::BroadcastCache;
use blockwire_session::SessionSet;
use serde::Deserialize;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Tick loop configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TickConfig {
    /// Ticks per second.
    pub tick_rate_hz: u32,

    /// Fraction of the tick budget (0.0 to 1.0) above which a tick is
    /// logged as slow.
    pub budget_warn_threshold: f64,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            tick_rate_hz: 20,
            budget_warn_threshold: 0.80,
        }
    }
}

impl TickConfig {
    /// Maximum supported tick rate.
    pub const MAX_TICK_RATE_HZ: u32 = 128;

    /// Clamps out-of-range values.
    ///
    /// - `tick_rate_hz` into `1..=MAX_TICK_RATE_HZ`.
    /// - `budget_warn_threshold` into `0.0..=1.0`.
    pub fn validated(mut self) -> Self {
        if self.tick_rate_hz == 0 || self.tick_rate_hz > Self::MAX_TICK_RATE_HZ {
            let clamped = self.tick_rate_hz.clamp(1, Self::MAX_TICK_RATE_HZ);
            warn!(
                rate = self.tick_rate_hz,
                clamped, "tick_rate_hz out of range, clamping"
            );
            self.tick_rate_hz = clamped;
        }
        self.budget_warn_threshold = self.budget_warn_threshold.clamp(0.0, 1.0);
        self
    }

    /// Duration of a single tick.
    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.tick_rate_hz.max(1)))
    }
}

/// Pulses `sessions` at the configured rate until `shutdown` is cancelled.
pub async fn run_tick_loop(
    sessions: Arc<SessionSet>,
    cache: Arc<BroadcastCache>,
    config: TickConfig,
    shutdown: CancellationToken,
) {
    let config = config.validated();
    let budget = config.tick_duration();
    let evict_every = u64::from(config.tick_rate_hz);

    let mut interval = time::interval(budget);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    debug!(
        rate_hz = config.tick_rate_hz,
        budget_ms = budget.as_secs_f64() * 1000.0,
        "tick loop started"
    );

    let mut tick: u64 = 0;
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }
        tick += 1;
        let start = Instant::now();

        let pulsed = sessions.pulse_all();
        if tick % evict_every == 0 {
            cache.evict_idle();
            trace!(
                entries = cache.len(),
                hits = cache.hits(),
                misses = cache.misses(),
                "broadcast cache"
            );
        }

        let elapsed = start.elapsed();
        let utilization = elapsed.as_secs_f64() / budget.as_secs_f64();
        if utilization >= config.budget_warn_threshold {
            warn!(
                tick,
                sessions = pulsed,
                elapsed_ms = elapsed.as_secs_f64() * 1000.0,
                budget_ms = budget.as_secs_f64() * 1000.0,
                utilization_pct = format!("{:.1}", utilization * 100.0),
                "tick approaching budget limit"
            );
        }
        trace!(tick, sessions = pulsed, "tick");
    }

    debug!(ticks = tick, "tick loop stopped");
}

// Liveness clock for the silent-connection watchdog.

use std::time::{Duration, Instant};

pub const DEFAULT_HEARTBEAT_TIMEOUT_MS: u64 = 20_000;
pub const DEFAULT_WATCHDOG_INTERVAL_MS: u64 = 5_000;

/// Time of the last liveness signal and the silence threshold.
#[derive(Debug, Clone)]
pub struct HeartbeatClock {
    last: Instant,
    timeout: Duration,
}

impl HeartbeatClock {
    pub fn new(now: Instant, timeout: Duration) -> Self {
        Self { last: now, timeout }
    }

    pub fn beat(&mut self, now: Instant) {
        self.last = now;
    }

    pub fn silence(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last)
    }

    /// Strictly greater than the threshold.
    pub fn is_stale(&self, now: Instant) -> bool {
        self.silence(now) > self.timeout
    }
}

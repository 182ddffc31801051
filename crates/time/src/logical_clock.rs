// src/logical_clock.rs
//
// Simulated node clock: real elapsed time since construction, shifted by an
// adjustable offset and skewed by a constant drift rate.

use berkeley_types::unix_time_secs;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;

/// Logical clock shared between a node's protocol loop and its applier.
pub type SharedClock = Arc<Mutex<LogicalClock>>;

/// `now() = base_time + elapsed + offset + drift * elapsed`
///
/// Elapsed time comes from a monotonic [`Instant`], so for a fixed offset and a
/// non-negative drift `now()` never decreases.
#[derive(Debug, Clone)]
pub struct LogicalClock {
    base_time: f64,
    base_instant: Instant,
    offset: f64,
    drift: f64,
}

impl LogicalClock {
    /// Clock anchored at the current host time.
    pub fn new(offset: f64, drift: f64) -> Self {
        Self::with_base(unix_time_secs(), offset, drift)
    }

    /// Clock anchored at an explicit base time (seconds since epoch).
    pub fn with_base(base_time: f64, offset: f64, drift: f64) -> Self {
        Self {
            base_time,
            base_instant: Instant::now(),
            offset,
            drift,
        }
    }

    /// Simulated current time in seconds since epoch.
    pub fn now(&self) -> f64 {
        let elapsed = self.elapsed();
        self.base_time + elapsed + self.offset + self.drift * elapsed
    }

    /// Add `delta` seconds to the offset. No dead-band: every value is applied.
    pub fn adjust(&mut self, delta: f64) {
        self.offset += delta;
    }

    /// Re-anchor the clock at `absolute` after the host clock was set to it.
    /// The offset collapses to zero and drift restarts from the new base.
    pub fn rebase(&mut self, absolute: f64) {
        self.base_time = absolute;
        self.base_instant = Instant::now();
        self.offset = 0.0;
    }

    pub fn offset(&self) -> f64 {
        self.offset
    }

    pub fn drift(&self) -> f64 {
        self.drift
    }

    /// Seconds of real time since the clock was anchored.
    pub fn elapsed(&self) -> f64 {
        self.base_instant.elapsed().as_secs_f64()
    }

    pub fn into_shared(self) -> SharedClock {
        Arc::new(Mutex::new(self))
    }
}

impl Default for LogicalClock {
    fn default() -> Self {
        Self::new(0.0, 0.0)
    }
}

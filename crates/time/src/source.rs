use berkeley_types::unix_time_secs;
use std::sync::atomic::{AtomicU64, Ordering};

/// The coordinator's notion of its own current time, in seconds since epoch.
pub trait TimeSource: Send + Sync {
    fn now(&self) -> f64;
}

/// Reads the host wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> f64 {
        unix_time_secs()
    }
}

/// Time source that only moves when told to. Used by simulations and tests
/// that need exact `t0`/`t2` values.
#[derive(Debug, Default)]
pub struct ManualTimeSource {
    bits: AtomicU64,
}

impl ManualTimeSource {
    pub fn new(start: f64) -> Self {
        Self {
            bits: AtomicU64::new(start.to_bits()),
        }
    }

    pub fn set(&self, secs: f64) {
        self.bits.store(secs.to_bits(), Ordering::SeqCst);
    }

    pub fn advance(&self, secs: f64) {
        let _ = self
            .bits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |bits| {
                Some((f64::from_bits(bits) + secs).to_bits())
            });
    }
}

impl TimeSource for ManualTimeSource {
    fn now(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::SeqCst))
    }
}

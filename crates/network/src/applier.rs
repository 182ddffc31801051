//! Adjustment Applier (node side).
//!
//! Every `ADJUST` shifts the logical clock. When host clock mutation is
//! enabled the new absolute time is also pushed to the [`SystemClockPort`] on
//! a blocking task that the protocol loop never waits for.

use berkeley_time::{SharedClock, SystemClockPort};
use berkeley_types::format_timestamp;
use std::sync::Arc;
use tracing::{info, warn};

use crate::telemetry::{ADJUSTMENTS_APPLIED_TOTAL, SYSTEM_CLOCK_FAILURES_TOTAL};

#[derive(Clone)]
pub struct AdjustmentApplier {
    clock: SharedClock,
    system_clock: Option<Arc<dyn SystemClockPort>>,
}

impl AdjustmentApplier {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            clock,
            system_clock: None,
        }
    }

    /// Also set the host clock through `port` on every adjustment.
    pub fn with_system_clock(mut self, port: Arc<dyn SystemClockPort>) -> Self {
        self.system_clock = Some(port);
        self
    }

    pub fn clock(&self) -> SharedClock {
        self.clock.clone()
    }

    pub fn sets_system_clock(&self) -> bool {
        self.system_clock.is_some()
    }

    /// Apply `offset` seconds and return the resulting logical time.
    ///
    /// With a system clock port the logical clock is re-anchored at the new
    /// absolute time, so its offset returns to zero instead of accumulating.
    /// Must be called from within a Tokio runtime when a port is configured.
    pub fn apply(&self, offset: f64) -> f64 {
        let target = {
            let mut clock = self.clock.lock();
            clock.adjust(offset);
            info!(
                "[clock] applied offset={:.3} -> new offset={:.3}",
                offset,
                clock.offset()
            );
            let target = clock.now();
            if self.system_clock.is_some() {
                clock.rebase(target);
            }
            target
        };
        metrics::counter!(ADJUSTMENTS_APPLIED_TOTAL).increment(1);

        if let Some(port) = &self.system_clock {
            let port = port.clone();
            tokio::task::spawn_blocking(move || match port.set(target) {
                Ok(()) => info!(
                    "[clock] system clock set to {:.3} ({})",
                    target,
                    format_timestamp(target)
                ),
                Err(err) => {
                    metrics::counter!(SYSTEM_CLOCK_FAILURES_TOTAL).increment(1);
                    warn!("[clock] failed to set system clock to {target:.3}: {err}");
                }
            });
        }

        target
    }
}

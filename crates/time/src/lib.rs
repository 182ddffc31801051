//! Berkeley Time Library
//!
//! Clock models and the aggregation rule used by the Berkeley coordinator.
//!
//! # Features
//! - Logical clock with configurable offset and constant drift
//! - Pluggable coordinator time source (system or manual)
//! - Platform-neutral system clock port with an OS-backed implementation
//! - Round-trip compensated mean aggregation and per-node adjustments

pub mod aggregate;
pub mod logical_clock;
pub mod source;
pub mod system_clock;

pub use aggregate::{compute_adjustments, reference_time};
pub use logical_clock::{LogicalClock, SharedClock};
pub use source::{ManualTimeSource, SystemTimeSource, TimeSource};
pub use system_clock::{ClockError, NoopSystemClock, OsSystemClock, SystemClockPort};

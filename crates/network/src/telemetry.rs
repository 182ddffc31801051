//! Metric names emitted through the `metrics` facade.
//!
//! Nothing is recorded unless the binary installs a recorder.

use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};

pub const ROUNDS_TOTAL: &str = "berkeley_rounds_total";
pub const SAMPLES_TOTAL: &str = "berkeley_samples_total";
pub const NO_REPLY_TOTAL: &str = "berkeley_no_reply_total";
pub const ADJUSTMENTS_SENT_TOTAL: &str = "berkeley_adjustments_sent_total";
pub const ADJUSTMENTS_APPLIED_TOTAL: &str = "berkeley_adjustments_applied_total";
pub const SYSTEM_CLOCK_FAILURES_TOTAL: &str = "berkeley_system_clock_failures_total";
pub const REGISTERED_NODES: &str = "berkeley_registered_nodes";
pub const COORDINATOR_OFFSET: &str = "berkeley_coordinator_offset_seconds";
pub const ROUND_TRIP: &str = "berkeley_round_trip_seconds";
pub const ROUND_DURATION: &str = "berkeley_round_duration_seconds";

/// Register descriptions for every metric above.
pub fn describe_metrics() {
    describe_counter!(ROUNDS_TOTAL, "Synchronization rounds completed");
    describe_counter!(SAMPLES_TOTAL, "Time samples collected from responsive nodes");
    describe_counter!(
        NO_REPLY_TOTAL,
        "Poll exchanges that ended without a reply, labelled by reason"
    );
    describe_counter!(ADJUSTMENTS_SENT_TOTAL, "ADJUST messages queued to nodes");
    describe_counter!(
        ADJUSTMENTS_APPLIED_TOTAL,
        "ADJUST messages applied to the local logical clock"
    );
    describe_counter!(
        SYSTEM_CLOCK_FAILURES_TOTAL,
        "Failed attempts to set the host clock"
    );
    describe_gauge!(REGISTERED_NODES, "Nodes currently registered with the coordinator");
    describe_gauge!(
        COORDINATOR_OFFSET,
        Unit::Seconds,
        "Reference time minus coordinator time in the last round"
    );
    describe_histogram!(ROUND_TRIP, Unit::Seconds, "Measured request/reply round-trip time");
    describe_histogram!(ROUND_DURATION, Unit::Seconds, "Wall time spent per round");
}

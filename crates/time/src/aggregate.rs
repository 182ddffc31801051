//! Mean-time aggregation.
//!
//! The reference time of a round is the unweighted arithmetic mean of the
//! coordinator's own time and every responsive node's estimate. Nodes that
//! did not reply contribute nothing and receive nothing.

use berkeley_types::{Adjustment, TimeSample};

/// `(coordinator_time + Σ estimate) / (samples + 1)`
pub fn reference_time(coordinator_time: f64, samples: &[TimeSample]) -> f64 {
    let sum = samples
        .iter()
        .fold(coordinator_time, |acc, sample| acc + sample.estimate);
    sum / (samples.len() + 1) as f64
}

/// One adjustment per sample: `reference − estimate`.
pub fn compute_adjustments(reference: f64, samples: &[TimeSample]) -> Vec<Adjustment> {
    samples
        .iter()
        .map(|sample| Adjustment {
            node_id: sample.node_id.clone(),
            offset: reference - sample.estimate,
        })
        .collect()
}

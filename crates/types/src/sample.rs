use serde::{Deserialize, Serialize};

/// One round-trip compensated observation of a node's clock.
///
/// `t0` and `t2` are read from the coordinator's clock, `t1` is what the node
/// reported. The estimate assumes symmetric one-way delay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSample {
    pub node_id: String,
    pub t0: f64,
    pub t1: f64,
    pub t2: f64,
    pub rtt: f64,
    pub estimate: f64,
}

impl TimeSample {
    pub fn from_exchange<S: Into<String>>(node_id: S, t0: f64, t1: f64, t2: f64) -> Self {
        let rtt = t2 - t0;
        Self {
            node_id: node_id.into(),
            t0,
            t1,
            t2,
            rtt,
            estimate: t1 + rtt / 2.0,
        }
    }

    /// Apparent skew of the node relative to the coordinator at receive time.
    pub fn skew(&self) -> f64 {
        self.estimate - self.t2
    }
}

/// Correction sent to a single node at the end of a round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Adjustment {
    pub node_id: String,
    pub offset: f64,
}

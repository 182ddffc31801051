//! Poll Exchange: one `TIME_REQUEST` / `TIME_REPLY` interaction with a node.
//!
//! A missing reply is a normal outcome, never an error. The waiter is removed
//! on every exit path so a late reply finds nothing to resolve.

use berkeley_time::TimeSource;
use berkeley_types::{Message, TimeSample};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::connection::NodeConnection;

/// How long the coordinator waits for a `TIME_REPLY`.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_millis(3_000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoReplyReason {
    /// No correlated reply arrived within the timeout.
    TimedOut,
    /// The connection closed or the request could not be queued.
    Disconnected,
}

impl NoReplyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            NoReplyReason::TimedOut => "timeout",
            NoReplyReason::Disconnected => "disconnected",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Sample(TimeSample),
    NoReply {
        node_id: String,
        reason: NoReplyReason,
    },
}

impl PollOutcome {
    pub fn node_id(&self) -> &str {
        match self {
            PollOutcome::Sample(sample) => &sample.node_id,
            PollOutcome::NoReply { node_id, .. } => node_id,
        }
    }
}

/// Poll `connection` once. `t0` and `t2` are read from `clock`.
pub async fn poll_node(
    node_id: &str,
    connection: &NodeConnection,
    clock: &dyn TimeSource,
    reply_timeout: Duration,
) -> PollOutcome {
    let no_reply = |reason| PollOutcome::NoReply {
        node_id: node_id.to_string(),
        reason,
    };

    let t0 = clock.now();
    // Install the waiter before sending so a fast reply cannot slip past.
    let reply = connection.expect_reply(t0);
    if let Err(err) = connection.send(Message::TimeRequest { t0 }) {
        debug!("could not send TIME_REQUEST to {node_id}: {err}");
        connection.cancel_reply(t0);
        return no_reply(NoReplyReason::Disconnected);
    }

    match timeout(reply_timeout, reply).await {
        Ok(Ok(t1)) => {
            let t2 = clock.now();
            if t2 < t0 {
                warn!("coordinator clock stepped backwards during exchange with {node_id}");
            }
            PollOutcome::Sample(TimeSample::from_exchange(node_id, t0, t1, t2))
        }
        Ok(Err(_)) => no_reply(NoReplyReason::Disconnected),
        Err(_) => {
            connection.cancel_reply(t0);
            no_reply(NoReplyReason::TimedOut)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use berkeley_time::ManualTimeSource;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn reply_within_timeout_produces_sample() {
        let clock = Arc::new(ManualTimeSource::new(100.0));
        let (connection, mut outbound) = NodeConnection::new("peer");

        let node = connection.clone();
        let node_clock = clock.clone();
        tokio::spawn(async move {
            let request = outbound.recv().await.unwrap();
            assert_eq!(request, Message::TimeRequest { t0: 100.0 });
            node_clock.advance(0.2);
            node.deliver_reply(105.0, Some(100.0));
        });

        let outcome = poll_node("C1", &connection, clock.as_ref(), DEFAULT_REPLY_TIMEOUT).await;
        let PollOutcome::Sample(sample) = outcome else {
            panic!("expected a sample, got {outcome:?}");
        };
        assert_eq!(sample.node_id, "C1");
        assert_eq!(sample.t0, 100.0);
        assert_eq!(sample.t1, 105.0);
        assert!((sample.t2 - 100.2).abs() < 1e-9);
        assert!((sample.estimate - 105.1).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn silence_times_out_and_late_reply_is_discarded() {
        let clock = ManualTimeSource::new(50.0);
        let (connection, _outbound) = NodeConnection::new("peer");

        let outcome = poll_node("slow", &connection, &clock, Duration::from_millis(3_000)).await;
        assert_eq!(
            outcome,
            PollOutcome::NoReply {
                node_id: "slow".into(),
                reason: NoReplyReason::TimedOut
            }
        );
        assert!(!connection.deliver_reply(51.0, None));
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_traffic_does_not_reset_timeout() {
        let clock = ManualTimeSource::new(0.0);
        let (connection, _outbound) = NodeConnection::new("peer");

        let node = connection.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(2_000)).await;
            // A reply echoing someone else's request is ignored.
            node.deliver_reply(9.0, Some(42.0));
        });

        let started = tokio::time::Instant::now();
        let outcome = poll_node("C1", &connection, &clock, Duration::from_millis(3_000)).await;
        assert!(matches!(
            outcome,
            PollOutcome::NoReply {
                reason: NoReplyReason::TimedOut,
                ..
            }
        ));
        assert_eq!(started.elapsed(), Duration::from_millis(3_000));
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_mid_exchange_ends_early() {
        let clock = ManualTimeSource::new(0.0);
        let (connection, _outbound) = NodeConnection::new("peer");

        let node = connection.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            node.close();
        });

        let outcome = poll_node("gone", &connection, &clock, DEFAULT_REPLY_TIMEOUT).await;
        assert_eq!(
            outcome,
            PollOutcome::NoReply {
                node_id: "gone".into(),
                reason: NoReplyReason::Disconnected
            }
        );
    }

    #[tokio::test]
    async fn closed_connection_is_not_polled() {
        let clock = ManualTimeSource::new(0.0);
        let (connection, mut outbound) = NodeConnection::new("peer");
        connection.close();

        let outcome = poll_node("gone", &connection, &clock, DEFAULT_REPLY_TIMEOUT).await;
        assert_eq!(outcome.node_id(), "gone");
        assert!(matches!(
            outcome,
            PollOutcome::NoReply {
                reason: NoReplyReason::Disconnected,
                ..
            }
        ));
        assert!(outbound.try_recv().is_err());
    }
}

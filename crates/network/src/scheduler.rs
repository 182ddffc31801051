//! Round Scheduler
//!
//! Each round polls every registered node concurrently, waits for all of them
//! to answer or time out, aggregates once, and sends one `ADJUST` per
//! responsive node. Rounds never overlap: a round that outlives the interval
//! delays the next tick instead of racing it.

use berkeley_time::{compute_adjustments, reference_time, TimeSource};
use berkeley_types::{format_timestamp, Adjustment, Message, TimeSample};
use futures::future::join_all;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::exchange::{poll_node, NoReplyReason, PollOutcome, DEFAULT_REPLY_TIMEOUT};
use crate::registry::SessionRegistry;
use crate::telemetry::{
    ADJUSTMENTS_SENT_TOTAL, COORDINATOR_OFFSET, NO_REPLY_TOTAL, ROUNDS_TOTAL, ROUND_DURATION,
    ROUND_TRIP, SAMPLES_TOTAL,
};

/// Time between the start of consecutive rounds.
pub const DEFAULT_ROUND_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct RoundConfig {
    pub interval: Duration,
    pub reply_timeout: Duration,
}

impl Default for RoundConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_ROUND_INTERVAL,
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
        }
    }
}

/// Everything a round observed and decided.
#[derive(Debug, Clone)]
pub struct RoundReport {
    pub round: u64,
    pub coordinator_time: f64,
    pub reference_time: f64,
    pub samples: Vec<TimeSample>,
    pub missing: Vec<(String, NoReplyReason)>,
    /// Adjustments actually queued to a live connection.
    pub adjustments: Vec<Adjustment>,
}

impl RoundReport {
    /// What the coordinator would add to its own clock. Informational only:
    /// the coordinator never applies it, so nodes converge on the round's
    /// reference time rather than on the coordinator's clock. With a single
    /// node the gap to the coordinator halves every round.
    pub fn coordinator_offset(&self) -> f64 {
        self.reference_time - self.coordinator_time
    }

    pub fn adjustment_for(&self, node_id: &str) -> Option<&Adjustment> {
        self.adjustments.iter().find(|a| a.node_id == node_id)
    }
}

pub struct RoundScheduler {
    registry: Arc<SessionRegistry>,
    clock: Arc<dyn TimeSource>,
    config: RoundConfig,
    rounds: AtomicU64,
    in_flight: Mutex<()>,
}

impl RoundScheduler {
    pub fn new(
        registry: Arc<SessionRegistry>,
        clock: Arc<dyn TimeSource>,
        config: RoundConfig,
    ) -> Self {
        Self {
            registry,
            clock,
            config,
            rounds: AtomicU64::new(0),
            in_flight: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &RoundConfig {
        &self.config
    }

    pub fn rounds_completed(&self) -> u64 {
        self.rounds.load(Ordering::Acquire)
    }

    /// Tick forever, running one round per interval. The first round starts
    /// one full interval after this is called.
    pub async fn run(&self) {
        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            self.run_round().await;
        }
    }

    /// Execute one complete round and return what happened.
    pub async fn run_round(&self) -> RoundReport {
        let _guard = self.in_flight.lock().await;
        let started = Instant::now();
        let round = self.rounds.load(Ordering::Acquire) + 1;

        let snapshot = self.registry.snapshot();
        if snapshot.is_empty() {
            info!("[*] Round {round}: no nodes connected");
        } else {
            info!("[*] Round {round}: polling {} node(s)", snapshot.len());
        }

        let clock = self.clock.as_ref();
        let reply_timeout = self.config.reply_timeout;
        let outcomes = join_all(
            snapshot
                .iter()
                .map(|(id, connection)| poll_node(id, connection, clock, reply_timeout)),
        )
        .await;

        let mut samples = Vec::new();
        let mut missing = Vec::new();
        for outcome in outcomes {
            match outcome {
                PollOutcome::Sample(sample) => {
                    info!(
                        "  response {}: t1={:.3}, rtt={:.3}, est={:.3}",
                        sample.node_id, sample.t1, sample.rtt, sample.estimate
                    );
                    metrics::counter!(SAMPLES_TOTAL).increment(1);
                    metrics::histogram!(ROUND_TRIP).record(sample.rtt);
                    samples.push(sample);
                }
                PollOutcome::NoReply { node_id, reason } => {
                    info!("  X no reply from {node_id} ({})", reason.as_str());
                    metrics::counter!(NO_REPLY_TOTAL, "reason" => reason.as_str()).increment(1);
                    missing.push((node_id, reason));
                }
            }
        }

        let coordinator_time = self.clock.now();
        info!(
            "  coordinator time: {:.3} ({})",
            coordinator_time,
            format_timestamp(coordinator_time)
        );

        let reference = reference_time(coordinator_time, &samples);
        info!("  mean time: {:.3} ({})", reference, format_timestamp(reference));

        let adjustments = self.broadcast(compute_adjustments(reference, &samples), &snapshot);

        let report = RoundReport {
            round,
            coordinator_time,
            reference_time: reference,
            samples,
            missing,
            adjustments,
        };

        info!(
            "  coordinator offset (simulated): {:.3}s",
            report.coordinator_offset()
        );
        metrics::gauge!(COORDINATOR_OFFSET).set(report.coordinator_offset());
        metrics::histogram!(ROUND_DURATION).record(started.elapsed().as_secs_f64());
        metrics::counter!(ROUNDS_TOTAL).increment(1);
        self.rounds.store(round, Ordering::Release);

        report
    }

    /// Send each adjustment over the connection that produced its sample, as
    /// long as that connection is still the one registered for the node.
    fn broadcast(
        &self,
        adjustments: Vec<Adjustment>,
        snapshot: &[(String, crate::connection::NodeConnection)],
    ) -> Vec<Adjustment> {
        let mut sent = Vec::with_capacity(adjustments.len());
        for adjustment in adjustments {
            let Some((_, polled)) = snapshot.iter().find(|(id, _)| *id == adjustment.node_id)
            else {
                continue;
            };
            let still_registered = self
                .registry
                .get(&adjustment.node_id)
                .is_some_and(|session| session.connection.id() == polled.id());
            if !still_registered {
                debug!(
                    "skipping ADJUST for {}: session ended during the round",
                    adjustment.node_id
                );
                continue;
            }

            match polled.send(Message::Adjust {
                offset: adjustment.offset,
            }) {
                Ok(()) => {
                    info!(
                        "  sent ADJUST to {}: offset={:.3}s",
                        adjustment.node_id, adjustment.offset
                    );
                    metrics::counter!(ADJUSTMENTS_SENT_TOTAL).increment(1);
                    sent.push(adjustment);
                }
                Err(err) => {
                    warn!("failed to send ADJUST to {}: {err}", adjustment.node_id);
                }
            }
        }
        sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::NodeConnection;
    use berkeley_time::ManualTimeSource;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn scheduler(clock: Arc<ManualTimeSource>) -> (Arc<SessionRegistry>, RoundScheduler) {
        let registry = Arc::new(SessionRegistry::new());
        let scheduler = RoundScheduler::new(registry.clone(), clock, RoundConfig::default());
        (registry, scheduler)
    }

    /// Answers the first TIME_REQUEST with `reported` after advancing the
    /// shared clock by `rtt`, then returns the next message the node receives.
    fn answer_once(
        connection: NodeConnection,
        mut outbound: UnboundedReceiver<Message>,
        clock: Arc<ManualTimeSource>,
        rtt: f64,
        reported: f64,
    ) -> tokio::task::JoinHandle<Option<Message>> {
        tokio::spawn(async move {
            if let Some(Message::TimeRequest { t0 }) = outbound.recv().await {
                clock.advance(rtt);
                connection.deliver_reply(reported, Some(t0));
            }
            outbound.recv().await
        })
    }

    #[tokio::test(start_paused = true)]
    async fn empty_round_references_coordinator_time() {
        let clock = Arc::new(ManualTimeSource::new(100.0));
        let (_registry, scheduler) = scheduler(clock);

        let report = scheduler.run_round().await;
        assert_eq!(report.round, 1);
        assert_eq!(report.reference_time, 100.0);
        assert!(report.samples.is_empty());
        assert!(report.adjustments.is_empty());
        assert_eq!(scheduler.rounds_completed(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn single_node_round_adjusts_toward_mean() {
        let clock = Arc::new(ManualTimeSource::new(100.0));
        let (registry, scheduler) = scheduler(clock.clone());

        let (connection, outbound) = NodeConnection::new("peer");
        registry.register("C1", connection.clone());
        let node = answer_once(connection, outbound, clock.clone(), 0.2, 105.0);

        let report = scheduler.run_round().await;
        assert!((report.samples[0].estimate - 105.1).abs() < 1e-9);
        // Coordinator time is read once every exchange has finished.
        assert!((report.coordinator_time - 100.2).abs() < 1e-9);
        let expected_reference = (100.2 + 105.1) / 2.0;
        assert!((report.reference_time - expected_reference).abs() < 1e-9);
        let adjustment = report.adjustment_for("C1").unwrap();
        assert!((adjustment.offset - (expected_reference - 105.1)).abs() < 1e-9);

        let Some(Message::Adjust { offset }) = node.await.unwrap() else {
            panic!("node did not receive an ADJUST");
        };
        assert_eq!(offset, adjustment.offset);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_node_is_excluded_and_not_adjusted() {
        let clock = Arc::new(ManualTimeSource::new(10.0));
        let (registry, scheduler) = scheduler(clock.clone());

        let (fast, fast_out) = NodeConnection::new("fast");
        let (silent, mut silent_out) = NodeConnection::new("silent");
        registry.register("fast", fast.clone());
        registry.register("silent", silent.clone());
        let _fast_node = answer_once(fast, fast_out, clock.clone(), 0.0, 14.0);

        let report = scheduler.run_round().await;

        assert_eq!(report.samples.len(), 1);
        assert_eq!(
            report.missing,
            vec![("silent".to_string(), NoReplyReason::TimedOut)]
        );
        assert!((report.reference_time - 12.0).abs() < 1e-9);
        assert_eq!(report.adjustments.len(), 1);
        assert!(report.adjustment_for("silent").is_none());

        // The silent node saw its request and nothing else.
        assert!(matches!(
            silent_out.try_recv(),
            Ok(Message::TimeRequest { .. })
        ));
        assert!(silent_out.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn node_replaced_mid_round_gets_no_adjustment() {
        let clock = Arc::new(ManualTimeSource::new(0.0));
        let (registry, scheduler) = scheduler(clock.clone());

        let (original, mut original_out) = NodeConnection::new("original");
        registry.register("C1", original.clone());

        let replacing_registry = registry.clone();
        let node = tokio::spawn(async move {
            let request = original_out.recv().await;
            let Some(Message::TimeRequest { t0 }) = request else {
                panic!("unexpected {request:?}");
            };
            let (replacement, _out) = NodeConnection::new("replacement");
            replacing_registry.register("C1", replacement);
            original.deliver_reply(3.0, Some(t0));
            original_out
        });

        let report = scheduler.run_round().await;
        assert_eq!(report.samples.len(), 1);
        assert!(report.adjustments.is_empty());

        // Nothing further was routed to the orphaned connection.
        let mut original_out = node.await.unwrap();
        assert!(original_out.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn rounds_do_not_overlap() {
        let clock = Arc::new(ManualTimeSource::new(0.0));
        let registry = Arc::new(SessionRegistry::new());
        let scheduler = Arc::new(RoundScheduler::new(
            registry.clone(),
            clock,
            RoundConfig {
                interval: Duration::from_secs(1),
                reply_timeout: Duration::from_secs(3),
            },
        ));
        let (silent, _out) = NodeConnection::new("silent");
        registry.register("silent", silent);

        let first = tokio::spawn({
            let scheduler = scheduler.clone();
            async move { scheduler.run_round().await }
        });
        tokio::task::yield_now().await;
        let second = scheduler.run_round().await;
        let first = first.await.unwrap();

        assert_eq!(first.round, 1);
        assert_eq!(second.round, 2);
        assert_eq!(scheduler.rounds_completed(), 2);
    }
}

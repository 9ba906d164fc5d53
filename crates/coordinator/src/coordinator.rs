//! Coordinator wiring and lifecycle

use common::SharedClock;
use config::MasterConfig;
use ledger::SharedLedger;
use observability::CoordinatorMetrics;
use registry::MatchRegistry;
use settlement::{RetryPolicy, SettlementExecutor};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::discovery::{DiscoveryListener, DiscoverySettings};
use crate::error::{CoordinatorError, CoordinatorResult};
use crate::scheduler::{DeadlineScheduler, SchedulerSettings};

/// Everything the coordinator needs beyond its ledger and clock
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub scheduler: SchedulerSettings,
    pub discovery: DiscoverySettings,
    pub retry: RetryPolicy,
    pub retired_capacity: usize,
    /// How long shutdown waits for in-flight settlements
    pub drain_timeout: Duration,
}

impl CoordinatorSettings {
    pub fn from_config(config: &MasterConfig) -> Self {
        let read_timeout = config.ledger.request_timeout();
        let settlement = &config.settlement;

        Self {
            scheduler: SchedulerSettings {
                poll_interval: config.scheduler.poll_interval(),
                eviction_grace: config.scheduler.eviction_grace(),
                scan_concurrency: config.scheduler.scan_concurrency,
                early_settlement: config.scheduler.early_settlement,
                run_on_startup: config.scheduler.run_on_startup,
                read_timeout,
            },
            discovery: DiscoverySettings {
                resubscribe_delay: Duration::from_millis(config.discovery.resubscribe_delay_ms),
                max_resubscribe_delay: Duration::from_millis(
                    config.discovery.max_resubscribe_delay_ms,
                ),
                read_timeout,
            },
            retry: RetryPolicy {
                max_attempts: settlement.max_attempts,
                base_delay: Duration::from_millis(settlement.base_delay_ms),
                max_delay: Duration::from_millis(settlement.max_delay_ms),
                attempt_timeout: Duration::from_millis(settlement.attempt_timeout_ms),
                failure_cooldown: Duration::from_millis(settlement.failure_cooldown_ms),
                max_failure_cooldown: Duration::from_millis(settlement.max_failure_cooldown_ms),
            },
            retired_capacity: config.discovery.retired_capacity,
            drain_timeout: config.shutdown.drain_timeout(),
        }
    }
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self::from_config(&MasterConfig::default())
    }
}

/// Owns the registry and runs discovery and scheduling against one ledger
pub struct Coordinator {
    registry: Arc<MatchRegistry>,
    discovery: DiscoveryListener,
    scheduler: DeadlineScheduler,
    drain_timeout: Duration,
}

impl Coordinator {
    pub fn new(ledger: SharedLedger, clock: SharedClock, settings: CoordinatorSettings) -> Self {
        let registry = Arc::new(MatchRegistry::new(settings.retired_capacity));
        let metrics = CoordinatorMetrics::new();

        let executor = Arc::new(SettlementExecutor::new(
            Arc::clone(&ledger),
            Arc::clone(&registry),
            Arc::clone(&clock),
            settings.retry,
        ));
        let discovery = DiscoveryListener::new(
            Arc::clone(&ledger),
            Arc::clone(&registry),
            Arc::clone(&clock),
            metrics.clone(),
            settings.discovery,
        );
        let scheduler = DeadlineScheduler::new(
            ledger,
            Arc::clone(&registry),
            executor,
            clock,
            metrics,
            settings.scheduler,
        );

        Self {
            registry,
            discovery,
            scheduler,
            drain_timeout: settings.drain_timeout,
        }
    }

    pub fn registry(&self) -> Arc<MatchRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn discovery(&self) -> &DiscoveryListener {
        &self.discovery
    }

    pub fn scheduler(&self) -> &DeadlineScheduler {
        &self.scheduler
    }

    /// Run until `shutdown` is cancelled, then drain in-flight settlements
    ///
    /// Fails with [`CoordinatorError::DrainTimeout`] if settlements are still
    /// running after the drain timeout; those tasks are abandoned.
    pub async fn run(&self, shutdown: CancellationToken) -> CoordinatorResult<()> {
        info!("Coordinator started");

        tokio::join!(
            self.discovery.run(shutdown.child_token()),
            self.scheduler.run(shutdown.child_token()),
        );

        self.drain().await
    }

    async fn drain(&self) -> CoordinatorResult<()> {
        let tracker = self.scheduler.tracker();
        tracker.close();

        let in_flight = tracker.len();
        if in_flight > 0 {
            info!(in_flight, timeout = ?self.drain_timeout, "Draining in-flight settlements");
        }

        match tokio::time::timeout(self.drain_timeout, tracker.wait()).await {
            Ok(()) => {
                info!(tracked = self.registry.len(), "Coordinator stopped");
                Ok(())
            }
            Err(_) => {
                let abandoned = tracker.len();
                warn!(abandoned, "Drain timed out, abandoning settlements");
                Err(CoordinatorError::DrainTimeout { abandoned })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use common::{Clock, ManualClock, MatchAddress, ParticipantId};
    use ledger::{LedgerError, SimulatedLedger, SimulatedLedgerConfig};

    struct Harness {
        clock: ManualClock,
        ledger: Arc<SimulatedLedger>,
        coordinator: Arc<Coordinator>,
    }

    fn harness_with(settings: CoordinatorSettings, ledger_config: SimulatedLedgerConfig) -> Harness {
        let clock = ManualClock::at_epoch();
        let ledger = Arc::new(SimulatedLedger::new(Arc::new(clock.clone()), ledger_config));
        let coordinator = Arc::new(Coordinator::new(
            ledger.clone(),
            Arc::new(clock.clone()),
            settings,
        ));
        Harness {
            clock,
            ledger,
            coordinator,
        }
    }

    fn harness() -> Harness {
        harness_with(CoordinatorSettings::default(), SimulatedLedgerConfig::default())
    }

    fn alice() -> ParticipantId {
        ParticipantId::new("alice")
    }

    fn bob() -> ParticipantId {
        ParticipantId::new("bob")
    }

    async fn discover(h: &Harness) -> MatchAddress {
        let address = h.ledger.create_match(alice(), bob());
        h.coordinator.discovery().reconcile().await.unwrap();
        address
    }

    async fn settle_in_flight(h: &Harness) {
        let tracker = h.coordinator.scheduler().tracker();
        tracker.close();
        tracker.wait().await;
        tracker.reopen();
    }

    fn secs(n: i64) -> chrono::Duration {
        chrono::Duration::seconds(n)
    }

    #[tokio::test(start_paused = true)]
    async fn test_both_players_act_early() {
        let h = harness();
        let start = h.clock.now();
        let address = discover(&h).await;
        let registry = h.coordinator.registry();
        assert_eq!(registry.get(&address).unwrap().round_deadline, start + secs(30));

        h.clock.advance(secs(10));
        h.ledger.record_move(&address, &alice()).unwrap();
        h.ledger.record_move(&address, &bob()).unwrap();

        h.clock.advance(secs(2));
        let report = h.coordinator.scheduler().run_cycle().await;
        assert_eq!(report.dispatched, 1);

        settle_in_flight(&h).await;
        let m = registry.get(&address).unwrap();
        assert!(m.is_active());
        assert_eq!(m.round, Some(2));
        assert_eq!(m.round_deadline, start + secs(42));
        assert_eq!(m.consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_passes_with_no_moves() {
        let h = harness();
        let address = discover(&h).await;

        h.clock.advance(secs(29));
        assert_eq!(h.coordinator.scheduler().run_cycle().await.dispatched, 0);

        h.clock.advance(secs(1));
        assert_eq!(h.coordinator.scheduler().run_cycle().await.dispatched, 1);
        settle_in_flight(&h).await;
        assert_eq!(h.ledger.settlement_count(&address), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_settlement_in_flight_per_match() {
        let h = harness();
        let address = discover(&h).await;
        h.ledger.set_submit_latency(Some(Duration::from_secs(3)));
        h.clock.advance(secs(30));

        assert_eq!(h.coordinator.scheduler().run_cycle().await.dispatched, 1);
        for _ in 0..5 {
            tokio::time::sleep(Duration::from_millis(500)).await;
            let report = h.coordinator.scheduler().run_cycle().await;
            assert_eq!(report.dispatched, 0);
        }

        settle_in_flight(&h).await;
        assert_eq!(h.ledger.max_in_flight(&address), 1);
        assert_eq!(h.ledger.submission_count(&address), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_then_success() {
        let h = harness();
        let address = discover(&h).await;
        h.clock.advance(secs(30));
        h.ledger.fail_next_submissions([
            LedgerError::transient("nonce too low"),
            LedgerError::transient("connection reset"),
            LedgerError::transient("503 from gateway"),
        ]);

        h.coordinator.scheduler().run_cycle().await;
        settle_in_flight(&h).await;

        let m = h.coordinator.registry().get(&address).unwrap();
        assert!(m.is_active());
        assert_eq!(m.round, Some(2));
        assert_eq!(m.consecutive_failures, 0);
        assert_eq!(h.ledger.submission_count(&address), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_settled_neither_retries_nor_counts() {
        let h = harness();
        let address = discover(&h).await;
        h.clock.advance(secs(30));
        h.ledger
            .fail_next_submissions([LedgerError::already_settled("round 1 settled")]);

        h.coordinator.scheduler().run_cycle().await;
        settle_in_flight(&h).await;

        let m = h.coordinator.registry().get(&address).unwrap();
        assert!(m.is_active());
        assert_eq!(m.consecutive_failures, 0);
        assert_eq!(h.ledger.submission_count(&address), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ledger_outage_then_recovery() {
        let h = harness();
        let address = discover(&h).await;
        h.clock.advance(secs(45));
        h.ledger.fail_next_reads(3);

        for _ in 0..3 {
            let report = h.coordinator.scheduler().run_cycle().await;
            assert_eq!(report.read_failures, 1);
            assert_eq!(report.dispatched, 0);
            h.clock.advance(secs(5));
        }
        assert!(h.coordinator.registry().get(&address).unwrap().is_active());

        assert_eq!(h.coordinator.scheduler().run_cycle().await.dispatched, 1);
        settle_in_flight(&h).await;
        assert_eq!(h.ledger.settlement_count(&address), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_discovery_tracks_one_entry() {
        let h = harness();
        let address = discover(&h).await;
        let participants = h.ledger.participants(&address).unwrap();

        for _ in 0..3 {
            let event = ledger::MatchCreated {
                participants: participants.clone(),
                address: address.clone(),
            };
            assert!(!h.coordinator.discovery().handle_notification(event).await);
        }
        assert_eq!(h.coordinator.registry().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_match_plays_out_and_is_never_reinserted() {
        let h = harness_with(
            CoordinatorSettings::default(),
            SimulatedLedgerConfig {
                round_duration: secs(30),
                max_rounds: 2,
            },
        );
        let address = discover(&h).await;
        let registry = h.coordinator.registry();

        for _ in 0..2 {
            h.clock.advance(secs(30));
            assert_eq!(h.coordinator.scheduler().run_cycle().await.dispatched, 1);
            settle_in_flight(&h).await;
        }
        let m = registry.get(&address).unwrap();
        assert!(m.is_concluded());
        assert!(m.concluded_at.is_some());

        h.clock.advance(secs(5));
        assert_eq!(h.coordinator.scheduler().run_cycle().await.evicted, 1);
        assert!(registry.is_empty());

        let participants = h.ledger.participants(&address).unwrap();
        let late = ledger::MatchCreated {
            participants,
            address: address.clone(),
        };
        assert!(!h.coordinator.discovery().handle_notification(late).await);
        h.coordinator.discovery().reconcile().await.unwrap();
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_settles_and_drains_on_shutdown() {
        let h = harness();
        let shutdown = CancellationToken::new();
        let coordinator = Arc::clone(&h.coordinator);
        let task = tokio::spawn({
            let shutdown = shutdown.clone();
            async move { coordinator.run(shutdown).await }
        });

        let address = h.ledger.create_match(alice(), bob());
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(h.coordinator.registry().contains(&address));

        h.ledger.record_move(&address, &alice()).unwrap();
        h.ledger.record_move(&address, &bob()).unwrap();
        h.ledger.set_submit_latency(Some(Duration::from_secs(2)));
        // Next tick dispatches; stop while the call is in flight
        tokio::time::sleep(Duration::from_millis(4500)).await;
        assert!(h.coordinator.registry().get(&address).unwrap().is_pending());
        shutdown.cancel();

        assert_matches!(task.await.unwrap(), Ok(()));
        assert_eq!(h.ledger.settlement_count(&address), 1);
        assert!(h.coordinator.registry().get(&address).unwrap().is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_timeout_abandons_settlements() {
        let mut settings = CoordinatorSettings::default();
        settings.drain_timeout = Duration::from_secs(1);
        settings.retry.attempt_timeout = Duration::from_secs(60);
        let h = harness_with(settings, SimulatedLedgerConfig::default());
        let address = discover(&h).await;
        h.ledger.set_submit_latency(Some(Duration::from_secs(30)));
        h.clock.advance(secs(30));

        let shutdown = CancellationToken::new();
        let coordinator = Arc::clone(&h.coordinator);
        let task = tokio::spawn({
            let shutdown = shutdown.clone();
            async move { coordinator.run(shutdown).await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(h.coordinator.registry().get(&address).unwrap().is_pending());

        shutdown.cancel();
        assert_matches!(
            task.await.unwrap(),
            Err(CoordinatorError::DrainTimeout { abandoned: 1 })
        );
    }

    #[test]
    fn test_settings_follow_config() {
        let mut config = MasterConfig::default();
        config.scheduler.poll_interval_seconds = 2;
        config.settlement.base_delay_ms = 250;
        config.shutdown.drain_timeout_seconds = 7;

        let settings = CoordinatorSettings::from_config(&config);
        assert_eq!(settings.scheduler.poll_interval, Duration::from_secs(2));
        assert_eq!(settings.scheduler.eviction_grace, Duration::from_secs(2));
        assert_eq!(settings.retry.base_delay, Duration::from_millis(250));
        assert_eq!(settings.drain_timeout, Duration::from_secs(7));
    }
}

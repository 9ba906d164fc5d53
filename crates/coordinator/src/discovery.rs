//! Match discovery
//!
//! The listener subscribes to the ledger's match-created feed and inserts
//! each new match into the registry with its first round deadline. After
//! every (re)subscription it reconciles against `list_open_matches`, so
//! matches created while the feed was down are still picked up.

use common::SharedClock;
use futures::StreamExt;
use ledger::{LedgerError, MatchCreated, SharedLedger};
use observability::CoordinatorMetrics;
use registry::{Match, MatchRegistry};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::error::CoordinatorResult;

#[derive(Debug, Clone)]
pub struct DiscoverySettings {
    /// First wait before resubscribing; doubles per consecutive failure
    pub resubscribe_delay: Duration,
    pub max_resubscribe_delay: Duration,
    /// Bound on the initial round-state read
    pub read_timeout: Duration,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            resubscribe_delay: Duration::from_secs(1),
            max_resubscribe_delay: Duration::from_secs(30),
            read_timeout: Duration::from_secs(5),
        }
    }
}

pub struct DiscoveryListener {
    ledger: SharedLedger,
    registry: Arc<MatchRegistry>,
    clock: SharedClock,
    metrics: CoordinatorMetrics,
    settings: DiscoverySettings,
}

impl DiscoveryListener {
    pub fn new(
        ledger: SharedLedger,
        registry: Arc<MatchRegistry>,
        clock: SharedClock,
        metrics: CoordinatorMetrics,
        settings: DiscoverySettings,
    ) -> Self {
        Self {
            ledger,
            registry,
            clock,
            metrics,
            settings,
        }
    }

    /// Consume the notification feed until `shutdown` is cancelled
    pub async fn run(&self, shutdown: CancellationToken) {
        info!("Discovery listener started");

        let mut delay = self.settings.resubscribe_delay;
        let mut reconciled = false;

        loop {
            let subscribed = tokio::select! {
                _ = shutdown.cancelled() => break,
                result = self.ledger.subscribe_match_created() => result,
            };

            match subscribed {
                Ok(mut stream) => {
                    info!("Subscribed to match creation feed");
                    self.reconcile_logged().await;
                    reconciled = true;
                    delay = self.settings.resubscribe_delay;

                    loop {
                        let item = tokio::select! {
                            _ = shutdown.cancelled() => {
                                info!("Discovery listener stopped");
                                return;
                            }
                            item = stream.next() => item,
                        };

                        match item {
                            Some(Ok(event)) => {
                                self.handle_notification(event).await;
                            }
                            Some(Err(e)) => warn!(error = %e, "Bad match creation notification"),
                            None => {
                                warn!("Match creation feed ended");
                                break;
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, ?delay, "Failed to subscribe to match creation feed");
                    // Reads may work while the feed is down
                    if !reconciled {
                        reconciled = self.reconcile_logged().await;
                    }
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
            delay = delay.saturating_mul(2).min(self.settings.max_resubscribe_delay);
        }

        info!("Discovery listener stopped");
    }

    async fn reconcile_logged(&self) -> bool {
        match self.reconcile().await {
            Ok(inserted) => {
                if inserted > 0 {
                    info!(inserted, "Recovered matches from ledger");
                }
                true
            }
            Err(e) => {
                warn!(error = %e, "Reconciliation with ledger failed");
                false
            }
        }
    }

    /// Insert every open match the ledger reports; returns how many were new
    #[instrument(skip(self))]
    pub async fn reconcile(&self) -> CoordinatorResult<usize> {
        let open = match tokio::time::timeout(self.settings.read_timeout, self.ledger.list_open_matches()).await {
            Ok(result) => result?,
            Err(_) => return Err(LedgerError::transient("listing open matches timed out").into()),
        };

        let mut inserted = 0;
        for event in open {
            if self.handle_notification(event).await {
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    /// Track a newly announced match; returns whether it was inserted
    ///
    /// Known and retired addresses are ignored without a ledger read. A match
    /// the ledger already reports as terminal is retired, not tracked. If the
    /// initial read fails the match is tracked with a deadline of now.
    pub async fn handle_notification(&self, event: MatchCreated) -> bool {
        let MatchCreated {
            participants,
            address,
        } = event;

        if self.registry.contains(&address) || self.registry.is_retired(&address) {
            debug!(%address, "Duplicate match notification");
            return false;
        }

        let initial = match tokio::time::timeout(
            self.settings.read_timeout,
            self.ledger.get_match_round_state(&address),
        )
        .await
        {
            Ok(Ok(state)) => Some(state),
            Ok(Err(e)) => {
                warn!(%address, error = %e, "Initial round read failed");
                None
            }
            Err(_) => {
                warn!(%address, "Initial round read timed out");
                None
            }
        };

        // The retired set is bounded, so this read is what keeps an evicted
        // match out once its address has been forgotten there
        if initial.as_ref().is_some_and(|s| s.is_terminal) {
            info!(%address, "Discovered match is already over, not tracking");
            self.registry.retire(&address);
            return false;
        }

        let m = Match::discovered(
            address.clone(),
            participants.clone(),
            self.clock.now(),
            initial.as_ref(),
        );
        let deadline = m.round_deadline;
        if !self.registry.insert(m) {
            return false;
        }

        info!(%address, %participants, round = ?initial.map(|s| s.round), %deadline, "Match discovered");
        self.metrics.match_discovered();
        self.metrics.transition("active");
        self.metrics.set_tracked(self.registry.len());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{Clock, ManualClock, MatchAddress, ParticipantId, Participants};
    use ledger::{LedgerClient, SimulatedLedger, SimulatedLedgerConfig};

    struct Harness {
        clock: ManualClock,
        ledger: Arc<SimulatedLedger>,
        registry: Arc<MatchRegistry>,
        listener: Arc<DiscoveryListener>,
    }

    fn harness() -> Harness {
        harness_with(MatchRegistry::default())
    }

    fn harness_with(registry: MatchRegistry) -> Harness {
        let clock = ManualClock::at_epoch();
        let ledger = Arc::new(SimulatedLedger::new(
            Arc::new(clock.clone()),
            SimulatedLedgerConfig::default(),
        ));
        let registry = Arc::new(registry);
        let listener = Arc::new(DiscoveryListener::new(
            ledger.clone(),
            Arc::clone(&registry),
            Arc::new(clock.clone()),
            CoordinatorMetrics::new(),
            DiscoverySettings::default(),
        ));
        Harness {
            clock,
            ledger,
            registry,
            listener,
        }
    }

    fn create(h: &Harness) -> MatchAddress {
        h.ledger
            .create_match(ParticipantId::new("alice"), ParticipantId::new("bob"))
    }

    fn event(h: &Harness, address: &MatchAddress) -> MatchCreated {
        MatchCreated {
            participants: h.ledger.participants(address).unwrap(),
            address: address.clone(),
        }
    }

    #[tokio::test]
    async fn test_notification_inserts_with_ledger_deadline() {
        let h = harness();
        let address = create(&h);

        assert!(h.listener.handle_notification(event(&h, &address)).await);
        let m = h.registry.get(&address).unwrap();
        assert!(m.is_active());
        assert_eq!(m.round, Some(1));
        assert_eq!(m.round_deadline, h.clock.now() + chrono::Duration::seconds(30));
    }

    #[tokio::test]
    async fn test_duplicate_notification_is_ignored() {
        let h = harness();
        let address = create(&h);

        assert!(h.listener.handle_notification(event(&h, &address)).await);
        assert!(!h.listener.handle_notification(event(&h, &address)).await);
        assert_eq!(h.registry.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_initial_read_tracks_with_deadline_now() {
        let h = harness();
        let address = create(&h);
        h.ledger.fail_next_reads(1);

        assert!(h.listener.handle_notification(event(&h, &address)).await);
        let m = h.registry.get(&address).unwrap();
        assert_eq!(m.round, None);
        assert_eq!(m.round_deadline, h.clock.now());
    }

    #[tokio::test]
    async fn test_terminal_match_is_retired() {
        let h = harness();
        let address = create(&h);
        h.ledger.conclude(&address);

        assert!(!h.listener.handle_notification(event(&h, &address)).await);
        assert!(h.registry.is_empty());
        assert!(h.registry.is_retired(&address));
    }

    #[tokio::test]
    async fn test_forgotten_retired_match_stays_out() {
        let h = harness_with(MatchRegistry::new(1));
        let first = create(&h);
        let second = create(&h);
        for address in [&first, &second] {
            assert!(h.listener.handle_notification(event(&h, address)).await);
            h.ledger.conclude(address);
            assert!(h.registry.evict(address));
        }
        assert!(!h.registry.is_retired(&first));

        assert!(!h.listener.handle_notification(event(&h, &first)).await);
        assert!(!h.registry.contains(&first));
        assert!(h.registry.is_retired(&first));
    }

    #[tokio::test]
    async fn test_reconcile_inserts_open_matches_once() {
        let h = harness();
        let first = create(&h);
        let second = create(&h);
        h.ledger.conclude(&second);
        create(&h);

        assert_eq!(h.listener.reconcile().await.unwrap(), 2);
        assert_eq!(h.listener.reconcile().await.unwrap(), 0);
        assert!(h.registry.contains(&first));
        assert!(!h.registry.contains(&second));
    }

    #[tokio::test]
    async fn test_unknown_participants_still_tracked() {
        let h = harness();
        let address = create(&h);
        let notification = MatchCreated {
            participants: Participants::new(ParticipantId::new("x"), ParticipantId::new("y")),
            address: address.clone(),
        };
        assert!(h.listener.handle_notification(notification).await);
        assert_eq!(h.registry.get(&address).unwrap().participants.first.as_str(), "x");
    }

    async fn wait_for(registry: &MatchRegistry, address: &MatchAddress) {
        for _ in 0..200 {
            if registry.contains(address) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("{address} was never discovered");
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_discovers_and_resubscribes() {
        let h = harness();
        let shutdown = CancellationToken::new();
        let listener = Arc::clone(&h.listener);
        let task = tokio::spawn({
            let shutdown = shutdown.clone();
            async move { listener.run(shutdown).await }
        });

        // Created before the subscription exists, found by reconciliation
        let early = create(&h);
        wait_for(&h.registry, &early).await;

        let live = create(&h);
        wait_for(&h.registry, &live).await;

        // Feed drops; matches created meanwhile are recovered on resubscribe
        h.ledger.close_subscriptions();
        h.ledger.fail_next_subscriptions(2);
        let missed = create(&h);
        wait_for(&h.registry, &missed).await;
        assert_eq!(h.registry.len(), 3);

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_while_waiting_to_resubscribe() {
        let h = harness();
        h.ledger.fail_next_subscriptions(u32::MAX);
        let shutdown = CancellationToken::new();
        let listener = Arc::clone(&h.listener);
        let task = tokio::spawn({
            let shutdown = shutdown.clone();
            async move { listener.run(shutdown).await }
        });

        tokio::time::sleep(Duration::from_secs(120)).await;
        shutdown.cancel();
        task.await.unwrap();
        assert!(h.ledger.subscribe_match_created().await.is_err());
    }
}

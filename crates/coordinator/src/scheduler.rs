//! Deadline scheduler
//!
//! Every poll interval the scheduler snapshots the registry and, for each
//! `Active` match, reads the ledger's round state and applies the first rule
//! that matches:
//!
//! 1. terminal - conclude the match; no settlement
//! 2. round advanced past the cached one - refresh round and deadline
//! 3. deadline passed, or both participants acted - claim the match and
//!    dispatch a settlement, unless a failed dispatch is still cooling down
//! 4. otherwise leave it alone
//!
//! Each match is evaluated as soon as its read lands, so one slow read does
//! not hold back dispatch for the rest. Concluded matches are evicted once
//! their grace period has elapsed.
//! Settlements run as tracked tasks so shutdown can wait for them.

use common::{AttemptId, MatchAddress, SharedClock};
use futures::stream::{self, StreamExt};
use ledger::{LedgerError, LedgerResult, RoundState, SharedLedger};
use observability::CoordinatorMetrics;
use registry::{LifecycleState, Match, MatchRegistry, RegistryError};
use settlement::SettlementExecutor;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub poll_interval: Duration,
    /// How long concluded matches stay in the registry
    pub eviction_grace: Duration,
    pub scan_concurrency: usize,
    /// Dispatch as soon as both participants acted, before the deadline
    pub early_settlement: bool,
    pub run_on_startup: bool,
    /// Bound on each round-state read
    pub read_timeout: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            eviction_grace: Duration::from_secs(5),
            scan_concurrency: 16,
            early_settlement: true,
            run_on_startup: true,
            read_timeout: Duration::from_secs(5),
        }
    }
}

/// What one scheduler cycle did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Active matches whose round state was read
    pub scanned: usize,
    pub dispatched: usize,
    pub concluded: usize,
    /// Matches whose ledger round moved ahead of the cached one
    pub refreshed: usize,
    pub evicted: usize,
    pub read_failures: usize,
    /// Matches with a settlement in flight, or due but cooling down after a
    /// failure
    pub skipped: usize,
}

impl CycleReport {
    fn is_quiet(&self) -> bool {
        self.dispatched == 0 && self.concluded == 0 && self.evicted == 0 && self.read_failures == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Deadline,
    BothActed,
}

pub struct DeadlineScheduler {
    ledger: SharedLedger,
    registry: Arc<MatchRegistry>,
    executor: Arc<SettlementExecutor>,
    clock: SharedClock,
    metrics: CoordinatorMetrics,
    settings: SchedulerSettings,
    tracker: TaskTracker,
}

impl DeadlineScheduler {
    pub fn new(
        ledger: SharedLedger,
        registry: Arc<MatchRegistry>,
        executor: Arc<SettlementExecutor>,
        clock: SharedClock,
        metrics: CoordinatorMetrics,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            ledger,
            registry,
            executor,
            clock,
            metrics,
            settings,
            tracker: TaskTracker::new(),
        }
    }

    /// Tracker holding the in-flight settlement tasks
    pub fn tracker(&self) -> &TaskTracker {
        &self.tracker
    }

    /// Run cycles on the poll interval until `shutdown` is cancelled
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            interval = ?self.settings.poll_interval,
            run_on_startup = self.settings.run_on_startup,
            early_settlement = self.settings.early_settlement,
            "Deadline scheduler started"
        );

        let mut timer = tokio::time::interval(self.settings.poll_interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        if !self.settings.run_on_startup {
            // The first tick completes immediately
            timer.tick().await;
        }

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = timer.tick() => {
                    self.run_cycle().await;
                }
            }
        }

        info!("Deadline scheduler stopped");
    }

    /// Evaluate every tracked match once
    #[instrument(name = "scheduler_cycle", skip(self))]
    pub async fn run_cycle(&self) -> CycleReport {
        let started = Instant::now();
        let mut report = CycleReport::default();
        let grace = chrono::Duration::from_std(self.settings.eviction_grace)
            .unwrap_or_else(|_| chrono::Duration::days(1));

        let now = self.clock.now();
        let mut due = Vec::new();
        for m in self.registry.snapshot_all() {
            match m.lifecycle_state {
                LifecycleState::Concluded => {
                    if m.evictable(now, grace) && self.registry.evict(&m.address) {
                        info!(address = %m.address, "Match evicted");
                        report.evicted += 1;
                    }
                }
                LifecycleState::SettlementPending => report.skipped += 1,
                LifecycleState::Active => due.push(m),
            }
        }
        report.scanned = due.len();

        let mut reads = stream::iter(due)
            .map(|m| async move {
                let result = self.read_round(&m.address).await;
                (m, result)
            })
            .buffer_unordered(self.settings.scan_concurrency.max(1));

        while let Some((m, result)) = reads.next().await {
            match result {
                Ok(state) => self.evaluate(&m, &state, &mut report),
                Err(e) => {
                    warn!(address = %m.address, error = %e, "Round state read failed, will retry next cycle");
                    self.metrics.ledger_read_failed();
                    report.read_failures += 1;
                }
            }
        }

        self.metrics.set_tracked(self.registry.len());
        self.metrics.record_cycle(started.elapsed());
        if report.is_quiet() {
            debug!(?report, "Scheduler cycle complete");
        } else {
            info!(?report, "Scheduler cycle complete");
        }
        report
    }

    async fn read_round(&self, address: &MatchAddress) -> LedgerResult<RoundState> {
        match tokio::time::timeout(
            self.settings.read_timeout,
            self.ledger.get_match_round_state(address),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(LedgerError::transient("round state read timed out")),
        }
    }

    fn evaluate(&self, m: &Match, state: &RoundState, report: &mut CycleReport) {
        let address = &m.address;
        let now = self.clock.now();

        if state.is_terminal {
            match self.registry.update(address, |x| x.mark_concluded(now)) {
                Ok(true) => {
                    info!(%address, round = state.round, "Match concluded");
                    self.metrics.transition(LifecycleState::Concluded.as_str());
                    report.concluded += 1;
                }
                Ok(false) => {}
                Err(e) => debug!(%address, error = %e, "Match gone before it could be concluded"),
            }
            return;
        }

        if m.round_advanced(state) {
            if self.refresh(address, state) {
                debug!(%address, round = state.round, deadline = %state.deadline, "Round advanced on ledger");
                report.refreshed += 1;
            }
            return;
        }

        if !self.refresh(address, state) {
            return;
        }

        let trigger = if state.deadline_passed(now) {
            Trigger::Deadline
        } else if self.settings.early_settlement && state.both_acted() {
            Trigger::BothActed
        } else {
            debug!(
                %address,
                round = state.round,
                remaining = ?state.remaining(now),
                "Round still open"
            );
            return;
        };

        if m.cooling_down(now) {
            debug!(%address, retry_after = ?m.retry_after, ?trigger, "Cooling down after failed settlement");
            report.skipped += 1;
            return;
        }

        if self.dispatch(address, state.round, trigger) {
            report.dispatched += 1;
        }
    }

    /// Cache the ledger's round state on an `Active` match
    fn refresh(&self, address: &MatchAddress, state: &RoundState) -> bool {
        self.registry
            .update(address, |x| {
                if x.is_active() {
                    x.apply_round(state);
                    true
                } else {
                    false
                }
            })
            .unwrap_or(false)
    }

    /// Claim the match and spawn its settlement task
    fn dispatch(&self, address: &MatchAddress, round: u64, trigger: Trigger) -> bool {
        let attempt_id = AttemptId::new();
        match self.registry.update(address, |x| x.begin_settlement(attempt_id)) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(%address, error = %e, "Match not claimable");
                return false;
            }
            Err(RegistryError::NotFound(_)) => return false,
            Err(e) => {
                warn!(%address, error = %e, "Could not claim match");
                return false;
            }
        }

        info!(%address, %attempt_id, round, ?trigger, "Settlement dispatched");
        self.metrics.settlement_dispatched();
        self.metrics
            .transition(LifecycleState::SettlementPending.as_str());

        let executor = Arc::clone(&self.executor);
        let metrics = self.metrics.clone();
        let address = address.clone();
        self.tracker.spawn(async move {
            let report = executor.attempt_settlement(address, attempt_id, round).await;
            metrics.record_settlement(report.outcome.label(), report.attempts, report.latency);
            if let Some(state) = report.state {
                metrics.transition(state.as_str());
            }
        });
        true
    }
}

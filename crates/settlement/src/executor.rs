//! Settlement executor
//!
//! The scheduler claims a match (`Active -> SettlementPending`) and hands the
//! claim to [`SettlementExecutor::attempt_settlement`], which owns it until it
//! reports. A [`PendingGuard`] releases the claim if the task is dropped
//! before reporting, so a match can never stay gated forever.

use common::{AttemptId, MatchAddress, SharedClock};
use ledger::{LedgerError, RoundState, SettlementRequest, SharedLedger};
use registry::{LifecycleState, MatchRegistry, RegistryError};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::error::SettlementError;
use crate::retry::RetryPolicy;

/// How a settlement dispatch ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementOutcome {
    /// The ledger confirmed the settlement transaction
    Settled { tx_id: String },
    /// Another attempt had already settled this round
    AlreadySettled,
    Failed(SettlementError),
}

impl SettlementOutcome {
    /// Metric label for the outcome
    pub fn label(&self) -> &'static str {
        match self {
            Self::Settled { .. } => "settled",
            Self::AlreadySettled => "already_settled",
            Self::Failed(e) => e.label(),
        }
    }

    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failed(_))
    }
}

/// Result of one settlement dispatch
#[derive(Debug, Clone)]
pub struct SettlementReport {
    pub address: MatchAddress,
    pub attempt_id: AttemptId,
    /// Ledger calls made, retries included
    pub attempts: u32,
    pub latency: Duration,
    pub outcome: SettlementOutcome,
    /// Lifecycle state after the report was applied; `None` when the report
    /// was stale or the match is no longer tracked
    pub state: Option<LifecycleState>,
}

/// Releases a settlement claim that was never reported
struct PendingGuard {
    registry: Arc<MatchRegistry>,
    address: MatchAddress,
    attempt_id: AttemptId,
    armed: bool,
}

impl PendingGuard {
    fn new(registry: Arc<MatchRegistry>, address: MatchAddress, attempt_id: AttemptId) -> Self {
        Self {
            registry,
            address,
            attempt_id,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let attempt_id = self.attempt_id;
        if let Ok(true) = self.registry.update(&self.address, |m| m.release(attempt_id)) {
            warn!(address = %self.address, %attempt_id, "Settlement abandoned, match released");
        }
    }
}

/// Executes settlement calls against the ledger
pub struct SettlementExecutor {
    ledger: SharedLedger,
    registry: Arc<MatchRegistry>,
    clock: SharedClock,
    policy: RetryPolicy,
}

impl SettlementExecutor {
    pub fn new(
        ledger: SharedLedger,
        registry: Arc<MatchRegistry>,
        clock: SharedClock,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            ledger,
            registry,
            clock,
            policy,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Settle `round` of a match the caller has already claimed with `attempt_id`
    ///
    /// Never fails: every outcome is applied to the registry and returned as
    /// a report.
    #[instrument(name = "settlement", skip(self), fields(%address, %attempt_id, round))]
    pub async fn attempt_settlement(
        &self,
        address: MatchAddress,
        attempt_id: AttemptId,
        round: u64,
    ) -> SettlementReport {
        let mut guard = PendingGuard::new(Arc::clone(&self.registry), address.clone(), attempt_id);
        let started = Instant::now();
        let request = SettlementRequest { attempt_id, round };

        let (attempts, outcome) = self.submit_with_retry(&address, request).await;

        let state = match &outcome {
            SettlementOutcome::Settled { .. } | SettlementOutcome::AlreadySettled => {
                let post = self.post_settlement_read(&address).await;
                let now = self.clock.now();
                self.apply(&address, |m| m.complete_settlement(attempt_id, post.as_ref(), now))
                    .flatten()
            }
            SettlementOutcome::Failed(_) => {
                let now = self.clock.now();
                let policy = &self.policy;
                self.apply(&address, |m| {
                    let cooldown = policy.cooldown_offset(m.consecutive_failures.saturating_add(1));
                    m.fail_settlement(attempt_id, now, cooldown)
                        .then_some(m.lifecycle_state)
                })
                .flatten()
            }
        };
        guard.disarm();

        let latency = started.elapsed();
        match &outcome {
            SettlementOutcome::Settled { tx_id } => {
                info!(%tx_id, attempts, ?latency, ?state, "Round settled");
            }
            SettlementOutcome::AlreadySettled => {
                info!(attempts, ?latency, ?state, "Round already settled");
            }
            SettlementOutcome::Failed(err) => {
                error!(error = %err, attempts, ?latency, "Settlement failed");
            }
        }

        SettlementReport {
            address,
            attempt_id,
            attempts,
            latency,
            outcome,
            state,
        }
    }

    async fn submit_with_retry(
        &self,
        address: &MatchAddress,
        request: SettlementRequest,
    ) -> (u32, SettlementOutcome) {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let result = match tokio::time::timeout(
                self.policy.attempt_timeout,
                self.ledger.submit_settlement(address, request),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(LedgerError::transient(format!(
                    "settlement call timed out after {:?}",
                    self.policy.attempt_timeout
                ))),
            };

            let outcome = match result {
                Ok(receipt) if receipt.confirmed => SettlementOutcome::Settled {
                    tx_id: receipt.tx_id,
                },
                Ok(receipt) => SettlementOutcome::Failed(SettlementError::Unexpected(format!(
                    "unconfirmed receipt {}",
                    receipt.tx_id
                ))),
                Err(LedgerError::AlreadySettled(_)) => SettlementOutcome::AlreadySettled,
                Err(LedgerError::Transient(msg)) if attempt < max_attempts => {
                    let delay = self.policy.backoff(attempt - 1);
                    warn!(attempt, error = %msg, ?delay, "Transient settlement failure, retrying");
                    tokio::time::sleep(delay).await;
                    continue;
                }
                Err(last @ LedgerError::Transient(_)) => {
                    SettlementOutcome::Failed(SettlementError::Exhausted {
                        attempts: attempt,
                        last,
                    })
                }
                Err(err @ LedgerError::Fatal(_)) => {
                    SettlementOutcome::Failed(SettlementError::Fatal(err))
                }
                Err(LedgerError::Unexpected(msg)) => {
                    SettlementOutcome::Failed(SettlementError::Unexpected(msg))
                }
            };
            return (attempt, outcome);
        }
    }

    async fn post_settlement_read(&self, address: &MatchAddress) -> Option<RoundState> {
        match tokio::time::timeout(
            self.policy.attempt_timeout,
            self.ledger.get_match_round_state(address),
        )
        .await
        {
            Ok(Ok(state)) => Some(state),
            Ok(Err(err)) => {
                warn!(error = %err, "Post-settlement read failed, keeping cached round");
                None
            }
            Err(_) => {
                warn!("Post-settlement read timed out, keeping cached round");
                None
            }
        }
    }

    fn apply<F, R>(&self, address: &MatchAddress, mutator: F) -> Option<R>
    where
        F: FnOnce(&mut registry::Match) -> R,
    {
        match self.registry.update(address, mutator) {
            Ok(r) => Some(r),
            Err(RegistryError::NotFound(_)) => {
                debug!("Match evicted while settling");
                None
            }
            Err(err) => {
                warn!(error = %err, "Could not apply settlement outcome");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use common::{Clock, ManualClock, ParticipantId, Participants};
    use ledger::{LedgerClient, SimulatedLedger, SimulatedLedgerConfig};
    use registry::Match;

    struct Harness {
        clock: ManualClock,
        ledger: Arc<SimulatedLedger>,
        registry: Arc<MatchRegistry>,
        executor: Arc<SettlementExecutor>,
        address: MatchAddress,
    }

    async fn harness() -> Harness {
        harness_with(RetryPolicy::default()).await
    }

    async fn harness_with(policy: RetryPolicy) -> Harness {
        let clock = ManualClock::at_epoch();
        let ledger = Arc::new(SimulatedLedger::new(
            Arc::new(clock.clone()),
            SimulatedLedgerConfig::default(),
        ));
        let registry = Arc::new(MatchRegistry::default());
        let address = ledger.create_match(ParticipantId::new("a"), ParticipantId::new("b"));

        let initial = ledger.get_match_round_state(&address).await.unwrap();
        registry.insert(Match::discovered(
            address.clone(),
            Participants::new(ParticipantId::new("a"), ParticipantId::new("b")),
            clock.now(),
            Some(&initial),
        ));

        let executor = Arc::new(SettlementExecutor::new(
            ledger.clone(),
            Arc::clone(&registry),
            Arc::new(clock.clone()),
            policy,
        ));

        Harness {
            clock,
            ledger,
            registry,
            executor,
            address,
        }
    }

    fn claim(h: &Harness) -> AttemptId {
        let attempt_id = AttemptId::new();
        h.registry
            .update(&h.address, |m| m.begin_settlement(attempt_id))
            .unwrap()
            .unwrap();
        attempt_id
    }

    #[tokio::test(start_paused = true)]
    async fn test_settles_and_refreshes_round() {
        let h = harness().await;
        h.clock.advance(chrono::Duration::seconds(30));
        let attempt_id = claim(&h);

        let report = h.executor.attempt_settlement(h.address.clone(), attempt_id, 1).await;
        assert_matches!(report.outcome, SettlementOutcome::Settled { .. });
        assert_eq!(report.attempts, 1);
        assert_eq!(report.state, Some(LifecycleState::Active));

        let m = h.registry.get(&h.address).unwrap();
        assert_eq!(m.round, Some(2));
        assert_eq!(m.round_deadline, h.clock.now() + chrono::Duration::seconds(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_then_success() {
        let h = harness().await;
        h.clock.advance(chrono::Duration::seconds(30));
        h.registry
            .update(&h.address, |m| m.consecutive_failures = 2)
            .unwrap();
        h.ledger.fail_next_submissions([
            LedgerError::transient("nonce too low"),
            LedgerError::transient("connection reset"),
            LedgerError::transient("gateway timeout"),
        ]);
        let attempt_id = claim(&h);

        let report = h.executor.attempt_settlement(h.address.clone(), attempt_id, 1).await;
        assert_matches!(report.outcome, SettlementOutcome::Settled { .. });
        assert_eq!(report.attempts, 4);
        // 500ms + 1s + 2s of backoff
        assert_eq!(report.latency, Duration::from_millis(3500));

        let m = h.registry.get(&h.address).unwrap();
        assert!(m.is_active());
        assert_eq!(m.consecutive_failures, 0);
        assert_eq!(m.round, Some(2));
        assert_eq!(h.ledger.settlement_count(&h.address), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_settled_is_success() {
        let h = harness().await;
        h.ledger
            .fail_next_submissions([LedgerError::already_settled("round 1 settled")]);
        let attempt_id = claim(&h);

        let report = h.executor.attempt_settlement(h.address.clone(), attempt_id, 1).await;
        assert_eq!(report.outcome, SettlementOutcome::AlreadySettled);
        assert_eq!(report.attempts, 1);
        assert_eq!(h.ledger.submission_count(&h.address), 1);

        let m = h.registry.get(&h.address).unwrap();
        assert!(m.is_active());
        assert_eq!(m.consecutive_failures, 0);
        assert_eq!(m.retry_after, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_is_not_retried() {
        let h = harness().await;
        h.ledger
            .fail_next_submissions([LedgerError::fatal("caller not authorised")]);
        let attempt_id = claim(&h);

        let report = h.executor.attempt_settlement(h.address.clone(), attempt_id, 1).await;
        assert_matches!(report.outcome, SettlementOutcome::Failed(SettlementError::Fatal(_)));
        assert_eq!(report.outcome.label(), "fatal");
        assert_eq!(h.ledger.submission_count(&h.address), 1);

        let m = h.registry.get(&h.address).unwrap();
        assert!(m.is_active());
        assert_eq!(m.consecutive_failures, 1);
        assert_eq!(m.retry_after, Some(h.clock.now()));
        assert!(!m.cooling_down(h.clock.now()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_keep_match_tracked() {
        let h = harness_with(RetryPolicy {
            failure_cooldown: Duration::from_secs(5),
            ..RetryPolicy::default()
        })
        .await;
        h.registry
            .update(&h.address, |m| m.consecutive_failures = 1)
            .unwrap();
        h.ledger
            .fail_next_submissions((0..5).map(|_| LedgerError::transient("ledger unreachable")));
        let attempt_id = claim(&h);

        let report = h.executor.attempt_settlement(h.address.clone(), attempt_id, 1).await;
        assert_matches!(
            report.outcome,
            SettlementOutcome::Failed(SettlementError::Exhausted { attempts: 5, .. })
        );
        assert_eq!(h.ledger.submission_count(&h.address), 5);

        let m = h.registry.get(&h.address).unwrap();
        assert!(m.is_active());
        assert_eq!(m.consecutive_failures, 2);
        assert_eq!(m.retry_after, Some(h.clock.now() + chrono::Duration::seconds(10)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_calls_time_out_as_transient() {
        let h = harness().await;
        h.clock.advance(chrono::Duration::seconds(30));
        h.ledger.set_submit_latency(Some(Duration::from_secs(60)));
        let attempt_id = claim(&h);

        let report = h.executor.attempt_settlement(h.address.clone(), attempt_id, 1).await;
        assert_eq!(report.outcome.label(), "exhausted");
        assert_eq!(report.attempts, 5);
        assert_eq!(h.ledger.settlement_count(&h.address), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unexpected_response_counts_as_failure() {
        let h = harness().await;
        h.ledger
            .fail_next_submissions([LedgerError::unexpected("garbled receipt")]);
        let attempt_id = claim(&h);

        let report = h.executor.attempt_settlement(h.address.clone(), attempt_id, 1).await;
        assert_eq!(report.outcome.label(), "unexpected");
        assert_eq!(report.attempts, 1);
        assert_eq!(h.registry.get(&h.address).unwrap().consecutive_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_attempt_does_not_touch_match() {
        let h = harness().await;
        h.ledger.fail_next_submissions([LedgerError::fatal("rejected")]);
        let current = claim(&h);

        let report = h
            .executor
            .attempt_settlement(h.address.clone(), AttemptId::new(), 1)
            .await;
        assert_eq!(report.state, None);

        let m = h.registry.get(&h.address).unwrap();
        assert!(m.is_pending());
        assert_eq!(m.last_settlement_attempt_id, Some(current));
        assert_eq!(m.consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_evicted_match_is_ignored() {
        let h = harness().await;
        h.clock.advance(chrono::Duration::seconds(30));
        let attempt_id = claim(&h);
        h.registry.evict(&h.address);

        let report = h.executor.attempt_settlement(h.address.clone(), attempt_id, 1).await;
        assert!(report.outcome.is_success());
        assert_eq!(report.state, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_task_releases_match() {
        let h = harness().await;
        h.clock.advance(chrono::Duration::seconds(30));
        h.ledger.set_submit_latency(Some(Duration::from_secs(5)));
        let attempt_id = claim(&h);

        let executor = Arc::clone(&h.executor);
        let address = h.address.clone();
        let task = tokio::spawn(async move { executor.attempt_settlement(address, attempt_id, 1).await });

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(h.registry.get(&h.address).unwrap().is_pending());

        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());

        let m = h.registry.get(&h.address).unwrap();
        assert!(m.is_active());
        assert_eq!(m.consecutive_failures, 0);
    }
}

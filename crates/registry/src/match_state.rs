//! Tracked match and its settlement lifecycle
//!
//! ```text
//! Active --begin_settlement--> SettlementPending
//! SettlementPending --complete_settlement--> Active | Concluded
//! SettlementPending --fail_settlement / release--> Active
//! Active --mark_concluded--> Concluded
//! ```
//!
//! `SettlementPending` is the mutual-exclusion gate for settlement calls:
//! only one attempt id can own it at a time, and reports carrying any other
//! attempt id are ignored.

use chrono::Duration;
use common::{AttemptId, MatchAddress, Participants, Timestamp};
use ledger::RoundState;
use serde::{Deserialize, Serialize};

use crate::error::{RegistryError, RegistryResult};

/// Lifecycle state of a tracked match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Waiting for the current round's settlement trigger
    Active,
    /// A settlement call is in flight
    SettlementPending,
    /// The ledger reported the match as over; awaiting eviction
    Concluded,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::SettlementPending => "settlement_pending",
            Self::Concluded => "concluded",
        }
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One tracked match
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Match {
    pub address: MatchAddress,
    pub participants: Participants,
    pub discovered_at: Timestamp,
    /// Ledger round last observed, `None` until the first successful read
    pub round: Option<u64>,
    pub round_deadline: Timestamp,
    pub lifecycle_state: LifecycleState,
    pub last_settlement_attempt_id: Option<AttemptId>,
    pub consecutive_failures: u32,
    /// No new dispatch before this instant
    pub retry_after: Option<Timestamp>,
    pub concluded_at: Option<Timestamp>,
}

impl Match {
    /// Build a newly discovered match
    ///
    /// Without an initial round state the deadline is `now`, so the first
    /// scheduler cycle re-reads the ledger and decides from there.
    pub fn discovered(
        address: MatchAddress,
        participants: Participants,
        now: Timestamp,
        initial: Option<&RoundState>,
    ) -> Self {
        Self {
            address,
            participants,
            discovered_at: now,
            round: initial.map(|s| s.round),
            round_deadline: initial.map(|s| s.deadline).unwrap_or(now),
            lifecycle_state: LifecycleState::Active,
            last_settlement_attempt_id: None,
            consecutive_failures: 0,
            retry_after: None,
            concluded_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.lifecycle_state == LifecycleState::Active
    }

    pub fn is_pending(&self) -> bool {
        self.lifecycle_state == LifecycleState::SettlementPending
    }

    pub fn is_concluded(&self) -> bool {
        self.lifecycle_state == LifecycleState::Concluded
    }

    /// A failed settlement's cooldown has not yet elapsed
    pub fn cooling_down(&self, now: Timestamp) -> bool {
        self.retry_after.map(|t| now < t).unwrap_or(false)
    }

    /// The ledger reports a round newer than the one cached here
    ///
    /// Always `false` before the first successful read.
    pub fn round_advanced(&self, state: &RoundState) -> bool {
        self.round.is_some_and(|r| state.round > r)
    }

    /// Cache the ledger's view of the current round
    pub fn apply_round(&mut self, state: &RoundState) {
        self.round = Some(state.round);
        self.round_deadline = state.deadline;
    }

    /// Claim the settlement gate for `attempt_id`
    ///
    /// Only an `Active` match can be claimed; the caller that gets `Ok` owns
    /// the single in-flight settlement for this address.
    pub fn begin_settlement(&mut self, attempt_id: AttemptId) -> RegistryResult<()> {
        if !self.is_active() {
            return Err(self.invalid(LifecycleState::SettlementPending));
        }
        self.lifecycle_state = LifecycleState::SettlementPending;
        self.last_settlement_attempt_id = Some(attempt_id);
        self.retry_after = None;
        Ok(())
    }

    fn owns_gate(&self, attempt_id: AttemptId) -> bool {
        self.is_pending() && self.last_settlement_attempt_id == Some(attempt_id)
    }

    /// Apply a successful settlement
    ///
    /// `post` is the ledger read taken after the settlement; when it is
    /// missing the cached round is kept and the next cycle re-reads.
    /// Returns the new state, or `None` when the report is stale.
    pub fn complete_settlement(
        &mut self,
        attempt_id: AttemptId,
        post: Option<&RoundState>,
        now: Timestamp,
    ) -> Option<LifecycleState> {
        if !self.owns_gate(attempt_id) {
            return None;
        }

        self.consecutive_failures = 0;
        self.retry_after = None;
        match post {
            Some(state) if state.is_terminal => {
                self.apply_round(state);
                self.conclude(now);
            }
            Some(state) => {
                self.apply_round(state);
                self.lifecycle_state = LifecycleState::Active;
            }
            None => self.lifecycle_state = LifecycleState::Active,
        }
        Some(self.lifecycle_state)
    }

    /// Apply an exhausted or fatal settlement
    ///
    /// Returns `false` when the report is stale.
    pub fn fail_settlement(&mut self, attempt_id: AttemptId, now: Timestamp, cooldown: Duration) -> bool {
        if !self.owns_gate(attempt_id) {
            return false;
        }
        self.lifecycle_state = LifecycleState::Active;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.retry_after = Some(now + cooldown);
        true
    }

    /// Reopen the gate for an attempt that ended without reporting
    pub fn release(&mut self, attempt_id: AttemptId) -> bool {
        if !self.owns_gate(attempt_id) {
            return false;
        }
        self.lifecycle_state = LifecycleState::Active;
        true
    }

    /// Move an `Active` match to `Concluded`
    ///
    /// Returns `false` if the match is already concluded or a settlement
    /// currently owns the gate.
    pub fn mark_concluded(&mut self, now: Timestamp) -> bool {
        if !self.is_active() {
            return false;
        }
        self.conclude(now);
        true
    }

    fn conclude(&mut self, now: Timestamp) {
        self.lifecycle_state = LifecycleState::Concluded;
        self.concluded_at = Some(now);
        self.retry_after = None;
    }

    /// Concluded for at least `grace`
    pub fn evictable(&self, now: Timestamp, grace: Duration) -> bool {
        match (self.lifecycle_state, self.concluded_at) {
            (LifecycleState::Concluded, Some(at)) => now >= at + grace,
            _ => false,
        }
    }

    fn invalid(&self, to: LifecycleState) -> RegistryError {
        RegistryError::InvalidTransition {
            address: self.address.clone(),
            from: self.lifecycle_state,
            to,
        }
    }
}

//! Ledger-facing data types

use chrono::Duration;
use common::{AttemptId, MatchAddress, Participants, Timestamp};
use serde::{Deserialize, Serialize};

/// Notification that the ledger created a new match
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchCreated {
    pub participants: Participants,
    pub address: MatchAddress,
}

/// Authoritative state of a match's current round
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundState {
    /// Round number, starting at 1 and increasing after each settlement
    pub round: u64,
    /// The match is over; no further settlement is possible
    pub is_terminal: bool,
    /// When the current decision window closes
    pub deadline: Timestamp,
    pub participant1_acted: bool,
    pub participant2_acted: bool,
}

impl RoundState {
    /// Both participants have recorded a move for this round
    pub fn both_acted(&self) -> bool {
        self.participant1_acted && self.participant2_acted
    }

    /// The decision window has closed at `now`
    pub fn deadline_passed(&self, now: Timestamp) -> bool {
        now >= self.deadline
    }

    /// Time left in the decision window, zero once it has closed
    pub fn remaining(&self, now: Timestamp) -> Duration {
        (self.deadline - now).max(Duration::zero())
    }
}

/// Settlement call parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementRequest {
    /// Idempotency token, reused across retries of one dispatch
    pub attempt_id: AttemptId,
    /// Round the caller believes it is settling
    pub round: u64,
}

/// Receipt returned by a settlement call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementReceipt {
    pub tx_id: String,
    pub confirmed: bool,
}

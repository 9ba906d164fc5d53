//! Settlement error types

use ledger::LedgerError;
use thiserror::Error;

/// Reasons a settlement dispatch did not settle the round
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SettlementError {
    /// Every attempt failed transiently
    #[error("Retries exhausted after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: LedgerError },

    /// The ledger rejected the call permanently
    #[error("Settlement rejected: {0}")]
    Fatal(LedgerError),

    /// The ledger answered with something we cannot interpret
    #[error("Unexpected settlement response: {0}")]
    Unexpected(String),
}

impl SettlementError {
    /// Metric label for the failure kind
    pub fn label(&self) -> &'static str {
        match self {
            Self::Exhausted { .. } => "exhausted",
            Self::Fatal(_) => "fatal",
            Self::Unexpected(_) => "unexpected",
        }
    }
}

//! Coordinator error types

use ledger::LedgerError;
use thiserror::Error;

/// Errors that can occur while running the coordinator
#[derive(Error, Debug)]
pub enum CoordinatorError {
    /// Ledger error
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Settlement tasks still running when the drain timeout expired
    #[error("Drain timed out with {abandoned} settlement(s) in flight")]
    DrainTimeout { abandoned: usize },
}

/// Result type for coordinator operations
pub type CoordinatorResult<T> = std::result::Result<T, CoordinatorError>;

//! Settlement Executor for Matchkeeper
//!
//! Issues the ledger settlement call for one match once the scheduler has
//! claimed it, retrying transient failures with exponential backoff under a
//! single idempotency token, and reports the outcome back into the registry.
//!
//! # Outcomes
//!
//! - Confirmed receipt or `AlreadySettled` - refresh the match from the
//!   ledger; it becomes `Active` for the next round or `Concluded`
//! - Exhausted retries, `Fatal` or an unexpected response - the match goes
//!   back to `Active` with one more consecutive failure and an optional
//!   cooldown

pub mod error;
pub mod executor;
pub mod retry;

pub use error::SettlementError;
pub use executor::{SettlementExecutor, SettlementOutcome, SettlementReport};
pub use retry::RetryPolicy;

/// Result type for settlement operations
pub type Result<T> = std::result::Result<T, SettlementError>;

//! Ledger error taxonomy

use thiserror::Error;

/// Result type for ledger operations
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Classified outcome of a failed ledger call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Network failure, timeout or nonce contention. Safe to retry.
    #[error("Transient ledger error: {0}")]
    Transient(String),

    /// The ledger rejected the call because its precondition is already
    /// satisfied (the round was settled by an earlier call).
    #[error("Already settled: {0}")]
    AlreadySettled(String),

    /// Authorization or configuration problem. Retrying will not help.
    #[error("Fatal ledger error: {0}")]
    Fatal(String),

    /// The ledger answered with something outside the expected contract.
    #[error("Unexpected ledger response: {0}")]
    Unexpected(String),
}

impl LedgerError {
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn already_settled(msg: impl Into<String>) -> Self {
        Self::AlreadySettled(msg.into())
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::Fatal(msg.into())
    }

    pub fn unexpected(msg: impl Into<String>) -> Self {
        Self::Unexpected(msg.into())
    }

    /// Whether the call may be retried with backoff
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Whether the error is really an idempotent success signal
    pub fn is_already_settled(&self) -> bool {
        matches!(self, Self::AlreadySettled(_))
    }

    /// Short label used for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transient(_) => "transient",
            Self::AlreadySettled(_) => "already_settled",
            Self::Fatal(_) => "fatal",
            Self::Unexpected(_) => "unexpected",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(LedgerError::transient("timeout").is_transient());
        assert!(!LedgerError::fatal("unauthorized").is_transient());
        assert!(LedgerError::already_settled("round 3").is_already_settled());
        assert!(!LedgerError::unexpected("??").is_already_settled());
        assert_eq!(LedgerError::fatal("x").kind(), "fatal");
    }
}

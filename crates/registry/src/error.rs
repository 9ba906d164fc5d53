//! Registry error types

use common::MatchAddress;
use thiserror::Error;

use crate::match_state::LifecycleState;

/// Errors returned by registry operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// The match is not tracked, usually because it was evicted concurrently
    #[error("Match not found: {0}")]
    NotFound(MatchAddress),

    /// A lifecycle transition was attempted from the wrong state
    #[error("Invalid transition for {address}: {from} -> {to}")]
    InvalidTransition {
        address: MatchAddress,
        from: LifecycleState,
        to: LifecycleState,
    },
}

impl RegistryError {
    /// Whether this is the benign concurrent-eviction race
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Result type for registry operations
pub type RegistryResult<T> = std::result::Result<T, RegistryError>;

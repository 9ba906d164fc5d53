//! Ledger client trait

use async_trait::async_trait;
use common::MatchAddress;
use futures::stream::BoxStream;
use std::sync::Arc;

use crate::error::LedgerResult;
use crate::types::{MatchCreated, RoundState, SettlementReceipt, SettlementRequest};

/// Stream of match-created notifications
///
/// An `Err` item reports a delivery problem without ending the stream; the
/// stream ending means the subscription is gone and must be re-established.
pub type MatchCreatedStream = BoxStream<'static, LedgerResult<MatchCreated>>;

/// Shared handle to a ledger client
pub type SharedLedger = Arc<dyn LedgerClient>;

/// Client trait for the match ledger - transport agnostic
///
/// Implementations hold the connection and signing credential. They are
/// shared by every coordinator task and must not require `&mut self`.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Subscribe to notifications announcing newly created matches
    async fn subscribe_match_created(&self) -> LedgerResult<MatchCreatedStream>;

    /// Read the authoritative state of a match's current round
    async fn get_match_round_state(&self, address: &MatchAddress) -> LedgerResult<RoundState>;

    /// Submit the state-advancing settlement call for a match
    ///
    /// Fails with [`LedgerError::AlreadySettled`](crate::LedgerError::AlreadySettled)
    /// if the round was settled already, including by an earlier try carrying
    /// the same attempt id.
    async fn submit_settlement(
        &self,
        address: &MatchAddress,
        request: SettlementRequest,
    ) -> LedgerResult<SettlementReceipt>;

    /// Enumerate matches that are not yet concluded
    ///
    /// Used to rebuild the registry on startup and after re-subscribing.
    async fn list_open_matches(&self) -> LedgerResult<Vec<MatchCreated>>;
}

//! # Ledger Crate
//!
//! The ledger is the authoritative, append-only store of match and move
//! state. Matchkeeper never owns that state: it reads round state, submits
//! settlement calls, and listens for newly created matches.
//!
//! This crate defines the [`LedgerClient`] trait the coordinator depends on,
//! the error taxonomy used to classify ledger outcomes, and two
//! implementations:
//!
//! - [`SimulatedLedger`] - in-process ledger with scriptable faults, used by
//!   the `simulate` command and by tests
//! - `HttpLedgerClient` (feature `http`) - JSON gateway client

pub mod client;
pub mod error;
pub mod simulated;
pub mod types;

#[cfg(feature = "http")]
pub mod http;

pub use client::{LedgerClient, MatchCreatedStream, SharedLedger};
pub use error::{LedgerError, LedgerResult};
pub use simulated::{SimulatedLedger, SimulatedLedgerConfig};
pub use types::{MatchCreated, RoundState, SettlementReceipt, SettlementRequest};

#[cfg(feature = "http")]
pub use http::HttpLedgerClient;

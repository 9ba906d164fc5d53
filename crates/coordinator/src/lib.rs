//! # Coordinator Crate
//!
//! Drives every tracked match from discovery to eviction:
//!
//! - [`DiscoveryListener`] - consumes match-created notifications and
//!   reconciles against the ledger's open matches
//! - [`DeadlineScheduler`] - periodic scan that decides, per match, whether
//!   to conclude, refresh or dispatch a settlement
//! - [`Coordinator`] - wires both to one registry and drains in-flight
//!   settlements on shutdown
//!
//! ```text
//! DiscoveryListener -> MatchRegistry <- DeadlineScheduler -> SettlementExecutor
//!                            ^                                      |
//!                            +--------------- report ---------------+
//! ```

pub mod coordinator;
pub mod discovery;
pub mod error;
pub mod scheduler;

pub use coordinator::{Coordinator, CoordinatorSettings};
pub use discovery::{DiscoveryListener, DiscoverySettings};
pub use error::{CoordinatorError, CoordinatorResult};
pub use scheduler::{CycleReport, DeadlineScheduler, SchedulerSettings};

//! # Registry Crate
//!
//! The registry is the single shared mutable structure of the coordinator.
//! Discovery inserts matches, the scheduler snapshots and updates them, and
//! settlement tasks report their outcomes back through it.
//!
//! Each match sits behind its own lock, so updates to one address are
//! serialized while unrelated addresses proceed in parallel. No operation
//! performs I/O or awaits.

pub mod error;
pub mod match_state;
pub mod registry;
pub mod retired;

pub use error::{RegistryError, RegistryResult};
pub use match_state::{LifecycleState, Match};
pub use registry::{LifecycleCounts, MatchRegistry};
pub use retired::RetiredSet;

//! Common types and utilities for Matchkeeper
//!
//! This crate provides shared types, traits, and utilities used across
//! all Matchkeeper crates.
//!
//! # Modules
//!
//! - [`error`] - Common error types
//! - [`types`] - Shared identifiers (MatchAddress, ParticipantId, AttemptId)
//! - [`clock`] - Wall-clock abstraction so deadline logic can be driven in tests

pub mod clock;
pub mod error;
pub mod types;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock, Timestamp};
pub use error::{Error, Result};
pub use types::*;

//! Operator status server for Matchkeeper
//!
//! A small Axum server exposing read-only views of the match registry,
//! plus the shutdown plumbing shared by every long-running component.
//!
//! # Modules
//!
//! - [`config`] - Bind address configuration
//! - [`error`] - Server error types
//! - [`health`] - `/health` and `/matches` handlers
//! - [`http`] - Axum server implementing [`Server`]
//! - [`shutdown`] - Signal-driven shutdown controller
//! - [`traits`] - [`Server`] and [`ServerExt`]

pub mod config;
pub mod error;
pub mod health;
pub mod http;
pub mod shutdown;
pub mod traits;

pub use config::{ServerConfig, DEFAULT_STATUS_PORT};
pub use error::{Result, ServerError};
pub use health::{status_routes, StatusState};
pub use http::HttpServer;
pub use shutdown::{run_until_shutdown, ShutdownController};
pub use traits::{Server, ServerExt};

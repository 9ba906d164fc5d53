//! Observability infrastructure for Matchkeeper
//!
//! - Structured logging via `tracing`, in pretty, JSON or compact form
//! - Prometheus exporter and the coordinator's metric set
//!
//! # Quick Start
//!
//! ```ignore
//! use observability::{init_logging, LogFormat};
//!
//! init_logging("matchkeeper", LogFormat::Json)?;
//! observability::metrics::init_metrics("0.0.0.0", 9090)?;
//! ```

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, LogFormat};
pub use metrics::{init_metrics, CoordinatorMetrics};

//! Prometheus metrics
//!
//! # Metrics
//!
//! * `matchkeeper_matches_discovered_total`
//! * `matchkeeper_tracked_matches` - gauge
//! * `matchkeeper_lifecycle_transitions_total{to}`
//! * `matchkeeper_settlements_dispatched_total`
//! * `matchkeeper_settlement_outcomes_total{result}`
//! * `matchkeeper_settlement_attempts` - ledger calls per dispatch
//! * `matchkeeper_settlement_latency_seconds`
//! * `matchkeeper_ledger_read_failures_total`
//! * `matchkeeper_scheduler_cycle_seconds`

use metrics::{counter, gauge, histogram, Counter, Gauge, Histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Duration;

/// Start the Prometheus exporter, serving `/metrics` on `host:port`
pub fn init_metrics(host: &str, port: u16) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{host}:{port}").parse()?;

    PrometheusBuilder::new().with_http_listener(addr).install()?;

    tracing::info!(%addr, "Metrics server listening");
    Ok(())
}

/// Metric handles for the coordinator
///
/// Handles are no-ops until an exporter is installed, so components can
/// record unconditionally.
#[derive(Clone)]
pub struct CoordinatorMetrics {
    discovered: Counter,
    tracked: Gauge,
    dispatched: Counter,
    attempts: Histogram,
    latency: Histogram,
    read_failures: Counter,
    cycle_duration: Histogram,
}

impl CoordinatorMetrics {
    pub fn new() -> Self {
        Self {
            discovered: counter!("matchkeeper_matches_discovered_total"),
            tracked: gauge!("matchkeeper_tracked_matches"),
            dispatched: counter!("matchkeeper_settlements_dispatched_total"),
            attempts: histogram!("matchkeeper_settlement_attempts"),
            latency: histogram!("matchkeeper_settlement_latency_seconds"),
            read_failures: counter!("matchkeeper_ledger_read_failures_total"),
            cycle_duration: histogram!("matchkeeper_scheduler_cycle_seconds"),
        }
    }

    pub fn match_discovered(&self) {
        self.discovered.increment(1);
    }

    pub fn set_tracked(&self, count: usize) {
        self.tracked.set(count as f64);
    }

    /// A match entered lifecycle state `to`
    pub fn transition(&self, to: &'static str) {
        counter!("matchkeeper_lifecycle_transitions_total", "to" => to).increment(1);
    }

    pub fn settlement_dispatched(&self) {
        self.dispatched.increment(1);
    }

    /// Record a finished settlement dispatch
    pub fn record_settlement(&self, result: &'static str, attempts: u32, latency: Duration) {
        counter!("matchkeeper_settlement_outcomes_total", "result" => result).increment(1);
        self.attempts.record(f64::from(attempts));
        self.latency.record(latency.as_secs_f64());
    }

    pub fn ledger_read_failed(&self) {
        self.read_failures.increment(1);
    }

    pub fn record_cycle(&self, duration: Duration) {
        self.cycle_duration.record(duration.as_secs_f64());
    }
}

impl Default for CoordinatorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

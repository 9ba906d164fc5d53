//! Matchkeeper configuration
//!
//! The master config is a single YAML document. Every section and every
//! field has a default, so an empty file is a valid configuration that runs
//! against the simulated ledger.

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub mod defaults;
pub mod parser;
pub mod substitution;
pub mod validator;

pub use defaults::*;
pub use parser::*;
pub use substitution::*;
pub use validator::*;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CoordinatorConfig {
    /// Service name used in logs
    #[serde(default = "default_coordinator_name")]
    pub name: String,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            name: default_coordinator_name(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerBackend {
    /// In-process simulated ledger
    #[default]
    Simulated,
    /// JSON gateway in front of the ledger
    Http,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LedgerConfig {
    #[serde(default)]
    pub backend: LedgerBackend,
    /// Gateway base URL, required for the `http` backend
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// How long one event long-poll may wait for new matches
    #[serde(default = "default_poll_wait_seconds")]
    pub poll_wait_seconds: u64,
}

impl LedgerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn poll_wait(&self) -> Duration {
        Duration::from_secs(self.poll_wait_seconds)
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            backend: LedgerBackend::default(),
            endpoint: None,
            request_timeout_ms: default_request_timeout_ms(),
            poll_wait_seconds: default_poll_wait_seconds(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_poll_interval_seconds")]
    pub poll_interval_seconds: u64,
    /// How long a concluded match stays visible; one poll interval when unset
    #[serde(default)]
    pub eviction_grace_seconds: Option<u64>,
    /// Ledger reads in flight during one scan
    #[serde(default = "default_scan_concurrency")]
    pub scan_concurrency: usize,
    /// Settle as soon as both participants have acted
    #[serde(default = "default_enabled")]
    pub early_settlement: bool,
    /// Run the first cycle immediately instead of after one interval
    #[serde(default = "default_enabled")]
    pub run_on_startup: bool,
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    pub fn eviction_grace(&self) -> Duration {
        self.eviction_grace_seconds
            .map(Duration::from_secs)
            .unwrap_or_else(|| self.poll_interval())
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: default_poll_interval_seconds(),
            eviction_grace_seconds: None,
            scan_concurrency: default_scan_concurrency(),
            early_settlement: true,
            run_on_startup: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SettlementConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,
    #[serde(default = "default_failure_cooldown_ms")]
    pub failure_cooldown_ms: u64,
    #[serde(default = "default_max_failure_cooldown_ms")]
    pub max_failure_cooldown_ms: u64,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            attempt_timeout_ms: default_attempt_timeout_ms(),
            failure_cooldown_ms: default_failure_cooldown_ms(),
            max_failure_cooldown_ms: default_max_failure_cooldown_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DiscoveryConfig {
    #[serde(default = "default_resubscribe_delay_ms")]
    pub resubscribe_delay_ms: u64,
    #[serde(default = "default_max_resubscribe_delay_ms")]
    pub max_resubscribe_delay_ms: u64,
    /// Evicted addresses remembered to reject late notifications
    #[serde(default = "default_retired_capacity")]
    pub retired_capacity: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            resubscribe_delay_ms: default_resubscribe_delay_ms(),
            max_resubscribe_delay_ms: default_max_resubscribe_delay_ms(),
            retired_capacity: default_retired_capacity(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ShutdownConfig {
    /// Time allowed for in-flight settlements after a stop request
    #[serde(default = "default_drain_timeout_seconds")]
    pub drain_timeout_seconds: u64,
}

impl ShutdownConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_seconds)
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_timeout_seconds: default_drain_timeout_seconds(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: default_host(),
            port: default_metrics_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitoringConfig {
    /// `pretty`, `json` or `compact`
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            log_format: default_log_format(),
            metrics: MetricsConfig::default(),
        }
    }
}

/// Operator HTTP server (`/health`, `/matches`)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_server_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_host(),
            port: default_server_port(),
        }
    }
}

/// Parameters of the `simulate` command
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SimulationConfig {
    #[serde(default = "default_round_duration_seconds")]
    pub round_duration_seconds: u64,
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u64,
    #[serde(default = "default_simulated_matches")]
    pub matches: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            round_duration_seconds: default_round_duration_seconds(),
            max_rounds: default_max_rounds(),
            matches: default_simulated_matches(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MasterConfig {
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub settlement: SettlementConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub shutdown: ShutdownConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config: MasterConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.coordinator.name, "matchkeeper");
        assert_eq!(config.ledger.backend, LedgerBackend::Simulated);
        assert_eq!(config.scheduler.poll_interval(), Duration::from_secs(5));
        assert_eq!(config.scheduler.eviction_grace(), Duration::from_secs(5));
        assert!(config.scheduler.early_settlement);
        assert_eq!(config.settlement.max_attempts, 5);
        assert_eq!(config.discovery.retired_capacity, 10_000);
        assert!(!config.monitoring.metrics.enabled);
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let yaml = r#"
ledger:
  backend: http
  endpoint: http://gateway:8545
scheduler:
  poll_interval_seconds: 2
  eviction_grace_seconds: 30
"#;
        let config: MasterConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.ledger.backend, LedgerBackend::Http);
        assert_eq!(config.ledger.request_timeout(), Duration::from_secs(5));
        assert_eq!(config.scheduler.poll_interval(), Duration::from_secs(2));
        assert_eq!(config.scheduler.eviction_grace(), Duration::from_secs(30));
        assert_eq!(config.scheduler.scan_concurrency, 16);
    }
}

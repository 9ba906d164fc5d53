use crate::*;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Coordinator name is required")]
    MissingCoordinatorName,

    #[error("{field} must be a positive integer")]
    InvalidPositiveInteger { field: String },

    #[error("{base_field} ({base}) must not exceed {max_field} ({max})")]
    InvalidRange {
        base_field: String,
        base: u64,
        max_field: String,
        max: u64,
    },

    #[error("ledger.endpoint is required for the http backend")]
    MissingLedgerEndpoint,

    #[error("Invalid ledger endpoint '{endpoint}': {message}")]
    InvalidLedgerEndpoint { endpoint: String, message: String },

    #[error("Invalid log format: {0}. Must be one of: pretty, json, compact")]
    InvalidLogFormat(String),

    #[error("Server and metrics exporter both bind port {port}")]
    PortConflict { port: u16 },

    #[error("Environment variable '{var}' is missing or invalid: {message}")]
    InvalidEnvVar { var: String, message: String },
}

#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub field: String,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct DefaultApplied {
    pub field: String,
    pub value: String,
}

#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
    pub defaults_applied: Vec<DefaultApplied>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self {
            errors: Vec::new(),
            warnings: Vec::new(),
            defaults_applied: Vec::new(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, field: &str, message: &str) {
        self.warnings.push(ValidationWarning {
            field: field.to_string(),
            message: message.to_string(),
        });
    }

    pub fn add_default(&mut self, field: &str, value: &str) {
        self.defaults_applied.push(DefaultApplied {
            field: field.to_string(),
            value: value.to_string(),
        });
    }

    fn require_positive(&mut self, field: &str, value: u64) {
        if value == 0 {
            self.add_error(ValidationError::InvalidPositiveInteger {
                field: field.to_string(),
            });
        }
    }

    fn require_ordered(&mut self, base_field: &str, base: u64, max_field: &str, max: u64) {
        if base > max {
            self.add_error(ValidationError::InvalidRange {
                base_field: base_field.to_string(),
                base,
                max_field: max_field.to_string(),
                max,
            });
        }
    }
}

impl Default for ValidationReport {
    fn default() -> Self {
        Self::new()
    }
}

pub fn validate_config(config: &MasterConfig) -> ValidationReport {
    let mut report = ValidationReport::new();

    if config.coordinator.name.trim().is_empty() {
        report.add_error(ValidationError::MissingCoordinatorName);
    }

    validate_ledger(&config.ledger, &mut report);
    validate_scheduler(&config.scheduler, &mut report);
    validate_settlement(&config.settlement, &mut report);
    validate_discovery(&config.discovery, &mut report);
    validate_monitoring(config, &mut report);
    validate_simulation(&config.simulation, &mut report);

    report.require_positive(
        "shutdown.drain_timeout_seconds",
        config.shutdown.drain_timeout_seconds,
    );

    report
}

fn validate_ledger(ledger: &LedgerConfig, report: &mut ValidationReport) {
    report.require_positive("ledger.request_timeout_ms", ledger.request_timeout_ms);

    match (ledger.backend, ledger.endpoint.as_deref()) {
        (LedgerBackend::Http, None) => report.add_error(ValidationError::MissingLedgerEndpoint),
        (LedgerBackend::Http, Some(endpoint)) => validate_endpoint(endpoint, report),
        (LedgerBackend::Simulated, Some(_)) => report.add_warning(
            "ledger.endpoint",
            "Ignored by the simulated backend",
        ),
        (LedgerBackend::Simulated, None) => {}
    }
}

fn validate_endpoint(endpoint: &str, report: &mut ValidationReport) {
    let unresolved = unresolved_env_vars(endpoint);
    if !unresolved.is_empty() {
        for var in unresolved {
            report.add_error(ValidationError::InvalidEnvVar {
                var,
                message: "referenced by ledger.endpoint but not set".to_string(),
            });
        }
        return;
    }

    match Url::parse(endpoint) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => {}
        Ok(url) => report.add_error(ValidationError::InvalidLedgerEndpoint {
            endpoint: endpoint.to_string(),
            message: format!("unsupported scheme '{}'", url.scheme()),
        }),
        Err(e) => report.add_error(ValidationError::InvalidLedgerEndpoint {
            endpoint: endpoint.to_string(),
            message: e.to_string(),
        }),
    }
}

fn validate_scheduler(scheduler: &SchedulerConfig, report: &mut ValidationReport) {
    report.require_positive(
        "scheduler.poll_interval_seconds",
        scheduler.poll_interval_seconds,
    );
    report.require_positive("scheduler.scan_concurrency", scheduler.scan_concurrency as u64);

    match scheduler.eviction_grace_seconds {
        None => report.add_default(
            "scheduler.eviction_grace_seconds",
            &scheduler.poll_interval_seconds.to_string(),
        ),
        Some(grace) if grace < scheduler.poll_interval_seconds => report.add_warning(
            "scheduler.eviction_grace_seconds",
            "Shorter than one poll interval; concluded matches may vanish before they are observed",
        ),
        Some(_) => {}
    }
}

fn validate_settlement(settlement: &SettlementConfig, report: &mut ValidationReport) {
    report.require_positive("settlement.max_attempts", u64::from(settlement.max_attempts));
    report.require_positive("settlement.attempt_timeout_ms", settlement.attempt_timeout_ms);
    report.require_ordered(
        "settlement.base_delay_ms",
        settlement.base_delay_ms,
        "settlement.max_delay_ms",
        settlement.max_delay_ms,
    );
    report.require_ordered(
        "settlement.failure_cooldown_ms",
        settlement.failure_cooldown_ms,
        "settlement.max_failure_cooldown_ms",
        settlement.max_failure_cooldown_ms,
    );
}

fn validate_discovery(discovery: &DiscoveryConfig, report: &mut ValidationReport) {
    report.require_positive(
        "discovery.resubscribe_delay_ms",
        discovery.resubscribe_delay_ms,
    );
    report.require_ordered(
        "discovery.resubscribe_delay_ms",
        discovery.resubscribe_delay_ms,
        "discovery.max_resubscribe_delay_ms",
        discovery.max_resubscribe_delay_ms,
    );
    if discovery.retired_capacity == 0 {
        report.add_warning(
            "discovery.retired_capacity",
            "Zero capacity is raised to one; late notifications may re-add concluded matches",
        );
    }
}

fn validate_monitoring(config: &MasterConfig, report: &mut ValidationReport) {
    let format = config.monitoring.log_format.to_ascii_lowercase();
    if !matches!(format.as_str(), "pretty" | "json" | "compact") {
        report.add_error(ValidationError::InvalidLogFormat(
            config.monitoring.log_format.clone(),
        ));
    }

    let metrics = &config.monitoring.metrics;
    if metrics.enabled && config.server.enabled && metrics.port == config.server.port {
        report.add_error(ValidationError::PortConflict { port: metrics.port });
    }
}

fn validate_simulation(simulation: &SimulationConfig, report: &mut ValidationReport) {
    report.require_positive(
        "simulation.round_duration_seconds",
        simulation.round_duration_seconds,
    );
    report.require_positive("simulation.max_rounds", simulation.max_rounds);
}

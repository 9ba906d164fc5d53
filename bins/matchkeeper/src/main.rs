//! Matchkeeper CLI and coordinator binary
//!
//! Provides commands for initializing and validating configuration, for
//! starting the coordinator against a ledger, and for running a
//! self-contained simulation.

mod players;

use anyhow::{Context, Result};
use cli::{Cli, Commands, LogFormatArg};
use common::{SharedClock, SystemClock};
use config::{
    generate_default_config, load_config, save_config, validate_config, LedgerBackend,
    MasterConfig,
};
use coordinator::{Coordinator, CoordinatorError, CoordinatorSettings};
use ledger::{SharedLedger, SimulatedLedger, SimulatedLedgerConfig};
use observability::{init_logging, init_metrics, LogFormat};
use server::{HttpServer, Server, ServerConfig, ShutdownController, StatusState};
use std::path::Path;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::players::Players;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    match cli.command {
        Commands::Start {
            config,
            port,
            log_format,
        } => start_command(config, port, log_format).await,
        Commands::Simulate {
            config,
            matches,
            log_format,
        } => simulate_command(config, matches, log_format).await,
        Commands::Validate { config } => {
            init_logging("matchkeeper", LogFormat::Pretty)?;
            validate_command(config).await
        }
        Commands::Init { output } => {
            init_logging("matchkeeper", LogFormat::Pretty)?;
            init_command(output).await
        }
    }
}

/// Load the config and install logging in the requested format
fn load_and_init<P: AsRef<Path>>(
    config_path: P,
    log_format: Option<LogFormatArg>,
) -> Result<MasterConfig> {
    let config = load_config(&config_path)?;

    let format = match log_format {
        Some(arg) => arg.as_str().to_string(),
        None => config.monitoring.log_format.clone(),
    };
    let format = LogFormat::parse(&format).unwrap_or_default();
    init_logging(&config.coordinator.name, format)?;

    info!(path = ?config_path.as_ref(), %format, "Matchkeeper starting...");
    Ok(config)
}

fn ensure_valid(config: &MasterConfig) -> Result<()> {
    let report = validate_config(config);

    for default in &report.defaults_applied {
        debug!(field = %default.field, value = %default.value, "Default applied");
    }
    if !report.warnings.is_empty() {
        warn!("Configuration warnings:");
        for warning in &report.warnings {
            warn!(field = %warning.field, message = %warning.message);
        }
    }

    if !report.is_valid() {
        error!(
            error_count = report.errors.len(),
            "Configuration validation failed"
        );
        for err in &report.errors {
            error!("{}", err);
        }
        anyhow::bail!("Cannot start coordinator due to configuration errors");
    }
    Ok(())
}

async fn start_command<P: AsRef<Path>>(
    config_path: P,
    port_override: Option<u16>,
    log_format: Option<LogFormatArg>,
) -> Result<()> {
    let mut config = load_and_init(config_path, log_format)?;
    if let Some(port) = port_override {
        debug!(port, "Overriding status server port");
        config.server.port = port;
    }
    ensure_valid(&config)?;

    let clock = SystemClock::shared();
    let ledger = build_ledger(&config, Arc::clone(&clock))?;

    let shutdown = ShutdownController::with_signals();
    let coordinator = Coordinator::new(ledger, clock, CoordinatorSettings::from_config(&config));
    run_until_stopped(&config, &coordinator, &shutdown).await
}

async fn simulate_command<P: AsRef<Path>>(
    config_path: P,
    matches: Option<usize>,
    log_format: Option<LogFormatArg>,
) -> Result<()> {
    let mut config = load_and_init(config_path, log_format)?;
    // The simulated ledger needs no endpoint
    config.ledger.backend = LedgerBackend::Simulated;
    config.ledger.endpoint = None;
    ensure_valid(&config)?;

    let count = matches.unwrap_or(config.simulation.matches);
    info!(
        matches = count,
        round_duration_seconds = config.simulation.round_duration_seconds,
        max_rounds = config.simulation.max_rounds,
        "Starting simulation"
    );

    let clock = SystemClock::shared();
    let ledger = Arc::new(simulated_ledger(&config, Arc::clone(&clock)));

    let shutdown = ShutdownController::with_signals();
    let coordinator = Coordinator::new(
        ledger.clone(),
        Arc::clone(&clock),
        CoordinatorSettings::from_config(&config),
    );

    let players = Players::new(ledger, coordinator.registry(), clock);
    let player_task = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { players.run(count, shutdown).await })
    };

    let result = run_until_stopped(&config, &coordinator, &shutdown).await;
    if let Err(e) = player_task.await {
        warn!(error = %e, "Player task ended abnormally");
    }
    result
}

fn simulated_ledger(config: &MasterConfig, clock: SharedClock) -> SimulatedLedger {
    SimulatedLedger::new(
        clock,
        SimulatedLedgerConfig {
            round_duration: chrono_seconds(config.simulation.round_duration_seconds),
            max_rounds: config.simulation.max_rounds,
        },
    )
}

fn chrono_seconds(seconds: u64) -> chrono::Duration {
    chrono::Duration::seconds(i64::try_from(seconds).unwrap_or(i64::MAX))
}

fn build_ledger(config: &MasterConfig, clock: SharedClock) -> Result<SharedLedger> {
    match config.ledger.backend {
        LedgerBackend::Simulated => {
            warn!("Using the simulated ledger; no matches exist until something creates them");
            Ok(Arc::new(simulated_ledger(config, clock)))
        }
        LedgerBackend::Http => http_ledger(config),
    }
}

#[cfg(feature = "http")]
fn http_ledger(config: &MasterConfig) -> Result<SharedLedger> {
    let endpoint = config
        .ledger
        .endpoint
        .as_deref()
        .context("ledger.endpoint is required for the http backend")?;

    let client = ledger::HttpLedgerClient::new(
        endpoint,
        config.ledger.request_timeout(),
        config.ledger.poll_wait(),
    )
    .with_context(|| format!("Failed to create ledger client for {endpoint}"))?;

    info!(endpoint, "Using HTTP ledger gateway");
    Ok(Arc::new(client))
}

#[cfg(not(feature = "http"))]
fn http_ledger(_config: &MasterConfig) -> Result<SharedLedger> {
    anyhow::bail!("This build does not include the http ledger backend")
}

/// Run the coordinator and status server until shutdown, then drain
async fn run_until_stopped(
    config: &MasterConfig,
    coordinator: &Coordinator,
    shutdown: &ShutdownController,
) -> Result<()> {
    let metrics = &config.monitoring.metrics;
    if metrics.enabled {
        init_metrics(&metrics.host, metrics.port).context("Failed to start metrics exporter")?;
    }

    let status_task = spawn_status_server(config, coordinator, shutdown);

    let result = coordinator.run(shutdown.child_token()).await;

    // Stops the status server when the coordinator exits on its own
    shutdown.shutdown();
    if let Some(task) = status_task {
        if let Err(e) = task.await {
            warn!(error = %e, "Status server task ended abnormally");
        }
    }

    match result {
        Ok(()) => {
            info!("Matchkeeper stopped");
            Ok(())
        }
        Err(CoordinatorError::DrainTimeout { abandoned }) => {
            anyhow::bail!("Shutdown abandoned {abandoned} in-flight settlement(s)")
        }
        Err(e) => Err(e).context("Coordinator failed"),
    }
}

fn spawn_status_server(
    config: &MasterConfig,
    coordinator: &Coordinator,
    shutdown: &ShutdownController,
) -> Option<JoinHandle<()>> {
    if !config.server.enabled {
        debug!("Status server disabled");
        return None;
    }

    let server = HttpServer::status(
        ServerConfig::new(config.server.host.clone(), config.server.port),
        StatusState::new(config.coordinator.name.clone(), coordinator.registry()),
    );
    let token = shutdown.child_token();
    let controller = shutdown.clone();

    Some(tokio::spawn(async move {
        if let Err(e) = server.run(token).await {
            error!(error = %e, "Status server failed, shutting down");
            controller.shutdown();
        }
    }))
}

async fn validate_command<P: AsRef<Path>>(config_path: P) -> Result<()> {
    info!(path = ?config_path.as_ref(), "Validating configuration");

    let config = match load_config(&config_path) {
        Ok(c) => c,
        Err(e) => {
            error!(%e, "Failed to load configuration");
            anyhow::bail!(e);
        }
    };

    let report = validate_config(&config);

    println!("\n=== Configuration Validation Report ===\n");

    if !report.defaults_applied.is_empty() {
        println!("Defaults Applied ({}):", report.defaults_applied.len());
        for default in &report.defaults_applied {
            println!("  [info] {} = {}", default.field, default.value);
        }
        println!();
    }

    if !report.warnings.is_empty() {
        println!("Warnings ({}):", report.warnings.len());
        for warning in &report.warnings {
            println!("  [warn] [{}] {}", warning.field, warning.message);
        }
        println!();
    }

    if !report.errors.is_empty() {
        println!("Errors ({}):", report.errors.len());
        for err in &report.errors {
            println!("  [error] {}", err);
        }
        println!();
        anyhow::bail!("Configuration validation failed");
    }

    println!("[ok] Configuration is valid!");
    println!();
    println!("Coordinator: {}", config.coordinator.name);
    println!("Ledger backend: {:?}", config.ledger.backend);
    if let Some(endpoint) = &config.ledger.endpoint {
        println!("Ledger endpoint: {}", endpoint);
    }
    println!(
        "Poll interval: {}s (early settlement {})",
        config.scheduler.poll_interval_seconds,
        if config.scheduler.early_settlement {
            "on"
        } else {
            "off"
        }
    );
    if config.server.enabled {
        println!("Status server: {}:{}", config.server.host, config.server.port);
    }

    Ok(())
}

async fn init_command<P: AsRef<Path>>(output_path: P) -> Result<()> {
    let output_path = output_path.as_ref();
    info!(?output_path, "Initializing new configuration file");

    let config = generate_default_config();

    if let Some(parent) = output_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {:?}", parent))?;
    }

    save_config(&config, output_path)?;

    println!("[ok] Configuration file created successfully!");
    println!();
    println!("Location: {:?}", output_path);
    println!();
    println!("Next steps:");
    println!("  1. Set ledger.backend and ledger.endpoint for your ledger gateway");
    println!(
        "  2. Run 'matchkeeper validate --config {:?}' to check configuration",
        output_path
    );
    println!(
        "  3. Run 'matchkeeper start --config {:?}' to start the coordinator",
        output_path
    );
    println!(
        "  4. Or run 'matchkeeper simulate --config {:?}' to try it against a simulated ledger",
        output_path
    );

    Ok(())
}

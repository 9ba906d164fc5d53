use crate::*;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use tracing::{debug, info, instrument};

#[instrument(skip(path))]
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<MasterConfig> {
    let path = path.as_ref();
    info!("Loading configuration from: {:?}", path);

    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    debug!("Config file content length: {} bytes", content.len());

    let config = parse_config(&content)?;
    info!("Configuration loaded successfully");
    Ok(config)
}

/// Parse a YAML document after environment variable substitution
pub fn parse_config(content: &str) -> Result<MasterConfig> {
    let substituted = substitution::substitute_env_vars(content)?;

    // An empty document is valid and means "all defaults"
    if substituted.trim().is_empty() {
        return Ok(MasterConfig::default());
    }

    serde_yaml::from_str(&substituted).with_context(|| "Failed to parse YAML configuration")
}

#[instrument]
pub fn generate_default_config() -> MasterConfig {
    MasterConfig {
        ledger: LedgerConfig {
            endpoint: Some("http://127.0.0.1:8545".to_string()),
            ..LedgerConfig::default()
        },
        scheduler: SchedulerConfig {
            eviction_grace_seconds: Some(default_poll_interval_seconds()),
            ..SchedulerConfig::default()
        },
        ..MasterConfig::default()
    }
}

#[instrument]
pub fn save_config<P: AsRef<Path> + std::fmt::Debug>(config: &MasterConfig, path: P) -> Result<()> {
    let path = path.as_ref();
    info!("Saving configuration to: {:?}", path);

    let yaml = serde_yaml::to_string(config)
        .with_context(|| "Failed to serialize configuration to YAML")?;

    fs::write(path, yaml)
        .with_context(|| format!("Failed to write config file: {:?}", path))?;

    info!("Configuration saved successfully");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_is_default() {
        let config = parse_config("   \n").unwrap();
        assert_eq!(config.scheduler.poll_interval_seconds, 5);
    }

    #[test]
    fn test_malformed_yaml_is_an_error() {
        assert!(parse_config("scheduler: [oops").is_err());
    }

    #[test]
    fn test_default_config_round_trips_through_yaml() {
        let generated = generate_default_config();
        let yaml = serde_yaml::to_string(&generated).unwrap();
        let parsed = parse_config(&yaml).unwrap();
        assert_eq!(parsed.ledger.endpoint, generated.ledger.endpoint);
        assert_eq!(parsed.scheduler.eviction_grace_seconds, Some(5));
        assert!(validate_config(&parsed).is_valid());
    }

    #[test]
    fn test_save_and_load() {
        let path = std::env::temp_dir().join(format!("matchkeeper-config-{}.yaml", std::process::id()));
        save_config(&generate_default_config(), &path).unwrap();
        let loaded = load_config(&path).unwrap();
        assert_eq!(loaded.server.port, 8080);
        let _ = std::fs::remove_file(&path);
    }
}

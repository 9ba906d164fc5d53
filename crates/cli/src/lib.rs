use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "matchkeeper")]
#[command(about = "Matchkeeper - settles timed two-player matches on a ledger")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the coordinator against the configured ledger
    Start {
        /// Path to the configuration file
        #[arg(short, long, default_value = "config/matchkeeper.yaml")]
        config: PathBuf,

        /// Override the status server port
        #[arg(long)]
        port: Option<u16>,

        /// Override the log format from the configuration
        #[arg(long, value_enum)]
        log_format: Option<LogFormatArg>,
    },

    /// Run the coordinator against an in-process simulated ledger
    Simulate {
        /// Path to the configuration file
        #[arg(short, long, default_value = "config/matchkeeper.yaml")]
        config: PathBuf,

        /// Number of matches to create (overrides simulation.matches)
        #[arg(short, long)]
        matches: Option<usize>,

        /// Override the log format from the configuration
        #[arg(long, value_enum)]
        log_format: Option<LogFormatArg>,
    },

    /// Validate configuration without starting the coordinator
    Validate {
        /// Path to the configuration file
        #[arg(short, long, default_value = "config/matchkeeper.yaml")]
        config: PathBuf,
    },

    /// Initialize a new configuration file with all defaults
    Init {
        /// Output path for the new configuration file
        #[arg(short, long, default_value = "matchkeeper.yaml")]
        output: PathBuf,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormatArg {
    /// Multi-line human-readable output
    Pretty,

    /// One JSON object per line
    Json,

    /// Single-line human-readable output
    Compact,
}

impl LogFormatArg {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogFormatArg::Pretty => "pretty",
            LogFormatArg::Json => "json",
            LogFormatArg::Compact => "compact",
        }
    }
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_start_overrides() {
        let cli = Cli::try_parse_from([
            "matchkeeper",
            "start",
            "--config",
            "prod.yaml",
            "--port",
            "9100",
            "--log-format",
            "json",
        ])
        .unwrap();

        match cli.command {
            Commands::Start {
                config,
                port,
                log_format,
            } => {
                assert_eq!(config, PathBuf::from("prod.yaml"));
                assert_eq!(port, Some(9100));
                assert_eq!(log_format, Some(LogFormatArg::Json));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_simulate_defaults() {
        let cli = Cli::try_parse_from(["matchkeeper", "simulate", "-m", "4"]).unwrap();
        match cli.command {
            Commands::Simulate {
                config, matches, ..
            } => {
                assert_eq!(config, PathBuf::from("config/matchkeeper.yaml"));
                assert_eq!(matches, Some(4));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_log_format_rejected() {
        assert!(Cli::try_parse_from(["matchkeeper", "start", "--log-format", "xml"]).is_err());
    }
}

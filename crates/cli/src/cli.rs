//! CLI argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Mist Relay - telemetry relay from the Mist cloud to time-series and pub/sub sinks
#[derive(Parser, Debug)]
#[command(
    name = "mist-relay",
    author,
    version,
    about = "Mist telemetry relay",
    long_about = "Relays Mist telemetry into time-series stores and pub/sub topics.\n\n\
                  `stream` subscribes to websocket channels, `poll` fetches REST \n\
                  resources on an interval and forwards only changed snapshots."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "MIST_RELAY_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(
        long,
        value_enum,
        default_value = "pretty",
        global = true,
        env = "MIST_RELAY_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Subscribe to streaming channels and relay every message
    Stream(RunArgs),

    /// Poll REST resources and relay changed snapshots
    Poll(RunArgs),

    /// Validate configuration file without running
    Validate(ValidateArgs),
}

/// Arguments for the `stream` and `poll` commands
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Path to configuration file (TOML or JSON)
    #[arg(
        short,
        long,
        default_value = "config.toml",
        env = "MIST_RELAY_CONFIG"
    )]
    pub config: PathBuf,

    /// Override the Mist API endpoint from configuration
    #[arg(long, env = "MIST_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Mist API token (overrides `mist.api_key`)
    #[arg(long, env = "MIST_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Seconds to wait before reconnecting a dropped stream
    #[arg(long, default_value = "10", env = "MIST_RELAY_RECONNECT_DELAY")]
    pub reconnect_delay: u64,

    /// Validate configuration and exit without running
    #[arg(long)]
    pub dry_run: bool,

    /// Metrics server port (0 = disabled)
    #[arg(long, default_value = "0", env = "MIST_RELAY_METRICS_PORT")]
    pub metrics_port: u16,
}

/// Arguments for the `validate` command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to configuration file to validate
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Log output format
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum LogFormat {
    /// JSON structured logging
    Json,
    /// Human-readable pretty format
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
}

impl From<LogFormat> for observability::LogFormat {
    fn from(format: LogFormat) -> Self {
        match format {
            LogFormat::Json => Self::Json,
            LogFormat::Pretty => Self::Pretty,
            LogFormat::Compact => Self::Compact,
        }
    }
}

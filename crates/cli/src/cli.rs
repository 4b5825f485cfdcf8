//! CLI argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// sensorhub - sensor event distribution engine
#[derive(Parser, Debug)]
#[command(
    name = "sensorhub",
    author,
    version,
    about = "Sensor event distribution engine",
    long_about = "Multiplexes a sensor device into per-client event streams.\n\n\
                  Loads sensors, virtual sensors and demo clients from configuration, \n\
                  runs the engine against a simulated device, and reports delivery, \n\
                  batching and wake-lock statistics."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "SENSORHUB_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(
        long,
        value_enum,
        default_value = "pretty",
        global = true,
        env = "SENSORHUB_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the engine with the configured demo clients
    Run(RunArgs),

    /// Validate configuration file without running
    Validate(ValidateArgs),

    /// Display configuration information
    Info(InfoArgs),
}

/// Arguments for the `run` command
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Path to configuration file (TOML or JSON)
    #[arg(short, long, default_value = "config.toml", env = "SENSORHUB_CONFIG")]
    pub config: PathBuf,

    /// Stop after this many polled batches (0 = unlimited)
    #[arg(long, default_value = "0", env = "SENSORHUB_MAX_BATCHES")]
    pub max_batches: u64,

    /// Run timeout in seconds (0 = no timeout)
    #[arg(long, default_value = "0", env = "SENSORHUB_TIMEOUT")]
    pub timeout: u64,

    /// Validate configuration and exit without running the engine
    #[arg(long)]
    pub dry_run: bool,

    /// Batches buffered between the device poll loop and the engine
    #[arg(long, default_value = "4", env = "SENSORHUB_BATCH_BUFFER")]
    pub batch_buffer: usize,

    /// Metrics server port (0 = disabled)
    #[arg(long, default_value = "0", env = "SENSORHUB_METRICS_PORT")]
    pub metrics_port: u16,
}

/// Arguments for the `validate` command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to configuration file to validate
    #[arg(short, long, default_value = "config.toml", env = "SENSORHUB_CONFIG")]
    pub config: PathBuf,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `info` command
#[derive(Parser, Debug)]
pub struct InfoArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml", env = "SENSORHUB_CONFIG")]
    pub config: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    /// Show detailed sensor information
    #[arg(long)]
    pub sensors: bool,

    /// Show demo client configuration
    #[arg(long)]
    pub clients: bool,
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

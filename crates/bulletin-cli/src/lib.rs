//! # bulletin-cli
//!
//! Command-line front end of the coordination core.
//!
//! ## Commands
//!
//! - `bulletin simulate` - run an in-process fleet against an in-memory store
//! - `bulletin converge-once` - seed a store from a file and run one convergence pass
//!
//! ## Configuration
//!
//! A JSON config file (`--config`) provides the timing knobs; individual
//! flags (or their `BULLETIN_*` environment variables) override it.

pub mod commands;

use std::path::PathBuf;

use anyhow::{Context, Result};
use bulletin_core::BulletinConfig;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Fleet coordination over a shared task registry.
#[derive(Debug, Parser)]
#[command(name = "bulletin")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// JSON configuration file.
    #[arg(long, global = true, env = "BULLETIN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log filter (overridden by `RUST_LOG`).
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Presence TTL in milliseconds.
    #[arg(long, global = true, env = "BULLETIN_HEARTBEAT_INTERVAL_MS")]
    pub heartbeat_interval_ms: Option<u64>,

    /// Convergence period (and converge lock TTL) in milliseconds.
    #[arg(long, global = true, env = "BULLETIN_CONVERGENCE_INTERVAL_MS")]
    pub convergence_interval_ms: Option<u64>,

    /// Pending tasks older than this many milliseconds are failed.
    #[arg(long, global = true, env = "BULLETIN_TIME_TO_CLAIM_MS")]
    pub time_to_claim_ms: Option<u64>,

    /// Memory capacity of each executor.
    #[arg(long, global = true, env = "BULLETIN_MAX_MEMORY_MB")]
    pub max_memory_mb: Option<u64>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run executors, a stager and convergence in one process.
    Simulate(commands::simulate::SimulateArgs),
    /// Run a single convergence pass over tasks loaded from a file.
    ConvergeOnce(commands::converge_once::ConvergeOnceArgs),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl Cli {
    /// File config (or defaults) with flag overrides applied, validated.
    pub fn config(&self) -> Result<BulletinConfig> {
        let mut config = match &self.config {
            Some(path) => BulletinConfig::load(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => BulletinConfig::default(),
        };

        if let Some(v) = self.heartbeat_interval_ms {
            config.heartbeat_interval_ms = v;
        }
        if let Some(v) = self.convergence_interval_ms {
            config.convergence_interval_ms = v;
        }
        if let Some(v) = self.time_to_claim_ms {
            config.time_to_claim_ms = v;
        }
        if let Some(v) = self.max_memory_mb {
            config.max_memory_mb = v;
        }

        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}

/// Install the global subscriber.
pub fn init_tracing(level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_defaults() {
        let cli = Cli::parse_from([
            "bulletin",
            "--convergence-interval-ms",
            "500",
            "--max-memory-mb",
            "256",
            "simulate",
        ]);
        let config = cli.config().unwrap();
        assert_eq!(config.convergence_interval_ms, 500);
        assert_eq!(config.max_memory_mb, 256);
        assert_eq!(config.heartbeat_interval_ms, 60_000);
    }

    #[test]
    fn zero_override_is_rejected() {
        let cli = Cli::parse_from(["bulletin", "--heartbeat-interval-ms", "0", "simulate"]);
        assert!(cli.config().is_err());
    }

    #[test]
    fn log_format_parses() {
        let cli = Cli::parse_from(["bulletin", "--log-format", "json", "simulate"]);
        assert_eq!(cli.log_format, LogFormat::Json);
    }

    #[test]
    fn converge_once_requires_a_task_file() {
        assert!(Cli::try_parse_from(["bulletin", "converge-once"]).is_err());
    }
}

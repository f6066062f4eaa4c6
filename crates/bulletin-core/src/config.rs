//! Process configuration.
//!
//! Durations are plain millisecond integers so the file format stays trivial
//! (`{"heartbeat_interval_ms": 60000}`); accessors hand out `Duration`s.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bbs::ConvergeConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },
}

/// Timing and capacity knobs shared by executors, stagers and the converger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BulletinConfig {
    /// Presence TTL; the keep-alive refreshes at half of it.
    pub heartbeat_interval_ms: u64,
    /// Convergence period and converge lock TTL.
    pub convergence_interval_ms: u64,
    /// Pending tasks older than this are failed.
    pub time_to_claim_ms: u64,
    pub claimed_timeout_ms: u64,
    pub resolving_timeout_ms: u64,
    /// Backoff between retries of a timed-out store write.
    pub store_retry_backoff_ms: u64,
    /// Memory capacity of one executor.
    pub max_memory_mb: u64,
}

impl Default for BulletinConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 60_000,
            convergence_interval_ms: 30_000,
            time_to_claim_ms: 30 * 60 * 1000,
            claimed_timeout_ms: 30_000,
            resolving_timeout_ms: 30_000,
            store_retry_backoff_ms: 1_000,
            max_memory_mb: 1_000,
        }
    }
}

impl BulletinConfig {
    pub fn from_json(bytes: &[u8]) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_slice(bytes)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&bytes)
    }

    /// Reject values that would make a loop spin or a lease expire instantly.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fields = [
            ("heartbeat_interval_ms", self.heartbeat_interval_ms),
            ("convergence_interval_ms", self.convergence_interval_ms),
            ("time_to_claim_ms", self.time_to_claim_ms),
            ("claimed_timeout_ms", self.claimed_timeout_ms),
            ("resolving_timeout_ms", self.resolving_timeout_ms),
            ("store_retry_backoff_ms", self.store_retry_backoff_ms),
            ("max_memory_mb", self.max_memory_mb),
        ];
        match fields.iter().find(|(_, value)| *value == 0) {
            Some((field, _)) => Err(ConfigError::Zero { field: *field }),
            None => Ok(()),
        }
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn convergence_interval(&self) -> Duration {
        Duration::from_millis(self.convergence_interval_ms)
    }

    pub fn store_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.store_retry_backoff_ms)
    }

    pub fn converge(&self) -> ConvergeConfig {
        ConvergeConfig {
            time_to_claim: Duration::from_millis(self.time_to_claim_ms),
            claimed_timeout: Duration::from_millis(self.claimed_timeout_ms),
            resolving_timeout: Duration::from_millis(self.resolving_timeout_ms),
        }
    }
}

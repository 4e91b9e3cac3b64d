//! Configuration module
//!
//! Handles loading and managing runner configuration.

mod env;
mod file;

pub use env::EnvConfig;
pub use file::CatalogFile;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Runner configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Worker pool size; 1 means fully serial
    pub parallelism: usize,

    /// Per-test watchdog in seconds
    pub test_timeout_secs: u64,

    /// Bounded wait for a session from the provider, in seconds
    pub session_timeout_secs: u64,

    /// Heartbeat emission interval in milliseconds
    pub heartbeat_interval_ms: u64,

    /// A worker silent for stall_factor x heartbeat interval is stalled
    pub stall_factor: u32,

    /// Startup stagger between workers in milliseconds, so N sessions
    /// don't slam the machine at once
    pub worker_stagger_ms: u64,

    /// How many times a crashed or stalled case is requeued
    pub max_requeues: u32,

    /// Store append retry budget
    pub store_max_attempts: u32,

    /// Base delay for store append backoff, in milliseconds
    pub store_backoff_base_ms: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            parallelism: 4,
            test_timeout_secs: 120,
            session_timeout_secs: 30,
            heartbeat_interval_ms: 5000,
            stall_factor: 3,
            worker_stagger_ms: 750,
            max_requeues: 1,
            store_max_attempts: 5,
            store_backoff_base_ms: 10,
        }
    }
}

impl RunnerConfig {
    /// Load configuration from a YAML or JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content =
            std::fs::read_to_string(path.as_ref()).context("Failed to read config file")?;

        let config: Self = if path
            .as_ref()
            .extension()
            .map(|e| e == "yaml" || e == "yml")
            .unwrap_or(false)
        {
            serde_yaml::from_str(&content).context("Failed to parse YAML config")?
        } else {
            serde_json::from_str(&content).context("Failed to parse JSON config")?
        };

        Ok(config)
    }

    /// Apply environment variable overrides
    pub fn apply_env(mut self, env: &EnvConfig) -> Self {
        if let Some(parallelism) = env.parallelism {
            self.parallelism = parallelism.max(1);
        }
        if let Some(timeout) = env.test_timeout_secs {
            self.test_timeout_secs = timeout;
        }
        if let Some(timeout) = env.session_timeout_secs {
            self.session_timeout_secs = timeout;
        }
        if let Some(interval) = env.heartbeat_interval_ms {
            self.heartbeat_interval_ms = interval;
        }
        self
    }

    pub fn test_timeout(&self) -> Duration {
        Duration::from_secs(self.test_timeout_secs)
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Silence threshold before a worker is declared stalled
    pub fn stall_threshold(&self) -> Duration {
        self.heartbeat_interval() * self.stall_factor
    }

    pub fn worker_stagger(&self) -> Duration {
        Duration::from_millis(self.worker_stagger_ms)
    }
}

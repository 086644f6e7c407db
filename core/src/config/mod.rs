use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::ConfigError;

/// Largest accepted `worker_count`.
pub const MAX_WORKER_COUNT: usize = 1024;

/// Largest accepted interval, timeout or grace period: one year.
const MAX_MILLIS: u64 = 365 * 24 * 60 * 60 * 1000;

/// Policy applied when a request arrives while the admission queue is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OverflowStrategy {
    /// Wait for space up to the request timeout, then degrade.
    #[default]
    Block,
    /// Skip the queue and serve the request with a single lookup.
    Degrade,
    /// Reject the request immediately.
    FailFast,
    /// Evict the oldest queued request to make room.
    DropOldest,
}

/// Tunables for a [`Coalescer`](crate::coalescer::Coalescer).
///
/// - `interval_ms`: period of the timer-triggered drain.
/// - `max_batch_size`: size trigger and upper bound of one drain.
/// - `queue_capacity`: admitted-but-undrained requests the queue may hold.
/// - `timeout_ms`: deadline of a request, measured from admission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoalescerConfig {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default)]
    pub overflow_strategy: OverflowStrategy,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_allow_null")]
    pub allow_null: bool,
    #[serde(default)]
    pub retry_on_null: bool,
    #[serde(default = "default_enable_monitor")]
    pub enable_monitor: bool,
    #[serde(default = "default_monitor_interval_seconds")]
    pub monitor_interval_seconds: u64,
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

impl Default for CoalescerConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            interval_ms: default_interval_ms(),
            max_batch_size: default_max_batch_size(),
            worker_count: default_worker_count(),
            queue_capacity: default_queue_capacity(),
            overflow_strategy: OverflowStrategy::default(),
            timeout_ms: default_timeout_ms(),
            allow_null: default_allow_null(),
            retry_on_null: false,
            enable_monitor: default_enable_monitor(),
            monitor_interval_seconds: default_monitor_interval_seconds(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

impl CoalescerConfig {
    /// Create a default configuration with the given name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Parse a configuration from a JSON document. Missing fields take their
    /// defaults. The result is validated.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Check that every tunable is within its allowed range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_ms == 0 {
            return Err(ConfigError::Invalid("intervalMs must be > 0".into()));
        }
        if self.max_batch_size == 0 {
            return Err(ConfigError::Invalid("maxBatchSize must be > 0".into()));
        }
        if self.worker_count == 0 || self.worker_count > MAX_WORKER_COUNT {
            return Err(ConfigError::Invalid(format!(
                "workerCount must be between 1 and {}",
                MAX_WORKER_COUNT
            )));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid("queueCapacity must be > 0".into()));
        }
        if self.timeout_ms == 0 {
            return Err(ConfigError::Invalid("timeoutMs must be > 0".into()));
        }
        for (field, value) in [
            ("intervalMs", self.interval_ms),
            ("timeoutMs", self.timeout_ms),
            ("shutdownGraceMs", self.shutdown_grace_ms),
            ("monitorIntervalSeconds", self.monitor_interval_seconds.saturating_mul(1000)),
        ] {
            if value > MAX_MILLIS {
                return Err(ConfigError::Invalid(format!("{} exceeds one year", field)));
            }
        }
        if self.enable_monitor && self.monitor_interval_seconds == 0 {
            return Err(ConfigError::Invalid(
                "monitorIntervalSeconds must be > 0 when the monitor is enabled".into(),
            ));
        }
        if self.max_batch_size > self.queue_capacity {
            warn!(
                "{}: maxBatchSize ({}) exceeds queueCapacity ({}), size-triggered drains will not fire",
                self.name, self.max_batch_size, self.queue_capacity
            );
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_seconds)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

// --- Default value functions ---

fn default_name() -> String {
    "BatchLoader".to_string()
}

fn default_interval_ms() -> u64 {
    10
}

fn default_max_batch_size() -> usize {
    100
}

fn default_worker_count() -> usize {
    1
}

fn default_queue_capacity() -> usize {
    10_000
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_allow_null() -> bool {
    true
}

fn default_enable_monitor() -> bool {
    true
}

fn default_monitor_interval_seconds() -> u64 {
    60
}

fn default_shutdown_grace_ms() -> u64 {
    5000
}

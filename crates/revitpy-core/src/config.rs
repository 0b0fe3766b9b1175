//! Runtime configuration.
//!
//! Every field has a default, so an empty JSON object (or no file at all) is
//! a valid configuration. Durations are written as milliseconds.
//!
//! ```json
//! {
//!   "queue": { "max_concurrent_tasks": 4, "max_queue_size": 1000 },
//!   "task": { "default_timeout_ms": 30000, "retry": { "retry_count": 2, "retry_delay": 500 } },
//!   "progress": { "throttle_interval": 100 },
//!   "batch": { "batch_size": 50, "delay": 0 }
//! }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::progress::DEFAULT_THROTTLE_INTERVAL;
use crate::task::{RetryPolicy, duration_ms};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config json: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub queue: QueueConfig,
    pub task: TaskDefaults,
    pub progress: ProgressConfig,
    pub batch: BatchConfig,
}

/// Worker pool and queue bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Number of worker loops spawned by `start()`.
    pub max_concurrent_tasks: usize,

    /// Pending-queue capacity. `None` means unbounded.
    pub max_queue_size: Option<usize>,

    /// How long an idle worker waits for work before re-checking for stop.
    #[serde(with = "duration_ms")]
    pub poll_interval: Duration,

    /// Sleep between completed-map checks in `wait_for_task`.
    #[serde(with = "duration_ms")]
    pub wait_poll_interval: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 4,
            max_queue_size: None,
            poll_interval: Duration::from_secs(1),
            wait_poll_interval: Duration::from_millis(10),
        }
    }
}

impl QueueConfig {
    pub fn with_max_concurrent_tasks(mut self, n: usize) -> Self {
        self.max_concurrent_tasks = n;
        self
    }

    pub fn with_max_queue_size(mut self, size: usize) -> Self {
        self.max_queue_size = Some(size);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Defaults applied to tasks created by the facade.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskDefaults {
    pub default_timeout_ms: Option<u64>,
    pub retry: RetryPolicy,
}

impl TaskDefaults {
    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressConfig {
    #[serde(with = "duration_ms")]
    pub throttle_interval: Duration,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            throttle_interval: DEFAULT_THROTTLE_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub batch_size: usize,

    /// Pause between consecutive batches.
    #[serde(with = "duration_ms")]
    pub delay: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            delay: Duration::ZERO,
        }
    }
}

impl RuntimeConfig {
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    /// Reject values the runtime cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue.max_concurrent_tasks == 0 {
            return Err(ConfigError::Invalid(
                "queue.max_concurrent_tasks must be at least 1".into(),
            ));
        }
        if self.queue.max_queue_size == Some(0) {
            return Err(ConfigError::Invalid(
                "queue.max_queue_size must be at least 1 (omit it for unbounded)".into(),
            ));
        }
        if self.queue.poll_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "queue.poll_interval must be non-zero".into(),
            ));
        }
        if self.queue.wait_poll_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "queue.wait_poll_interval must be non-zero".into(),
            ));
        }
        if self.task.default_timeout_ms == Some(0) {
            return Err(ConfigError::Invalid(
                "task.default_timeout_ms must be non-zero".into(),
            ));
        }
        if self.batch.batch_size == 0 {
            return Err(ConfigError::Invalid("batch.batch_size must be at least 1".into()));
        }
        Ok(())
    }
}

//! Configuration for the log applier.
//!
//! Configuration is passed to [`Applier::new()`](crate::applier::Applier::new)
//! and can be constructed programmatically or deserialized from JSON/YAML.
//!
//! # Quick Start
//!
//! ```rust
//! use log_applier::config::ApplierConfig;
//!
//! let config = ApplierConfig {
//!     applier_id: "replica-east".into(),
//!     ..ApplierConfig::for_testing("replica-east")
//! };
//! assert!(config.validate().is_ok());
//! ```
//!
//! # Configuration Structure
//!
//! ```text
//! ApplierConfig
//! ├── applier_id: String           # Key for persisted progress
//! ├── settings: ApplierSettings
//! │   ├── batch: BatchConfig       # Accumulator capacity
//! │   ├── queue: QueueConfig       # Descriptor queue polling
//! │   ├── restart: RestartConfig   # Backoff between Running episodes
//! │   └── shard: ShardSettings     # Group-id check exceptions
//! └── progress: ProgressConfig     # SQLite progress persistence
//! ```
//!
//! # YAML Example
//!
//! ```yaml
//! applier_id: "replica-east"
//!
//! settings:
//!   batch:
//!     capacity: 200
//!   queue:
//!     poll_timeout: "500ms"
//!   restart:
//!     initial_delay_ms: 50
//!     max_delay_ms: 10000
//!
//! progress:
//!   sqlite_path: "/var/lib/app/applier_progress.db"
//! ```

use crate::error::{ApplierError, Result};
use crate::resilience::RetryConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ═══════════════════════════════════════════════════════════════════════════════
// Top-level config
// ═══════════════════════════════════════════════════════════════════════════════

/// The top-level config object passed to `Applier::new()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplierConfig {
    /// Identity of this applier. Progress is persisted under this key, so
    /// it must stay stable across restarts of the process.
    pub applier_id: String,

    #[serde(default)]
    pub settings: ApplierSettings,

    /// Progress persistence settings.
    #[serde(default)]
    pub progress: ProgressConfig,
}

impl Default for ApplierConfig {
    fn default() -> Self {
        Self {
            applier_id: "applier.default".to_string(),
            settings: ApplierSettings::default(),
            progress: ProgressConfig::default(),
        }
    }
}

impl ApplierConfig {
    /// Create a minimal config for testing.
    pub fn for_testing(applier_id: &str) -> Self {
        Self {
            applier_id: applier_id.to_string(),
            settings: ApplierSettings {
                restart: RestartConfig::testing(),
                queue: QueueConfig {
                    poll_timeout: "20ms".to_string(),
                    ..Default::default()
                },
                ..Default::default()
            },
            progress: ProgressConfig::in_memory(),
        }
    }

    /// Check the config before an applier is built from it.
    pub fn validate(&self) -> Result<()> {
        if self.applier_id.trim().is_empty() {
            return Err(ApplierError::Config("applier_id must not be empty".into()));
        }
        if self.settings.batch.capacity < 2 {
            return Err(ApplierError::Config(format!(
                "batch.capacity must be at least 2, got {}",
                self.settings.batch.capacity
            )));
        }
        if self.settings.queue.capacity == 0 {
            return Err(ApplierError::Config("queue.capacity must be positive".into()));
        }
        self.settings.queue.try_poll_timeout()?;
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ApplierSettings
// ═══════════════════════════════════════════════════════════════════════════════

/// Tunables for the apply loop.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ApplierSettings {
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub restart: RestartConfig,
    #[serde(default)]
    pub shard: ShardSettings,
}

/// Batch accumulator sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Maximum items held before a partial flush. A flush is triggered one
    /// item early so a commit marker always fits.
    #[serde(default = "default_batch_capacity")]
    pub capacity: usize,
}

fn default_batch_capacity() -> usize {
    100
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self { capacity: 100 }
    }
}


/// Descriptor queue settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// How long a pop blocks before reporting an empty queue (e.g. "1s").
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout: String,

    /// Bound of the channel between analyzer and applier.
    #[serde(default = "default_queue_capacity")]
    pub capacity: usize,
}

fn default_poll_timeout() -> String {
    "1s".to_string()
}

fn default_queue_capacity() -> usize {
    1024
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            poll_timeout: "1s".to_string(),
            capacity: 1024,
        }
    }
}

impl QueueConfig {
    /// Parse the poll timeout, falling back to one second.
    pub fn poll_timeout_duration(&self) -> Duration {
        self.try_poll_timeout().unwrap_or(Duration::from_secs(1))
    }

    fn try_poll_timeout(&self) -> Result<Duration> {
        let timeout = humantime::parse_duration(&self.poll_timeout).map_err(|e| {
            ApplierError::Config(format!("invalid poll_timeout {:?}: {}", self.poll_timeout, e))
        })?;
        if timeout.is_zero() {
            return Err(ApplierError::Config("poll_timeout must be positive".into()));
        }
        Ok(timeout)
    }
}

/// Backoff between failed Running episodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestartConfig {
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Multiplier per consecutive failure (2.0 doubles the delay).
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
}

fn default_initial_delay_ms() -> u64 {
    100
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_backoff_factor() -> f64 {
    2.0
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 100,
            max_delay_ms: 30_000,
            backoff_factor: 2.0,
        }
    }
}

impl RestartConfig {
    /// Short delays for tests.
    pub fn testing() -> Self {
        Self {
            initial_delay_ms: 5,
            max_delay_ms: 50,
            backoff_factor: 2.0,
        }
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            backoff_factor: self.backoff_factor,
        }
    }
}

/// Exceptions to the image group-id check for shard metadata tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardSettings {
    /// Group id that marks a row as global.
    #[serde(default)]
    pub global_group_id: i32,

    /// Classes whose rows may carry the global group id while being routed
    /// to a shard group.
    #[serde(default = "default_metadata_classes")]
    pub metadata_classes: Vec<String>,
}

fn default_metadata_classes() -> Vec<String> {
    vec![
        "shard_gid_skey_info".to_string(),
        "shard_gid_removed_info".to_string(),
    ]
}

impl Default for ShardSettings {
    fn default() -> Self {
        Self {
            global_group_id: 0,
            metadata_classes: default_metadata_classes(),
        }
    }
}

impl ShardSettings {
    pub fn is_metadata_class(&self, class_name: &str) -> bool {
        self.metadata_classes
            .iter()
            .any(|c| c.eq_ignore_ascii_case(class_name))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ProgressConfig: progress persistence
// ═══════════════════════════════════════════════════════════════════════════════

/// Progress persistence configuration.
///
/// The committed LSA must survive a crash of the applier process, so it is
/// kept in SQLite next to the process rather than in memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressConfig {
    /// Path to the SQLite database.
    pub sqlite_path: String,

    /// Whether to use WAL mode for SQLite (recommended).
    #[serde(default = "default_true")]
    pub wal_mode: bool,
}

fn default_true() -> bool {
    true
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            sqlite_path: "applier_progress.db".to_string(),
            wal_mode: true,
        }
    }
}

impl ProgressConfig {
    /// Create an in-memory config for testing.
    pub fn in_memory() -> Self {
        Self {
            sqlite_path: ":memory:".to_string(),
            wal_mode: false,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

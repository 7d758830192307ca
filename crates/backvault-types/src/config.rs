//! Engine configuration types for Backvault.
//!
//! `EngineConfig` represents the top-level `config.toml` in the data
//! directory: default backup root, staging root, and dispatch policy.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level configuration for the backup engine.
///
/// Loaded from `~/.backvault/config.toml`. All fields have sensible defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Root used when the trigger supplies no (or a blank) root path.
    #[serde(default)]
    pub default_root: Option<PathBuf>,

    /// Re-roots derived backup paths under this directory when set.
    #[serde(default)]
    pub staging_root: Option<PathBuf>,

    /// Per-activity timeout in seconds.
    #[serde(default = "default_activity_timeout_secs")]
    pub activity_timeout_secs: u64,

    /// Upper bound on concurrently executing activities per instance.
    #[serde(default = "default_max_parallel_activities")]
    pub max_parallel_activities: usize,

    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_activity_timeout_secs() -> u64 {
    300
}

fn default_max_parallel_activities() -> usize {
    16
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_root: None,
            staging_root: None,
            activity_timeout_secs: default_activity_timeout_secs(),
            max_parallel_activities: default_max_parallel_activities(),
            retry: RetryConfig::default(),
        }
    }
}

/// Exponential backoff policy applied uniformly to every activity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Ceiling for a single backoff delay.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    200
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_max_backoff_ms() -> u64 {
    10_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

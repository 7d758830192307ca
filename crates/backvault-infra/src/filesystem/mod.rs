//! Filesystem adapters for Backvault.
//!
//! Implements the `ActivityExecutor` port from `backvault-core` against the
//! local filesystem, and resolves the data directory that holds the
//! database and `config.toml`.

pub mod activities;

use std::path::PathBuf;

pub use activities::LocalFileActivities;

/// Resolve the data directory from environment or platform defaults.
///
/// Priority:
/// 1. `BVAULT_DATA_DIR` environment variable
/// 2. `~/.backvault` in the user's home directory
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("BVAULT_DATA_DIR") {
        return PathBuf::from(dir);
    }

    if let Some(home) = dirs::home_dir() {
        return home.join(".backvault");
    }

    // Last resort: current directory
    PathBuf::from(".backvault")
}

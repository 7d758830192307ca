//! Engine configuration loader for Backvault.
//!
//! Reads `config.toml` from the data directory (`~/.backvault/` in production)
//! and deserializes it into [`EngineConfig`]. Falls back to defaults when the
//! file is missing or malformed.

use std::path::{Path, PathBuf};

use backvault_types::config::EngineConfig;

/// Load engine configuration from `{data_dir}/config.toml`.
///
/// - If the file does not exist, returns [`EngineConfig::default()`].
/// - If the file exists but fails to parse, logs a warning and returns the default.
/// - If the file exists and parses successfully, returns the parsed config.
pub async fn load_engine_config(data_dir: &Path) -> EngineConfig {
    let config_path = data_dir.join("config.toml");

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using defaults", config_path.display());
            return EngineConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return EngineConfig::default();
        }
    };

    match toml::from_str::<EngineConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(
                "Failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            EngineConfig::default()
        }
    }
}

/// Resolve the backup root supplied by the trigger.
///
/// Priority:
/// 1. The explicit argument, trimmed, unless blank
/// 2. `default_root` from `config.toml`, trimmed, unless blank
/// 3. The directory containing the running executable
///
/// Returns `None` only when none of these yields a path; the orchestration
/// then rejects the blank root.
pub fn resolve_root(explicit: Option<&str>, config: &EngineConfig) -> Option<String> {
    if let Some(root) = explicit.map(str::trim).filter(|r| !r.is_empty()) {
        return Some(root.to_string());
    }

    if let Some(root) = config
        .default_root
        .as_ref()
        .map(|root| root.display().to_string())
        .filter(|root| !root.trim().is_empty())
    {
        return Some(root.trim().to_string());
    }

    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(PathBuf::from))
        .map(|dir| dir.display().to_string())
}

//! Engine configuration loader.
//!
//! Reads `tesflow.toml` and deserializes it into [`EngineConfig`]. Falls
//! back to defaults when the file is missing or malformed.

use std::path::{Path, PathBuf};

use tesflow_types::config::EngineConfig;

/// Config file looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = "tesflow.toml";

/// Environment variable overriding `state_dir`.
pub const STATE_DIR_ENV: &str = "TESFLOW_STATE_DIR";

/// Pick the config file to load.
///
/// Priority:
/// 1. An explicit `--config` path
/// 2. `tesflow.toml` in the working directory
/// 3. `tesflow/config.toml` in the platform config directory
///    (e.g. `~/.config/tesflow/config.toml` on Linux)
///
/// Returns `None` when no candidate exists; an explicit path is returned
/// even if missing so the loader can report it.
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    let local = PathBuf::from(CONFIG_FILE_NAME);
    if local.exists() {
        return Some(local);
    }

    dirs::config_dir()
        .map(|dir| dir.join("tesflow").join("config.toml"))
        .filter(|path| path.exists())
}

/// Load engine configuration from `path`.
///
/// - If `path` is `None` or the file does not exist, returns the defaults.
/// - If the file exists but fails to parse, logs a warning and returns the defaults.
/// - `TESFLOW_STATE_DIR`, when set, overrides `state_dir` in every case.
pub async fn load_engine_config(path: Option<&Path>) -> EngineConfig {
    let config = match path {
        Some(path) => read_config(path).await,
        None => {
            tracing::debug!("no config file found, using defaults");
            EngineConfig::default()
        }
    };
    apply_env_overrides(config, std::env::var(STATE_DIR_ENV).ok())
}

async fn read_config(path: &Path) -> EngineConfig {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config found at {}, using defaults", path.display());
            return EngineConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", path.display());
            return EngineConfig::default();
        }
    };

    match toml::from_str::<EngineConfig>(&content) {
        Ok(config) => {
            tracing::debug!(path = %path.display(), tools = config.tools.len(), "loaded engine config");
            config
        }
        Err(err) => {
            tracing::warn!("Failed to parse {}: {err}, using defaults", path.display());
            EngineConfig::default()
        }
    }
}

fn apply_env_overrides(mut config: EngineConfig, state_dir: Option<String>) -> EngineConfig {
    if let Some(dir) = state_dir.filter(|d| !d.trim().is_empty()) {
        config.state_dir = PathBuf::from(dir);
    }
    config
}

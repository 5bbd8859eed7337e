//! Configuration loading from `~/.topicmesh/config.toml` with defaults.

use std::path::{Path, PathBuf};
use topicmesh_types::config::MeshConfig;
use tracing::info;

/// Load configuration from a TOML file, with defaults.
///
/// A missing, unreadable or invalid file is logged and the defaults are used,
/// so a broken config never prevents a master or node from starting.
pub fn load_config(path: Option<&Path>) -> MeshConfig {
    let config_path = path
        .map(|p| p.to_path_buf())
        .unwrap_or_else(default_config_path);

    if !config_path.exists() {
        info!(
            path = %config_path.display(),
            "Config file not found, using defaults"
        );
        return MeshConfig::default();
    }

    match std::fs::read_to_string(&config_path) {
        Ok(contents) => match toml::from_str::<MeshConfig>(&contents) {
            Ok(config) => {
                info!(path = %config_path.display(), "Loaded configuration");
                config
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    path = %config_path.display(),
                    "Failed to parse config, using defaults"
                );
                MeshConfig::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                error = %e,
                path = %config_path.display(),
                "Failed to read config file, using defaults"
            );
            MeshConfig::default()
        }
    }
}

/// Get the default config file path.
pub fn default_config_path() -> PathBuf {
    topicmesh_home().join("config.toml")
}

/// Get the default topicmesh home directory.
pub fn topicmesh_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".topicmesh")
}

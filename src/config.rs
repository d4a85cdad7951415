// src/config.rs
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const CONFIG_FILE_NAME: &str = "rabbit_relay.json";

/// On-disk tuning. Every field is optional; the environment wins over the file.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub connection: ConnectionSection,
    #[serde(default)]
    pub publishing: PublishingSection,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionSection {
    pub uri: Option<String>,
    pub connection_timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishingSection {
    pub queue: Option<String>,
    pub publish_timeout_ms: Option<u64>,
    pub max_retry_attempts: Option<u32>,
    pub retry_delay_ms: Option<u64>,
    pub queue_declare_max_attempts: Option<u32>,
    pub queue_declare_delay_ms: Option<u64>,
}

pub fn find_config_file() -> Option<PathBuf> {
    let config_dir_path = Path::new("config").join(CONFIG_FILE_NAME);
    let locations = [
        ("Current directory", PathBuf::from(CONFIG_FILE_NAME)),
        ("Current directory (alternative)", config_dir_path),
    ];

    for (location_name, path) in locations {
        if path.exists() {
            debug!("Found config file in {}: {}", location_name, path.display());
            return Some(path);
        }
    }

    let home_config = home::home_dir()?.join(format!(".{}", CONFIG_FILE_NAME));
    if home_config.exists() {
        debug!("Found config file in home directory: {}", home_config.display());
        return Some(home_config);
    }

    None
}

pub fn load_config_from(path: &Path) -> Result<FileConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file at {}", path.display()))?;

    let config: FileConfig = serde_json::from_str(&content)
        .context("Configuration file contains invalid JSON")?;

    if matches!(config.connection.uri.as_deref(), Some("")) {
        return Err(anyhow!("Configuration error: connection.uri cannot be empty"));
    }

    Ok(config)
}

/// Loads the first config file found, if any.
pub fn load_config() -> Result<Option<FileConfig>> {
    find_config_file()
        .map(|path| load_config_from(&path))
        .transpose()
}

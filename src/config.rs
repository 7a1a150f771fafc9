use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::service::DEFAULT_LEADERBOARD_LIMIT;
use crate::store::Backend;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub leaderboard: LeaderboardConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: Backend,
    /// Table location; derived from the data directory when unset
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaderboardConfig {
    pub limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when RUST_LOG is not set
    pub level: String,
    pub file: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

impl Default for LeaderboardConfig {
    fn default() -> Self {
        LeaderboardConfig {
            limit: DEFAULT_LEADERBOARD_LIMIT,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl StorageConfig {
    /// Configured path, or the backend's default file in the data directory
    pub fn resolved_path(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| data_dir().join(self.backend.default_file_name()))
    }
}

/// Directory for the default view table (~/.local/share/reelcount on Linux)
pub fn data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("reelcount"))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Config file lookup: ./reelcount.yaml, then ~/.config/reelcount/config.yaml
pub fn get_config_path() -> PathBuf {
    let local_config = PathBuf::from("reelcount.yaml");
    if local_config.exists() {
        return local_config;
    }

    if let Some(config_dir) = dirs::config_dir() {
        let user_config = config_dir.join("reelcount").join("config.yaml");
        if user_config.exists() {
            return user_config;
        }
    }

    local_config
}

impl Config {
    /// Load from the default lookup locations, falling back to defaults
    pub fn load() -> Result<Self> {
        let config_path = get_config_path();

        if config_path.exists() {
            info!("Loading config from {}", config_path.display());
            Self::load_from_file(&config_path)
        } else {
            warn!("No reelcount.yaml found, using defaults");
            Ok(Config::default())
        }
    }

    /// Load config from specific file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let mut config: Config = serde_yaml::from_str(&contents)
            .with_context(|| format!("Invalid config file: {}", path.display()))?;

        if config.leaderboard.limit == 0 {
            warn!("leaderboard.limit must be positive, using {}", DEFAULT_LEADERBOARD_LIMIT);
            config.leaderboard.limit = DEFAULT_LEADERBOARD_LIMIT;
        }

        debug!(
            "Config loaded: backend={}, listen={}:{}",
            config.storage.backend, config.server.host, config.server.port
        );

        Ok(config)
    }
}

//! crosshub configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::permissions::PermissionTable;

/// Main crosshub configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level", skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,

    /// Hub configuration
    pub hub: HubConfig,

    /// Client configuration
    pub client: ClientConfig,
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Project-local: .crosshub.yml
        let local_config = PathBuf::from(".crosshub.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // User: ~/.config/crosshub/crosshub.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("crosshub").join("crosshub.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Read only the log level, before logging is initialized
    ///
    /// Errors are swallowed; the full load reports them once logging is up.
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        let candidates = match config_path {
            Some(path) => vec![path.clone()],
            None => {
                let mut paths = vec![PathBuf::from(".crosshub.yml")];
                if let Some(config_dir) = dirs::config_dir() {
                    paths.push(config_dir.join("crosshub").join("crosshub.yml"));
                }
                paths
            }
        };

        candidates
            .iter()
            .find(|path| path.exists())
            .and_then(|path| fs::read_to_string(path).ok())
            .and_then(|content| serde_yaml::from_str::<LogLevelOnly>(&content).ok())
            .and_then(|partial| partial.log_level)
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

#[derive(Deserialize)]
struct LogLevelOnly {
    #[serde(rename = "log-level")]
    log_level: Option<String>,
}

/// Hub configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Origin the hub answers as
    pub origin: String,

    /// Unix socket the hub listens on
    #[serde(rename = "socket-path", skip_serializing_if = "Option::is_none")]
    pub socket_path: Option<PathBuf>,

    /// Backing store file
    #[serde(rename = "store-path")]
    pub store_path: PathBuf,

    /// Ordered permission entries; an empty table denies everything
    pub permissions: PermissionTable,

    /// Enable the listen/unlisten capability
    pub listen: bool,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            origin: "https://hub.localhost".to_string(),
            socket_path: None,
            store_path: kvstore::config::default_store_path(),
            permissions: PermissionTable::default(),
            listen: true,
        }
    }
}

impl HubConfig {
    pub fn socket_path(&self) -> PathBuf {
        self.socket_path.clone().unwrap_or_else(crate::transport::get_socket_path)
    }
}

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Origin the client posts as
    pub origin: String,

    /// Request timeout in milliseconds
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            origin: "https://app.localhost".to_string(),
            timeout_ms: crate::client::DEFAULT_TIMEOUT.as_millis() as u64,
        }
    }
}

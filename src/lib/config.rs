use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::container::ServiceConfig;
use crate::error::{BridgeError, BridgeResult};

pub const ENV_IMAGE: &str = "WEBUI_BRIDGE_IMAGE";
pub const ENV_PORT: &str = "WEBUI_BRIDGE_PORT";
pub const ENV_AUTO_START: &str = "WEBUI_BRIDGE_AUTO_START";
pub const ENV_DATA_DIR: &str = "WEBUI_BRIDGE_DATA_DIR";
pub const ENV_API_ADDR: &str = "WEBUI_BRIDGE_API_ADDR";
pub const ENV_POLL_SECS: &str = "WEBUI_BRIDGE_POLL_SECS";

pub const SETTINGS_FILE: &str = "settings.json";
pub const TOKEN_FILE: &str = "auth-token.json";
pub const DEFAULT_API_ADDR: &str = "127.0.0.1:7070";
pub const DEFAULT_POLL_SECS: u64 = 30;

/// Process-wide configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub service: ServiceConfig,
    pub data_dir: PathBuf,
    pub api_addr: SocketAddr,
    pub poll_interval: Duration,
}

impl AppConfig {
    pub async fn load() -> BridgeResult<Self> {
        Self::load_with(|key| std::env::var(key).ok()).await
    }

    /// Layers defaults, the settings file and the environment, in that order.
    pub async fn load_with(env: impl Fn(&str) -> Option<String>) -> BridgeResult<Self> {
        let data_dir = env(ENV_DATA_DIR)
            .map(PathBuf::from)
            .unwrap_or_else(default_data_dir);

        let mut service = SettingsStore::new(data_dir.join(SETTINGS_FILE))
            .load()
            .await
            .unwrap_or_default();

        if let Some(image) = env(ENV_IMAGE) {
            service.image = image;
        }
        if let Some(port) = env(ENV_PORT) {
            service.external_port = port;
        }
        if let Some(flag) = env(ENV_AUTO_START) {
            service.auto_start = parse_flag(ENV_AUTO_START, &flag)?;
        }
        service.validate()?;

        let api_addr: SocketAddr = match env(ENV_API_ADDR) {
            Some(addr) => addr
                .parse()
                .map_err(|_| BridgeError::config(ENV_API_ADDR, &addr, "expected host:port"))?,
            None => DEFAULT_API_ADDR
                .parse()
                .map_err(|_| BridgeError::config(ENV_API_ADDR, DEFAULT_API_ADDR, "expected host:port"))?,
        };

        let poll_secs = match env(ENV_POLL_SECS) {
            Some(secs) => match secs.parse::<u64>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(BridgeError::config(
                        ENV_POLL_SECS,
                        secs,
                        "expected a positive number of seconds",
                    ));
                }
            },
            None => DEFAULT_POLL_SECS,
        };

        let config = AppConfig {
            service,
            data_dir,
            api_addr,
            poll_interval: Duration::from_secs(poll_secs),
        };
        debug!(?config, "configuration loaded");
        Ok(config)
    }

    pub fn settings_path(&self) -> PathBuf {
        self.data_dir.join(SETTINGS_FILE)
    }

    pub fn token_path(&self) -> PathBuf {
        self.data_dir.join(TOKEN_FILE)
    }
}

pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("webui-bridge")
}

fn parse_flag(field: &'static str, value: &str) -> BridgeResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(BridgeError::config(field, value, "expected true or false")),
    }
}

/// JSON file holding the user's service configuration.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stored configuration, if any. Unreadable files are logged and ignored.
    pub async fn load(&self) -> Option<ServiceConfig> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "cannot read settings");
                return None;
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(config) => Some(config),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "ignoring malformed settings");
                None
            }
        }
    }

    /// Validates and writes `config`.
    pub async fn save(&self, config: &ServiceConfig) -> BridgeResult<()> {
        config.validate()?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.storage_error(e))?;
        }
        let bytes = serde_json::to_vec_pretty(config).map_err(|e| self.storage_error(e))?;
        tokio::fs::write(&self.path, bytes)
            .await
            .map_err(|e| self.storage_error(e))?;
        info!(path = %self.path.display(), "settings saved");
        Ok(())
    }

    fn storage_error(&self, err: impl std::fmt::Display) -> BridgeError {
        BridgeError::Storage {
            path: self.path.display().to_string(),
            message: err.to_string(),
        }
    }
}

//! Configuration types.
//!
//! Two layers: [`ServerConfig`] comes from the environment at startup, and
//! [`StoreConfig`] is the user-editable connection to the hosted table,
//! persisted as JSON next to the server so it survives restarts.

use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::ConfigError;

/// Default polling fallback interval.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;

/// Connection settings for the hosted data store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Project endpoint, e.g. `https://abc.supabase.co`.
    pub url: String,
    /// Access key sent as `apikey` and bearer token.
    pub key: SecretString,
    /// Name of the single table holding all records.
    pub table_name: String,
}

/// On-disk shape of [`StoreConfig`].
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredConfig {
    url: String,
    key: String,
    table_name: String,
}

/// Redacted view of a [`StoreConfig`], safe to return from the API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StoreConfigView {
    pub url: String,
    pub table_name: String,
    pub key_hint: String,
}

impl StoreConfig {
    /// Build a config, trimming whitespace and validating every field.
    pub fn new(
        url: impl Into<String>,
        key: impl Into<String>,
        table_name: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let url = url.into().trim().trim_end_matches('/').to_string();
        let key = key.into().trim().to_string();
        let table_name = table_name.into().trim().to_string();

        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::InvalidValue {
                key: "url".into(),
                message: "must start with http:// or https://".into(),
            });
        }
        if key.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "key".into(),
                message: "must not be empty".into(),
            });
        }
        if table_name.is_empty()
            || !table_name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(ConfigError::InvalidValue {
                key: "tableName".into(),
                message: "must be a non-empty identifier".into(),
            });
        }

        Ok(Self {
            url,
            key: SecretString::from(key),
            table_name,
        })
    }

    /// REST endpoint for the configured table.
    pub fn rest_url(&self) -> String {
        format!("{}/rest/v1/{}", self.url, self.table_name)
    }

    /// Realtime WebSocket endpoint derived from the project URL.
    pub fn realtime_url(&self) -> String {
        let ws_base = if let Some(rest) = self.url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            self.url.clone()
        };
        format!(
            "{ws_base}/realtime/v1/websocket?apikey={}&vsn=1.0.0",
            self.key.expose_secret()
        )
    }

    /// Redacted view for display.
    pub fn view(&self) -> StoreConfigView {
        let key = self.key.expose_secret();
        let tail: String = key
            .chars()
            .rev()
            .take(4)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        StoreConfigView {
            url: self.url.clone(),
            table_name: self.table_name.clone(),
            key_hint: format!("…{tail}"),
        }
    }

    /// Load a persisted config. Returns `Ok(None)` when no file exists yet.
    pub fn load(path: &Path) -> Result<Option<Self>, ConfigError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No saved store config");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        let stored: StoredConfig =
            serde_json::from_str(&raw).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        Self::new(stored.url, stored.key, stored.table_name).map(Some)
    }

    /// Persist this config, creating parent directories as needed.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let stored = StoredConfig {
            url: self.url.clone(),
            key: self.key.expose_secret().to_string(),
            table_name: self.table_name.clone(),
        };
        let json = serde_json::to_string_pretty(&stored)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;
        std::fs::write(path, json)?;
        info!(path = %path.display(), table = %self.table_name, "Store config saved");
        Ok(())
    }

    /// Remove a persisted config. Missing files are fine.
    pub fn clear(path: &Path) -> Result<(), ConfigError> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Hosted identity provider settings.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Identity provider endpoint.
    pub url: String,
    /// Public (anon) key for the identity provider.
    pub anon_key: SecretString,
}

/// Server configuration, read from the environment.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP/WS listen port.
    pub port: u16,
    /// Where the user-editable store config is persisted.
    pub config_path: PathBuf,
    /// Identity provider; `None` disables sign-in (every route then rejects).
    pub auth: Option<AuthConfig>,
    /// Polling fallback interval.
    pub poll_interval: Duration,
    /// Whether the change-feed subscription starts enabled.
    pub realtime_enabled: bool,
    /// Directory for rolling log files, if any.
    pub log_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            config_path: PathBuf::from("./data/store-config.json"),
            auth: None,
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            realtime_enabled: true,
            log_dir: None,
        }
    }
}

impl ServerConfig {
    /// Read configuration from `SENDGUARD_*` environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let port: u16 = std::env::var("SENDGUARD_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.port);

        let config_path = std::env::var("SENDGUARD_CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.config_path);

        let auth = std::env::var("SENDGUARD_AUTH_URL").ok().map(|url| AuthConfig {
            url: url.trim_end_matches('/').to_string(),
            anon_key: SecretString::from(
                std::env::var("SENDGUARD_AUTH_KEY").unwrap_or_default(),
            ),
        });

        let poll_interval_secs: u64 = std::env::var("SENDGUARD_POLL_INTERVAL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|secs| *secs > 0)
            .unwrap_or(DEFAULT_POLL_INTERVAL_SECS);

        let realtime_enabled = std::env::var("SENDGUARD_REALTIME")
            .map(|v| !matches!(v.trim().to_ascii_lowercase().as_str(), "0" | "false" | "off"))
            .unwrap_or(defaults.realtime_enabled);

        let log_dir = std::env::var("SENDGUARD_LOG_DIR").ok().map(PathBuf::from);

        Self {
            port,
            config_path,
            auth,
            poll_interval: Duration::from_secs(poll_interval_secs),
            realtime_enabled,
            log_dir,
        }
    }
}

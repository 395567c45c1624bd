//! Application configuration management.
//!
//! This module handles loading the configuration, which names the token
//! endpoints, the OAuth client settings, the storage backend and the refresh
//! schedule.
//!
//! Configuration is stored at `~/.config/authkeep/config.json`. Any field can
//! be overridden with an `AUTHKEEP_*` environment variable.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "authkeep";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Session store file name in cache directory
const SESSION_FILE: &str = "session.json";

const DEFAULT_TOKEN_URL: &str = "http://localhost:8000/refresh";

/// Seconds between background expiry checks.
const DEFAULT_POLL_INTERVAL_SECS: u64 = 300;

/// Refresh this many seconds before the access token expires.
const DEFAULT_REFRESH_BUFFER_SECS: i64 = 300;

/// Upper bound on the refresh buffer (one day).
const MAX_REFRESH_BUFFER_SECS: i64 = 86_400;

/// HTTP request timeout in seconds.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    File,
    Keyring,
    Memory,
    None,
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "file" => Ok(Self::File),
            "keyring" | "keychain" => Ok(Self::Keyring),
            "memory" => Ok(Self::Memory),
            "none" | "off" => Ok(Self::None),
            other => Err(anyhow::anyhow!("Unknown storage backend: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshMode {
    /// Check expiry on a fixed interval
    #[default]
    Poll,
    /// Sleep until the refresh instant of the current token
    Deadline,
}

impl FromStr for RefreshMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "poll" => Ok(Self::Poll),
            "deadline" => Ok(Self::Deadline),
            other => Err(anyhow::anyhow!("Unknown refresh mode: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Refresh-token exchange endpoint (or a same-origin relay)
    pub token_url: String,
    /// Authorization-code exchange endpoint on the backend
    pub code_url: Option<String>,
    /// Provider authorization page
    pub authorize_url: Option<String>,
    pub client_id: Option<String>,
    pub redirect_uri: Option<String>,
    pub scopes: Vec<String>,
    pub storage: StorageBackend,
    pub refresh_mode: RefreshMode,
    pub poll_interval_secs: u64,
    pub refresh_buffer_secs: i64,
    pub request_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            token_url: DEFAULT_TOKEN_URL.to_string(),
            code_url: None,
            authorize_url: None,
            client_id: None,
            redirect_uri: None,
            scopes: vec![
                "openid".to_string(),
                "email".to_string(),
                "profile".to_string(),
            ],
            storage: StorageBackend::File,
            refresh_mode: RefreshMode::Poll,
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            refresh_buffer_secs: DEFAULT_REFRESH_BUFFER_SECS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl Config {
    /// Load from the default location, then apply environment overrides
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = Self::load_from(&path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            let config: Self = serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {}", path.display()))?;
            debug!(path = %path.display(), "Config loaded");
            Ok(config)
        } else {
            debug!(path = %path.display(), "No config file, using defaults");
            Ok(Self::default())
        }
    }

    /// Apply `AUTHKEEP_*` overrides using the given variable lookup.
    /// Unparseable values are logged and ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("AUTHKEEP_TOKEN_URL") {
            self.token_url = url;
        }
        if let Some(url) = lookup("AUTHKEEP_CODE_URL") {
            self.code_url = Some(url);
        }
        if let Some(url) = lookup("AUTHKEEP_AUTHORIZE_URL") {
            self.authorize_url = Some(url);
        }
        if let Some(id) = lookup("AUTHKEEP_CLIENT_ID") {
            self.client_id = Some(id);
        }
        if let Some(uri) = lookup("AUTHKEEP_REDIRECT_URI") {
            self.redirect_uri = Some(uri);
        }
        if let Some(scopes) = lookup("AUTHKEEP_SCOPES") {
            self.scopes = scopes
                .split([',', ' '])
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(value) = lookup("AUTHKEEP_STORAGE") {
            match value.parse() {
                Ok(storage) => self.storage = storage,
                Err(e) => warn!(error = %e, "Ignoring AUTHKEEP_STORAGE"),
            }
        }
        if let Some(value) = lookup("AUTHKEEP_REFRESH_MODE") {
            match value.parse() {
                Ok(mode) => self.refresh_mode = mode,
                Err(e) => warn!(error = %e, "Ignoring AUTHKEEP_REFRESH_MODE"),
            }
        }
        if let Some(value) = lookup("AUTHKEEP_POLL_INTERVAL_SECS") {
            match value.parse() {
                Ok(secs) => self.poll_interval_secs = secs,
                Err(e) => warn!(error = %e, "Ignoring AUTHKEEP_POLL_INTERVAL_SECS"),
            }
        }
        if let Some(value) = lookup("AUTHKEEP_REFRESH_BUFFER_SECS") {
            match value.parse() {
                Ok(secs) => self.refresh_buffer_secs = secs,
                Err(e) => warn!(error = %e, "Ignoring AUTHKEEP_REFRESH_BUFFER_SECS"),
            }
        }
        if let Some(value) = lookup("AUTHKEEP_REQUEST_TIMEOUT_SECS") {
            match value.parse() {
                Ok(secs) => self.request_timeout_secs = secs,
                Err(e) => warn!(error = %e, "Ignoring AUTHKEEP_REQUEST_TIMEOUT_SECS"),
            }
        }
    }

    /// Background check interval, never shorter than one second
    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn refresh_buffer(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.refresh_buffer_secs.clamp(0, MAX_REFRESH_BUFFER_SECS))
    }

    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.request_timeout_secs.max(1))
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    /// Location of the file-backed session store
    pub fn session_path(&self) -> Result<PathBuf> {
        Ok(self.cache_dir()?.join(SESSION_FILE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.storage, StorageBackend::File);
        assert_eq!(config.refresh_mode, RefreshMode::Poll);
        assert_eq!(config.poll_interval(), std::time::Duration::from_secs(300));
        assert_eq!(config.refresh_buffer(), chrono::Duration::minutes(5));
    }

    #[test]
    fn test_load_from_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("config.json")).unwrap();
        assert_eq!(config.token_url, DEFAULT_TOKEN_URL);
    }

    #[test]
    fn test_load_from_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"token_url":"https://api.example.com/refresh","storage":"memory","refresh_mode":"deadline"}"#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.token_url, "https://api.example.com/refresh");
        assert_eq!(config.storage, StorageBackend::Memory);
        assert_eq!(config.refresh_mode, RefreshMode::Deadline);
        assert_eq!(config.poll_interval_secs, DEFAULT_POLL_INTERVAL_SECS);
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("AUTHKEEP_TOKEN_URL", "https://relay.example.com/refresh"),
            ("AUTHKEEP_STORAGE", "keyring"),
            ("AUTHKEEP_REFRESH_MODE", "bogus"),
            ("AUTHKEEP_SCOPES", "openid,email"),
            ("AUTHKEEP_POLL_INTERVAL_SECS", "60"),
            ("AUTHKEEP_REQUEST_TIMEOUT_SECS", "5"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.token_url, "https://relay.example.com/refresh");
        assert_eq!(config.storage, StorageBackend::Keyring);
        // Invalid value leaves the default in place
        assert_eq!(config.refresh_mode, RefreshMode::Poll);
        assert_eq!(config.scopes, vec!["openid", "email"]);
        assert_eq!(config.poll_interval_secs, 60);
        assert_eq!(config.request_timeout(), std::time::Duration::from_secs(5));
    }

    #[test]
    fn test_poll_interval_never_zero() {
        let config = Config {
            poll_interval_secs: 0,
            ..Config::default()
        };
        assert_eq!(config.poll_interval(), std::time::Duration::from_secs(1));
    }
}

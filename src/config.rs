//! Runtime configuration.
//!
//! Values are resolved in this order, first hit wins:
//! 1. command-line flag
//! 2. environment variable (handled by clap's `env` attribute)
//! 3. `config.toml` in the user config directory
//! 4. built-in default

use crate::storage::{default_data_dir, Credentials};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_INGESTION_URL: &str = "http://localhost:8001";
pub const DEFAULT_GATEWAY_URL: &str = "http://127.0.0.1:8000";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Contents of the optional `config.toml`. Every key is optional.
#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub ingestion_url: Option<String>,
    pub gateway_url: Option<String>,
    pub gateway_api_key: Option<String>,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Option<Duration>,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Option<Duration>,
    pub data_dir: Option<PathBuf>,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl FileConfig {
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("hq-finops").join("config.toml"))
    }

    /// Read `path`. A missing file yields the empty config; a malformed one is an error.
    pub fn load(path: &Path) -> Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read {}", path.display()))
            }
        };
        let parsed: FileConfig = toml::from_str(&content)
            .with_context(|| format!("invalid config file {}", path.display()))?;
        tracing::debug!(event = "config.loaded", path = %path.display());
        Ok(parsed)
    }
}

/// Values supplied on the command line or through the environment.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub ingestion_url: Option<String>,
    pub gateway_url: Option<String>,
    pub gateway_api_key: Option<String>,
    pub poll_interval: Option<Duration>,
    pub request_timeout: Option<Duration>,
    pub data_dir: Option<PathBuf>,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub ingestion_url: String,
    pub gateway_url: String,
    pub gateway_api_key: Option<String>,
    pub poll_interval: Duration,
    pub request_timeout: Duration,
    pub data_dir: PathBuf,
    pub credentials: Credentials,
}

impl Config {
    pub fn resolve(overrides: Overrides, file: FileConfig) -> Result<Self> {
        let poll_interval = overrides
            .poll_interval
            .or(file.poll_interval)
            .unwrap_or(crate::orchestrator::DEFAULT_POLL_INTERVAL);
        if poll_interval.is_zero() {
            anyhow::bail!("poll interval must be greater than zero");
        }

        let api_key = overrides
            .gateway_api_key
            .or(file.gateway_api_key)
            .filter(|k| !k.trim().is_empty());

        Ok(Self {
            ingestion_url: overrides
                .ingestion_url
                .or(file.ingestion_url)
                .unwrap_or_else(|| DEFAULT_INGESTION_URL.to_string()),
            gateway_url: overrides
                .gateway_url
                .or(file.gateway_url)
                .unwrap_or_else(|| DEFAULT_GATEWAY_URL.to_string()),
            gateway_api_key: api_key,
            poll_interval,
            request_timeout: overrides
                .request_timeout
                .or(file.request_timeout)
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT),
            data_dir: overrides
                .data_dir
                .or(file.data_dir)
                .unwrap_or_else(default_data_dir),
            credentials: Credentials {
                username: overrides
                    .username
                    .or(file.username)
                    .unwrap_or_else(|| "admin".to_string()),
                password: overrides
                    .password
                    .or(file.password)
                    .unwrap_or_else(|| "admin".to_string()),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let cfg = Config::resolve(Overrides::default(), FileConfig::default()).unwrap();
        assert_eq!(cfg.ingestion_url, DEFAULT_INGESTION_URL);
        assert_eq!(cfg.gateway_url, DEFAULT_GATEWAY_URL);
        assert_eq!(cfg.poll_interval, Duration::from_secs(5));
        assert_eq!(cfg.request_timeout, Duration::from_secs(30));
        assert_eq!(cfg.credentials.username, "admin");
        assert_eq!(cfg.credentials.password, "admin");
        assert!(cfg.gateway_api_key.is_none());
    }

    #[test]
    fn overrides_beat_file_values() {
        let file: FileConfig = toml::from_str(
            r#"
            ingestion_url = "http://file:1"
            gateway_url = "http://file:2"
            poll_interval = "2s"
            request_timeout = "1m"
            "#,
        )
        .unwrap();
        let overrides = Overrides {
            ingestion_url: Some("http://flag:1".into()),
            poll_interval: Some(Duration::from_millis(750)),
            ..Overrides::default()
        };
        let cfg = Config::resolve(overrides, file).unwrap();
        assert_eq!(cfg.ingestion_url, "http://flag:1");
        assert_eq!(cfg.gateway_url, "http://file:2");
        assert_eq!(cfg.poll_interval, Duration::from_millis(750));
        assert_eq!(cfg.request_timeout, Duration::from_secs(60));
    }

    #[test]
    fn blank_api_key_is_treated_as_unset() {
        let overrides = Overrides {
            gateway_api_key: Some("  ".into()),
            ..Overrides::default()
        };
        let cfg = Config::resolve(overrides, FileConfig::default()).unwrap();
        assert!(cfg.gateway_api_key.is_none());
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let overrides = Overrides {
            poll_interval: Some(Duration::ZERO),
            ..Overrides::default()
        };
        assert!(Config::resolve(overrides, FileConfig::default()).is_err());
    }

    #[test]
    fn missing_file_is_empty_and_bad_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        assert_eq!(FileConfig::load(&path).unwrap(), FileConfig::default());

        std::fs::write(&path, "poll_interval = 5").unwrap();
        assert!(FileConfig::load(&path).is_err());

        std::fs::write(&path, "unknown_key = true").unwrap();
        assert!(FileConfig::load(&path).is_err());
    }
}

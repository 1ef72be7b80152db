//! Configuration management for sanad.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "sanad";

/// Default database file name.
const DATABASE_FILE_NAME: &str = "identity.db";

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `SANAD_`, sections split by `__`)
/// 2. TOML config file at `~/.config/sanad/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Local identity store configuration.
    pub storage: StorageConfig,
    /// Remote profile directory configuration.
    pub directory: DirectoryConfig,
    /// Connectivity detection configuration.
    pub connectivity: ConnectivityConfig,
}

/// Local identity store configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the database file.
    /// Defaults to `~/.local/share/sanad/identity.db`
    pub database_path: Option<PathBuf>,
}

/// Remote profile directory configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    /// Base URL of the PostgREST/Supabase endpoint.
    pub url: String,
    /// Anonymous API key sent with every request.
    pub anon_key: String,
    /// Name of the donor profile table.
    pub table: String,
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
}

/// Connectivity detection configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectivityConfig {
    /// `host:port` to probe. Defaults to the directory host.
    pub probe_address: Option<String>,
    /// Probe timeout in milliseconds.
    pub probe_timeout_ms: u64,
    /// Interval between background polls in milliseconds.
    pub poll_interval_ms: u64,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:54321".to_string(),
            anon_key: String::new(),
            table: "donor_profiles".to_string(),
            request_timeout_secs: 15,
        }
    }
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            probe_address: None,
            probe_timeout_ms: 3_000,
            poll_interval_ms: 5_000,
        }
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file))
            .merge(Env::prefixed("SANAD_").split("__"));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        let url = self.directory_url()?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::config_validation(format!(
                "directory.url must use http or https, got {}",
                url.scheme()
            )));
        }

        let table = &self.directory.table;
        if table.is_empty()
            || !table
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        {
            return Err(Error::config_validation(format!(
                "directory.table must be a lowercase identifier, got {table:?}"
            )));
        }

        if self.directory.request_timeout_secs == 0 {
            return Err(Error::config_validation(
                "request_timeout_secs must be greater than 0",
            ));
        }

        if self.connectivity.probe_timeout_ms == 0 {
            return Err(Error::config_validation(
                "probe_timeout_ms must be greater than 0",
            ));
        }

        if self.connectivity.poll_interval_ms == 0 {
            return Err(Error::config_validation(
                "poll_interval_ms must be greater than 0",
            ));
        }

        if let Some(address) = &self.connectivity.probe_address {
            if !address.contains(':') {
                return Err(Error::config_validation(format!(
                    "probe_address must be host:port, got {address}"
                )));
            }
        }

        Ok(())
    }

    /// Parse the directory URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is malformed.
    pub fn directory_url(&self) -> Result<Url> {
        Url::parse(&self.directory.url).map_err(|e| {
            Error::config_validation(format!("invalid directory.url {}: {e}", self.directory.url))
        })
    }

    /// Get the database path, resolving defaults if not set.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(DATABASE_FILE_NAME))
    }

    /// Get the address the connectivity probe connects to.
    ///
    /// Falls back to the directory host and port.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory URL has no host.
    pub fn probe_address(&self) -> Result<String> {
        if let Some(address) = &self.connectivity.probe_address {
            return Ok(address.clone());
        }

        let url = self.directory_url()?;
        let host = url
            .host_str()
            .ok_or_else(|| Error::config_validation("directory.url has no host"))?;
        let port = url.port_or_known_default().unwrap_or(443);
        Ok(format!("{host}:{port}"))
    }

    /// Get the request timeout as a Duration.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.directory.request_timeout_secs)
    }

    /// Get the probe timeout as a Duration.
    #[must_use]
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.connectivity.probe_timeout_ms)
    }

    /// Get the poll interval as a Duration.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.connectivity.poll_interval_ms)
    }
}

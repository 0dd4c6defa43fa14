//! Configuration types and loading for credctl.
//!
//! Configuration is loaded from `~/.credctl/config.toml`. Every setting is
//! optional.
//!
//! # Error Handling
//!
//! - If the config file doesn't exist, default values are returned.
//! - If the config file exists but is invalid, an error is returned (fail fast).
//!
//! # Example Configuration
//!
//! ```toml
//! [daemon]
//! data_dir = "/home/me/.credctl"   # sockets and provider records
//! request_timeout = 60             # seconds allowed for one provider get
//! readonly_socket = true           # also bind agent-readonly.sock
//!
//! [client]
//! socket = "/home/me/.credctl/agent.sock"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::paths::Paths;

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// No data directory configured and no home directory to fall back to.
    #[error("cannot determine data directory (set daemon.data_dir or HOME)")]
    NoDataDir,
}

/// Main configuration struct.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Daemon configuration.
    pub daemon: DaemonConfig,
    /// Client configuration.
    pub client: ClientConfig,
}

/// Settings used by the daemon.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Data directory holding sockets and provider records (default: `~/.credctl`).
    pub data_dir: Option<PathBuf>,
    /// Seconds a single provider `get` may run (default: 60).
    pub request_timeout: u64,
    /// Whether to bind the read-only socket (default: true).
    pub readonly_socket: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            request_timeout: 60,
            readonly_socket: true,
        }
    }
}

/// Settings used by the CLI.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ClientConfig {
    /// Socket to use when `CREDCTL_SOCK` is not set.
    pub socket: Option<PathBuf>,
}

impl Config {
    /// Returns the default configuration file path.
    ///
    /// Returns `~/.credctl/config.toml`, or `None` if the home directory
    /// cannot be determined.
    pub fn default_path() -> Option<PathBuf> {
        Paths::default_root().map(|root| Paths::new(root).config_file())
    }

    /// Load configuration from the default path.
    ///
    /// - Returns `Ok(Config::default())` if no config file exists.
    /// - Returns `Err` if the file exists but cannot be read or parsed.
    pub fn load() -> Result<Self, ConfigError> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load configuration from a specific path.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Resolve the filesystem layout from `daemon.data_dir` or the default
    /// `~/.credctl`.
    pub fn paths(&self) -> Result<Paths, ConfigError> {
        match &self.daemon.data_dir {
            Some(dir) => Ok(Paths::new(dir)),
            None => Paths::default_root()
                .map(Paths::new)
                .ok_or(ConfigError::NoDataDir),
        }
    }

    /// Timeout applied to each provider `get` in the daemon.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.daemon.request_timeout.max(1))
    }
}

//! TOML-based configuration for the monitor.
//!
//! The monitor reads an optional `reloader.toml`.  Every field has a default,
//! so the file may be absent, empty, or list only the values to change.
//! Command-line flags override whatever the file says.
//!
//! ```toml
//! [server]
//! host = "192.168.1.10"   # omit to use the machine's private IPv4 address
//! port = 5500
//! keepalive_interval_ms = 5000
//! write_timeout_ms = 10000
//!
//! [watcher]
//! path = "src/MyApp"      # omit to watch the current directory
//! extensions = ["xaml"]
//! debounce_ms = 100
//!
//! [logging]
//! level = "info"
//! ```
//!
//! # Serde default values
//!
//! Fields annotated with `#[serde(default = "some_fn")]` use the return value
//! of `some_fn()` when the field is absent from the TOML file.  Whole sections
//! use `#[serde(default)]` so a file containing only `[watcher]` still loads.

use std::path::{Path, PathBuf};
use std::time::Duration;

use reloader_core::RetryPolicy;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::infrastructure::network::broadcast_server::{
    ServerConfig, DEFAULT_KEEPALIVE_INTERVAL, DEFAULT_PORT, DEFAULT_WRITE_TIMEOUT,
};
use crate::infrastructure::network::local_address::default_private_ipv4;
use crate::infrastructure::watcher::debouncer::DEFAULT_DEBOUNCE;
use crate::infrastructure::watcher::WatcherConfig;

/// File name looked up in the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "reloader.toml";

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A value parsed but cannot be used.
    #[error("invalid value for {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level monitor configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MonitorFileConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub watcher: WatcherSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

/// Listener settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerSection {
    /// Bind host.  `None` means the primary private IPv4 address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_keepalive_interval_ms")]
    pub keepalive_interval_ms: u64,
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
}

/// What to watch and how.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WatcherSection {
    /// Watched directory.  `None` means the current working directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggingSection {
    /// `tracing` level: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    #[serde(default = "default_log_level")]
    pub level: String,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_keepalive_interval_ms() -> u64 {
    DEFAULT_KEEPALIVE_INTERVAL.as_millis() as u64
}
fn default_write_timeout_ms() -> u64 {
    DEFAULT_WRITE_TIMEOUT.as_millis() as u64
}
fn default_extensions() -> Vec<String> {
    vec!["xaml".to_string()]
}
fn default_debounce_ms() -> u64 {
    DEFAULT_DEBOUNCE.as_millis() as u64
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: None,
            port: default_port(),
            keepalive_interval_ms: default_keepalive_interval_ms(),
            write_timeout_ms: default_write_timeout_ms(),
        }
    }
}

impl Default for WatcherSection {
    fn default() -> Self {
        Self {
            path: None,
            extensions: default_extensions(),
            debounce_ms: default_debounce_ms(),
        }
    }
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ── Conversion to runtime configs ─────────────────────────────────────────────

impl MonitorFileConfig {
    /// Rejects values the server cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.keepalive_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "server.keepalive_interval_ms",
                reason: "must be greater than zero",
            });
        }
        if self.server.write_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "server.write_timeout_ms",
                reason: "must be greater than zero",
            });
        }
        Ok(())
    }

    /// Builds the server config, resolving an unset host to the private IPv4 address.
    pub fn server_config(&self) -> ServerConfig {
        let host = self
            .server
            .host
            .clone()
            .unwrap_or_else(|| default_private_ipv4().to_string());
        ServerConfig {
            host,
            port: self.server.port,
            keepalive_interval: Duration::from_millis(self.server.keepalive_interval_ms),
            write_timeout: Duration::from_millis(self.server.write_timeout_ms),
        }
    }

    /// Builds the watcher config, resolving an unset path to `cwd`.
    pub fn watcher_config(&self, cwd: &Path) -> WatcherConfig {
        let root = match &self.watcher.path {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => cwd.join(path),
            None => cwd.to_path_buf(),
        };
        WatcherConfig {
            root,
            extensions: self.watcher.extensions.clone(),
            debounce: Duration::from_millis(self.watcher.debounce_ms),
            read_policy: RetryPolicy::file_read(),
        }
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Loads the config at `path`, returning defaults if the file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// [`ConfigError::Parse`] if the TOML is malformed, and
/// [`ConfigError::Invalid`] for values that parse but cannot be used.
pub fn load_config(path: &Path) -> Result<MonitorFileConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            let config: MonitorFileConfig = toml::from_str(&content)?;
            config.validate()?;
            Ok(config)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(MonitorFileConfig::default()),
        Err(e) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Writes `config` to `path`, creating parent directories as needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config(path: &Path, config: &MonitorFileConfig) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

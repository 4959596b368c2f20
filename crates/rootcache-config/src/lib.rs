//! # Root Cache Configuration
//!
//! YAML-based configuration for the root zone server, with JSON and TOML
//! accepted as well. Every section has sensible defaults, so an empty file
//! (or no file at all) yields a working configuration.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub mod listeners;
pub mod sync;

pub use listeners::{ListenerConfig, TcpListener, UdpListener};
pub use sync::{BulkConfig, SyncConfig, TransferConfig};

/// Configuration error.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("File not found: {0}")]
    NotFound(PathBuf),
}

impl ConfigError {
    pub(crate) fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Result type for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Main configuration for the root zone server.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server identification.
    pub server: ServerConfig,

    /// UDP and TCP listeners.
    pub listeners: ListenerConfig,

    /// Upstream synchronization.
    pub sync: SyncConfig,

    /// Metrics and observability.
    pub metrics: MetricsConfig,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

impl Config {
    /// Loads configuration from a file, choosing the format by extension.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let content = std::fs::read_to_string(path)?;

        let config = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&content)?,
            Some("toml") => toml::from_str(&content)?,
            _ => Self::from_yaml(&content)?,
        };

        Ok(config)
    }

    /// Loads configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        self.listeners.validate()?;
        self.sync.validate()?;
        self.logging.validate()?;
        Ok(())
    }

    /// Serializes to YAML.
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

/// Server identification configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server name, used in logs.
    pub name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "rootcache".to_string(),
        }
    }
}

/// Metrics and observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Enable metrics collection.
    pub enabled: bool,

    /// Prometheus endpoint.
    pub prometheus: PrometheusConfig,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            prometheus: PrometheusConfig::default(),
        }
    }
}

/// Prometheus configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrometheusConfig {
    /// Enable Prometheus endpoint.
    pub enabled: bool,

    /// Listen address.
    pub listen: SocketAddr,
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 9153),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level.
    pub level: String,

    /// Log format (text, json).
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

impl LoggingConfig {
    fn validate(&self) -> Result<()> {
        const LEVELS: &[&str] = &["trace", "debug", "info", "warn", "warning", "error"];
        if !LEVELS.contains(&self.level.to_ascii_lowercase().as_str()) {
            return Err(ConfigError::invalid(
                "logging.level",
                format!("unknown level {:?}", self.level),
            ));
        }
        if !matches!(self.format.to_ascii_lowercase().as_str(), "text" | "json") {
            return Err(ConfigError::invalid(
                "logging.format",
                "must be text or json",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.sync.method, "transfer");
        assert_eq!(config.sync.snapshot_file, PathBuf::from("root.zone"));
    }

    #[test]
    fn test_yaml_roundtrip() {
        let config = Config::default();
        let yaml = config.to_yaml().unwrap();
        let parsed = Config::from_yaml(&yaml).unwrap();
        assert_eq!(config.server.name, parsed.server.name);
        assert_eq!(config.sync.refresh_interval_secs, parsed.sync.refresh_interval_secs);
    }

    #[test]
    fn test_empty_yaml_is_default() {
        let config = Config::from_yaml("").unwrap();
        assert_eq!(config.server.name, "rootcache");
    }

    #[test]
    fn test_partial_yaml() {
        let yaml = r"
sync:
  method: http
  upstream: https://mirror.example/root.zone
  refresh_interval_secs: 300
logging:
  level: debug
";
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.sync.method, "http");
        assert_eq!(
            config.sync.upstream.as_deref(),
            Some("https://mirror.example/root.zone")
        );
        assert_eq!(config.sync.refresh_interval_secs, 300);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.listeners.udp.len(), 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_logging() {
        let mut config = Config::default();
        config.logging.level = "loud".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));

        let mut config = Config::default();
        config.logging.format = "xml".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file_by_extension() {
        let dir = tempfile::tempdir().unwrap();

        let toml_path = dir.path().join("config.toml");
        std::fs::write(&toml_path, "[sync]\nmethod = \"axfr\"\nrefresh_interval_secs = 120\n")
            .unwrap();
        let config = Config::from_file(&toml_path).unwrap();
        assert_eq!(config.sync.method, "axfr");
        assert_eq!(config.sync.refresh_interval_secs, 120);

        let json_path = dir.path().join("config.json");
        std::fs::write(&json_path, r#"{"server": {"name": "edge-1"}}"#).unwrap();
        let config = Config::from_file(&json_path).unwrap();
        assert_eq!(config.server.name, "edge-1");

        let missing = dir.path().join("absent.yaml");
        assert!(matches!(
            Config::from_file(&missing),
            Err(ConfigError::NotFound(_))
        ));
    }
}

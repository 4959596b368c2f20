//! Upstream synchronization configuration.

use super::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Synchronization configuration.
///
/// The method name and refresh interval are passed through as written;
/// the zone manager decides whether they are acceptable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Sync method: transfer (axfr) or bulk-download (http).
    pub method: String,

    /// Preferred upstream, tried before the built-in sources.
    pub upstream: Option<String>,

    /// Snapshot file used for persistence and warm starts.
    pub snapshot_file: PathBuf,

    /// Seconds between refreshes.
    pub refresh_interval_secs: u64,

    /// Zone transfer settings.
    pub transfer: TransferConfig,

    /// Bulk download settings.
    pub bulk: BulkConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            method: "transfer".to_string(),
            upstream: None,
            snapshot_file: PathBuf::from("root.zone"),
            refresh_interval_secs: 60,
            transfer: TransferConfig::default(),
            bulk: BulkConfig::default(),
        }
    }
}

impl SyncConfig {
    /// Returns the refresh interval.
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.snapshot_file.as_os_str().is_empty() {
            return Err(ConfigError::invalid("sync.snapshot_file", "must not be empty"));
        }
        if self.transfer.connect_timeout_ms == 0 {
            return Err(ConfigError::invalid(
                "sync.transfer.connect_timeout_ms",
                "must be greater than 0",
            ));
        }
        if self.transfer.io_timeout_ms == 0 {
            return Err(ConfigError::invalid(
                "sync.transfer.io_timeout_ms",
                "must be greater than 0",
            ));
        }
        if self.transfer.transfer_timeout_ms < self.transfer.io_timeout_ms {
            return Err(ConfigError::invalid(
                "sync.transfer.transfer_timeout_ms",
                "must be at least sync.transfer.io_timeout_ms",
            ));
        }
        if self.bulk.timeout_ms == 0 {
            return Err(ConfigError::invalid(
                "sync.bulk.timeout_ms",
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// Zone transfer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Replaces the built-in endpoint list when set.
    pub fallback_endpoints: Option<Vec<String>>,

    /// Connect timeout (milliseconds).
    pub connect_timeout_ms: u64,

    /// Per-message read/write timeout (milliseconds).
    pub io_timeout_ms: u64,

    /// Deadline for a whole transfer from one endpoint (milliseconds).
    pub transfer_timeout_ms: u64,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            fallback_endpoints: None,
            connect_timeout_ms: 5_000,
            io_timeout_ms: 15_000,
            transfer_timeout_ms: 300_000,
        }
    }
}

impl TransferConfig {
    /// Returns the connect timeout.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Returns the per-message timeout.
    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    /// Returns the whole-transfer deadline.
    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_millis(self.transfer_timeout_ms)
    }
}

/// Bulk download settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BulkConfig {
    /// Replaces the built-in URL list when set.
    pub fallback_urls: Option<Vec<String>>,

    /// Request timeout (milliseconds).
    pub timeout_ms: u64,
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            fallback_urls: None,
            timeout_ms: 60_000,
        }
    }
}

impl BulkConfig {
    /// Returns the request timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

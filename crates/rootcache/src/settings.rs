//! Translation from the file configuration to component settings.

use rootcache_config::{Config, ListenerConfig, LoggingConfig, SyncConfig};
use rootcache_metrics::tracing_setup::{parse_level, LogConfig, LogFormat};
use rootcache_server::{ServerConfig, TcpConfig, UdpConfig};
use rootcache_sync::{BulkOptions, ManagerConfig, TransferOptions};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::Level;

/// Command-line values that take precedence over the configuration file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    /// Sync method name.
    pub sync_method: Option<String>,
    /// Preferred upstream endpoint or URL.
    pub upstream: Option<String>,
    /// Snapshot file path.
    pub zone_file: Option<PathBuf>,
    /// Single address for both UDP and TCP.
    pub listen: Option<SocketAddr>,
    /// Refresh interval in seconds.
    pub refresh_secs: Option<u64>,
    /// Log level name.
    pub log_level: Option<String>,
}

impl Overrides {
    /// Writes every set value into `config`.
    pub fn apply(&self, config: &mut Config) {
        if let Some(method) = &self.sync_method {
            config.sync.method.clone_from(method);
        }
        if let Some(upstream) = &self.upstream {
            config.sync.upstream = Some(upstream.clone());
        }
        if let Some(path) = &self.zone_file {
            config.sync.snapshot_file.clone_from(path);
        }
        if let Some(address) = self.listen {
            config.listeners.listen_on(address);
        }
        if let Some(secs) = self.refresh_secs {
            config.sync.refresh_interval_secs = secs;
        }
        if let Some(level) = &self.log_level {
            config.logging.level.clone_from(level);
        }
    }
}

/// Builds the zone manager settings.
///
/// Unset fallback lists mean the built-in upstreams; an explicit empty list
/// leaves only the preferred upstream.
pub fn manager_config(sync: &SyncConfig) -> ManagerConfig {
    let transfer_defaults = TransferOptions::default();
    let bulk_defaults = BulkOptions::default();

    ManagerConfig {
        method: sync.method.clone(),
        upstream: sync.upstream.clone(),
        snapshot_path: sync.snapshot_file.clone(),
        refresh_interval: sync.refresh_interval(),
        transfer: TransferOptions {
            fallback_endpoints: sync
                .transfer
                .fallback_endpoints
                .clone()
                .unwrap_or(transfer_defaults.fallback_endpoints),
            connect_timeout: sync.transfer.connect_timeout(),
            io_timeout: sync.transfer.io_timeout(),
            transfer_timeout: sync.transfer.transfer_timeout(),
        },
        bulk: BulkOptions {
            fallback_urls: sync
                .bulk
                .fallback_urls
                .clone()
                .unwrap_or(bulk_defaults.fallback_urls),
            timeout: sync.bulk.timeout(),
        },
    }
}

/// Builds the listener set.
pub fn server_config(listeners: &ListenerConfig) -> ServerConfig {
    ServerConfig {
        udp: listeners
            .udp
            .iter()
            .map(|l| UdpConfig {
                address: l.address,
                reuseport: l.reuseport,
                recv_buffer: l.recv_buffer,
                send_buffer: l.send_buffer,
            })
            .collect(),
        tcp: listeners
            .tcp
            .iter()
            .map(|l| TcpConfig {
                idle_timeout: Duration::from_secs(l.idle_timeout),
                write_timeout: Duration::from_secs(l.write_timeout),
                max_connections: l.max_connections,
                ..TcpConfig::new(l.address)
            })
            .collect(),
    }
}

/// Builds the tracing settings. Quiet mode only reports errors.
pub fn log_config(logging: &LoggingConfig, quiet: bool) -> LogConfig {
    let level = if quiet {
        Level::ERROR
    } else {
        parse_level(&logging.level).unwrap_or(Level::INFO)
    };

    LogConfig {
        level,
        format: logging.format.parse().unwrap_or(LogFormat::Text),
        span_events: false,
    }
}

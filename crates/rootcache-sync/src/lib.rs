//! # Root Zone Synchronization
//!
//! This crate fetches the root zone from upstream and keeps the active
//! [`ZoneStore`] snapshot current:
//!
//! - **Zone transfer**: AXFR over TCP from an ordered list of servers
//! - **Bulk download**: HTTP fetch of the published `root.zone` file
//! - **Snapshots**: persisting the active store and restoring it on startup
//! - **Manager**: snapshot slot, periodic refresh and the query entry point
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use rootcache_sync::{Manager, ManagerConfig};
//!
//! let manager = Arc::new(Manager::new(ManagerConfig::default())?);
//! if manager.sync().await.is_err() {
//!     manager.sync_from_file().await?;
//! }
//! let refresh = manager.spawn_refresh();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

use std::fmt;
use std::future::Future;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use hickory_proto::rr::Record;
use rootcache_zone::{ZoneError, ZoneStore};
use thiserror::Error;
use tracing::{debug, warn};

pub mod bulk;
pub mod manager;
pub mod transfer;

pub use bulk::{BulkDownloadSynchronizer, BulkOptions, DEFAULT_BULK_URLS};
pub use manager::{
    Manager, ManagerConfig, ManagerState, RefreshHandle, Reply, SyncReport, EDNS_MAX_PAYLOAD,
    MIN_REFRESH_INTERVAL,
};
pub use transfer::{TransferOptions, TransferSynchronizer, DEFAULT_TRANSFER_ENDPOINTS};

// ============================================================================
// Error Types
// ============================================================================

/// Errors produced while configuring or running synchronization.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Invalid manager or synchronizer configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Every upstream source failed.
    #[error("all {attempted} upstream sources failed, last error: {last}")]
    Synchronization {
        /// Number of sources tried.
        attempted: usize,
        /// The failure of the last source tried.
        #[source]
        last: Box<SyncError>,
    },

    /// The snapshot file could not be written.
    #[error("failed to persist snapshot: {0}")]
    Persistence(#[source] ZoneError),

    /// Records could not be turned into a store, or a snapshot could not be read.
    #[error(transparent)]
    Store(#[from] ZoneError),

    /// Zone transfer failure.
    #[error("zone transfer from {endpoint} failed: {message}")]
    Transfer {
        /// The endpoint that failed.
        endpoint: String,
        /// Description of the failure.
        message: String,
    },

    /// HTTP transport failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success HTTP status.
    #[error("HTTP {status} from {url}")]
    HttpStatus {
        /// Requested URL.
        url: String,
        /// Returned status code.
        status: u16,
    },

    /// An upstream operation exceeded its deadline.
    #[error("timed out {0}")]
    Timeout(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A blocking task panicked or was cancelled.
    #[error("background task failed: {0}")]
    Task(String),
}

impl SyncError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Creates a zone transfer error.
    pub fn transfer(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transfer {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }
}

/// Result type for synchronization operations.
pub type Result<T> = std::result::Result<T, SyncError>;

// ============================================================================
// Sync Method
// ============================================================================

/// How the zone is obtained from upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncMethod {
    /// AXFR zone transfer.
    Transfer,
    /// HTTP download of the zone file.
    BulkDownload,
}

impl SyncMethod {
    /// Returns the canonical selector string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transfer => "transfer",
            Self::BulkDownload => "bulk-download",
        }
    }
}

impl fmt::Display for SyncMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncMethod {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "transfer" | "axfr" => Ok(Self::Transfer),
            "bulk-download" | "bulk" | "http" => Ok(Self::BulkDownload),
            other => Err(SyncError::config(format!(
                "unsupported sync method {other:?} (expected transfer or bulk-download)"
            ))),
        }
    }
}

// ============================================================================
// Synchronizer Capability
// ============================================================================

/// A source of root zone data.
#[async_trait]
pub trait ZoneSynchronizer: Send + Sync {
    /// Returns the method this synchronizer implements.
    fn method(&self) -> SyncMethod;

    /// Fetches the zone from upstream and builds a store from it.
    async fn download(&self) -> Result<ZoneStore>;

    /// Writes `store` to `path` as a snapshot.
    async fn persist_to_path(&self, store: &Arc<ZoneStore>, path: &Path) -> Result<usize> {
        persist_snapshot(Arc::clone(store), path).await
    }

    /// Builds a store from the snapshot at `path`.
    async fn load_from_path(&self, path: &Path) -> Result<ZoneStore> {
        load_snapshot(path).await
    }
}

/// The configured synchronizer, chosen once when the manager is built.
#[derive(Debug)]
pub enum Synchronizer {
    /// AXFR from root servers.
    Transfer(TransferSynchronizer),
    /// HTTP download of the zone file.
    BulkDownload(BulkDownloadSynchronizer),
}

impl Synchronizer {
    /// Creates the synchronizer for `method`.
    ///
    /// `upstream` is tried before the method's fallback sources.
    pub fn new(
        method: SyncMethod,
        upstream: Option<&str>,
        transfer: TransferOptions,
        bulk: BulkOptions,
    ) -> Result<Self> {
        match method {
            SyncMethod::Transfer => {
                TransferSynchronizer::new(upstream, transfer).map(Self::Transfer)
            }
            SyncMethod::BulkDownload => {
                BulkDownloadSynchronizer::new(upstream, bulk).map(Self::BulkDownload)
            }
        }
    }

    /// Returns the ordered list of upstream sources.
    pub fn sources(&self) -> Vec<String> {
        match self {
            Self::Transfer(s) => s.endpoints().to_vec(),
            Self::BulkDownload(s) => s.urls().iter().map(ToString::to_string).collect(),
        }
    }
}

#[async_trait]
impl ZoneSynchronizer for Synchronizer {
    fn method(&self) -> SyncMethod {
        match self {
            Self::Transfer(s) => s.method(),
            Self::BulkDownload(s) => s.method(),
        }
    }

    async fn download(&self) -> Result<ZoneStore> {
        match self {
            Self::Transfer(s) => s.download().await,
            Self::BulkDownload(s) => s.download().await,
        }
    }
}

// ============================================================================
// Shared Helpers
// ============================================================================

/// Writes a snapshot on the blocking pool. Returns the number of records written.
pub async fn persist_snapshot(store: Arc<ZoneStore>, path: &Path) -> Result<usize> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || store.write_to_file(&path))
        .await
        .map_err(|e| SyncError::Task(e.to_string()))?
        .map_err(SyncError::Persistence)
}

/// Loads a snapshot on the blocking pool.
pub async fn load_snapshot(path: &Path) -> Result<ZoneStore> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || ZoneStore::from_file(&path))
        .await
        .map_err(|e| SyncError::Task(e.to_string()))?
        .map_err(SyncError::Store)
}

/// Tries `sources` in order and returns the first one that builds a store.
///
/// A source whose records do not build a store counts as failed. When every
/// source fails the last failure is returned inside
/// [`SyncError::Synchronization`].
pub(crate) async fn first_usable<'a, S, F, Fut>(
    method: SyncMethod,
    sources: &'a [S],
    mut fetch: F,
) -> Result<ZoneStore>
where
    S: fmt::Display,
    F: FnMut(&'a S) -> Fut,
    Fut: Future<Output = Result<Vec<Record>>>,
{
    let mut last = None;
    for source in sources {
        debug!(%method, %source, "trying upstream source");
        let outcome = fetch(source)
            .await
            .and_then(|records| ZoneStore::build(records).map_err(SyncError::Store));
        match outcome {
            Ok(store) => {
                debug!(%method, %source, records = store.record_count(), "upstream source succeeded");
                return Ok(store);
            }
            Err(e) => {
                warn!(%method, %source, error = %e, "upstream source failed");
                rootcache_metrics::metrics()
                    .record_upstream_failure(method.as_str(), &source.to_string());
                last = Some(e);
            }
        }
    }

    Err(SyncError::Synchronization {
        attempted: sources.len(),
        last: Box::new(
            last.unwrap_or_else(|| SyncError::config("no upstream sources configured")),
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_method_parsing() {
        assert_eq!("transfer".parse::<SyncMethod>().unwrap(), SyncMethod::Transfer);
        assert_eq!("AXFR".parse::<SyncMethod>().unwrap(), SyncMethod::Transfer);
        assert_eq!(
            "bulk-download".parse::<SyncMethod>().unwrap(),
            SyncMethod::BulkDownload
        );
        assert_eq!(" http ".parse::<SyncMethod>().unwrap(), SyncMethod::BulkDownload);

        let err = "ftp".parse::<SyncMethod>().unwrap_err();
        assert!(matches!(err, SyncError::Configuration(_)));
    }

    #[test]
    fn test_sync_method_display() {
        assert_eq!(SyncMethod::Transfer.to_string(), "transfer");
        assert_eq!(SyncMethod::BulkDownload.to_string(), "bulk-download");
    }

    #[test]
    fn test_synchronization_error_reports_last_failure() {
        let err = SyncError::Synchronization {
            attempted: 2,
            last: Box::new(SyncError::transfer("192.0.2.1:53", "connection refused")),
        };
        let text = err.to_string();
        assert!(text.contains("all 2 upstream sources failed"));
        assert!(text.contains("192.0.2.1:53"));
    }

    #[tokio::test]
    async fn test_first_usable_stops_at_success() {
        use hickory_proto::rr::rdata::NS;
        use hickory_proto::rr::{Name, RData};

        let sources = vec!["bad".to_string(), "good".to_string(), "unused".to_string()];
        let mut calls = Vec::new();
        let store = first_usable(SyncMethod::Transfer, &sources, |source| {
            calls.push(source.clone());
            let result = if source == "good" {
                Ok(vec![Record::from_rdata(
                    Name::root(),
                    518_400,
                    RData::NS(NS(Name::from_ascii("a.root-servers.net.").unwrap())),
                )])
            } else {
                Err(SyncError::transfer(source.as_str(), "refused"))
            };
            async move { result }
        })
        .await
        .unwrap();

        assert_eq!(store.delegation_count(), 1);
        assert_eq!(calls, vec!["bad".to_string(), "good".to_string()]);
    }

    #[tokio::test]
    async fn test_first_usable_treats_unbuildable_records_as_failure() {
        let sources = vec!["empty".to_string()];
        let err = first_usable(SyncMethod::BulkDownload, &sources, |_| async { Ok(Vec::new()) })
            .await
            .unwrap_err();
        match err {
            SyncError::Synchronization { attempted, last } => {
                assert_eq!(attempted, 1);
                assert!(matches!(*last, SyncError::Store(ZoneError::EmptyInput)));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}

//! The active snapshot slot, refresh schedule and query entry point.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use hickory_proto::op::ResponseCode;
use hickory_proto::rr::{Name, RecordType};
use parking_lot::RwLock;
use rootcache_zone::{QueryResponse, ZoneStore};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument};

use crate::{
    BulkOptions, Result, SyncError, SyncMethod, Synchronizer, TransferOptions, ZoneSynchronizer,
};

/// Shortest accepted refresh interval.
pub const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// EDNS UDP payload size advertised on every response.
pub const EDNS_MAX_PAYLOAD: u16 = 4096;

/// Manager settings.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Sync method selector: `transfer`/`axfr` or `bulk-download`/`http`.
    pub method: String,
    /// Preferred upstream endpoint or URL, tried before the fallbacks.
    pub upstream: Option<String>,
    /// Where the snapshot is persisted and restored from.
    pub snapshot_path: PathBuf,
    /// Time between scheduled refreshes.
    pub refresh_interval: Duration,
    /// Zone transfer settings.
    pub transfer: TransferOptions,
    /// Bulk download settings.
    pub bulk: BulkOptions,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            method: SyncMethod::Transfer.as_str().to_string(),
            upstream: None,
            snapshot_path: PathBuf::from("root.zone"),
            refresh_interval: Duration::from_secs(60),
            transfer: TransferOptions::default(),
            bulk: BulkOptions::default(),
        }
    }
}

/// Whether a snapshot has been installed yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    /// No snapshot; queries are answered with SERVFAIL.
    Uninitialized,
    /// A snapshot is installed and answering queries.
    Serving,
}

/// Outcome of a successful sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
    /// Records in the installed snapshot.
    pub records: usize,
    /// Delegation points in the installed snapshot.
    pub delegations: usize,
    /// Whether the snapshot file matches the installed snapshot.
    pub persisted: bool,
}

impl SyncReport {
    fn new(store: &ZoneStore, persisted: bool) -> Self {
        Self {
            records: store.record_count(),
            delegations: store.delegation_count(),
            persisted,
        }
    }
}

/// The answer to one query, ready to be put on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    /// Response code.
    pub rcode: ResponseCode,
    /// Answer, authority and additional sections plus the AA flag.
    pub response: QueryResponse,
    /// EDNS payload size to advertise.
    pub max_payload: u16,
}

impl Reply {
    /// A SERVFAIL reply with empty sections.
    pub fn servfail() -> Self {
        Self {
            rcode: ResponseCode::ServFail,
            response: QueryResponse::default(),
            max_payload: EDNS_MAX_PAYLOAD,
        }
    }

    fn answer(response: QueryResponse) -> Self {
        Self {
            rcode: ResponseCode::NoError,
            response,
            max_payload: EDNS_MAX_PAYLOAD,
        }
    }
}

/// Owns the active zone snapshot and the synchronizer that refreshes it.
///
/// The snapshot sits behind a read/write lock that is held only long enough
/// to clone or replace an `Arc`, so downloads and disk writes never block
/// queries.
#[derive(Debug)]
pub struct Manager {
    synchronizer: Synchronizer,
    snapshot_path: PathBuf,
    refresh_interval: Duration,
    active: RwLock<Option<Arc<ZoneStore>>>,
}

impl Manager {
    /// Validates `config` and creates a manager with no snapshot installed.
    pub fn new(config: ManagerConfig) -> Result<Self> {
        let method: SyncMethod = config.method.parse()?;

        if config.refresh_interval < MIN_REFRESH_INTERVAL {
            return Err(SyncError::config(format!(
                "refresh interval {}s is below the minimum of {}s",
                config.refresh_interval.as_secs(),
                MIN_REFRESH_INTERVAL.as_secs()
            )));
        }
        if config.snapshot_path.as_os_str().is_empty() {
            return Err(SyncError::config("snapshot path must not be empty"));
        }

        let synchronizer = Synchronizer::new(
            method,
            config.upstream.as_deref(),
            config.transfer,
            config.bulk,
        )?;

        info!(
            %method,
            sources = ?synchronizer.sources(),
            interval_secs = config.refresh_interval.as_secs(),
            snapshot = %config.snapshot_path.display(),
            "zone manager configured"
        );

        Ok(Self {
            synchronizer,
            snapshot_path: config.snapshot_path,
            refresh_interval: config.refresh_interval,
            active: RwLock::new(None),
        })
    }

    /// Returns the configured sync method.
    pub fn method(&self) -> SyncMethod {
        self.synchronizer.method()
    }

    /// Returns the synchronizer.
    pub fn synchronizer(&self) -> &Synchronizer {
        &self.synchronizer
    }

    /// Returns the snapshot file path.
    pub fn snapshot_path(&self) -> &Path {
        &self.snapshot_path
    }

    /// Returns the refresh interval.
    pub fn refresh_interval(&self) -> Duration {
        self.refresh_interval
    }

    /// Returns the active snapshot, if any.
    pub fn snapshot(&self) -> Option<Arc<ZoneStore>> {
        self.active.read().clone()
    }

    /// Returns whether a snapshot is installed.
    pub fn state(&self) -> ManagerState {
        if self.active.read().is_some() {
            ManagerState::Serving
        } else {
            ManagerState::Uninitialized
        }
    }

    fn install(&self, store: Arc<ZoneStore>) {
        rootcache_metrics::metrics().set_snapshot_size(store.record_count(), store.delegation_count());
        *self.active.write() = Some(store);
    }

    /// Downloads a fresh zone, installs it and persists it.
    ///
    /// On download failure the active snapshot is left untouched. A
    /// persistence failure is logged and reported through
    /// [`SyncReport::persisted`]; the new snapshot stays installed.
    #[instrument(skip(self), fields(method = %self.synchronizer.method()))]
    pub async fn sync(&self) -> Result<SyncReport> {
        let method = self.synchronizer.method();
        let started = Instant::now();

        let store = match self.synchronizer.download().await {
            Ok(store) => Arc::new(store),
            Err(e) => {
                rootcache_metrics::metrics().record_sync(method.as_str(), false);
                return Err(e);
            }
        };

        self.install(Arc::clone(&store));
        rootcache_metrics::metrics().record_sync(method.as_str(), true);
        info!(
            records = store.record_count(),
            delegations = store.delegation_count(),
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "installed new zone snapshot"
        );

        let persisted = match self
            .synchronizer
            .persist_to_path(&store, &self.snapshot_path)
            .await
        {
            Ok(written) => {
                debug!(records = written, path = %self.snapshot_path.display(), "persisted zone snapshot");
                true
            }
            Err(e) => {
                error!(error = %e, path = %self.snapshot_path.display(), "failed to persist zone snapshot");
                rootcache_metrics::metrics().record_persist_failure();
                false
            }
        };

        Ok(SyncReport::new(&store, persisted))
    }

    /// Installs the persisted snapshot.
    ///
    /// Fails when the file is missing or yields no usable store, leaving the
    /// active snapshot untouched.
    pub async fn sync_from_file(&self) -> Result<SyncReport> {
        let store = self
            .synchronizer
            .load_from_path(&self.snapshot_path)
            .await?;
        let store = Arc::new(store);
        self.install(Arc::clone(&store));
        info!(
            records = store.record_count(),
            path = %self.snapshot_path.display(),
            "installed zone snapshot from file"
        );
        Ok(SyncReport::new(&store, true))
    }

    /// Answers one query from the active snapshot.
    ///
    /// Returns SERVFAIL while no snapshot is installed.
    pub fn handle_query(&self, name: &Name, rtype: RecordType, dnssec_ok: bool) -> Reply {
        match self.snapshot() {
            Some(store) => Reply::answer(store.query_name(name, rtype, dnssec_ok)),
            None => Reply::servfail(),
        }
    }

    /// Starts the periodic refresh task.
    ///
    /// The first refresh runs one interval after this call. Failures are
    /// logged and the schedule continues. The task stops when the handle is
    /// shut down or dropped.
    pub fn spawn_refresh(self: &Arc<Self>) -> RefreshHandle {
        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
        let manager = Arc::clone(self);
        let period = self.refresh_interval;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match manager.sync().await {
                            Ok(report) => debug!(
                                records = report.records,
                                persisted = report.persisted,
                                "scheduled zone refresh completed"
                            ),
                            Err(e) => error!(error = %e, "scheduled zone refresh failed"),
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("zone refresh task stopping");
                        break;
                    }
                }
            }
        });

        RefreshHandle {
            shutdown_tx,
            task,
        }
    }
}

/// Handle to the periodic refresh task.
#[derive(Debug)]
pub struct RefreshHandle {
    shutdown_tx: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

impl RefreshHandle {
    /// Stops future refreshes. A refresh already running completes first.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Returns true once the task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stops the task and waits for it to exit.
    pub async fn stop(self) {
        self.shutdown();
        if let Err(e) = self.task.await {
            error!(error = %e, "zone refresh task panicked");
        }
    }
}

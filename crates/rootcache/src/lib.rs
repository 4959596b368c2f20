//! # rootcache
//!
//! A caching authoritative server for the DNS root zone. The zone is pulled
//! from upstream by AXFR or HTTP download, held in memory, persisted to disk
//! and refreshed on a fixed schedule. Root queries are answered
//! authoritatively; everything else gets a referral to the matching
//! top-level domain.
//!
//! This library holds the pieces the `rootcache` binary wires together:
//! the [`handler::RootHandler`] that bridges the wire to the zone manager,
//! the [`settings`] translation from file configuration, and [`bootstrap`].

use rootcache_sync::{Manager, ManagerState};
use tracing::{error, info, warn};

pub mod handler;
pub mod settings;

pub use handler::RootHandler;

/// Installs the first snapshot before serving.
///
/// Tries an upstream sync, then the persisted snapshot file. When both
/// fail the manager stays uninitialized and queries get SERVFAIL until a
/// scheduled refresh succeeds.
pub async fn bootstrap(manager: &Manager) -> ManagerState {
    match manager.sync().await {
        Ok(report) => {
            info!(
                records = report.records,
                delegations = report.delegations,
                persisted = report.persisted,
                "Initial sync complete"
            );
        }
        Err(sync_error) => {
            warn!(error = %sync_error, "Initial sync failed, loading snapshot file");
            match manager.sync_from_file().await {
                Ok(report) => {
                    info!(
                        records = report.records,
                        delegations = report.delegations,
                        path = %manager.snapshot_path().display(),
                        "Serving persisted snapshot"
                    );
                }
                Err(e) => {
                    error!(
                        error = %e,
                        path = %manager.snapshot_path().display(),
                        "No zone data available, answering SERVFAIL until a refresh succeeds"
                    );
                }
            }
        }
    }

    manager.state()
}

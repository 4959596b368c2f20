//! # Root Cache Metrics
//!
//! Observability for the root zone server:
//!
//! - **Prometheus metrics**: queries, responses, latency, sync outcomes and
//!   snapshot size
//! - **Structured logging**: text and JSON output through `tracing`
//!
//! Recording goes through the `metrics` facade, so every call is a no-op
//! until an exporter is installed with [`prometheus::init_prometheus`].

use metrics::{counter, gauge, histogram};
use once_cell::sync::OnceCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

pub mod prometheus;
pub mod tracing_setup;

/// Global metrics instance.
static METRICS: OnceCell<ServerMetrics> = OnceCell::new();

/// Gets or initializes the global metrics instance.
pub fn metrics() -> &'static ServerMetrics {
    METRICS.get_or_init(ServerMetrics::new)
}

/// Root server metrics.
pub struct ServerMetrics {
    /// Server start time.
    start_time: Instant,

    /// Total queries received.
    queries_total: AtomicU64,

    /// Completed syncs, successful or not.
    syncs_total: AtomicU64,
}

impl ServerMetrics {
    /// Creates a new metrics instance.
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            queries_total: AtomicU64::new(0),
            syncs_total: AtomicU64::new(0),
        }
    }

    /// Returns the server uptime.
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Returns the number of queries recorded so far.
    pub fn queries(&self) -> u64 {
        self.queries_total.load(Ordering::Relaxed)
    }

    /// Returns the number of sync attempts recorded so far.
    pub fn syncs(&self) -> u64 {
        self.syncs_total.load(Ordering::Relaxed)
    }

    // =========================================================================
    // Query metrics
    // =========================================================================

    /// Records a received query.
    pub fn record_query(&self, protocol: &str, qtype: &str) {
        self.queries_total.fetch_add(1, Ordering::Relaxed);
        counter!("rootcache_queries_total", "protocol" => protocol.to_string(), "type" => qtype.to_string()).increment(1);
    }

    /// Records a sent response.
    pub fn record_response(&self, protocol: &str, rcode: &str) {
        counter!("rootcache_responses_total", "protocol" => protocol.to_string(), "rcode" => rcode.to_string()).increment(1);
    }

    /// Records query handling latency.
    pub fn record_latency(&self, protocol: &str, duration: Duration) {
        histogram!("rootcache_query_duration_seconds", "protocol" => protocol.to_string())
            .record(duration.as_secs_f64());
    }

    /// Records a truncated UDP response.
    pub fn record_truncated(&self) {
        counter!("rootcache_truncated_total").increment(1);
    }

    /// Records a query that could not be handled.
    pub fn record_error(&self, error_type: &str) {
        counter!("rootcache_errors_total", "type" => error_type.to_string()).increment(1);
    }

    // =========================================================================
    // Synchronization metrics
    // =========================================================================

    /// Records the outcome of a sync attempt.
    pub fn record_sync(&self, method: &str, success: bool) {
        self.syncs_total.fetch_add(1, Ordering::Relaxed);
        let result = if success { "success" } else { "failure" };
        counter!("rootcache_syncs_total", "method" => method.to_string(), "result" => result).increment(1);
    }

    /// Records a failed upstream source.
    pub fn record_upstream_failure(&self, method: &str, source: &str) {
        counter!("rootcache_upstream_failures_total", "method" => method.to_string(), "source" => source.to_string())
            .increment(1);
    }

    /// Records a failed snapshot write.
    pub fn record_persist_failure(&self) {
        counter!("rootcache_persist_failures_total").increment(1);
    }

    /// Sets the size of the active snapshot.
    #[allow(clippy::cast_precision_loss)]
    pub fn set_snapshot_size(&self, records: usize, delegations: usize) {
        gauge!("rootcache_snapshot_records").set(records as f64);
        gauge!("rootcache_snapshot_delegations").set(delegations as f64);
    }

    // =========================================================================
    // Connection metrics
    // =========================================================================

    /// Records an accepted TCP connection.
    pub fn record_connection(&self, protocol: &str) {
        counter!("rootcache_connections_total", "protocol" => protocol.to_string()).increment(1);
    }
}

impl Default for ServerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = ServerMetrics::new();
        assert!(metrics.uptime() >= Duration::ZERO);
        assert_eq!(metrics.queries(), 0);
    }

    #[test]
    fn test_counters_without_recorder() {
        let metrics = ServerMetrics::new();
        metrics.record_query("udp", "NS");
        metrics.record_query("tcp", "A");
        metrics.record_sync("transfer", false);
        metrics.set_snapshot_size(22_000, 1_500);
        assert_eq!(metrics.queries(), 2);
        assert_eq!(metrics.syncs(), 1);
    }
}

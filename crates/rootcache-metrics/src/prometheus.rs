//! Prometheus metrics exporter.

use std::net::SocketAddr;

#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::PrometheusBuilder;

/// Prometheus metrics server configuration.
#[derive(Debug, Clone)]
pub struct PrometheusConfig {
    /// Listen address of the scrape endpoint.
    pub listen: SocketAddr,
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            listen: ([127, 0, 0, 1], 9153).into(),
        }
    }
}

/// Errors from exporter installation.
#[derive(Debug, thiserror::Error)]
pub enum ExporterError {
    /// The exporter could not be built or installed.
    #[error("failed to install Prometheus exporter: {0}")]
    Install(String),
}

/// Installs the Prometheus recorder and starts its HTTP listener.
///
/// Must be called from within a tokio runtime.
#[cfg(feature = "prometheus")]
pub fn init_prometheus(config: &PrometheusConfig) -> Result<(), ExporterError> {
    PrometheusBuilder::new()
        .with_http_listener(config.listen)
        .install()
        .map_err(|e| ExporterError::Install(e.to_string()))?;

    tracing::info!(listen = %config.listen, "Prometheus metrics server listening");
    Ok(())
}

/// Installs nothing; the `prometheus` feature is disabled.
#[cfg(not(feature = "prometheus"))]
pub fn init_prometheus(config: &PrometheusConfig) -> Result<(), ExporterError> {
    tracing::warn!(listen = %config.listen, "Prometheus support not compiled in");
    Ok(())
}

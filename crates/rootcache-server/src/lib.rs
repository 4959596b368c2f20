//! # Root Cache DNS Server
//!
//! Async UDP and TCP listeners that hand parsed queries to a
//! [`QueryHandler`] and deliver its responses.
//!
//! ## Architecture
//!
//! - **UDP Server**: one task per datagram, responses truncated to the
//!   client's advertised EDNS size (512 bytes without EDNS)
//! - **TCP Server**: length-prefixed framing, idle timeout, bounded
//!   concurrent connections
//! - **DnsServer**: runs every configured listener and stops them together
//!   on shutdown

use hickory_proto::op::Message;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::info;

pub mod handler;
pub mod tcp;
pub mod udp;

pub use handler::{response_to, QueryContext, QueryHandler};
pub use tcp::{TcpConfig, TcpServer};
pub use udp::{UdpConfig, UdpServer};

/// Server error types.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Listener task failed: {0}")]
    Task(String),
}

/// Result type for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;

/// DNS transport protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// Plain UDP.
    Udp,
    /// Plain TCP.
    Tcp,
}

impl Protocol {
    /// Returns the protocol name.
    pub const fn name(&self) -> &'static str {
        match self {
            Protocol::Udp => "UDP",
            Protocol::Tcp => "TCP",
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Listener set for a [`DnsServer`].
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    /// UDP listeners.
    pub udp: Vec<UdpConfig>,

    /// TCP listeners.
    pub tcp: Vec<TcpConfig>,
}

impl ServerConfig {
    /// One UDP and one TCP listener on `address`.
    pub fn listen_on(address: SocketAddr) -> Self {
        Self {
            udp: vec![UdpConfig::new(address)],
            tcp: vec![TcpConfig::new(address)],
        }
    }
}

/// DNS server instance.
pub struct DnsServer {
    config: ServerConfig,
    handler: Arc<dyn QueryHandler>,
    shutdown_tx: broadcast::Sender<()>,
}

impl DnsServer {
    /// Creates a new DNS server.
    pub fn new(config: ServerConfig, handler: Arc<dyn QueryHandler>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            handler,
            shutdown_tx,
        }
    }

    /// Binds every configured listener and serves until shutdown.
    ///
    /// All sockets are bound before any is served, so a bind failure on one
    /// address leaves nothing running.
    pub async fn run(&self) -> Result<()> {
        if self.config.udp.is_empty() && self.config.tcp.is_empty() {
            return Err(ServerError::Config("no listeners configured".to_string()));
        }

        let mut udp_servers = Vec::with_capacity(self.config.udp.len());
        for config in &self.config.udp {
            udp_servers.push(UdpServer::bind(config, self.handler.clone()).await?);
        }
        let mut tcp_servers = Vec::with_capacity(self.config.tcp.len());
        for config in &self.config.tcp {
            tcp_servers.push(TcpServer::bind(config, self.handler.clone()).await?);
        }

        let mut handles = Vec::new();

        for server in udp_servers {
            let mut shutdown_rx = self.shutdown_tx.subscribe();
            handles.push(tokio::spawn(async move {
                tokio::select! {
                    result = server.run() => result,
                    _ = shutdown_rx.recv() => Ok(()),
                }
            }));
        }

        for server in tcp_servers {
            let mut shutdown_rx = self.shutdown_tx.subscribe();
            handles.push(tokio::spawn(async move {
                tokio::select! {
                    result = server.run() => result,
                    _ = shutdown_rx.recv() => Ok(()),
                }
            }));
        }

        for handle in handles {
            handle.await.map_err(|e| ServerError::Task(e.to_string()))??;
        }

        info!("All listeners stopped");
        Ok(())
    }

    /// Initiates graceful shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

/// Encodes a message to wire format.
pub(crate) fn encode(message: &Message) -> Result<Vec<u8>> {
    message
        .to_vec()
        .map_err(|e| ServerError::Protocol(format!("failed to encode response: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::RefusedHandler;
    use std::time::Duration;

    #[test]
    fn test_protocol_names() {
        assert_eq!(Protocol::Tcp.to_string(), "TCP");
        assert_eq!(Protocol::Udp.name(), "UDP");
    }

    #[test]
    fn test_listen_on() {
        let addr: SocketAddr = "127.0.0.1:5353".parse().unwrap();
        let config = ServerConfig::listen_on(addr);
        assert_eq!(config.udp.len(), 1);
        assert_eq!(config.tcp.len(), 1);
        assert_eq!(config.udp[0].address, addr);
        assert_eq!(config.tcp[0].address, addr);
    }

    #[tokio::test]
    async fn test_run_without_listeners_fails() {
        let server = DnsServer::new(ServerConfig::default(), Arc::new(RefusedHandler));
        assert!(matches!(server.run().await, Err(ServerError::Config(_))));
    }

    #[tokio::test]
    async fn test_shutdown_stops_run() {
        let server = Arc::new(DnsServer::new(
            ServerConfig::listen_on("127.0.0.1:0".parse().unwrap()),
            Arc::new(RefusedHandler),
        ));

        let running = server.clone();
        let task = tokio::spawn(async move { running.run().await });

        // Keep signalling until the listeners have subscribed and exited.
        let result = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                server.shutdown();
                if task.is_finished() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            task.await
        })
        .await
        .expect("server did not stop");

        assert!(result.unwrap().is_ok());
    }
}

//! Listener configuration.

use super::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// Network listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// UDP listeners.
    pub udp: Vec<UdpListener>,

    /// TCP listeners.
    pub tcp: Vec<TcpListener>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            udp: vec![UdpListener::default()],
            tcp: vec![TcpListener::default()],
        }
    }
}

impl ListenerConfig {
    /// Replaces every listener with one UDP and one TCP listener on `address`.
    pub fn listen_on(&mut self, address: SocketAddr) {
        self.udp = vec![UdpListener {
            address,
            ..UdpListener::default()
        }];
        self.tcp = vec![TcpListener {
            address,
            ..TcpListener::default()
        }];
    }

    pub fn validate(&self) -> Result<()> {
        if self.udp.is_empty() && self.tcp.is_empty() {
            return Err(ConfigError::Validation(
                "at least one UDP or TCP listener is required".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for listener in &self.udp {
            if !seen.insert(listener.address) {
                return Err(ConfigError::invalid(
                    "listeners.udp",
                    format!("duplicate address {}", listener.address),
                ));
            }
        }

        let mut seen = HashSet::new();
        for listener in &self.tcp {
            if !seen.insert(listener.address) {
                return Err(ConfigError::invalid(
                    "listeners.tcp",
                    format!("duplicate address {}", listener.address),
                ));
            }
            if listener.idle_timeout == 0 {
                return Err(ConfigError::invalid(
                    "listeners.tcp.idle_timeout",
                    "must be greater than 0",
                ));
            }
            if listener.write_timeout == 0 {
                return Err(ConfigError::invalid(
                    "listeners.tcp.write_timeout",
                    "must be greater than 0",
                ));
            }
        }

        Ok(())
    }
}

/// UDP listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UdpListener {
    /// Listen address.
    pub address: SocketAddr,

    /// Enable SO_REUSEPORT.
    pub reuseport: bool,

    /// Receive buffer size.
    pub recv_buffer: Option<usize>,

    /// Send buffer size.
    pub send_buffer: Option<usize>,
}

impl Default for UdpListener {
    fn default() -> Self {
        Self {
            address: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 53),
            reuseport: false,
            recv_buffer: Some(1024 * 1024),
            send_buffer: Some(1024 * 1024),
        }
    }
}

/// TCP listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpListener {
    /// Listen address.
    pub address: SocketAddr,

    /// Idle timeout (seconds).
    pub idle_timeout: u64,

    /// Response write timeout (seconds).
    pub write_timeout: u64,

    /// Maximum concurrent connections.
    pub max_connections: usize,
}

impl Default for TcpListener {
    fn default() -> Self {
        Self {
            address: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 53),
            idle_timeout: 10,
            write_timeout: 5,
            max_connections: 1024,
        }
    }
}

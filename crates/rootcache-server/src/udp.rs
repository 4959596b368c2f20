//! UDP server implementation.

use super::handler::{truncated, QueryContext, QueryHandler, MIN_UDP_PAYLOAD};
use super::{encode, Protocol, Result};
use bytes::Bytes;
use hickory_proto::op::{Message, MessageType};
use rootcache_metrics::metrics;
use socket2::{Domain, Socket, Type};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tracing::{debug, error, info, trace};

/// UDP listener settings.
#[derive(Debug, Clone)]
pub struct UdpConfig {
    /// Listen address.
    pub address: SocketAddr,

    /// Enable SO_REUSEPORT.
    pub reuseport: bool,

    /// Receive buffer size.
    pub recv_buffer: Option<usize>,

    /// Send buffer size.
    pub send_buffer: Option<usize>,
}

impl UdpConfig {
    /// Creates settings for `address` with default socket options.
    pub fn new(address: SocketAddr) -> Self {
        Self {
            address,
            reuseport: false,
            recv_buffer: None,
            send_buffer: None,
        }
    }
}

/// UDP DNS server.
pub struct UdpServer {
    socket: Arc<UdpSocket>,
    handler: Arc<dyn QueryHandler>,
    local_addr: SocketAddr,
}

impl UdpServer {
    /// Binds a new UDP server.
    pub async fn bind(config: &UdpConfig, handler: Arc<dyn QueryHandler>) -> Result<Self> {
        let addr = config.address;
        let domain = if addr.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };

        let socket = Socket::new(domain, Type::DGRAM, None)?;
        socket.set_reuse_address(true)?;

        #[cfg(unix)]
        if config.reuseport {
            socket.set_reuse_port(true)?;
        }

        if addr.is_ipv6() {
            socket.set_only_v6(true)?;
        }
        if let Some(size) = config.recv_buffer {
            socket.set_recv_buffer_size(size)?;
        }
        if let Some(size) = config.send_buffer {
            socket.set_send_buffer_size(size)?;
        }

        socket.set_nonblocking(true)?;
        socket.bind(&addr.into())?;

        let std_socket: std::net::UdpSocket = socket.into();
        let socket = UdpSocket::from_std(std_socket)?;
        let local_addr = socket.local_addr()?;

        info!(addr = %local_addr, "UDP server listening");

        Ok(Self {
            socket: Arc::new(socket),
            handler,
            local_addr,
        })
    }

    /// Returns the local address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Runs the UDP server.
    pub async fn run(&self) -> Result<()> {
        let mut buf = vec![0u8; 65535];

        loop {
            match self.socket.recv_from(&mut buf).await {
                Ok((len, src)) => {
                    let data = Bytes::copy_from_slice(&buf[..len]);
                    let socket = self.socket.clone();
                    let handler = self.handler.clone();

                    tokio::spawn(async move {
                        if let Err(e) = process_query(socket, handler, data, src).await {
                            debug!(error = %e, client = %src, "Error processing UDP query");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "Error receiving UDP packet");
                }
            }
        }
    }
}

async fn process_query(
    socket: Arc<UdpSocket>,
    handler: Arc<dyn QueryHandler>,
    data: Bytes,
    src: SocketAddr,
) -> Result<()> {
    let query = match Message::from_vec(&data) {
        Ok(msg) => msg,
        Err(e) => {
            trace!(error = %e, client = %src, "Failed to parse DNS query");
            metrics().record_error("malformed_query");
            return Ok(());
        }
    };
    if query.message_type() != MessageType::Query {
        trace!(client = %src, "Ignoring DNS response sent to server");
        return Ok(());
    }

    let udp_size = query
        .extensions()
        .as_ref()
        .map_or(MIN_UDP_PAYLOAD, |edns| edns.max_payload());
    let ctx = QueryContext::new(src, Protocol::Udp).with_udp_size(udp_size);
    let max_size = ctx.max_response_size();

    let response = handler.handle(query, ctx).await;

    let mut wire = encode(&response)?;
    if wire.len() > max_size {
        trace!(size = wire.len(), max_size, client = %src, "Truncating UDP response");
        wire = encode(&truncated(&response))?;
        metrics().record_truncated();
    }

    socket.send_to(&wire, src).await?;

    Ok(())
}

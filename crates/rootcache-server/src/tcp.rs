//! TCP server implementation.

use super::handler::{truncated, QueryContext, QueryHandler};
use super::{encode, Protocol, Result};
use bytes::{Bytes, BytesMut};
use hickory_proto::op::{Message, MessageType};
use rootcache_metrics::metrics;
use socket2::{Domain, Socket, Type};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{debug, error, info, trace};

/// Connection ID counter.
static CONNECTION_ID: AtomicU64 = AtomicU64::new(0);

/// TCP listener settings.
#[derive(Debug, Clone)]
pub struct TcpConfig {
    /// Listen address.
    pub address: SocketAddr,

    /// Connection backlog.
    pub backlog: i32,

    /// Idle connection timeout.
    pub idle_timeout: Duration,

    /// Deadline for writing one response to a client.
    pub write_timeout: Duration,

    /// Maximum concurrent connections.
    pub max_connections: usize,
}

impl TcpConfig {
    /// Creates settings for `address` with default limits.
    pub fn new(address: SocketAddr) -> Self {
        Self {
            address,
            backlog: 1024,
            idle_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(5),
            max_connections: 1024,
        }
    }
}

/// TCP DNS server.
pub struct TcpServer {
    listener: TcpListener,
    handler: Arc<dyn QueryHandler>,
    local_addr: SocketAddr,
    idle_timeout: Duration,
    write_timeout: Duration,
    connections: Arc<Semaphore>,
}

impl TcpServer {
    /// Binds a new TCP server.
    pub async fn bind(config: &TcpConfig, handler: Arc<dyn QueryHandler>) -> Result<Self> {
        let addr = config.address;
        let domain = if addr.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };

        let socket = Socket::new(domain, Type::STREAM, None)?;
        socket.set_reuse_address(true)?;
        if addr.is_ipv6() {
            socket.set_only_v6(true)?;
        }
        socket.set_nonblocking(true)?;

        socket.bind(&addr.into())?;
        socket.listen(config.backlog)?;

        let std_listener: std::net::TcpListener = socket.into();
        let listener = TcpListener::from_std(std_listener)?;
        let local_addr = listener.local_addr()?;

        info!(addr = %local_addr, "TCP server listening");

        Ok(Self {
            listener,
            handler,
            local_addr,
            idle_timeout: config.idle_timeout,
            write_timeout: config.write_timeout,
            connections: Arc::new(Semaphore::new(config.max_connections)),
        })
    }

    /// Returns the local address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Runs the TCP server.
    pub async fn run(&self) -> Result<()> {
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    let Ok(permit) = self.connections.clone().try_acquire_owned() else {
                        debug!(client = %peer, "TCP connection limit reached, rejecting");
                        metrics().record_error("tcp_connection_limit");
                        continue;
                    };

                    let handler = self.handler.clone();
                    let timeouts = (self.idle_timeout, self.write_timeout);
                    let conn_id = CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
                    metrics().record_connection(Protocol::Tcp.name());

                    tokio::spawn(async move {
                        if let Err(e) =
                            handle_connection(stream, peer, handler, timeouts, conn_id).await
                        {
                            debug!(error = %e, client = %peer, "TCP connection error");
                        }
                        drop(permit);
                    });
                }
                Err(e) => {
                    error!(error = %e, "Error accepting TCP connection");
                }
            }
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    handler: Arc<dyn QueryHandler>,
    (idle_timeout, write_timeout): (Duration, Duration),
    conn_id: u64,
) -> Result<()> {
    trace!(client = %peer, conn_id, "New TCP connection");

    let mut buf = BytesMut::with_capacity(4096);

    loop {
        match timeout(idle_timeout, read_message(&mut stream, &mut buf)).await {
            Ok(Ok(query_bytes)) => {
                let query = match Message::from_vec(&query_bytes) {
                    Ok(msg) if msg.message_type() == MessageType::Query => msg,
                    Ok(_) => {
                        trace!(client = %peer, "Ignoring DNS response sent to server");
                        continue;
                    }
                    Err(e) => {
                        debug!(error = %e, client = %peer, "Failed to parse TCP query");
                        metrics().record_error("malformed_query");
                        continue;
                    }
                };

                let ctx = QueryContext::new(peer, Protocol::Tcp).with_connection_id(conn_id);
                let max_size = ctx.max_response_size();
                let response = handler.handle(query, ctx).await;

                let mut wire = encode(&response)?;
                if wire.len() > max_size {
                    wire = encode(&truncated(&response))?;
                    metrics().record_truncated();
                }
                match timeout(write_timeout, write_message(&mut stream, &wire)).await {
                    Ok(written) => written?,
                    Err(_) => {
                        debug!(client = %peer, conn_id, "TCP write timeout, closing connection");
                        metrics().record_error("tcp_write_timeout");
                        break;
                    }
                }
            }
            Ok(Err(e)) => {
                if e.kind() == std::io::ErrorKind::UnexpectedEof {
                    trace!(client = %peer, conn_id, "TCP connection closed by client");
                } else {
                    debug!(error = %e, client = %peer, "TCP read error");
                }
                break;
            }
            Err(_) => {
                trace!(client = %peer, conn_id, "TCP connection idle timeout");
                break;
            }
        }
    }

    Ok(())
}

/// Reads a length-prefixed DNS message from a TCP stream.
async fn read_message(stream: &mut TcpStream, buf: &mut BytesMut) -> std::io::Result<Bytes> {
    let mut len_buf = [0u8; 2];
    stream.read_exact(&mut len_buf).await?;
    let len = usize::from(u16::from_be_bytes(len_buf));

    if len == 0 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "Invalid TCP message length",
        ));
    }

    buf.clear();
    buf.resize(len, 0);
    stream.read_exact(buf).await?;

    Ok(buf.split().freeze())
}

/// Writes a length-prefixed DNS message to a TCP stream.
async fn write_message(stream: &mut TcpStream, data: &[u8]) -> std::io::Result<()> {
    let len = u16::try_from(data.len()).map_err(|_| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "DNS message exceeds 65535 bytes")
    })?;

    let mut frame = Vec::with_capacity(data.len() + 2);
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(data);
    stream.write_all(&frame).await?;
    stream.flush().await
}

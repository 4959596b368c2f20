//! Zone acquisition by AXFR.

use std::net::{Ipv4Addr, Ipv6Addr};
use std::time::Duration;

use async_trait::async_trait;
use hickory_proto::op::{Message, MessageType, OpCode, Query, ResponseCode};
use hickory_proto::rr::{Name, Record, RecordType};
use rootcache_zone::ZoneStore;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, instrument};

use crate::{first_usable, Result, SyncError, SyncMethod, ZoneSynchronizer};

/// Servers that permit AXFR of the root zone, tried after any preferred endpoint.
pub const DEFAULT_TRANSFER_ENDPOINTS: &[&str] = &[
    "k.root-servers.net:53",
    "b.root-servers.net:53",
    "c.root-servers.net:53",
    "d.root-servers.net:53",
    "g.root-servers.net:53",
    "lax.xfr.dns.icann.org:53",
    "iad.xfr.dns.icann.org:53",
];

/// Zone transfer settings.
#[derive(Debug, Clone)]
pub struct TransferOptions {
    /// Endpoints tried after the preferred one, in order.
    pub fallback_endpoints: Vec<String>,
    /// Timeout for establishing the TCP connection.
    pub connect_timeout: Duration,
    /// Timeout for each message read or write.
    pub io_timeout: Duration,
    /// Deadline for a whole transfer from one endpoint.
    pub transfer_timeout: Duration,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            fallback_endpoints: DEFAULT_TRANSFER_ENDPOINTS
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            connect_timeout: Duration::from_secs(5),
            io_timeout: Duration::from_secs(15),
            transfer_timeout: Duration::from_secs(300),
        }
    }
}

/// Fetches the root zone by AXFR from an ordered endpoint list.
#[derive(Debug, Clone)]
pub struct TransferSynchronizer {
    endpoints: Vec<String>,
    options: TransferOptions,
}

impl TransferSynchronizer {
    /// Creates a synchronizer that tries `preferred` first, then the fallbacks.
    ///
    /// Every endpoint must be `host:port`, with IPv6 literals in brackets.
    pub fn new(preferred: Option<&str>, options: TransferOptions) -> Result<Self> {
        let endpoints: Vec<String> = preferred
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .into_iter()
            .chain(options.fallback_endpoints.iter().cloned())
            .collect();

        if endpoints.is_empty() {
            return Err(SyncError::config("no zone transfer endpoints configured"));
        }
        for endpoint in &endpoints {
            validate_endpoint(endpoint)?;
        }

        Ok(Self { endpoints, options })
    }

    /// Returns the endpoints in the order they are tried.
    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    #[instrument(skip(self))]
    async fn transfer(&self, endpoint: &str) -> Result<Vec<Record>> {
        let deadline = self.options.transfer_timeout;
        timeout(deadline, self.transfer_records(endpoint))
            .await
            .map_err(|_| {
                SyncError::Timeout(format!(
                    "transfer from {endpoint} exceeded {}s",
                    deadline.as_secs()
                ))
            })?
    }

    async fn transfer_records(&self, endpoint: &str) -> Result<Vec<Record>> {
        debug!("starting inbound AXFR");

        let mut stream = timeout(self.options.connect_timeout, TcpStream::connect(endpoint))
            .await
            .map_err(|_| SyncError::Timeout(format!("connecting to {endpoint}")))??;

        let query = axfr_query();
        self.send_message(&mut stream, endpoint, &query).await?;

        let mut records = Vec::new();
        let mut soa_seen = 0usize;
        let mut messages = 0usize;

        loop {
            let response = self.receive_message(&mut stream, endpoint).await?;
            messages += 1;

            if response.id() != query.id() {
                return Err(SyncError::transfer(endpoint, "response id does not match query"));
            }
            if response.response_code() != ResponseCode::NoError {
                return Err(SyncError::transfer(
                    endpoint,
                    format!("server answered {}", response.response_code()),
                ));
            }
            if response.answers().is_empty() {
                return Err(SyncError::transfer(endpoint, "empty transfer message"));
            }

            for record in response.answers() {
                if record.record_type() == RecordType::SOA {
                    soa_seen += 1;
                    if soa_seen == 2 {
                        info!(records = records.len(), messages, "completed inbound AXFR");
                        return Ok(records);
                    }
                } else if soa_seen == 0 {
                    return Err(SyncError::transfer(endpoint, "transfer did not start with SOA"));
                }
                records.push(record.clone());
            }
        }
    }

    async fn send_message(
        &self,
        stream: &mut TcpStream,
        endpoint: &str,
        message: &Message,
    ) -> Result<()> {
        let wire = message
            .to_vec()
            .map_err(|e| SyncError::transfer(endpoint, format!("encoding query: {e}")))?;
        let len = u16::try_from(wire.len())
            .map_err(|_| SyncError::transfer(endpoint, "query exceeds 65535 bytes"))?;

        let mut frame = Vec::with_capacity(wire.len() + 2);
        frame.extend_from_slice(&len.to_be_bytes());
        frame.extend_from_slice(&wire);

        timeout(self.options.io_timeout, async {
            stream.write_all(&frame).await?;
            stream.flush().await
        })
        .await
        .map_err(|_| SyncError::Timeout(format!("sending AXFR query to {endpoint}")))??;

        Ok(())
    }

    async fn receive_message(&self, stream: &mut TcpStream, endpoint: &str) -> Result<Message> {
        let mut len_buf = [0u8; 2];
        timeout(self.options.io_timeout, stream.read_exact(&mut len_buf))
            .await
            .map_err(|_| SyncError::Timeout(format!("reading from {endpoint}")))??;

        let len = usize::from(u16::from_be_bytes(len_buf));
        let mut buf = vec![0u8; len];
        timeout(self.options.io_timeout, stream.read_exact(&mut buf))
            .await
            .map_err(|_| SyncError::Timeout(format!("reading from {endpoint}")))??;

        let message = Message::from_vec(&buf)
            .map_err(|e| SyncError::transfer(endpoint, format!("malformed message: {e}")))?;
        if message.message_type() != MessageType::Response {
            return Err(SyncError::transfer(endpoint, "received a query instead of a response"));
        }
        Ok(message)
    }
}

#[async_trait]
impl ZoneSynchronizer for TransferSynchronizer {
    fn method(&self) -> SyncMethod {
        SyncMethod::Transfer
    }

    async fn download(&self) -> Result<ZoneStore> {
        first_usable(SyncMethod::Transfer, &self.endpoints, |endpoint| {
            self.transfer(endpoint)
        })
        .await
    }
}

fn axfr_query() -> Message {
    let mut message = Message::new();
    message
        .set_id(rand::random())
        .set_message_type(MessageType::Query)
        .set_op_code(OpCode::Query)
        .set_recursion_desired(false);
    message.add_query(Query::query(Name::root(), RecordType::AXFR));
    message
}

/// Checks that `endpoint` is `host:port`.
///
/// The host is an IPv4 literal, a bracketed IPv6 literal, or a hostname.
pub fn validate_endpoint(endpoint: &str) -> Result<()> {
    let invalid = |reason: &str| SyncError::config(format!("invalid endpoint {endpoint:?}: {reason}"));

    let (host, port) = if let Some(rest) = endpoint.strip_prefix('[') {
        let (host, port) = rest
            .split_once("]:")
            .ok_or_else(|| invalid("expected [address]:port"))?;
        host.parse::<Ipv6Addr>()
            .map_err(|_| invalid("invalid IPv6 address"))?;
        (host, port)
    } else {
        let (host, port) = endpoint
            .rsplit_once(':')
            .ok_or_else(|| invalid("missing port"))?;
        if host.contains(':') {
            return Err(invalid("IPv6 addresses must be bracketed"));
        }
        if host.parse::<Ipv4Addr>().is_err() && !is_hostname(host) {
            return Err(invalid("invalid hostname"));
        }
        (host, port)
    };

    if host.is_empty() {
        return Err(invalid("empty host"));
    }
    port.parse::<u16>().map_err(|_| invalid("invalid port"))?;
    Ok(())
}

fn is_hostname(host: &str) -> bool {
    let host = host.strip_suffix('.').unwrap_or(host);
    if host.is_empty() || host.len() > 253 {
        return false;
    }
    host.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    })
}

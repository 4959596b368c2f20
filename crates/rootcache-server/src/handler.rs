//! Query handler interface.

use async_trait::async_trait;
use hickory_proto::op::{Message, MessageType, ResponseCode};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use super::Protocol;

/// Largest response a client without EDNS can receive over UDP.
pub const MIN_UDP_PAYLOAD: u16 = 512;

/// Context for a DNS query.
#[derive(Debug, Clone)]
pub struct QueryContext {
    /// Client address.
    pub client: SocketAddr,

    /// Protocol used.
    pub protocol: Protocol,

    /// When the query was received.
    pub received_at: Instant,

    /// EDNS UDP payload size (if applicable).
    pub udp_size: Option<u16>,

    /// Connection ID (for TCP).
    pub connection_id: Option<u64>,
}

impl QueryContext {
    /// Creates a new query context.
    pub fn new(client: SocketAddr, protocol: Protocol) -> Self {
        Self {
            client,
            protocol,
            received_at: Instant::now(),
            udp_size: None,
            connection_id: None,
        }
    }

    /// Sets the EDNS UDP size.
    #[must_use]
    pub fn with_udp_size(mut self, size: u16) -> Self {
        self.udp_size = Some(size);
        self
    }

    /// Sets the connection ID.
    #[must_use]
    pub fn with_connection_id(mut self, id: u64) -> Self {
        self.connection_id = Some(id);
        self
    }

    /// Returns the maximum response size.
    pub fn max_response_size(&self) -> usize {
        match self.protocol {
            Protocol::Udp => usize::from(self.udp_size.unwrap_or(MIN_UDP_PAYLOAD).max(MIN_UDP_PAYLOAD)),
            Protocol::Tcp => usize::from(u16::MAX),
        }
    }

    /// Returns the elapsed time since the query was received.
    pub fn elapsed(&self) -> Duration {
        self.received_at.elapsed()
    }
}

/// Query handler trait.
///
/// Implement this trait to answer DNS queries. Listeners own framing,
/// truncation and delivery; the handler only maps a query to a response.
#[async_trait]
pub trait QueryHandler: Send + Sync {
    /// Handles a DNS query.
    ///
    /// # Arguments
    ///
    /// * `query` - The parsed DNS query message
    /// * `context` - Query context with client info and protocol
    ///
    /// # Returns
    ///
    /// The response message to send back.
    async fn handle(&self, query: Message, context: QueryContext) -> Message;
}

/// Starts a response to `query`: same id, opcode, RD bit and questions.
pub fn response_to(query: &Message) -> Message {
    let mut response = Message::new();
    response
        .set_id(query.id())
        .set_message_type(MessageType::Response)
        .set_op_code(query.op_code())
        .set_recursion_desired(query.recursion_desired())
        .set_recursion_available(false);
    response.add_queries(query.queries().iter().cloned());
    response
}

/// Builds the truncated form of `response`: header and question only, TC set.
pub fn truncated(response: &Message) -> Message {
    let mut message = Message::new();
    message
        .set_id(response.id())
        .set_message_type(MessageType::Response)
        .set_op_code(response.op_code())
        .set_authoritative(response.authoritative())
        .set_recursion_desired(response.recursion_desired())
        .set_response_code(response.response_code())
        .set_truncated(true);
    message.add_queries(response.queries().iter().cloned());
    if let Some(edns) = response.extensions().as_ref() {
        message.set_edns(edns.clone());
    }
    message
}

/// A query handler that returns REFUSED for all queries.
pub struct RefusedHandler;

#[async_trait]
impl QueryHandler for RefusedHandler {
    async fn handle(&self, query: Message, _context: QueryContext) -> Message {
        let mut response = response_to(&query);
        response.set_response_code(ResponseCode::Refused);
        response
    }
}

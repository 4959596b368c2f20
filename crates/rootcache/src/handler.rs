//! Maps DNS messages onto zone manager queries.

use async_trait::async_trait;
use hickory_proto::op::{Edns, Message, OpCode, ResponseCode};
use rootcache_metrics::metrics;
use rootcache_server::{response_to, QueryContext, QueryHandler};
use rootcache_sync::Manager;
use std::sync::Arc;
use tracing::trace;

/// Answers queries from the manager's active snapshot.
pub struct RootHandler {
    manager: Arc<Manager>,
}

impl RootHandler {
    /// Creates a handler backed by `manager`.
    pub fn new(manager: Arc<Manager>) -> Self {
        Self { manager }
    }

    fn reject(query: &Message, rcode: ResponseCode, context: &QueryContext) -> Message {
        let mut response = response_to(query);
        response.set_response_code(rcode);
        metrics().record_response(context.protocol.name(), &rcode.to_string());
        response
    }
}

#[async_trait]
impl QueryHandler for RootHandler {
    async fn handle(&self, query: Message, context: QueryContext) -> Message {
        let protocol = context.protocol.name();

        if query.op_code() != OpCode::Query {
            metrics().record_error("unsupported_opcode");
            return Self::reject(&query, ResponseCode::NotImp, &context);
        }

        // Only the first question is answered.
        let Some(question) = query.queries().first() else {
            metrics().record_error("empty_question");
            return Self::reject(&query, ResponseCode::FormErr, &context);
        };

        let qtype = question.query_type();
        metrics().record_query(protocol, &qtype.to_string());

        let dnssec_ok = query
            .extensions()
            .as_ref()
            .is_some_and(|edns| edns.flags().dnssec_ok);

        let reply = self.manager.handle_query(question.name(), qtype, dnssec_ok);
        trace!(
            name = %question.name(),
            qtype = %qtype,
            rcode = %reply.rcode,
            answers = reply.response.answer.len(),
            client = %context.client,
            "answered query"
        );

        let mut response = response_to(&query);
        response
            .set_response_code(reply.rcode)
            .set_authoritative(reply.response.authoritative);
        response.add_answers(reply.response.answer);
        response.add_name_servers(reply.response.authority);
        response.add_additionals(reply.response.additional);

        let mut edns = Edns::new();
        edns.set_max_payload(reply.max_payload);
        response.set_edns(edns);

        metrics().record_response(protocol, &reply.rcode.to_string());
        metrics().record_latency(protocol, context.elapsed());

        response
    }
}

//! # Sessions
//!
//! A [`Session`] carries one request through read, route, handle and write.
//! It is created by a protocol's [`SessionBuilder`] once a message is decoded
//! and consumed when its reply is encoded; sessions are never reused.
//!
//! After handling exactly one of {response, error} is set. Recording an error
//! replaces any response, so the writer only ever sees one authoritative outcome.
//!
//! Handlers never see the session itself. They receive a [`RequestContext`]
//! snapshot (rpc name, body, trace context, peer, shutdown signal) and return
//! the response body, which keeps protocol heads private to their codec.

use bytes::Bytes;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::core::codec::Message;
use crate::error::{constants, RpcError, Result};

/// Transport a request arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    Tcp,
    Udp,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Tcp => f.write_str("tcp"),
            TransportKind::Udp => f.write_str("udp"),
        }
    }
}

/// Originating peer of a request; replies are addressed to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Peer {
    pub addr: SocketAddr,
    pub transport: TransportKind,
}

impl Peer {
    pub fn tcp(addr: SocketAddr) -> Self {
        Self {
            addr,
            transport: TransportKind::Tcp,
        }
    }

    pub fn udp(addr: SocketAddr) -> Self {
        Self {
            addr,
            transport: TransportKind::Udp,
        }
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.transport, self.addr)
    }
}

/// Opaque tracing context propagated from the request head.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TraceContext {
    trace_id: Option<Arc<str>>,
}

impl TraceContext {
    pub fn new<S: AsRef<str>>(trace_id: S) -> Self {
        Self {
            trace_id: Some(Arc::from(trace_id.as_ref())),
        }
    }

    pub fn trace_id(&self) -> Option<&str> {
        self.trace_id.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.trace_id.is_none()
    }
}

impl From<Option<String>> for TraceContext {
    fn from(trace_id: Option<String>) -> Self {
        Self {
            trace_id: trace_id.filter(|t| !t.is_empty()).map(Arc::from),
        }
    }
}

/// Lifecycle state of one in-flight request.
pub struct Session<M> {
    rpc_name: String,
    request: M,
    response: Option<M>,
    error: Option<RpcError>,
    trace: TraceContext,
    peer: Peer,
    received_at: Instant,
}

impl<M: Message> Session<M> {
    pub fn new<S: Into<String>>(rpc_name: S, request: M, peer: Peer) -> Self {
        Self {
            rpc_name: rpc_name.into(),
            request,
            response: None,
            error: None,
            trace: TraceContext::default(),
            peer,
            received_at: Instant::now(),
        }
    }

    /// Session for a request that could not be mapped to an rpc name.
    ///
    /// It is born finalized with `err`, so it is answered without routing.
    pub fn rejected(request: M, peer: Peer, err: RpcError) -> Self {
        let mut session = Self::new(String::new(), request, peer);
        session.error = Some(err);
        session
    }

    pub fn with_trace_context(mut self, trace: TraceContext) -> Self {
        self.trace = trace;
        self
    }

    pub fn rpc_name(&self) -> &str {
        &self.rpc_name
    }

    /// Decoded request head.
    pub fn request(&self) -> &M {
        &self.request
    }

    /// Response head; `None` while pending or once an error was recorded.
    pub fn response(&self) -> Option<&M> {
        if self.error.is_some() {
            return None;
        }
        self.response.as_ref()
    }

    /// Record the response head. Fails if an outcome is already recorded.
    pub fn set_response(&mut self, rsp: M) -> Result<()> {
        if self.is_finalized() {
            return Err(RpcError::SessionFinalized);
        }
        self.response = Some(rsp);
        Ok(())
    }

    /// Record a success reply carrying `body`.
    pub fn respond(&mut self, body: Bytes) -> Result<()> {
        if self.is_finalized() {
            return Err(RpcError::SessionFinalized);
        }
        let rsp = self.request.reply(body)?;
        self.set_response(rsp)
    }

    /// Record a failure. The first error wins and any response is discarded.
    pub fn set_error_response(&mut self, err: RpcError) {
        self.response = None;
        if self.error.is_none() {
            self.error = Some(err);
        }
    }

    pub fn error(&self) -> Option<&RpcError> {
        self.error.as_ref()
    }

    /// True once a response or an error has been recorded.
    pub fn is_finalized(&self) -> bool {
        self.error.is_some() || self.response.is_some()
    }

    pub fn trace_context(&self) -> &TraceContext {
        &self.trace
    }

    pub fn peer(&self) -> Peer {
        self.peer
    }

    /// Time since the request was built.
    pub fn elapsed(&self) -> Duration {
        self.received_at.elapsed()
    }

    /// Per-request context handed to handlers.
    pub fn context(&self, shutdown: CancellationToken) -> RequestContext {
        RequestContext {
            rpc_name: Arc::from(self.rpc_name.as_str()),
            body: self.request.body(),
            trace: self.trace.clone(),
            peer: self.peer,
            shutdown,
        }
    }

    /// Consume the session into the reply head the writer encodes.
    pub fn into_reply(self) -> M {
        self.into_parts().1
    }

    /// Consume the session into its request and reply heads.
    ///
    /// The writer keeps the request so it can still answer with an error
    /// when the reply itself cannot be encoded.
    pub fn into_parts(self) -> (M, M) {
        let reply = match (self.error, self.response) {
            (Some(err), _) => self.request.error_reply(&err),
            (None, Some(rsp)) => rsp,
            (None, None) => self
                .request
                .error_reply(&RpcError::Handler(constants::ERR_NO_RESPONSE.to_string())),
        };
        (self.request, reply)
    }
}

impl<M> fmt::Debug for Session<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("rpc_name", &self.rpc_name)
            .field("peer", &self.peer)
            .field("has_response", &self.response.is_some())
            .field("error", &self.error)
            .field("trace", &self.trace)
            .finish()
    }
}

/// Turns a decoded request into a [`Session`].
///
/// Implementations extract the rpc name deterministically from the request,
/// e.g. a header field or a table lookup for integer command ids.
pub trait SessionBuilder<M: Message>: Send + Sync + 'static {
    /// Rpc name the request targets. An error makes the request unroutable.
    fn rpc_name(&self, request: &M) -> Result<String>;

    /// Tracing context carried by the request, if any.
    fn trace_context(&self, _request: &M) -> TraceContext {
        TraceContext::default()
    }

    /// Build a session, failing if the request maps to no rpc name.
    fn build(&self, request: M, peer: Peer) -> Result<Session<M>> {
        let name = self.rpc_name(&request)?;
        let trace = self.trace_context(&request);
        Ok(Session::new(name, request, peer).with_trace_context(trace))
    }

    /// Build a session, or a pre-failed one that still answers the peer.
    fn build_or_reject(&self, request: M, peer: Peer) -> Session<M> {
        let trace = self.trace_context(&request);
        match self.rpc_name(&request) {
            Ok(name) => Session::new(name, request, peer).with_trace_context(trace),
            Err(e) => Session::rejected(request, peer, e).with_trace_context(trace),
        }
    }
}

/// Session builder shared across tasks.
pub type SharedSessionBuilder<M> = Arc<dyn SessionBuilder<M>>;

/// Everything a handler may know about the request it serves.
#[derive(Debug, Clone)]
pub struct RequestContext {
    rpc_name: Arc<str>,
    body: Bytes,
    trace: TraceContext,
    peer: Peer,
    shutdown: CancellationToken,
}

impl RequestContext {
    pub fn rpc_name(&self) -> &str {
        &self.rpc_name
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn trace_context(&self) -> &TraceContext {
        &self.trace
    }

    pub fn peer(&self) -> Peer {
        self.peer
    }

    /// Shared shutdown signal; long-running handlers should watch it.
    pub fn shutdown(&self) -> &CancellationToken {
        &self.shutdown
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::json::{JsonFrame, JsonSessionBuilder};

    fn peer() -> Peer {
        Peer::tcp("127.0.0.1:4000".parse().unwrap())
    }

    fn session() -> Session<JsonFrame> {
        JsonSessionBuilder
            .build(JsonFrame::request(3, "Echo", "ping"), peer())
            .unwrap()
    }

    #[test]
    fn test_response_then_error_leaves_only_error() {
        let mut s = session();
        s.respond(Bytes::from_static(b"pong")).unwrap();
        s.set_error_response(RpcError::handler("late failure"));

        assert!(s.response().is_none());
        assert!(s.error().is_some());
        let reply = s.into_reply();
        assert_ne!(reply.code, 0);
    }

    #[test]
    fn test_response_set_at_most_once() {
        let mut s = session();
        s.respond(Bytes::from_static(b"one")).unwrap();
        assert!(matches!(
            s.respond(Bytes::from_static(b"two")),
            Err(RpcError::SessionFinalized)
        ));
        assert_eq!(s.into_reply().body, "one");
    }

    #[test]
    fn test_first_error_wins() {
        let mut s = session();
        s.set_error_response(RpcError::MethodNotFound("Echo".into()));
        s.set_error_response(RpcError::Overloaded);
        assert!(matches!(s.error(), Some(RpcError::MethodNotFound(_))));
    }

    #[test]
    fn test_pending_session_replies_with_error() {
        let s = session();
        assert!(!s.is_finalized());
        let reply = s.into_reply();
        assert_eq!(reply.code, RpcError::Handler(String::new()).code());
        assert_eq!(reply.seq, 3);
    }

    #[test]
    fn test_into_parts_keeps_request() {
        let mut s = session();
        s.respond(Bytes::from_static(b"pong")).unwrap();
        let (request, reply) = s.into_parts();
        assert_eq!(request.body, "ping");
        assert_eq!(reply.body, "pong");
    }

    #[test]
    fn test_body_the_protocol_cannot_carry_is_refused() {
        let mut s = session();
        assert!(matches!(
            s.respond(Bytes::from_static(&[0xff, 0xfe, 0x00, 0x80])),
            Err(RpcError::Handler(_))
        ));
        assert!(!s.is_finalized());
    }

    #[test]
    fn test_rejected_session_is_finalized() {
        let s = JsonSessionBuilder.build_or_reject(JsonFrame::request(9, "", "x"), peer());
        assert!(s.is_finalized());
        assert!(matches!(s.error(), Some(RpcError::Unroutable(_))));
        assert_eq!(s.rpc_name(), "");
    }

    #[test]
    fn test_context_snapshot() {
        let s = session().with_trace_context(TraceContext::new("abc"));
        let token = CancellationToken::new();
        let ctx = s.context(token.clone());
        assert_eq!(ctx.rpc_name(), "Echo");
        assert_eq!(&ctx.body()[..], b"ping");
        assert_eq!(ctx.trace_context().trace_id(), Some("abc"));
        assert!(!ctx.is_shutting_down());
        token.cancel();
        assert!(ctx.is_shutting_down());
    }
}

//! # Error Types
//!
//! Error handling for the RPC engine.
//!
//! Every failure the engine can observe is a variant of [`RpcError`], from low-level
//! socket failures to routing misses and handler errors.
//!
//! ## Error Categories
//! - **Configuration**: unknown codec, session builder or protocol name; invalid config.
//!   Fatal at startup, never retried.
//! - **Framing / decode**: malformed bytes. Closes a stream connection, drops a datagram.
//! - **Routing**: unresolvable rpc name. Recorded into the session and answered.
//! - **Handler**: surfaced by a handler. Recorded the same way as routing errors.
//! - **Transport**: accept/read/write failures. Terminal for the affected connection.
//! - **Startup**: bind failures. Abort server startup entirely.
//!
//! ## Example Usage
//! ```rust
//! use polyrpc::error::{RpcError, Result};
//! use tracing::error;
//!
//! fn lookup(name: &str) -> Result<()> {
//!     Err(RpcError::CodecNotFound(name.to_string()))
//! }
//!
//! if let Err(e) = lookup("thrift") {
//!     assert!(e.is_fatal());
//!     error!(error = %e, "Startup aborted");
//! }
//! ```

use std::io;
use thiserror::Error;

/// Error message constants to keep error paths allocation-free.
pub mod constants {
    pub const ERR_ROUTER_POISONED: &str = "Router lock poisoned";

    pub const ERR_EMPTY_RPC_NAME: &str = "Request carries no rpc name";
    pub const ERR_UNKNOWN_COMMAND: &str = "Unknown command id";
    pub const ERR_NO_RESPONSE: &str = "Handler finished without a response";
    pub const ERR_BODY_NOT_UTF8: &str = "Response body is not valid UTF-8";

    pub const ERR_SERVER_NOT_INIT: &str = "No server registered with the service";

    pub const ERR_DATAGRAM_TRUNCATED: &str = "Datagram does not contain exactly one frame";
}

/// Primary error type for all engine operations.
#[derive(Error, Debug)]
pub enum RpcError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Frame too large: {0} bytes")]
    OversizedFrame(usize),

    #[error("Unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    #[error("No codec registered for protocol '{0}'")]
    CodecNotFound(String),

    #[error("No session builder registered for protocol '{0}'")]
    SessionBuilderNotFound(String),

    #[error("Protocol '{0}' is registered with a different message type")]
    ProtocolMismatch(String),

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Request cannot be routed: {0}")]
    Unroutable(String),

    #[error("Handler error: {0}")]
    Handler(String),

    #[error("Server overloaded, request rejected")]
    Overloaded,

    #[error("Session already finalized")]
    SessionFinalized,

    #[error("Timeout occurred")]
    Timeout,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Server module already started")]
    AlreadyStarted,

    #[error("Not supported: {0}")]
    NotSupported(&'static str),

    /// Raised by [`Naming`](crate::service::naming::Naming) backends.
    #[error("Naming error: {0}")]
    Naming(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

impl RpcError {
    /// Stable numeric status carried by error replies on the wire.
    ///
    /// `0` is reserved for success and never returned here.
    pub fn code(&self) -> u16 {
        match self {
            RpcError::InvalidFrame(_)
            | RpcError::OversizedFrame(_)
            | RpcError::UnsupportedVersion(_)
            | RpcError::Serialization(_)
            | RpcError::Json(_) => 1,
            RpcError::MethodNotFound(_) => 2,
            RpcError::Unroutable(_) => 3,
            RpcError::Handler(_) => 4,
            RpcError::Overloaded => 5,
            RpcError::Timeout => 6,
            RpcError::NotSupported(_) => 7,
            _ => 99,
        }
    }

    /// Configuration and startup errors abort the server and must not be retried.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RpcError::CodecNotFound(_)
                | RpcError::SessionBuilderNotFound(_)
                | RpcError::ProtocolMismatch(_)
                | RpcError::ConfigError(_)
                | RpcError::AlreadyStarted
        )
    }

    /// Shorthand used by handlers to surface a failure.
    pub fn handler<S: Into<String>>(msg: S) -> Self {
        RpcError::Handler(msg.into())
    }
}

/// Type alias for Results using RpcError
pub type Result<T> = std::result::Result<T, RpcError>;

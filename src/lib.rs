//! # polyrpc
//!
//! Transport-agnostic RPC server engine.
//!
//! A server hosts any number of modules, each owning one TCP listener or UDP
//! socket bound to a protocol. Every protocol contributes a codec (wire format)
//! and a session builder (request to rpc name); a shared router maps rpc names to
//! service handlers. The engine frames, decodes, routes, handles and replies,
//! with bounded concurrency and a single cooperative shutdown signal.
//!
//! ## Architecture
//! ```text
//! socket -> MessageReader -> Codec::decode -> SessionBuilder -> Session
//!        -> Dispatcher (permit) -> Router -> handler -> response queue
//!        -> Codec::encode -> socket
//! ```
//!
//! ## Modules
//! - [`core`]: codec contract, framing, sessions, protocol registry
//! - [`protocol`]: router and the built-in `json` / `bin` protocols
//! - [`transport`]: TCP and UDP server modules
//! - [`service`]: server lifecycle, naming, `service.ini` bootstrap
//! - [`config`], [`error`], [`utils`]: configuration, errors, logging and metrics
//!
//! ## Quick Start
//! ```rust,no_run
//! use std::sync::Arc;
//! use polyrpc::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> polyrpc::error::Result<()> {
//!     let registry = Registry::with_builtin();
//!     let router = Arc::new(Router::new());
//!     router.register_fn("Echo", |ctx| async move { Ok(ctx.body().clone()) })?;
//!
//!     let mut server = Server::new(router);
//!     TcpServer::<JsonFrame>::new(Network::Tcp4, ":9000", "json", &registry, ModuleOptions::default())?
//!         .register(&mut server);
//!     server.start().await
//! }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod service;
pub mod transport;
pub mod utils;

pub use config::{Backpressure, EngineConfig, ServerConfig};
pub use error::{Result, RpcError};

/// Common imports for building a server.
pub mod prelude {
    pub use crate::config::{Backpressure, EngineConfig, ServerConfig};
    pub use crate::core::codec::{Codec, Message};
    pub use crate::core::registry::Registry;
    pub use crate::core::session::{Peer, RequestContext, Session, SessionBuilder, TraceContext};
    pub use crate::error::{Result, RpcError};
    pub use crate::protocol::binary::{BinaryCodec, BinaryFrame, BinarySessionBuilder};
    pub use crate::protocol::json::{JsonCodec, JsonFrame, JsonSessionBuilder};
    pub use crate::protocol::router::{Router, Service as RpcService};
    pub use crate::service::server::{Server, ShutdownHandle};
    pub use crate::service::Service;
    pub use crate::transport::{ModuleOptions, Network, ServerModule, TcpServer, UdpServer};
}

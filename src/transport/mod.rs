//! # Transport Layer
//!
//! Server modules: one listening transport each, driving sessions from socket
//! to router and back.
//!
//! ## Components
//! - **TCP**: accept loop plus one read loop and one write loop per connection
//! - **UDP**: one read loop and one write loop per socket, replies addressed per peer
//! - **Dispatch**: bounded admission gate between read loops and handlers
//!
//! ## Lifecycle
//! ```text
//! Created -> Started -> Running -> Stopping -> Stopped
//! ```
//! `start` binds and spawns the module's loops, then returns. Cancelling the
//! server's shutdown token (or calling `stop`) moves the module to `Stopping`;
//! it reaches `Stopped` once every loop and dispatch task it spawned has exited.
//!
//! ## Security
//! - Concurrent handling is capped per module (`max_in_flight`)
//! - Response queues are bounded (`queue_capacity`)
//! - Stream frames are size-checked from their header before buffering

pub(crate) mod dispatch;
pub mod tcp;
pub mod udp;

use std::fmt;
use std::marker::PhantomData;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs};
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::{Backpressure, ServerConfig, MAX_DATAGRAM_SIZE};
use crate::core::codec::Message;
use crate::core::registry::Registry;
use crate::core::session::TransportKind;
use crate::error::{RpcError, Result};
use crate::protocol::router::Router;
use crate::service::server::Server;
use crate::utils::metrics::Metrics;

pub use tcp::TcpServer;
pub use udp::UdpServer;

/// Network family a module binds, as named in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Network {
    Tcp,
    Tcp4,
    Tcp6,
    Udp,
    Udp4,
    Udp6,
}

impl Network {
    pub fn transport(&self) -> TransportKind {
        match self {
            Network::Tcp | Network::Tcp4 | Network::Tcp6 => TransportKind::Tcp,
            Network::Udp | Network::Udp4 | Network::Udp6 => TransportKind::Udp,
        }
    }

    fn accepts(&self, addr: &SocketAddr) -> bool {
        match self {
            Network::Tcp4 | Network::Udp4 => addr.is_ipv4(),
            Network::Tcp6 | Network::Udp6 => addr.is_ipv6(),
            Network::Tcp | Network::Udp => true,
        }
    }

    /// Resolve a listen address for this network.
    ///
    /// `":port"` binds every interface of the network's family.
    pub fn resolve(&self, address: &str) -> Result<SocketAddr> {
        if let Some(port) = address.strip_prefix(':') {
            let port: u16 = port.parse().map_err(|_| {
                RpcError::ConfigError(format!("Invalid port in address '{address}'"))
            })?;
            let ip = match self {
                Network::Tcp6 | Network::Udp6 => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
                _ => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            };
            return Ok(SocketAddr::new(ip, port));
        }

        let mut candidates = address
            .to_socket_addrs()
            .map_err(|e| RpcError::ConfigError(format!("Cannot resolve '{address}': {e}")))?;
        candidates
            .find(|a| self.accepts(a))
            .ok_or_else(|| RpcError::ConfigError(format!("No {self} address for '{address}'")))
    }
}

impl FromStr for Network {
    type Err = RpcError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "tcp" => Ok(Network::Tcp),
            "tcp4" => Ok(Network::Tcp4),
            "tcp6" => Ok(Network::Tcp6),
            "udp" => Ok(Network::Udp),
            "udp4" => Ok(Network::Udp4),
            "udp6" => Ok(Network::Udp6),
            other => Err(RpcError::ConfigError(format!("Unknown network '{other}'"))),
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Network::Tcp => "tcp",
            Network::Tcp4 => "tcp4",
            Network::Tcp6 => "tcp6",
            Network::Udp => "udp",
            Network::Udp4 => "udp4",
            Network::Udp6 => "udp6",
        };
        f.write_str(name)
    }
}

/// Per-module settings. Every option is named and independently settable.
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleOptions {
    /// TCP accept backlog
    pub listen_backlog: u32,
    /// Idle read timeout per TCP connection
    pub read_timeout: Option<Duration>,
    /// Deadline for a single reply write
    pub write_timeout: Option<Duration>,
    /// SO_RCVBUF override
    pub recv_buffer_size: Option<usize>,
    /// SO_SNDBUF override
    pub send_buffer_size: Option<usize>,
    /// Requests handled concurrently by this module
    pub max_in_flight: usize,
    /// Policy when `max_in_flight` is reached
    pub backpressure: Backpressure,
    /// Response queue length per connection or socket
    pub queue_capacity: usize,
    /// Stream frame limit; the codec's own limit applies when lower
    pub max_frame_size: Option<usize>,
    /// Receive buffer size for datagrams
    pub max_datagram_size: usize,
    /// How long writers keep draining after shutdown
    pub shutdown_timeout: Duration,
    /// Handle requests of one connection sequentially so replies keep arrival order
    pub ordered_responses: bool,
}

impl Default for ModuleOptions {
    fn default() -> Self {
        Self::from(&ServerConfig::default())
    }
}

impl From<&ServerConfig> for ModuleOptions {
    fn from(cfg: &ServerConfig) -> Self {
        let non_zero = |d: Duration| if d.is_zero() { None } else { Some(d) };
        let non_zero_size = |s: usize| if s == 0 { None } else { Some(s) };
        Self {
            listen_backlog: cfg.listen_backlog,
            read_timeout: non_zero(cfg.read_timeout),
            write_timeout: non_zero(cfg.write_timeout),
            recv_buffer_size: non_zero_size(cfg.recv_buffer_size),
            send_buffer_size: non_zero_size(cfg.send_buffer_size),
            max_in_flight: cfg.max_in_flight,
            backpressure: cfg.backpressure,
            queue_capacity: cfg.queue_capacity,
            max_frame_size: Some(cfg.max_frame_size),
            max_datagram_size: MAX_DATAGRAM_SIZE,
            shutdown_timeout: cfg.shutdown_timeout,
            ordered_responses: false,
        }
    }
}

impl ModuleOptions {
    pub fn with_listen_backlog(mut self, backlog: u32) -> Self {
        self.listen_backlog = backlog;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = Some(timeout);
        self
    }

    pub fn with_recv_buffer_size(mut self, size: usize) -> Self {
        self.recv_buffer_size = Some(size);
        self
    }

    pub fn with_send_buffer_size(mut self, size: usize) -> Self {
        self.send_buffer_size = Some(size);
        self
    }

    pub fn with_max_in_flight(mut self, max: usize) -> Self {
        self.max_in_flight = max;
        self
    }

    pub fn with_backpressure(mut self, policy: Backpressure) -> Self {
        self.backpressure = policy;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_max_frame_size(mut self, max: usize) -> Self {
        self.max_frame_size = Some(max);
        self
    }

    pub fn with_max_datagram_size(mut self, max: usize) -> Self {
        self.max_datagram_size = max;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Serialize dispatch per connection. Off by default: replies on one TCP
    /// connection are written in completion order, not arrival order.
    pub fn with_ordered_responses(mut self, ordered: bool) -> Self {
        self.ordered_responses = ordered;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_in_flight == 0 {
            return Err(RpcError::ConfigError("max_in_flight must be greater than 0".into()));
        }
        if self.queue_capacity == 0 {
            return Err(RpcError::ConfigError("queue_capacity must be greater than 0".into()));
        }
        if self.listen_backlog == 0 {
            return Err(RpcError::ConfigError("listen_backlog must be greater than 0".into()));
        }
        if self.max_datagram_size == 0 || self.max_datagram_size > MAX_DATAGRAM_SIZE {
            return Err(RpcError::ConfigError(format!(
                "max_datagram_size must be within 1..={MAX_DATAGRAM_SIZE}"
            )));
        }
        Ok(())
    }
}

/// Shared server state handed to a module when it starts.
#[derive(Clone)]
pub struct ModuleContext {
    pub router: Arc<Router>,
    /// Server-wide shutdown signal
    pub shutdown: CancellationToken,
    /// Server-wide task tracker; modules spawn their supervisor on it
    pub tracker: TaskTracker,
    pub metrics: Arc<Metrics>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ModuleState {
    Created = 0,
    Started = 1,
    Running = 2,
    Stopping = 3,
    Stopped = 4,
}

impl ModuleState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => ModuleState::Created,
            1 => ModuleState::Started,
            2 => ModuleState::Running,
            3 => ModuleState::Stopping,
            _ => ModuleState::Stopped,
        }
    }
}

/// Module state shared between the module and its supervisor task.
#[derive(Debug, Clone)]
pub(crate) struct StateCell(Arc<AtomicU8>);

impl StateCell {
    pub(crate) fn new() -> Self {
        Self(Arc::new(AtomicU8::new(ModuleState::Created as u8)))
    }

    pub(crate) fn get(&self) -> ModuleState {
        ModuleState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, state: ModuleState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// One listening transport owned by a [`Server`].
pub trait ServerModule: Send + Sync {
    /// Protocol (codec name) this module serves.
    fn protocol(&self) -> &str;

    fn transport(&self) -> TransportKind;

    /// Bound address, available once started.
    fn local_addr(&self) -> Option<SocketAddr>;

    fn state(&self) -> ModuleState;

    /// Bind the transport and spawn the module's loops. Does not block.
    ///
    /// A module starts at most once; a second call fails with
    /// [`RpcError::AlreadyStarted`].
    fn start(&mut self, ctx: ModuleContext) -> Result<()>;

    /// Stop this module only. The server's shutdown token stops every module.
    fn stop(&self);

    /// Attach this module to `server`; it starts with the server.
    fn register(self, server: &mut Server)
    where
        Self: Sized + 'static,
    {
        server.register_module(self);
    }
}

/// Builds server modules for one protocol from configuration.
pub trait ModuleFactory: Send + Sync {
    fn build(
        &self,
        network: Network,
        address: &str,
        protocol: &str,
        registry: &Registry,
        options: ModuleOptions,
    ) -> Result<Box<dyn ServerModule>>;
}

/// Module factory for protocols whose messages are `M`.
pub struct ProtocolModules<M> {
    _message: PhantomData<fn() -> M>,
}

impl<M> ProtocolModules<M> {
    pub fn new() -> Self {
        Self {
            _message: PhantomData,
        }
    }
}

impl<M> Default for ProtocolModules<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: Message> ModuleFactory for ProtocolModules<M> {
    fn build(
        &self,
        network: Network,
        address: &str,
        protocol: &str,
        registry: &Registry,
        options: ModuleOptions,
    ) -> Result<Box<dyn ServerModule>> {
        match network.transport() {
            TransportKind::Tcp => Ok(Box::new(TcpServer::<M>::new(
                network, address, protocol, registry, options,
            )?)),
            TransportKind::Udp => Ok(Box::new(UdpServer::<M>::new(
                network, address, protocol, registry, options,
            )?)),
        }
    }
}

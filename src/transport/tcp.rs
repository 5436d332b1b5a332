//! # TCP Server Module
//!
//! One listener; per accepted connection one read loop and one write loop.
//!
//! ## Reply ordering
//! Requests on a connection are read in arrival order, but each is handled by
//! its own task, so replies are written in completion order. Clients must match
//! replies to requests by their protocol's sequence field. Use
//! [`ModuleOptions::with_ordered_responses`] to handle one request at a time per
//! connection when strict ordering matters more than throughput.
//!
//! ## Error policy
//! - Framing errors (bad header, oversized frame) close the connection; the
//!   byte stream can no longer be resynchronised.
//! - A complete frame that fails to decode is logged and skipped.
//! - Accept errors are logged and retried after a short pause.

use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, warn};

use crate::core::codec::{Message, SharedCodec};
use crate::core::reader::{MessageReader, MessageWriter};
use crate::core::registry::Registry;
use crate::core::session::{Peer, Session, SharedSessionBuilder, TransportKind};
use crate::error::{RpcError, Result};
use crate::transport::dispatch::Dispatcher;
use crate::transport::{
    ModuleContext, ModuleOptions, ModuleState, Network, ServerModule, StateCell,
};
use crate::utils::metrics::Metrics;
use crate::utils::timeout::{maybe_timeout, ACCEPT_BACKOFF};

/// Stream server module for protocol messages of type `M`.
pub struct TcpServer<M: Message> {
    network: Network,
    addr: SocketAddr,
    local_addr: Option<SocketAddr>,
    protocol: String,
    codec: SharedCodec<M>,
    builder: SharedSessionBuilder<M>,
    options: ModuleOptions,
    state: StateCell,
    cancel: Option<CancellationToken>,
}

/// State shared by the accept loop and every connection.
struct Shared<M: Message> {
    protocol: String,
    codec: SharedCodec<M>,
    builder: SharedSessionBuilder<M>,
    options: ModuleOptions,
    dispatcher: Dispatcher,
    metrics: Arc<Metrics>,
}

impl<M: Message> TcpServer<M> {
    /// Create a module serving `codec_name` on `address`.
    ///
    /// The codec and session builder are resolved from `registry` now, so an
    /// unknown protocol fails here rather than at start.
    pub fn new(
        network: Network,
        address: &str,
        codec_name: &str,
        registry: &Registry,
        options: ModuleOptions,
    ) -> Result<Self> {
        if network.transport() != TransportKind::Tcp {
            return Err(RpcError::ConfigError(format!(
                "'{network}' is not a stream network"
            )));
        }
        options.validate()?;
        let addr = network.resolve(address)?;
        let codec = registry.codec::<M>(codec_name)?;
        let builder = registry.session_builder::<M>(codec_name)?;

        Ok(Self {
            network,
            addr,
            local_addr: None,
            protocol: codec_name.to_string(),
            codec,
            builder,
            options,
            state: StateCell::new(),
            cancel: None,
        })
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn options(&self) -> &ModuleOptions {
        &self.options
    }

    fn bind(&self) -> Result<TcpListener> {
        let socket = if self.addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;
        if let Some(size) = self.options.recv_buffer_size {
            socket.set_recv_buffer_size(size as u32)?;
        }
        if let Some(size) = self.options.send_buffer_size {
            socket.set_send_buffer_size(size as u32)?;
        }
        socket.bind(self.addr)?;
        Ok(socket.listen(self.options.listen_backlog)?)
    }
}

impl<M: Message> ServerModule for TcpServer<M> {
    fn protocol(&self) -> &str {
        &self.protocol
    }

    fn transport(&self) -> TransportKind {
        TransportKind::Tcp
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    fn state(&self) -> ModuleState {
        self.state.get()
    }

    #[instrument(skip(self, ctx), fields(protocol = %self.protocol, addr = %self.addr))]
    fn start(&mut self, ctx: ModuleContext) -> Result<()> {
        if self.state.get() != ModuleState::Created {
            return Err(RpcError::AlreadyStarted);
        }

        let listener = self.bind()?;
        let local = listener.local_addr()?;
        self.local_addr = Some(local);
        self.state.set(ModuleState::Started);

        let cancel = ctx.shutdown.child_token();
        self.cancel = Some(cancel.clone());
        let tasks = TaskTracker::new();

        let shared = Arc::new(Shared {
            protocol: self.protocol.clone(),
            codec: Arc::clone(&self.codec),
            builder: Arc::clone(&self.builder),
            options: self.options.clone(),
            dispatcher: Dispatcher::new(&ctx, &self.options, cancel.clone(), tasks.clone()),
            metrics: Arc::clone(&ctx.metrics),
        });

        tasks.spawn(accept_loop(listener, shared, cancel.clone(), tasks.clone()));
        self.state.set(ModuleState::Running);

        let state = self.state.clone();
        let protocol = self.protocol.clone();
        ctx.tracker.spawn(async move {
            cancel.cancelled().await;
            state.set(ModuleState::Stopping);
            tasks.close();
            tasks.wait().await;
            state.set(ModuleState::Stopped);
            info!(protocol = %protocol, addr = %local, "TCP module stopped");
        });

        info!(addr = %local, "TCP module listening");
        Ok(())
    }

    fn stop(&self) {
        if let Some(cancel) = &self.cancel {
            cancel.cancel();
        }
    }
}

async fn accept_loop<M: Message>(
    listener: TcpListener,
    shared: Arc<Shared<M>>,
    cancel: CancellationToken,
    tasks: TaskTracker,
) {
    loop {
        let accepted = tokio::select! {
            _ = cancel.cancelled() => break,
            res = listener.accept() => res,
        };

        match accepted {
            Ok((stream, addr)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!(peer = %addr, error = %e, "Failed to set TCP_NODELAY");
                }
                shared.metrics.connection_established();
                tasks.spawn(serve_connection(
                    stream,
                    Peer::tcp(addr),
                    Arc::clone(&shared),
                    cancel.child_token(),
                    tasks.clone(),
                ));
            }
            Err(e) => {
                warn!(error = %e, "Accept failed");
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(ACCEPT_BACKOFF) => {}
                }
            }
        }
    }
    debug!(protocol = %shared.protocol, "Accept loop exited");
}

#[instrument(skip_all, fields(peer = %peer, protocol = %shared.protocol))]
async fn serve_connection<M: Message>(
    stream: TcpStream,
    peer: Peer,
    shared: Arc<Shared<M>>,
    cancel: CancellationToken,
    tasks: TaskTracker,
) {
    debug!("Connection accepted");
    let (read_half, write_half) = stream.into_split();
    let (tx, rx) = mpsc::channel(shared.options.queue_capacity);

    let writer = tasks.spawn(write_loop(write_half, rx, Arc::clone(&shared), cancel.clone()));
    read_loop(read_half, peer, &shared, &cancel, tx).await;

    if let Err(e) = writer.await {
        warn!(error = %e, "Write loop task failed");
    }
    shared.metrics.connection_closed();
    debug!("Connection closed");
}

async fn read_loop<M: Message>(
    read_half: OwnedReadHalf,
    peer: Peer,
    shared: &Shared<M>,
    cancel: &CancellationToken,
    tx: mpsc::Sender<Session<M>>,
) {
    let mut reader = MessageReader::new(Arc::clone(&shared.codec));
    if let Some(max) = shared.options.max_frame_size {
        reader = reader.with_max_frame_size(max);
    }
    let mut frames = FramedRead::new(read_half, reader);

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = maybe_timeout(
                async { Ok::<_, RpcError>(frames.next().await) },
                shared.options.read_timeout,
            ) => next,
        };

        let frame = match next {
            Ok(Some(Ok(frame))) => frame,
            Ok(None) => {
                debug!("Peer closed its write side");
                break;
            }
            Ok(Some(Err(RpcError::Io(e)))) => {
                debug!(error = %e, "Read failed");
                cancel.cancel();
                break;
            }
            Ok(Some(Err(e))) => {
                shared.metrics.decode_error();
                warn!(error = %e, "Framing error, closing connection");
                cancel.cancel();
                break;
            }
            Err(_) => {
                debug!("Read timeout, closing idle connection");
                cancel.cancel();
                break;
            }
        };

        shared.metrics.frame_received(frame.len() as u64);
        let request = match shared.codec.decode(&frame) {
            Ok(request) => request,
            Err(e) => {
                shared.metrics.decode_error();
                warn!(error = %e, len = frame.len(), "Dropping undecodable frame");
                continue;
            }
        };

        let session = shared.builder.build_or_reject(request, peer);
        if !shared.dispatcher.submit(session, &tx).await {
            break;
        }
    }
}

async fn write_loop<M: Message>(
    write_half: OwnedWriteHalf,
    mut rx: mpsc::Receiver<Session<M>>,
    shared: Arc<Shared<M>>,
    cancel: CancellationToken,
) {
    let mut writer = MessageWriter::new(Arc::clone(&shared.codec));
    if let Some(max) = shared.options.max_frame_size {
        writer = writer.with_max_frame_size(max);
    }
    let mut frames = FramedWrite::new(write_half, writer);

    // After cancellation keep draining queued replies for the grace period.
    let grace = shared.options.shutdown_timeout;
    let drain_deadline = async {
        cancel.cancelled().await;
        tokio::time::sleep(grace).await;
    };
    tokio::pin!(drain_deadline);

    loop {
        let session = tokio::select! {
            _ = &mut drain_deadline => {
                debug!("Drain deadline reached, dropping queued replies");
                break;
            }
            next = rx.recv() => match next {
                Some(session) => session,
                None => break,
            },
        };

        let before = frames.encoder().bytes_encoded();
        let replaced = frames.encoder().replaced();
        let sent = maybe_timeout(frames.send(session), shared.options.write_timeout).await;
        if frames.encoder().replaced() > replaced {
            shared.metrics.write_error();
        }
        match sent {
            Ok(()) => shared
                .metrics
                .response_sent(frames.encoder().bytes_encoded() - before),
            Err(RpcError::Io(e)) => {
                shared.metrics.write_error();
                debug!(error = %e, "Write failed, closing connection");
                cancel.cancel();
                break;
            }
            Err(RpcError::Timeout) => {
                shared.metrics.write_error();
                warn!("Write timed out, closing connection");
                cancel.cancel();
                break;
            }
            Err(e) => {
                shared.metrics.write_error();
                warn!(error = %e, "Failed to encode reply");
            }
        }
    }

    rx.close();
    if let Err(e) = frames.close().await {
        debug!(error = %e, "Shutdown of write half failed");
    }
}

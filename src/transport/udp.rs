//! # UDP Server Module
//!
//! One socket, one read loop and one write loop. Each datagram carries exactly
//! one frame; its sender is stored in the session and the reply is sent back to
//! that address.
//!
//! Bad datagrams and socket errors never end the loops: they are logged and
//! counted before the next datagram is processed. A reply too large for one
//! datagram is replaced by an error reply to the same request.

use bytes::BytesMut;
use socket2::SockRef;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_util::codec::Encoder;
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

/// Datagram server module for protocol messages of type `M`.
pub struct UdpServer<M: Message> {
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

impl<M: Message> UdpServer<M> {
    /// Create a module serving `codec_name` on `address`.
    pub fn new(
        network: Network,
        address: &str,
        codec_name: &str,
        registry: &Registry,
        options: ModuleOptions,
    ) -> Result<Self> {
        if network.transport() != TransportKind::Udp {
            return Err(RpcError::ConfigError(format!(
                "'{network}' is not a datagram network"
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

    fn bind(&self) -> Result<UdpSocket> {
        let socket = std::net::UdpSocket::bind(self.addr)?;
        socket.set_nonblocking(true)?;
        {
            let sock = SockRef::from(&socket);
            if let Some(size) = self.options.recv_buffer_size {
                sock.set_recv_buffer_size(size)?;
            }
            if let Some(size) = self.options.send_buffer_size {
                sock.set_send_buffer_size(size)?;
            }
        }
        Ok(UdpSocket::from_std(socket)?)
    }
}

impl<M: Message> ServerModule for UdpServer<M> {
    fn protocol(&self) -> &str {
        &self.protocol
    }

    fn transport(&self) -> TransportKind {
        TransportKind::Udp
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

        let socket = Arc::new(self.bind()?);
        let local = socket.local_addr()?;
        self.local_addr = Some(local);
        self.state.set(ModuleState::Started);

        let cancel = ctx.shutdown.child_token();
        self.cancel = Some(cancel.clone());
        let tasks = TaskTracker::new();
        let dispatcher = Dispatcher::new(&ctx, &self.options, cancel.clone(), tasks.clone());
        let (tx, rx) = mpsc::channel(self.options.queue_capacity);

        let reader = DatagramReader {
            socket: Arc::clone(&socket),
            reader: MessageReader::new(Arc::clone(&self.codec)),
            builder: Arc::clone(&self.builder),
            dispatcher,
            metrics: Arc::clone(&ctx.metrics),
            max_datagram_size: self.options.max_datagram_size,
        };
        tasks.spawn(reader.run(cancel.clone(), tx));

        let writer = DatagramWriter {
            socket,
            writer: MessageWriter::new(Arc::clone(&self.codec))
                .with_max_frame_size(self.options.max_datagram_size),
            metrics: Arc::clone(&ctx.metrics),
            options: self.options.clone(),
        };
        tasks.spawn(writer.run(cancel.clone(), rx));
        self.state.set(ModuleState::Running);

        let state = self.state.clone();
        let protocol = self.protocol.clone();
        ctx.tracker.spawn(async move {
            cancel.cancelled().await;
            state.set(ModuleState::Stopping);
            tasks.close();
            tasks.wait().await;
            state.set(ModuleState::Stopped);
            info!(protocol = %protocol, addr = %local, "UDP module stopped");
        });

        info!(addr = %local, "UDP module listening");
        Ok(())
    }

    fn stop(&self) {
        if let Some(cancel) = &self.cancel {
            cancel.cancel();
        }
    }
}

struct DatagramReader<M: Message> {
    socket: Arc<UdpSocket>,
    reader: MessageReader<M>,
    builder: SharedSessionBuilder<M>,
    dispatcher: Dispatcher,
    metrics: Arc<Metrics>,
    max_datagram_size: usize,
}

impl<M: Message> DatagramReader<M> {
    async fn run(self, cancel: CancellationToken, tx: mpsc::Sender<Session<M>>) {
        // One spare byte detects datagrams larger than the limit.
        let mut buf = vec![0u8; self.max_datagram_size + 1];

        loop {
            let received = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                res = self.socket.recv_from(&mut buf) => res,
            };

            let (len, addr) = match received {
                Ok(r) => r,
                Err(e) => {
                    warn!(error = %e, "Datagram receive failed");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(ACCEPT_BACKOFF) => {}
                    }
                    continue;
                }
            };
            self.metrics.datagram_received(len as u64);

            if len > self.max_datagram_size {
                self.metrics.decode_error();
                debug!(peer = %addr, len, "Dropping oversized datagram");
                continue;
            }

            let request = match self
                .reader
                .read_datagram(&buf[..len])
                .and_then(|frame| self.reader.codec().decode(&frame))
            {
                Ok(request) => request,
                Err(e) => {
                    self.metrics.decode_error();
                    debug!(peer = %addr, error = %e, "Dropping malformed datagram");
                    continue;
                }
            };

            let session = self.builder.build_or_reject(request, Peer::udp(addr));
            if !self.dispatcher.submit(session, &tx).await {
                break;
            }
        }
        debug!("UDP read loop exited");
    }
}

struct DatagramWriter<M: Message> {
    socket: Arc<UdpSocket>,
    writer: MessageWriter<M>,
    metrics: Arc<Metrics>,
    options: ModuleOptions,
}

impl<M: Message> DatagramWriter<M> {
    async fn run(mut self, cancel: CancellationToken, mut rx: mpsc::Receiver<Session<M>>) {
        let grace = self.options.shutdown_timeout;
        let drain_deadline = async {
            cancel.cancelled().await;
            tokio::time::sleep(grace).await;
        };
        tokio::pin!(drain_deadline);
        let mut buf = BytesMut::with_capacity(self.options.max_datagram_size);

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

            let peer = session.peer();
            buf.clear();
            let replaced = self.writer.replaced();
            let encoded = self.writer.encode(session, &mut buf);
            if self.writer.replaced() > replaced {
                self.metrics.write_error();
            }
            if let Err(e) = encoded {
                warn!(peer = %peer, error = %e, "Failed to encode error reply");
                continue;
            }

            let sent = maybe_timeout(
                async { Ok::<_, RpcError>(self.socket.send_to(&buf, peer.addr).await?) },
                self.options.write_timeout,
            )
            .await;
            match sent {
                Ok(n) => self.metrics.response_sent(n as u64),
                Err(e) => {
                    self.metrics.write_error();
                    warn!(peer = %peer, error = %e, "Datagram send failed");
                }
            }
        }
        rx.close();
        debug!("UDP write loop exited");
    }
}

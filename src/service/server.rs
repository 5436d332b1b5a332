//! # Server Lifecycle
//!
//! A [`Server`] owns its registered modules, the router they dispatch to and a
//! single shutdown token every module observes.
//!
//! ```text
//! launch() -> modules started in registration order
//! stop() / Ctrl-C -> token cancelled -> loops exit, writers drain
//! closed() -> every module task has exited
//! ```
//!
//! A module that fails to start aborts the whole server: modules already
//! started are cancelled and the error is returned.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::core::session::TransportKind;
use crate::error::{RpcError, Result};
use crate::protocol::router::Router;
use crate::transport::{ModuleContext, ServerModule};
use crate::utils::metrics::Metrics;

/// Cloneable handle to request and await shutdown from other tasks.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    token: CancellationToken,
    tracker: TaskTracker,
}

impl ShutdownHandle {
    /// Cancel the shared shutdown token.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once shutdown was requested and every module task has exited.
    pub async fn closed(&self) {
        self.token.cancelled().await;
        self.tracker.close();
        self.tracker.wait().await;
    }
}

pub struct Server {
    modules: Vec<Box<dyn ServerModule>>,
    router: Arc<Router>,
    config: ServerConfig,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    metrics: Arc<Metrics>,
    launched: bool,
}

impl Server {
    /// Server with default settings.
    pub fn new(router: Arc<Router>) -> Self {
        Self {
            modules: Vec::new(),
            router,
            config: ServerConfig::default(),
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
            metrics: Arc::new(Metrics::new()),
            launched: false,
        }
    }

    /// Server with validated settings.
    pub fn with_config(router: Arc<Router>, config: ServerConfig) -> Result<Self> {
        let errors = config.validate();
        if !errors.is_empty() {
            return Err(RpcError::ConfigError(format!(
                "Server configuration invalid:\n  - {}",
                errors.join("\n  - ")
            )));
        }
        let mut server = Self::new(router);
        server.config = config;
        Ok(server)
    }

    /// Attach a module; it starts with the server.
    pub fn register_module<T: ServerModule + 'static>(&mut self, module: T) {
        self.register_boxed(Box::new(module));
    }

    pub fn register_boxed(&mut self, module: Box<dyn ServerModule>) {
        if self.launched {
            warn!(protocol = module.protocol(), "Module registered after launch will not start");
        }
        self.modules.push(module);
    }

    pub fn modules(&self) -> &[Box<dyn ServerModule>] {
        &self.modules
    }

    /// Bound addresses of started modules, in registration order.
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.modules.iter().filter_map(|m| m.local_addr()).collect()
    }

    /// Bound address of the first module serving `protocol` over `transport`.
    pub fn local_addr(&self, protocol: &str, transport: TransportKind) -> Option<SocketAddr> {
        self.modules
            .iter()
            .find(|m| m.protocol() == protocol && m.transport() == transport)
            .and_then(|m| m.local_addr())
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            token: self.shutdown.clone(),
            tracker: self.tracker.clone(),
        }
    }

    /// Start every module in registration order without waiting for shutdown.
    pub fn launch(&mut self) -> Result<()> {
        if self.launched {
            return Err(RpcError::AlreadyStarted);
        }
        self.launched = true;

        if self.modules.is_empty() {
            warn!("Server launched without modules");
        }

        let ctx = ModuleContext {
            router: Arc::clone(&self.router),
            shutdown: self.shutdown.clone(),
            tracker: self.tracker.clone(),
            metrics: Arc::clone(&self.metrics),
        };

        for module in self.modules.iter_mut() {
            if let Err(e) = module.start(ctx.clone()) {
                error!(
                    protocol = module.protocol(),
                    transport = %module.transport(),
                    error = %e,
                    "Module failed to start, aborting server"
                );
                self.shutdown.cancel();
                self.tracker.close();
                return Err(e);
            }
        }

        if self.config.handle_signals {
            let token = self.shutdown.clone();
            self.tracker.spawn(async move {
                tokio::select! {
                    _ = token.cancelled() => {}
                    res = tokio::signal::ctrl_c() => match res {
                        Ok(()) => {
                            info!("Shutdown signal received");
                            token.cancel();
                        }
                        Err(e) => warn!(error = %e, "Unable to listen for shutdown signal"),
                    },
                }
            });
        }

        info!(modules = self.modules.len(), "Server started");
        Ok(())
    }

    /// Launch, then block until shutdown is requested and modules have drained.
    pub async fn start(&mut self) -> Result<()> {
        self.launch()?;
        self.wait().await;
        Ok(())
    }

    /// Wait for shutdown, then for module tasks to exit.
    ///
    /// Draining is bounded: writers get `shutdown_timeout` to flush, and
    /// handlers still running after twice that are abandoned.
    pub async fn wait(&self) {
        self.shutdown.cancelled().await;
        info!("Server shutting down");

        let limit = self.config.shutdown_timeout * 2;
        if tokio::time::timeout(limit, self.closed()).await.is_err() {
            warn!(timeout_ms = limit.as_millis() as u64, "Shutdown timed out, abandoning in-flight tasks");
        }
        self.metrics.log_metrics();
        info!("Server stopped");
    }

    /// Request shutdown of every module.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Resolves once shutdown was requested and every module task has exited.
    pub async fn closed(&self) {
        self.shutdown.cancelled().await;
        self.tracker.close();
        self.tracker.wait().await;
    }
}

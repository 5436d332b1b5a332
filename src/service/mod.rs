//! # Service Layer
//!
//! A [`Server`] is one running instance; a [`Service`] is that instance as the
//! outside world sees it: a name and version, announced through a naming
//! backend while its transports are up.
//!
//! ## Components
//! - **Server**: module lifecycle and shared shutdown
//! - **Naming**: registration boundary for external naming backends
//! - **Bootstrap**: `service.ini` driven construction (`listen_and_serve`)
//!
//! ## Example Usage
//! ```rust,no_run
//! use std::sync::Arc;
//! use polyrpc::core::registry::Registry;
//! use polyrpc::protocol::router::Router;
//! use polyrpc::service::{server::Server, Service};
//! use polyrpc::transport::{ModuleOptions, Network, TcpServer};
//! use polyrpc::protocol::json::JsonFrame;
//!
//! # async fn run() -> polyrpc::error::Result<()> {
//! let registry = Registry::with_builtin();
//! let router = Arc::new(Router::new());
//! router.register_fn("Echo", |ctx| async move { Ok(ctx.body().clone()) })?;
//!
//! let mut service = Service::new("echo").with_version("1.0.0");
//! service.register_server(Server::new(router));
//! service.register_module(TcpServer::<JsonFrame>::new(
//!     Network::Tcp4, ":9000", "json", &registry, ModuleOptions::default(),
//! )?)?;
//! service.start().await
//! # }
//! ```

pub mod bootstrap;
pub mod naming;
pub mod server;

use std::sync::Arc;
use tracing::{error, info, warn};

use crate::error::{constants, RpcError, Result};
use crate::transport::ServerModule;
use naming::{Endpoint, Naming, ServiceInfo};
use server::{Server, ShutdownHandle};

pub use bootstrap::listen_and_serve;

/// Version used until [`Service::with_version`] is called.
pub const DEFAULT_VERSION: &str = "0.0.1";

pub struct Service {
    name: String,
    version: String,
    server: Option<Server>,
    naming: Option<Arc<dyn Naming>>,
}

impl Service {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            version: DEFAULT_VERSION.to_string(),
            server: None,
            naming: None,
        }
    }

    pub fn with_version<S: Into<String>>(mut self, version: S) -> Self {
        self.version = version.into();
        self
    }

    /// Announce the service through `naming` while it runs.
    pub fn with_naming(mut self, naming: Arc<dyn Naming>) -> Self {
        self.naming = Some(naming);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Use `server` for this service, replacing any previous one.
    pub fn register_server(&mut self, server: Server) {
        if self.server.is_some() {
            warn!(service = %self.name, "Replacing registered server");
        }
        self.server = Some(server);
    }

    /// Attach a module to the registered server.
    pub fn register_module<T: ServerModule + 'static>(&mut self, module: T) -> Result<()> {
        let server = self
            .server
            .as_mut()
            .ok_or_else(|| RpcError::ConfigError(constants::ERR_SERVER_NOT_INIT.to_string()))?;
        server.register_module(module);
        Ok(())
    }

    pub fn server(&self) -> Option<&Server> {
        self.server.as_ref()
    }

    pub fn shutdown_handle(&self) -> Option<ShutdownHandle> {
        self.server.as_ref().map(Server::shutdown_handle)
    }

    /// Start transports, register with naming, serve until shutdown, deregister.
    ///
    /// A naming registration failure stops the transports and is returned.
    /// A deregistration failure is returned after the transports have closed.
    pub async fn start(&mut self) -> Result<()> {
        let server = self
            .server
            .as_mut()
            .ok_or_else(|| RpcError::ConfigError(constants::ERR_SERVER_NOT_INIT.to_string()))?;

        server.launch()?;
        let info = service_info(&self.name, &self.version, server);

        if let Some(naming) = &self.naming {
            if let Err(e) = naming.register(&info).await {
                error!(service = %info.name, error = %e, "Naming registration failed");
                server.stop();
                server.closed().await;
                return Err(e);
            }
            info!(service = %info.name, version = %info.version, "Registered with naming");
        }

        server.wait().await;

        if let Some(naming) = &self.naming {
            naming.deregister(&info).await?;
            info!(service = %info.name, "Deregistered from naming");
        }
        Ok(())
    }
}

fn service_info(name: &str, version: &str, server: &Server) -> ServiceInfo {
    let endpoints = server
        .modules()
        .iter()
        .filter_map(|m| {
            m.local_addr().map(|addr| Endpoint {
                protocol: m.protocol().to_string(),
                transport: m.transport(),
                addr,
            })
        })
        .collect();

    ServiceInfo {
        name: name.to_string(),
        version: version.to_string(),
        endpoints,
    }
}

//! # Bootstrap from `service.ini`
//!
//! Builds a [`Server`] from an INI file with one section per protocol:
//!
//! ```ini
//! ; comments start with ';' or '#'
//! [json-service]
//! tcp.port = 8000
//! udp.port = 8001
//!
//! [bin-service]
//! tcp.port = 9000
//! ```
//!
//! The protocol name is the section name without its `-service` suffix; other
//! sections are ignored. A port of `0`, or a missing key, disables that
//! transport. Modules bind every IPv4 interface (`tcp4` / `udp4`).

use ini::Ini;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::ServerConfig;
use crate::core::registry::Registry;
use crate::error::{RpcError, Result};
use crate::protocol::router::Router;
use crate::service::server::Server;
use crate::transport::{ModuleOptions, Network};

/// File name looked up in the working directory.
pub const SERVICE_INI: &str = "service.ini";

const SECTION_SUFFIX: &str = "-service";
const TCP_PORT_KEY: &str = "tcp.port";
const UDP_PORT_KEY: &str = "udp.port";

/// Parsed `service.ini` document.
#[derive(Debug, Clone)]
pub struct ServiceIni {
    ini: Ini,
}

/// Ports configured for one protocol. `None` means disabled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolEndpoints {
    pub protocol: String,
    pub tcp_port: Option<u16>,
    pub udp_port: Option<u16>,
}

impl ServiceIni {
    pub fn parse(content: &str) -> Result<Self> {
        let ini = Ini::load_from_str(content)
            .map_err(|e| RpcError::ConfigError(format!("Invalid {SERVICE_INI}: {e}")))?;
        Ok(Self { ini })
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let ini = Ini::load_from_file(path).map_err(|e| {
            RpcError::ConfigError(format!("Failed to read {}: {e}", path.display()))
        })?;
        Ok(Self { ini })
    }

    /// Value of `key` in `section`. Dotted keys such as `tcp.port` are literal.
    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.ini
            .section(Some(section))
            .and_then(|props| props.get(key))
    }

    /// Named sections, each listed once in name order.
    pub fn sections(&self) -> impl Iterator<Item = &str> {
        self.ini
            .sections()
            .flatten()
            .collect::<BTreeSet<_>>()
            .into_iter()
    }

    fn port(&self, section: &str, key: &str) -> Result<Option<u16>> {
        match self.get(section, key) {
            None => Ok(None),
            Some(raw) => match raw.parse::<u16>() {
                Ok(0) => Ok(None),
                Ok(port) => Ok(Some(port)),
                Err(_) => Err(RpcError::ConfigError(format!(
                    "[{section}] {key}: invalid port '{raw}'"
                ))),
            },
        }
    }

    /// Protocol sections in name order.
    pub fn endpoints(&self) -> Result<Vec<ProtocolEndpoints>> {
        let mut endpoints = Vec::new();
        for section in self.sections() {
            let Some(protocol) = section.strip_suffix(SECTION_SUFFIX) else {
                continue;
            };
            if protocol.is_empty() {
                continue;
            }
            endpoints.push(ProtocolEndpoints {
                protocol: protocol.to_string(),
                tcp_port: self.port(section, TCP_PORT_KEY)?,
                udp_port: self.port(section, UDP_PORT_KEY)?,
            });
        }
        Ok(endpoints)
    }
}

/// Construct a server with one module per enabled `(protocol, transport)`.
///
/// Every protocol must have been registered with [`Registry::register_protocol`].
pub fn build_server(
    ini: &ServiceIni,
    registry: &Registry,
    router: Arc<Router>,
    config: ServerConfig,
) -> Result<Server> {
    let options = ModuleOptions::from(&config);
    let mut server = Server::with_config(router, config)?;

    for ep in ini.endpoints()? {
        let factory = registry.module_factory(&ep.protocol)?;

        if let Some(port) = ep.tcp_port {
            let module = factory.build(
                Network::Tcp4,
                &format!(":{port}"),
                &ep.protocol,
                registry,
                options.clone(),
            )?;
            server.register_boxed(module);
        }

        if let Some(port) = ep.udp_port {
            let module = factory.build(
                Network::Udp4,
                &format!(":{port}"),
                &ep.protocol,
                registry,
                options.clone(),
            )?;
            server.register_boxed(module);
        }

        if ep.tcp_port.is_none() && ep.udp_port.is_none() {
            debug!(protocol = %ep.protocol, "Protocol section has no enabled transport");
        }
    }

    info!(modules = server.modules().len(), "Server built from service configuration");
    Ok(server)
}

/// Read `service.ini` from the working directory, build the server and serve
/// until shutdown.
pub async fn listen_and_serve(
    registry: &Registry,
    router: Arc<Router>,
    config: ServerConfig,
) -> Result<()> {
    let path = std::env::current_dir()?.join(SERVICE_INI);
    let ini = ServiceIni::from_file(&path)?;
    let mut server = build_server(&ini, registry, router, config)?;
    server.start().await
}

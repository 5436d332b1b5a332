//! Naming service boundary.
//!
//! A [`Service`](crate::service::Service) registers itself with a naming backend
//! once its transports are up and deregisters after they have closed. Backends
//! live outside this crate and implement [`Naming`].

use futures::future::BoxFuture;
use std::net::SocketAddr;

use crate::core::session::TransportKind;
use crate::error::{RpcError, Result};

/// One reachable address of a service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub protocol: String,
    pub transport: TransportKind,
    pub addr: SocketAddr,
}

/// What a naming backend learns about a running service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
    pub name: String,
    pub version: String,
    pub endpoints: Vec<Endpoint>,
}

pub trait Naming: Send + Sync {
    /// Called after every transport started.
    fn register<'a>(&'a self, info: &'a ServiceInfo) -> BoxFuture<'a, Result<()>>;

    /// Called after every transport closed.
    fn deregister<'a>(&'a self, info: &'a ServiceInfo) -> BoxFuture<'a, Result<()>>;
}

/// Backend that refuses both operations.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnsupportedNaming;

impl Naming for UnsupportedNaming {
    fn register<'a>(&'a self, _info: &'a ServiceInfo) -> BoxFuture<'a, Result<()>> {
        Box::pin(async { Err(RpcError::NotSupported("naming registration")) })
    }

    fn deregister<'a>(&'a self, _info: &'a ServiceInfo) -> BoxFuture<'a, Result<()>> {
        Box::pin(async { Err(RpcError::NotSupported("naming deregistration")) })
    }
}

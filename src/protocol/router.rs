use bytes::Bytes;
use futures::future::BoxFuture;
use std::borrow::Cow;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};

use crate::core::codec::Message;
use crate::core::session::{RequestContext, Session};
use crate::error::{constants, RpcError, Result};

/// A registered service implementation. Handlers are bound to it at registration.
pub trait Service: Send + Sync + 'static {
    fn name(&self) -> &str;
}

/// Future returned by every handler: the response body or a handler error.
pub type HandlerFuture = BoxFuture<'static, Result<Bytes>>;

type HandlerFn = dyn Fn(RequestContext) -> HandlerFuture + Send + Sync + 'static;

/// Service and handler resolved for one rpc name.
#[derive(Clone)]
pub struct Route {
    service: Arc<dyn Service>,
    handler: Arc<HandlerFn>,
}

impl Route {
    pub fn service(&self) -> &Arc<dyn Service> {
        &self.service
    }

    pub fn service_name(&self) -> &str {
        self.service.name()
    }

    /// Invoke the handler with its bound service.
    pub fn call(&self, ctx: RequestContext) -> HandlerFuture {
        (self.handler)(ctx)
    }
}

/// Service for handlers registered without one.
struct Standalone;

impl Service for Standalone {
    fn name(&self) -> &str {
        "standalone"
    }
}

/// Maps rpc names to `(service, handler)` pairs.
///
/// Populated during service registration and read concurrently afterwards.
/// Keys use `Cow<'static, str>` so static rpc names are stored without allocating.
pub struct Router {
    routes: RwLock<HashMap<Cow<'static, str>, Route>>,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    pub fn new() -> Self {
        Self {
            routes: RwLock::new(HashMap::new()),
        }
    }

    /// Bind `handler` to `service` under `rpc_name`, replacing any previous route.
    pub fn register<S, F, Fut>(
        &self,
        service: Arc<S>,
        rpc_name: impl Into<Cow<'static, str>>,
        handler: F,
    ) -> Result<()>
    where
        S: Service,
        F: Fn(Arc<S>, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Bytes>> + Send + 'static,
    {
        let bound = Arc::clone(&service);
        let handler: Arc<HandlerFn> = Arc::new(move |ctx: RequestContext| -> HandlerFuture {
            Box::pin(handler(Arc::clone(&bound), ctx))
        });
        let route = Route { service, handler };

        let mut routes = self
            .routes
            .write()
            .map_err(|_| RpcError::Transport(constants::ERR_ROUTER_POISONED.to_string()))?;
        routes.insert(rpc_name.into(), route);
        Ok(())
    }

    /// Register a free-standing async handler.
    pub fn register_fn<F, Fut>(&self, rpc_name: impl Into<Cow<'static, str>>, handler: F) -> Result<()>
    where
        F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Bytes>> + Send + 'static,
    {
        self.register(Arc::new(Standalone), rpc_name, move |_, ctx| handler(ctx))
    }

    /// Resolve the route for a session's rpc name.
    pub fn route<M: Message>(&self, session: &Session<M>) -> Result<Route> {
        self.route_name(session.rpc_name())
    }

    pub fn route_name(&self, rpc_name: &str) -> Result<Route> {
        let routes = self
            .routes
            .read()
            .map_err(|_| RpcError::Transport(constants::ERR_ROUTER_POISONED.to_string()))?;

        routes
            .get(rpc_name)
            .cloned()
            .ok_or_else(|| RpcError::MethodNotFound(rpc_name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.routes.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registered rpc names, sorted.
    pub fn rpc_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .routes
            .read()
            .map(|r| r.keys().map(|k| k.to_string()).collect())
            .unwrap_or_default();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::session::{Peer, SessionBuilder};
    use crate::protocol::json::{JsonFrame, JsonSessionBuilder};
    use tokio_util::sync::CancellationToken;

    struct Greeter {
        greeting: &'static str,
    }

    impl Service for Greeter {
        fn name(&self) -> &str {
            "Greeter"
        }
    }

    fn session(rpc: &str) -> Session<JsonFrame> {
        let peer = Peer::tcp("127.0.0.1:9000".parse().unwrap());
        JsonSessionBuilder
            .build(JsonFrame::request(1, rpc, "world"), peer)
            .unwrap()
    }

    #[tokio::test]
    async fn test_route_invokes_bound_service() {
        let router = Router::new();
        let greeter = Arc::new(Greeter { greeting: "hello" });
        router
            .register(greeter, "SayHello", |svc: Arc<Greeter>, ctx| async move {
                let name = String::from_utf8_lossy(ctx.body()).to_string();
                Ok(Bytes::from(format!("{} {}", svc.greeting, name)))
            })
            .unwrap();

        let s = session("SayHello");
        let route = router.route(&s).unwrap();
        assert_eq!(route.service_name(), "Greeter");
        let body = route.call(s.context(CancellationToken::new())).await.unwrap();
        assert_eq!(&body[..], b"hello world");
    }

    #[test]
    fn test_unknown_rpc_is_method_not_found() {
        let router = Router::new();
        let err = router.route(&session("Missing")).err().unwrap();
        assert!(matches!(err, RpcError::MethodNotFound(ref name) if name == "Missing"));
    }

    #[test]
    fn test_reregistration_replaces_route() {
        let router = Router::new();
        router
            .register_fn("Echo", |_ctx| async { Ok(Bytes::from_static(b"v1")) })
            .unwrap();
        router
            .register_fn(String::from("Echo"), |_ctx| async { Ok(Bytes::from_static(b"v2")) })
            .unwrap();
        assert_eq!(router.len(), 1);
        assert_eq!(router.rpc_names(), vec!["Echo".to_string()]);
        assert_eq!(router.route_name("Echo").unwrap().service_name(), "standalone");
    }
}

//! Bounded dispatch between a module's read loop and its handlers.
//!
//! Every request needs a permit from the module's semaphore before its handler
//! runs. With [`Backpressure::Block`] the read loop waits for one; with
//! [`Backpressure::Reject`] the request is answered with
//! [`RpcError::Overloaded`] and the handler is never invoked. The permit is held
//! until the reply is queued, so a slow writer also throttles handling.

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error};

use crate::config::Backpressure;
use crate::core::codec::Message;
use crate::core::session::Session;
use crate::error::RpcError;
use crate::protocol::router::Router;
use crate::transport::{ModuleContext, ModuleOptions};
use crate::utils::metrics::{Metrics, Timer};

enum Admission {
    Admitted(OwnedSemaphorePermit),
    Rejected,
    Shutdown,
}

#[derive(Clone)]
pub(crate) struct Dispatcher {
    router: Arc<Router>,
    permits: Arc<Semaphore>,
    policy: Backpressure,
    ordered: bool,
    /// Server-wide signal handed to handlers
    shutdown: CancellationToken,
    /// Module signal that aborts a blocked admission
    cancel: CancellationToken,
    metrics: Arc<Metrics>,
    tasks: TaskTracker,
}

impl Dispatcher {
    pub(crate) fn new(
        ctx: &ModuleContext,
        options: &ModuleOptions,
        cancel: CancellationToken,
        tasks: TaskTracker,
    ) -> Self {
        Self {
            router: Arc::clone(&ctx.router),
            permits: Arc::new(Semaphore::new(options.max_in_flight)),
            policy: options.backpressure,
            ordered: options.ordered_responses,
            shutdown: ctx.shutdown.clone(),
            cancel,
            metrics: Arc::clone(&ctx.metrics),
            tasks,
        }
    }

    async fn admit(&self) -> Admission {
        match self.policy {
            Backpressure::Block => tokio::select! {
                _ = self.cancel.cancelled() => Admission::Shutdown,
                permit = Arc::clone(&self.permits).acquire_owned() => match permit {
                    Ok(p) => Admission::Admitted(p),
                    Err(_) => Admission::Shutdown,
                },
            },
            Backpressure::Reject => match Arc::clone(&self.permits).try_acquire_owned() {
                Ok(p) => Admission::Admitted(p),
                Err(TryAcquireError::NoPermits) => Admission::Rejected,
                Err(TryAcquireError::Closed) => Admission::Shutdown,
            },
        }
    }

    /// Route and run the handler, recording exactly one outcome on the session.
    pub(crate) async fn handle<M: Message>(&self, session: &mut Session<M>) {
        let route = match self.router.route(session) {
            Ok(route) => route,
            Err(e) => {
                self.metrics.routing_error();
                debug!(rpc = session.rpc_name(), peer = %session.peer(), error = %e, "Routing failed");
                session.set_error_response(e);
                return;
            }
        };

        let ctx = session.context(self.shutdown.clone());
        let outcome = {
            let _timer = Timer::start("rpc_handler");
            AssertUnwindSafe(route.call(ctx)).catch_unwind().await
        };

        match outcome {
            Ok(Ok(body)) => {
                if let Err(e) = session.respond(body) {
                    session.set_error_response(e);
                }
            }
            Ok(Err(e)) => {
                self.metrics.handler_error();
                debug!(rpc = session.rpc_name(), error = %e, "Handler returned error");
                session.set_error_response(e);
            }
            Err(_) => {
                self.metrics.handler_error();
                error!(rpc = session.rpc_name(), service = route.service_name(), "Handler panicked");
                session.set_error_response(RpcError::handler("handler panicked"));
            }
        }
    }

    /// Admit, handle and queue one session for writing.
    ///
    /// Returns `false` once the reply queue is gone or the module is stopping,
    /// telling the read loop to exit.
    pub(crate) async fn submit<M: Message>(
        &self,
        mut session: Session<M>,
        tx: &mpsc::Sender<Session<M>>,
    ) -> bool {
        self.metrics.request_received();

        // Unroutable requests are answered without a permit.
        if session.is_finalized() {
            self.metrics.routing_error();
            return tx.send(session).await.is_ok();
        }

        let permit = match self.admit().await {
            Admission::Admitted(permit) => permit,
            Admission::Rejected => {
                self.metrics.request_rejected();
                debug!(rpc = session.rpc_name(), peer = %session.peer(), "Request rejected, in-flight limit reached");
                session.set_error_response(RpcError::Overloaded);
                return tx.send(session).await.is_ok();
            }
            Admission::Shutdown => return false,
        };

        if self.ordered {
            self.handle(&mut session).await;
            let queued = tx.send(session).await.is_ok();
            drop(permit);
            return queued;
        }

        let this = self.clone();
        let tx = tx.clone();
        self.tasks.spawn(async move {
            this.handle(&mut session).await;
            if tx.send(session).await.is_err() {
                debug!("Reply dropped, writer already gone");
            }
            drop(permit);
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::session::{Peer, SessionBuilder};
    use crate::protocol::json::{JsonFrame, JsonSessionBuilder};
    use bytes::Bytes;
    use std::time::Duration;

    fn dispatcher(router: Router, options: ModuleOptions) -> Dispatcher {
        let ctx = ModuleContext {
            router: Arc::new(router),
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
            metrics: Arc::new(Metrics::new()),
        };
        let tasks = TaskTracker::new();
        Dispatcher::new(&ctx, &options, ctx.shutdown.child_token(), tasks)
    }

    fn session(rpc: &str) -> Session<JsonFrame> {
        let peer = Peer::tcp("127.0.0.1:1234".parse().unwrap());
        JsonSessionBuilder.build_or_reject(JsonFrame::request(1, rpc, "x"), peer)
    }

    #[tokio::test]
    async fn test_handler_error_becomes_error_reply() {
        let router = Router::new();
        router
            .register_fn("Fail", |_ctx| async { Err(RpcError::handler("nope")) })
            .unwrap();
        let d = dispatcher(router, ModuleOptions::default());

        let mut s = session("Fail");
        d.handle(&mut s).await;
        assert!(matches!(s.error(), Some(RpcError::Handler(_))));
        assert_eq!(d.metrics.snapshot().handler_errors, 1);
    }

    #[tokio::test]
    async fn test_panicking_handler_is_contained() {
        let router = Router::new();
        router
            .register_fn("Boom", |_ctx| async {
                if true {
                    panic!("handler bug");
                }
                Ok(Bytes::new())
            })
            .unwrap();
        let d = dispatcher(router, ModuleOptions::default());

        let mut s = session("Boom");
        d.handle(&mut s).await;
        assert!(matches!(s.error(), Some(RpcError::Handler(_))));
    }

    #[tokio::test]
    async fn test_reject_policy_answers_overloaded() {
        let router = Router::new();
        router
            .register_fn("Slow", |_ctx| async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(Bytes::from_static(b"done"))
            })
            .unwrap();
        let d = dispatcher(
            router,
            ModuleOptions::default()
                .with_max_in_flight(1)
                .with_backpressure(Backpressure::Reject),
        );
        let (tx, mut rx) = mpsc::channel(8);

        assert!(d.submit(session("Slow"), &tx).await);
        assert!(d.submit(session("Slow"), &tx).await);

        let first = rx.recv().await.unwrap();
        assert!(matches!(first.error(), Some(RpcError::Overloaded)));
        let second = rx.recv().await.unwrap();
        assert!(second.error().is_none());
        assert_eq!(d.metrics.snapshot().rejected_total, 1);
    }

    #[tokio::test]
    async fn test_blocked_admission_stops_on_cancel() {
        let router = Router::new();
        router
            .register_fn("Hang", |ctx| async move {
                ctx.shutdown().cancelled().await;
                Ok(Bytes::new())
            })
            .unwrap();
        let d = dispatcher(router, ModuleOptions::default().with_max_in_flight(1));
        let (tx, _rx) = mpsc::channel(8);

        assert!(d.submit(session("Hang"), &tx).await);
        d.cancel.cancel();
        assert!(!d.submit(session("Hang"), &tx).await);
    }
}

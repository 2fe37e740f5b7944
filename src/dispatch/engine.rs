//! Per-connection dispatch loop.
//!
//! # Data Flow
//! ```text
//! Accepting   transport already upgraded by the caller
//!     → Registered   fresh id, prepare hook (may reject), registry insert
//!     → connect hook
//!     → Reading ⇄ Handling   one frame at a time, in arrival order
//!     → Closing      disconnect hook, unregister, close
//!     → Terminated
//! ```
//!
//! # Design Decisions
//! - One task per connection; a loop only ever waits on its own read
//! - Unknown types get an error envelope and the loop goes on
//! - Handler failures follow `DispatchConfig::on_handler_error`; a panicking
//!   handler is caught and always ends its connection through teardown
//! - `Dispatcher::shutdown` ends every loop through the same teardown
//! - Unregistering is tied to a drop guard, so it happens on every exit path

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use tokio::sync::watch;

use crate::config::{DispatchConfig, HandlerErrorPolicy};
use crate::connection::{Connection, ConnectionId, Registry, RequestMeta};
use crate::dispatch::context::MessageContext;
use crate::dispatch::envelope::{error_frame, Inbound};
use crate::dispatch::handler::{Handler, HandlerTable};
use crate::dispatch::hub::Hub;
use crate::observability::metrics;
use crate::transport::{Duplex, FrameStream, TransportError};

/// Decision of the prepare hook.
pub enum Admission<C> {
    /// Register the connection, optionally with an initial context.
    Accept(Option<C>),
    /// Close the transport without registering.
    Reject,
}

type PrepareFn<C> = dyn Fn(&ConnectionId, &RequestMeta) -> Admission<C> + Send + Sync;

/// Why a connection's dispatch loop ended.
#[derive(Debug)]
pub enum Disconnect {
    /// Refused by the prepare hook; never registered.
    Rejected,
    /// The peer closed the connection.
    PeerClosed,
    /// Reading failed.
    ReadFailed(TransportError),
    /// A handler failed under `HandlerErrorPolicy::Close`, or panicked.
    HandlerFailed(String),
    /// `Dispatcher::shutdown` was called.
    Shutdown,
}

/// Collects handlers and hooks before serving starts.
pub struct DispatcherBuilder<C: Send + Sync + 'static = ()> {
    config: DispatchConfig,
    handlers: HandlerTable<C>,
    prepare: Option<Arc<PrepareFn<C>>>,
}

impl<C: Send + Sync + 'static> DispatcherBuilder<C> {
    pub fn new(config: DispatchConfig) -> Self {
        Self {
            config,
            handlers: HandlerTable::new(),
            prepare: None,
        }
    }

    /// Route messages whose `type` equals `key` to `handler`.
    pub fn on(mut self, key: impl Into<String>, handler: impl Handler<C>) -> Self {
        self.handlers.register(key, handler);
        self
    }

    /// Hook run once a connection is registered, before its first read.
    pub fn on_connect(mut self, handler: impl Handler<C>) -> Self {
        self.handlers.register(self.config.connect_key.clone(), handler);
        self
    }

    /// Hook run once per registered connection when its loop ends.
    pub fn on_disconnect(mut self, handler: impl Handler<C>) -> Self {
        self.handlers.register(self.config.disconnect_key.clone(), handler);
        self
    }

    /// Hook run before registration; may reject or attach a context.
    pub fn prepare<F>(mut self, prepare: F) -> Self
    where
        F: Fn(&ConnectionId, &RequestMeta) -> Admission<C> + Send + Sync + 'static,
    {
        self.prepare = Some(Arc::new(prepare));
        self
    }

    pub fn build(self) -> Dispatcher<C> {
        tracing::debug!(handlers = ?self.handlers.keys(), "Dispatcher built");
        Dispatcher {
            inner: Arc::new(Inner {
                config: self.config,
                handlers: self.handlers,
                prepare: self.prepare,
                registry: Arc::new(Registry::new()),
                stop: watch::channel(false).0,
                active: watch::channel(0).0,
            }),
        }
    }
}

impl<C: Send + Sync + 'static> Default for DispatcherBuilder<C> {
    fn default() -> Self {
        Self::new(DispatchConfig::default())
    }
}

struct Inner<C: Send + Sync + 'static> {
    config: DispatchConfig,
    handlers: HandlerTable<C>,
    prepare: Option<Arc<PrepareFn<C>>>,
    registry: Arc<Registry<C>>,
    /// Flips to `true` once; every loop watching it winds down.
    stop: watch::Sender<bool>,
    /// Number of `serve` calls still running, teardown included.
    active: watch::Sender<usize>,
}

/// Type-routed dispatch engine. Clones share the same registry and handlers.
pub struct Dispatcher<C: Send + Sync + 'static = ()> {
    inner: Arc<Inner<C>>,
}

impl<C: Send + Sync + 'static> Clone for Dispatcher<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Counts one running `serve` call until dropped.
struct ActiveGuard<'a> {
    active: &'a watch::Sender<usize>,
}

impl<'a> ActiveGuard<'a> {
    fn enter(active: &'a watch::Sender<usize>) -> Self {
        active.send_modify(|n| *n += 1);
        Self { active }
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.active.send_modify(|n| *n -= 1);
    }
}

/// How a handler or hook invocation went wrong.
enum CallError {
    Failed(String),
    Panicked(String),
}

impl CallError {
    fn message(&self) -> &str {
        match self {
            CallError::Failed(message) | CallError::Panicked(message) => message,
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str));
    match detail {
        Some(detail) => format!("handler panicked: {detail}"),
        None => "handler panicked".to_string(),
    }
}

impl<C: Send + Sync + 'static> Dispatcher<C> {
    pub fn builder(config: DispatchConfig) -> DispatcherBuilder<C> {
        DispatcherBuilder::new(config)
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &Arc<Registry<C>> {
        &self.inner.registry
    }

    pub fn hub(&self) -> Hub<C> {
        Hub::new(Arc::clone(&self.inner.registry))
    }

    /// Ask every connection loop to finish. Each one still runs its
    /// disconnect hook, unregisters and closes. Connections arriving later
    /// are closed before registration.
    pub fn shutdown(&self) {
        self.inner.stop.send_replace(true);
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.inner.stop.borrow()
    }

    /// Number of `serve` calls that have not returned yet.
    pub fn active(&self) -> usize {
        *self.inner.active.borrow()
    }

    /// Resolve once no `serve` call is running.
    pub async fn wait_idle(&self) {
        let mut active = self.inner.active.subscribe();
        while *active.borrow_and_update() != 0 {
            if active.changed().await.is_err() {
                break;
            }
        }
    }

    /// Run one connection from registration to teardown.
    ///
    /// Returns when the connection is closed and unregistered.
    pub async fn serve<T: Duplex>(&self, transport: T, meta: RequestMeta) -> Disconnect {
        let _active = ActiveGuard::enter(&self.inner.active);
        let mut stop = self.inner.stop.subscribe();

        let (sink, mut stream) = transport.into_split();
        let id = ConnectionId::generate();
        let conn = Arc::new(Connection::new(id.clone(), Box::new(sink), meta));

        if *stop.borrow_and_update() {
            tracing::debug!(connection_id = %id, "Connection refused during shutdown");
            conn.close().await;
            return Disconnect::Shutdown;
        }

        if let Some(prepare) = &self.inner.prepare {
            match prepare(&id, conn.meta()) {
                Admission::Accept(Some(context)) => conn.set_context(context),
                Admission::Accept(None) => {}
                Admission::Reject => {
                    tracing::debug!(connection_id = %id, remote_addr = ?conn.meta().remote_addr, "Connection rejected");
                    metrics::record_connection_rejected();
                    conn.close().await;
                    return Disconnect::Rejected;
                }
            }
        }

        let registration = self.inner.registry.register(Arc::clone(&conn));
        metrics::record_connection_opened();
        let hub = self.hub();

        let reason = self.read_loop(&conn, &hub, &mut stream, &mut stop).await;
        match &reason {
            Disconnect::ReadFailed(e) => tracing::debug!(connection_id = %id, error = %e, "Read failed"),
            other => tracing::debug!(connection_id = %id, reason = ?other, "Dispatch loop finished"),
        }

        // The handle stays writable during the hook so it can say goodbye.
        let disconnect_key = self.inner.config.disconnect_key.clone();
        if let Err(e) = self.run_lifecycle(&disconnect_key, &conn, &hub).await {
            tracing::warn!(connection_id = %id, error = %e.message(), "Disconnect hook failed");
        }
        drop(registration);
        conn.close().await;
        reason
    }

    async fn read_loop<S: FrameStream>(
        &self,
        conn: &Arc<Connection<C>>,
        hub: &Hub<C>,
        stream: &mut S,
        stop: &mut watch::Receiver<bool>,
    ) -> Disconnect {
        let connect_key = self.inner.config.connect_key.clone();
        if let Err(e) = self.run_lifecycle(&connect_key, conn, hub).await {
            if let Some(reason) = self.handler_failed(conn, &connect_key, e).await {
                return reason;
            }
        }

        loop {
            let frame = tokio::select! {
                biased;
                _ = stop.changed() => return Disconnect::Shutdown,
                frame = stream.next_frame() => frame,
            };
            let frame = match frame {
                Ok(frame) => frame,
                Err(TransportError::Closed) => return Disconnect::PeerClosed,
                Err(e) => return Disconnect::ReadFailed(e),
            };

            let inbound = Inbound::parse(&frame);
            if let Some(reason) = self.route(conn, hub, inbound).await {
                return reason;
            }
        }
    }

    /// Dispatch one inbound envelope. `Some` ends the loop.
    async fn route(&self, conn: &Arc<Connection<C>>, hub: &Hub<C>, inbound: Inbound) -> Option<Disconnect> {
        let kind = inbound.kind().to_owned();
        let handler = if self.is_reserved(&kind) {
            None
        } else {
            self.inner.handlers.lookup(&kind)
        };

        let Some(handler) = handler else {
            tracing::debug!(connection_id = %conn.id(), msg_type = %kind, "Unknown message type");
            metrics::record_unknown_type();
            let frame = error_frame(&self.inner.config.error_type, &format!("unknown message type \"{kind}\""));
            if let Err(e) = conn.write(frame).await {
                tracing::trace!(connection_id = %conn.id(), error = %e, "Could not report unknown type");
            }
            return None;
        };

        metrics::record_frame(&kind);
        let ctx = MessageContext::new(Arc::clone(conn), hub.clone(), inbound);
        match Self::invoke(handler.as_ref(), ctx).await {
            Ok(()) => None,
            Err(e) => self.handler_failed(conn, &kind, e).await,
        }
    }

    /// Run a handler, turning a panic into an error.
    async fn invoke(handler: &dyn Handler<C>, ctx: MessageContext<C>) -> Result<(), CallError> {
        match AssertUnwindSafe(handler.call(ctx)).catch_unwind().await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(CallError::Failed(e.to_string())),
            Err(payload) => Err(CallError::Panicked(panic_message(payload.as_ref()))),
        }
    }

    /// Report a handler failure to the peer and apply the configured policy.
    /// A panic always ends the connection.
    async fn handler_failed(&self, conn: &Arc<Connection<C>>, kind: &str, error: CallError) -> Option<Disconnect> {
        match &error {
            CallError::Failed(message) => {
                tracing::warn!(connection_id = %conn.id(), msg_type = %kind, error = %message, "Handler failed")
            }
            CallError::Panicked(message) => {
                tracing::error!(connection_id = %conn.id(), msg_type = %kind, error = %message, "Handler panicked")
            }
        }
        metrics::record_handler_error(kind);

        let frame = error_frame(&self.inner.config.error_type, error.message());
        if let Err(e) = conn.write(frame).await {
            tracing::trace!(connection_id = %conn.id(), error = %e, "Could not report handler failure");
        }
        match (error, self.inner.config.on_handler_error) {
            (CallError::Panicked(message), _) => Some(Disconnect::HandlerFailed(message)),
            (CallError::Failed(_), HandlerErrorPolicy::Notify) => None,
            (CallError::Failed(message), HandlerErrorPolicy::Close) => Some(Disconnect::HandlerFailed(message)),
        }
    }

    async fn run_lifecycle(&self, key: &str, conn: &Arc<Connection<C>>, hub: &Hub<C>) -> Result<(), CallError> {
        let Some(hook) = self.inner.handlers.lookup(key) else {
            return Ok(());
        };
        let ctx = MessageContext::new(Arc::clone(conn), hub.clone(), Inbound::lifecycle(key));
        Self::invoke(hook.as_ref(), ctx).await
    }

    /// Lifecycle keys are never routed from inbound traffic.
    fn is_reserved(&self, kind: &str) -> bool {
        kind == self.inner.config.connect_key || kind == self.inner.config.disconnect_key
    }
}

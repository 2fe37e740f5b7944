//! Connection handle.
//!
//! # Responsibilities
//! - Serialize every write on one connection behind a single lock
//! - Make `close` idempotent and ordered after in-flight writes
//! - Carry the request metadata captured at upgrade time
//! - Hold an optional application context (set once, read many)

use std::net::SocketAddr;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use axum::http::{HeaderMap, Uri};
use tokio::sync::Mutex;

use crate::connection::ConnectionId;
use crate::transport::{Frame, FrameSink, TransportError};

/// Metadata of the request that opened a connection.
#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    /// Peer address, when the transport knows it.
    pub remote_addr: Option<SocketAddr>,
    /// Request URI of the upgrade.
    pub uri: Uri,
    /// Request headers of the upgrade.
    pub headers: HeaderMap,
}

/// One live duplex connection.
///
/// The read half is owned by the dispatch loop; this handle owns the write
/// half. `C` is the application's per-connection context type.
pub struct Connection<C = ()> {
    id: ConnectionId,
    meta: RequestMeta,
    /// `None` once closed.
    sink: Mutex<Option<Box<dyn FrameSink>>>,
    context: ArcSwapOption<C>,
}

impl<C> Connection<C> {
    pub fn new(id: ConnectionId, sink: Box<dyn FrameSink>, meta: RequestMeta) -> Self {
        Self {
            id,
            meta,
            sink: Mutex::new(Some(sink)),
            context: ArcSwapOption::empty(),
        }
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    pub fn meta(&self) -> &RequestMeta {
        &self.meta
    }

    /// Write one frame. The lock is held for the whole write, so concurrent
    /// writers never interleave.
    pub async fn write(&self, frame: impl Into<Frame>) -> Result<(), TransportError> {
        let mut sink = self.sink.lock().await;
        match sink.as_mut() {
            Some(sink) => sink.send_frame(frame.into()).await,
            None => Err(TransportError::Closed),
        }
    }

    /// Close the connection. Safe to call any number of times.
    pub async fn close(&self) {
        let mut sink = self.sink.lock().await;
        if let Some(mut inner) = sink.take() {
            if let Err(e) = inner.close().await {
                tracing::trace!(connection_id = %self.id, error = %e, "Close on dead transport");
            }
        }
    }

    pub async fn is_closed(&self) -> bool {
        self.sink.lock().await.is_none()
    }

    pub fn context(&self) -> Option<Arc<C>> {
        self.context.load_full()
    }

    /// Attach the application context.
    ///
    /// Usually set once, by the prepare hook or the connect hook. A later
    /// call replaces it; readers holding the previous `Arc` keep that value.
    pub fn set_context(&self, value: C) {
        let previous = self.context.swap(Some(Arc::new(value)));
        if previous.is_some() {
            tracing::debug!(connection_id = %self.id, "Connection context replaced");
        }
    }
}

impl<C> std::fmt::Debug for Connection<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("remote_addr", &self.meta.remote_addr)
            .finish_non_exhaustive()
    }
}

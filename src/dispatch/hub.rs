//! Outbound API over the registry.
//!
//! # Responsibilities
//! - Send an envelope to one connection by id
//! - Broadcast to every registered connection, independently per peer
//! - Read and set per-connection context by id
//!
//! Usable from handlers, timers or any other task; it only needs the registry.

use std::sync::Arc;

use futures_util::future::join_all;
use serde::Serialize;
use thiserror::Error;

use crate::connection::{Connection, ConnectionId, Registry};
use crate::dispatch::envelope::Envelope;
use crate::observability::metrics;
use crate::transport::{Frame, TransportError};

#[derive(Debug, Error)]
pub enum HubError {
    #[error("no connection registered with id {0}")]
    UnknownConnection(String),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Outcome of a broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastReport {
    /// Connections the frame was written to.
    pub delivered: usize,
    /// Connections whose write failed (usually closing at the time).
    pub failed: usize,
}

/// Cheap, cloneable handle for talking to connected peers.
pub struct Hub<C = ()> {
    registry: Arc<Registry<C>>,
}

impl<C> Clone for Hub<C> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<C> Hub<C> {
    pub fn new(registry: Arc<Registry<C>>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<Registry<C>> {
        &self.registry
    }

    pub fn connection(&self, id: &str) -> Option<Arc<Connection<C>>> {
        self.registry.get(id)
    }

    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    pub fn ids(&self) -> Vec<ConnectionId> {
        self.registry.ids()
    }

    /// Send an envelope to one connection.
    pub async fn send(&self, id: &str, envelope: &Envelope) -> Result<(), HubError> {
        self.send_frame(id, envelope.to_frame()).await
    }

    /// Send a pre-encoded frame to one connection.
    pub async fn send_frame(&self, id: &str, frame: impl Into<Frame>) -> Result<(), HubError> {
        let conn = self
            .registry
            .get(id)
            .ok_or_else(|| HubError::UnknownConnection(id.to_owned()))?;
        conn.write(frame).await?;
        Ok(())
    }

    /// Send an envelope to every registered connection.
    pub async fn broadcast(&self, envelope: &Envelope) -> BroadcastReport {
        self.broadcast_frame(envelope.to_frame(), None).await
    }

    /// Send an envelope to every registered connection except `skip`.
    pub async fn broadcast_except(&self, envelope: &Envelope, skip: &str) -> BroadcastReport {
        self.broadcast_frame(envelope.to_frame(), Some(skip)).await
    }

    /// Writes run concurrently, so one slow peer does not hold up the rest.
    pub async fn broadcast_frame(&self, frame: Frame, skip: Option<&str>) -> BroadcastReport {
        let targets: Vec<_> = self
            .registry
            .snapshot()
            .into_iter()
            .filter(|conn| skip != Some(conn.id().as_str()))
            .collect();

        let results = join_all(targets.iter().map(|conn| {
            let frame = frame.clone();
            async move {
                let result = conn.write(frame).await;
                if let Err(e) = &result {
                    tracing::trace!(connection_id = %conn.id(), error = %e, "Broadcast write failed");
                }
                result
            }
        }))
        .await;

        let delivered = results.iter().filter(|r| r.is_ok()).count();
        let report = BroadcastReport {
            delivered,
            failed: results.len() - delivered,
        };
        metrics::record_broadcast(report.delivered, report.failed);
        report
    }

    pub fn context(&self, id: &str) -> Option<Arc<C>> {
        self.registry.get(id).and_then(|conn| conn.context())
    }

    pub fn set_context(&self, id: &str, value: C) -> Result<(), HubError> {
        let conn = self
            .registry
            .get(id)
            .ok_or_else(|| HubError::UnknownConnection(id.to_owned()))?;
        conn.set_context(value);
        Ok(())
    }
}

//! Per-message context handed to handlers.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::connection::{Connection, ConnectionId};
use crate::dispatch::envelope::{Envelope, Inbound};
use crate::dispatch::handler::HandlerResult;
use crate::dispatch::hub::Hub;

/// Everything a handler needs: the inbound envelope, the originating
/// connection and a hub for reaching other peers.
pub struct MessageContext<C = ()> {
    conn: Arc<Connection<C>>,
    hub: Hub<C>,
    inbound: Inbound,
}

impl<C> Clone for MessageContext<C> {
    fn clone(&self) -> Self {
        Self {
            conn: Arc::clone(&self.conn),
            hub: self.hub.clone(),
            inbound: self.inbound.clone(),
        }
    }
}

impl<C> MessageContext<C> {
    pub fn new(conn: Arc<Connection<C>>, hub: Hub<C>, inbound: Inbound) -> Self {
        Self { conn, hub, inbound }
    }

    pub fn id(&self) -> &ConnectionId {
        self.conn.id()
    }

    pub fn connection(&self) -> &Arc<Connection<C>> {
        &self.conn
    }

    pub fn hub(&self) -> &Hub<C> {
        &self.hub
    }

    /// Routing key this message was dispatched on.
    pub fn kind(&self) -> &str {
        self.inbound.kind()
    }

    pub fn data(&self) -> Option<&Value> {
        self.inbound.data()
    }

    /// The frame exactly as received.
    pub fn raw(&self) -> &str {
        self.inbound.raw()
    }

    /// Decode the `data` field.
    pub fn bind<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        self.inbound.bind()
    }

    pub fn context(&self) -> Option<Arc<C>> {
        self.conn.context()
    }

    pub fn set_context(&self, value: C) {
        self.conn.set_context(value);
    }

    /// Send `{"type": kind, "data": data}` back to this connection.
    pub async fn reply(&self, kind: &str, data: impl Serialize) -> HandlerResult {
        self.send(&Envelope::with_data(kind, data)?).await
    }

    /// Send an envelope back to this connection.
    pub async fn send(&self, envelope: &Envelope) -> HandlerResult {
        self.conn.write(envelope.to_frame()).await?;
        Ok(())
    }
}

//! Handlers and the handler table.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::dispatch::context::MessageContext;
use crate::dispatch::hub::HubError;
use crate::transport::TransportError;

pub type HandlerResult = Result<(), HandlerError>;

/// Failure reported by a handler. Its message is sent back to the peer.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("{0}")]
    Message(String),

    #[error("invalid payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),

    #[error("send failed: {0}")]
    Send(#[from] TransportError),

    #[error(transparent)]
    Hub(#[from] HubError),
}

impl HandlerError {
    pub fn msg(message: impl Into<String>) -> Self {
        HandlerError::Message(message.into())
    }
}

/// Something that handles one message type.
///
/// Implemented for any `Fn(MessageContext<C>) -> impl Future<Output = HandlerResult>`,
/// so plain async closures work as handlers.
#[async_trait]
pub trait Handler<C: Send + Sync + 'static>: Send + Sync + 'static {
    async fn call(&self, ctx: MessageContext<C>) -> HandlerResult;
}

#[async_trait]
impl<C, F, Fut> Handler<C> for F
where
    C: Send + Sync + 'static,
    F: Fn(MessageContext<C>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn call(&self, ctx: MessageContext<C>) -> HandlerResult {
        (self)(ctx).await
    }
}

/// Routing key → handler.
///
/// Filled while building the dispatcher, read-only once serving starts, so
/// lookups take no lock.
pub struct HandlerTable<C: Send + Sync + 'static> {
    handlers: HashMap<String, Arc<dyn Handler<C>>>,
}

impl<C: Send + Sync + 'static> HandlerTable<C> {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler. A second registration for the same key replaces the first.
    pub fn register(&mut self, key: impl Into<String>, handler: impl Handler<C>) {
        let key = key.into();
        if self.handlers.insert(key.clone(), Arc::new(handler)).is_some() {
            tracing::debug!(msg_type = %key, "Handler replaced");
        }
    }

    pub fn lookup(&self, key: &str) -> Option<Arc<dyn Handler<C>>> {
        self.handlers.get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.handlers.contains_key(key)
    }

    /// Registered keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.handlers.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl<C: Send + Sync + 'static> Default for HandlerTable<C> {
    fn default() -> Self {
        Self::new()
    }
}

//! Registry of live connections.
//!
//! # Responsibilities
//! - Map connection ids to handles for lookup and broadcast
//! - Hand out snapshots so iteration never holds a map lock across I/O
//! - Remove entries through a drop guard, whatever way a loop exits

use std::sync::Arc;

use dashmap::DashMap;

use crate::connection::{Connection, ConnectionId};
use crate::observability::metrics;

/// Concurrent map of connection id → handle.
///
/// One instance per server; nothing here is process-global.
pub struct Registry<C = ()> {
    inner: DashMap<ConnectionId, Arc<Connection<C>>>,
}

impl<C> Registry<C> {
    pub fn new() -> Self {
        Self {
            inner: DashMap::new(),
        }
    }

    /// Insert a connection under its own id.
    pub fn insert(&self, conn: Arc<Connection<C>>) {
        let id = conn.id().clone();
        if self.inner.insert(id.clone(), conn).is_some() {
            tracing::warn!(connection_id = %id, "Replaced an already registered connection");
        }
        metrics::record_active_connections(self.inner.len());
    }

    /// Remove a connection. Removing an unknown id is a no-op.
    pub fn remove(&self, id: &str) -> Option<Arc<Connection<C>>> {
        let removed = self.inner.remove(id).map(|(_, conn)| conn);
        metrics::record_active_connections(self.inner.len());
        removed
    }

    pub fn get(&self, id: &str) -> Option<Arc<Connection<C>>> {
        self.inner.get(id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn ids(&self) -> Vec<ConnectionId> {
        self.inner.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Handles registered at the time of the call.
    ///
    /// Connections that leave afterwards stay in the snapshot; writes to them
    /// fail with `TransportError::Closed` once they are closed.
    pub fn snapshot(&self) -> Vec<Arc<Connection<C>>> {
        self.inner.iter().map(|entry| Arc::clone(entry.value())).collect()
    }

    /// Run `f` for every connection of a snapshot.
    pub fn for_each(&self, mut f: impl FnMut(&Arc<Connection<C>>)) {
        for conn in self.snapshot() {
            f(&conn);
        }
    }
}

impl<C> Registry<C> {
    /// Insert `conn` and return a guard that unregisters it on drop.
    pub fn register(self: &Arc<Self>, conn: Arc<Connection<C>>) -> Registration<C> {
        let id = conn.id().clone();
        self.insert(conn);
        tracing::debug!(connection_id = %id, active = self.len(), "Connection registered");
        Registration {
            registry: Arc::clone(self),
            id,
        }
    }
}

impl<C> Default for Registry<C> {
    fn default() -> Self {
        Self::new()
    }
}

/// Keeps a connection registered for as long as it is alive.
pub struct Registration<C = ()> {
    registry: Arc<Registry<C>>,
    id: ConnectionId,
}

impl<C> Registration<C> {
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }
}

impl<C> Drop for Registration<C> {
    fn drop(&mut self) {
        self.registry.remove(self.id.as_str());
        tracing::debug!(connection_id = %self.id, active = self.registry.len(), "Connection unregistered");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::RequestMeta;
    use crate::transport::{memory, Duplex};

    fn connection() -> Arc<Connection> {
        let (transport, _peer) = memory::pair();
        let (sink, _stream) = transport.into_split();
        Arc::new(Connection::new(
            ConnectionId::generate(),
            Box::new(sink),
            RequestMeta::default(),
        ))
    }

    #[test]
    fn registration_guard_counts() {
        let registry: Arc<Registry> = Arc::new(Registry::new());
        assert!(registry.is_empty());

        let guard1 = registry.register(connection());
        assert_eq!(registry.len(), 1);

        let guard2 = registry.register(connection());
        assert_eq!(registry.len(), 2);
        assert!(registry.contains(guard2.id().as_str()));

        drop(guard1);
        assert_eq!(registry.len(), 1);

        drop(guard2);
        assert!(registry.is_empty());
    }

    #[test]
    fn remove_unknown_is_noop() {
        let registry: Registry = Registry::new();
        assert!(registry.remove("missing").is_none());
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn snapshot_survives_concurrent_removal() {
        let registry: Arc<Registry> = Arc::new(Registry::new());
        let guards: Vec<_> = (0..16).map(|_| registry.register(connection())).collect();

        let mut seen = 0;
        let mut guards = guards.into_iter();
        registry.for_each(|_| {
            // Unregister while the snapshot is being walked.
            drop(guards.next());
            seen += 1;
        });
        assert_eq!(seen, 16);
        assert!(registry.is_empty());
    }

    #[test]
    fn concurrent_register_and_drop_keeps_count() {
        let registry: Arc<Registry> = Arc::new(Registry::new());
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    let mut held = Vec::new();
                    for n in 0..200 {
                        held.push(registry.register(connection()));
                        if n % 2 == 0 {
                            held.pop();
                        }
                        let _ = registry.snapshot();
                    }
                    held
                })
            })
            .collect();

        let held: Vec<_> = threads.into_iter().flat_map(|t| t.join().unwrap()).collect();
        assert_eq!(registry.len(), held.len());
        drop(held);
        assert!(registry.is_empty());
    }
}

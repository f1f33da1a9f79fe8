//! Registry of live server connections.
//!
//! The accept path inserts and each connection's terminate hook removes,
//! possibly from different tasks at the same time. Every mutation goes
//! through one lock.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │           ConnectionRegistry            │
//! │  ┌─────────────────────────────────┐    │
//! │  │ ConnectionId A → Connection A   │    │
//! │  │ ConnectionId B → Connection B   │    │
//! │  │ ConnectionId C → Connection C   │    │
//! │  └─────────────────────────────────┘    │
//! └─────────────────────────────────────────┘
//! ```

// ============================================================================
// Imports
// ============================================================================

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use crate::identifiers::ConnectionId;

use super::Connection;

// ============================================================================
// ConnectionRegistry
// ============================================================================

/// Connections keyed by identity.
///
/// Holds the only long-lived handle to a server connection.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: RwLock<FxHashMap<ConnectionId, Connection>>,
}

impl ConnectionRegistry {
    /// Creates an empty registry.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a connection under its own identity.
    ///
    /// Returns `false` and keeps the existing entry if the identity is taken.
    pub fn insert(&self, connection: Connection) -> bool {
        let id = connection.id();
        let mut connections = self.connections.write();

        if connections.contains_key(&id) {
            warn!(connection_id = %id, "Duplicate connection identity");
            return false;
        }

        connections.insert(id, connection);
        debug!(connection_id = %id, count = connections.len(), "Connection registered");
        true
    }

    /// Removes a connection, returning it if it was present.
    pub fn remove(&self, id: &ConnectionId) -> Option<Connection> {
        let removed = self.connections.write().remove(id);
        if removed.is_some() {
            debug!(connection_id = %id, "Connection removed from registry");
        }
        removed
    }

    /// Returns a handle to a connection.
    #[must_use]
    pub fn get(&self, id: &ConnectionId) -> Option<Connection> {
        self.connections.read().get(id).cloned()
    }

    /// Returns `true` if the identity is registered.
    #[must_use]
    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.read().contains_key(id)
    }

    /// Returns the registered identities.
    #[must_use]
    pub fn ids(&self) -> Vec<ConnectionId> {
        self.connections.read().keys().copied().collect()
    }

    /// Returns the number of registered connections.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    /// Returns `true` if nothing is registered.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }

    /// Removes and returns every connection.
    pub fn drain(&self) -> Vec<Connection> {
        let mut connections = self.connections.write();
        connections.drain().map(|(_, connection)| connection).collect()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::thread;

    use tokio::sync::mpsc;

    use crate::transport::Role;

    fn connection() -> Connection {
        let (tx, _rx) = mpsc::unbounded_channel();
        Connection::new(Role::Server, tx)
    }

    #[test]
    fn test_insert_get_remove() {
        let registry = ConnectionRegistry::new();
        let conn = connection();
        let id = conn.id();

        assert!(registry.insert(conn.clone()));
        assert!(registry.contains(&id));
        assert_eq!(registry.get(&id).map(|c| c.id()), Some(id));
        assert_eq!(registry.len(), 1);

        assert!(registry.remove(&id).is_some());
        assert!(registry.remove(&id).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_duplicate_insert_keeps_entry() {
        let registry = ConnectionRegistry::new();
        let conn = connection();
        assert!(registry.insert(conn.clone()));
        assert!(!registry.insert(conn));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unknown_id() {
        let registry = ConnectionRegistry::new();
        let id = ConnectionId::generate();
        assert!(registry.get(&id).is_none());
        assert!(registry.remove(&id).is_none());
    }

    #[test]
    fn test_drain_empties_registry() {
        let registry = ConnectionRegistry::new();
        for _ in 0..5 {
            registry.insert(connection());
        }
        assert_eq!(registry.drain().len(), 5);
        assert!(registry.is_empty());
        assert!(registry.ids().is_empty());
    }

    #[test]
    fn test_concurrent_insert_and_remove() {
        let registry = Arc::new(ConnectionRegistry::new());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    let mut kept = Vec::new();
                    for i in 0..200 {
                        let conn = connection();
                        let id = conn.id();
                        assert!(registry.insert(conn));
                        if i % 2 == 0 {
                            assert!(registry.remove(&id).is_some());
                        } else {
                            kept.push(id);
                        }
                    }
                    kept
                })
            })
            .collect();

        let kept: Vec<ConnectionId> = handles
            .into_iter()
            .flat_map(|h| h.join().expect("thread joins"))
            .collect();

        assert_eq!(registry.len(), kept.len());
        assert!(kept.iter().all(|id| registry.contains(id)));
    }
}

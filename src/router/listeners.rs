//! Event listener registry.
//!
//! Listeners subscribe by [`EventName`] and are invoked in registration
//! order. A panicking listener is logged and skipped; delivery to the
//! remaining listeners continues.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::{debug, error};

use crate::protocol::{EventName, PluginEvent};

// ============================================================================
// Types
// ============================================================================

/// Callback invoked for each delivered event.
pub type Listener = Arc<dyn Fn(&PluginEvent) + Send + Sync>;

type ListenerEntry = (u64, Listener);

// ============================================================================
// ListenerRegistry
// ============================================================================

/// Listeners grouped by event name.
#[derive(Default)]
pub struct ListenerRegistry {
    next_id: AtomicU64,
    listeners: RwLock<FxHashMap<EventName, Vec<ListenerEntry>>>,
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("count", &self.len())
            .finish_non_exhaustive()
    }
}

impl ListenerRegistry {
    /// Creates an empty registry.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `listener` for `name`.
    pub fn add(self: &Arc<Self>, name: EventName, listener: Listener) -> ListenerHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .write()
            .entry(name)
            .or_default()
            .push((id, listener));

        debug!(event = %name, listener_id = id, "Listener added");

        ListenerHandle {
            id,
            name,
            registry: Arc::downgrade(self),
        }
    }

    /// Removes one listener. Returns `false` if it was already gone.
    pub fn remove(&self, name: EventName, id: u64) -> bool {
        let mut listeners = self.listeners.write();
        let Some(entries) = listeners.get_mut(&name) else {
            return false;
        };

        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        let removed = entries.len() != before;

        if entries.is_empty() {
            listeners.remove(&name);
        }
        removed
    }

    /// Removes every listener.
    pub fn clear(&self) {
        self.listeners.write().clear();
    }

    /// Returns the number of listeners for `name`.
    #[must_use]
    pub fn count(&self, name: EventName) -> usize {
        self.listeners.read().get(&name).map_or(0, Vec::len)
    }

    /// Returns the total number of listeners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners.read().values().map(Vec::len).sum()
    }

    /// Returns `true` if no listener is registered.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invokes every listener registered for the event's name.
    ///
    /// Listeners run outside the lock, so they may add or remove listeners.
    pub fn dispatch(&self, event: &PluginEvent) {
        let name = event.name();
        let listeners: Vec<Listener> = match self.listeners.read().get(&name) {
            Some(entries) => entries.iter().map(|(_, l)| Arc::clone(l)).collect(),
            None => return,
        };

        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                error!(event = %name, "Listener panicked");
            }
        }
    }
}

// ============================================================================
// ListenerHandle
// ============================================================================

/// Handle to one registered listener.
///
/// Dropping the handle keeps the listener registered.
#[derive(Debug, Clone)]
pub struct ListenerHandle {
    id: u64,
    name: EventName,
    registry: Weak<ListenerRegistry>,
}

impl ListenerHandle {
    /// Returns the event the listener is subscribed to.
    #[inline]
    #[must_use]
    pub fn event(&self) -> EventName {
        self.name
    }

    /// Unsubscribes the listener.
    pub fn remove(self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.name, self.id);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

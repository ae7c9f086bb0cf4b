//! Heap listeners and their owner-tracking registry.
//!
//! A registration remembers its owner weakly. Once the owner is gone the
//! registration is pruned the next time the registry is touched, so
//! short-lived callers never have to unregister.

use parking_lot::Mutex;
use std::any::Any;
use std::sync::{Arc, Weak};

use super::Heap;
use super::snapshot::SnapshotDiff;

/// Notified when a heap detects a change.
pub trait HeapListener: Send + Sync {
    fn on_resource_changed(&self, heap: &Heap);

    fn on_resolution_event(&self, _event: &ResolutionEvent) {}
}

/// One detected change.
#[derive(Debug, Clone)]
pub struct ResolutionEvent {
    /// Heap whose listeners are being notified.
    pub heap_id: String,
    /// Heap where the change was detected (a nested heap for relayed events).
    pub origin_id: String,
    pub diff: SnapshotDiff,
}

struct Registration {
    key: Option<String>,
    owner: Weak<dyn Any + Send + Sync>,
    listener: Arc<dyn HeapListener>,
}

impl Registration {
    fn is_alive(&self) -> bool {
        self.owner.strong_count() > 0
    }
}

#[derive(Default)]
pub struct ListenerRegistry {
    entries: Mutex<Vec<Registration>>,
}

impl ListenerRegistry {
    /// Register `listener` for as long as `owner` is alive.
    pub fn register<O>(&self, owner: &Arc<O>, listener: Arc<dyn HeapListener>)
    where
        O: Any + Send + Sync,
    {
        let owner: Weak<O> = Arc::downgrade(owner);
        let owner: Weak<dyn Any + Send + Sync> = owner;
        let mut entries = self.entries.lock();
        entries.retain(Registration::is_alive);
        entries.push(Registration {
            key: None,
            owner,
            listener,
        });
    }

    /// Register under `key` unless a live registration already uses it.
    ///
    /// Returns whether the listener was added.
    pub fn register_unique<O>(&self, key: &str, owner: &Arc<O>, listener: Arc<dyn HeapListener>) -> bool
    where
        O: Any + Send + Sync,
    {
        let owner: Weak<O> = Arc::downgrade(owner);
        let owner: Weak<dyn Any + Send + Sync> = owner;
        let mut entries = self.entries.lock();
        entries.retain(Registration::is_alive);
        if entries.iter().any(|r| r.key.as_deref() == Some(key)) {
            return false;
        }
        entries.push(Registration {
            key: Some(key.to_string()),
            owner,
            listener,
        });
        true
    }

    /// Live listeners, pruning dead registrations.
    pub fn live(&self) -> Vec<Arc<dyn HeapListener>> {
        let mut entries = self.entries.lock();
        entries.retain(Registration::is_alive);
        entries.iter().map(|r| r.listener.clone()).collect()
    }

    pub fn len(&self) -> usize {
        let mut entries = self.entries.lock();
        entries.retain(Registration::is_alive);
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

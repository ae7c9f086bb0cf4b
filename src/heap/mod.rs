//! Resolver ("heap"): name patterns resolved through a backend.
//!
//! A heap lists the paths matching its patterns, turns them into nuts and
//! remembers each path's timestamp. Re-scanning (on a polling tick or on
//! demand) diffs the new snapshot against the last one; any added, removed
//! or updated path is a change, reported once to every live listener.
//!
//! Heaps compose: a heap may embed nested heaps, whose nuts are appended to
//! its own and whose changes are re-emitted to its listeners.

mod listener;
mod snapshot;

pub use listener::{HeapListener, ListenerRegistry, ResolutionEvent};
pub use snapshot::{Snapshot, SnapshotDiff};

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashSet;
use std::any::Any;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::backend::Backend;
use crate::error::{EngineError, Result};
use crate::nut::Nut;
use crate::scheduler::{SCHEDULER, TaskHandle};
use crate::{debug, log};

// =============================================================================
// Heap
// =============================================================================

pub struct Heap {
    id: String,
    patterns: Vec<String>,
    backend: Arc<dyn Backend>,
    composition: Vec<Arc<Heap>>,
    state: RwLock<HeapState>,
    /// Serializes scans so two concurrent checks never report the same change
    checking: Mutex<()>,
    listeners: ListenerRegistry,
    polling: Mutex<Option<TaskHandle>>,
    this: Weak<Heap>,
}

struct HeapState {
    snapshot: Snapshot,
    nuts: Vec<Nut>,
}

/// Builder for [`Heap`].
pub struct HeapBuilder {
    id: String,
    backend: Arc<dyn Backend>,
    patterns: Vec<String>,
    composition: Vec<Arc<Heap>>,
    polling: Duration,
}

impl HeapBuilder {
    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.patterns.push(pattern.into());
        self
    }

    pub fn patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.patterns.extend(patterns.into_iter().map(Into::into));
        self
    }

    /// Embed a nested heap.
    pub fn compose(mut self, heap: Arc<Heap>) -> Self {
        self.composition.push(heap);
        self
    }

    /// Re-scan every `interval`. Zero disables polling.
    pub fn polling(mut self, interval: Duration) -> Self {
        self.polling = interval;
        self
    }

    /// Resolve the patterns and build the heap.
    ///
    /// Fails on a heap with nothing to resolve, on patterns matching
    /// nothing, on unknown content types and on numeric first segments.
    pub fn build(self) -> Result<Arc<Heap>> {
        if self.patterns.is_empty() && self.composition.is_empty() {
            return Err(EngineError::config(format!(
                "heap '{}' has neither patterns nor nested heaps",
                self.id
            )));
        }

        let snapshot = scan(self.backend.as_ref(), &self.patterns)?;
        if snapshot.is_empty() && self.composition.is_empty() {
            return Err(EngineError::config(format!(
                "heap '{}': patterns {:?} match nothing in '{}'",
                self.id,
                self.patterns,
                self.backend.name()
            )));
        }
        let nuts = create_nuts(&self.backend, &snapshot, &self.patterns)?;
        let count = nuts.len();

        let heap = Arc::new_cyclic(|this| Heap {
            id: self.id,
            patterns: self.patterns,
            backend: self.backend,
            composition: self.composition,
            state: RwLock::new(HeapState { snapshot, nuts }),
            checking: Mutex::new(()),
            listeners: ListenerRegistry::default(),
            polling: Mutex::new(None),
            this: this.clone(),
        });

        for nested in &heap.composition {
            nested.add_listener(
                &heap,
                Arc::new(Relay {
                    parent: Arc::downgrade(&heap),
                }),
            );
        }

        if !self.polling.is_zero() {
            heap.start_polling(self.polling);
        }

        debug!("heap"; "'{}' resolved {} nut(s)", heap.id, count);
        Ok(heap)
    }
}

impl Heap {
    pub fn builder(id: impl Into<String>, backend: Arc<dyn Backend>) -> HeapBuilder {
        HeapBuilder {
            id: id.into(),
            backend,
            patterns: Vec::new(),
            composition: Vec::new(),
            polling: Duration::ZERO,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn composition(&self) -> &[Arc<Heap>] {
        &self.composition
    }

    /// Resolved nuts: own nuts first, then each nested heap's.
    ///
    /// A nut name appearing twice is kept once, at its first position.
    pub fn nuts(&self) -> Vec<Nut> {
        let mut nuts = self.state.read().nuts.clone();
        for nested in &self.composition {
            nuts.extend(nested.nuts());
        }
        let mut seen = FxHashSet::default();
        nuts.retain(|nut| seen.insert(nut.name().to_string()));
        nuts
    }

    /// Whether this heap or a nested one contains `heap`.
    pub fn contains(&self, heap: &Heap) -> bool {
        std::ptr::eq(self, heap) || self.composition.iter().any(|h| h.contains(heap))
    }

    // =========================================================================
    // Listeners
    // =========================================================================

    /// Register a listener kept for as long as `owner` is alive.
    pub fn add_listener<O>(&self, owner: &Arc<O>, listener: Arc<dyn HeapListener>)
    where
        O: Any + Send + Sync,
    {
        self.listeners.register(owner, listener);
    }

    /// Register a listener under `key` unless one is already registered.
    pub fn add_listener_once<O>(&self, key: &str, owner: &Arc<O>, listener: Arc<dyn HeapListener>) -> bool
    where
        O: Any + Send + Sync,
    {
        self.listeners.register_unique(key, owner, listener)
    }

    /// Number of live listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    fn fire(&self, event: &ResolutionEvent) {
        for listener in self.listeners.live() {
            listener.on_resource_changed(self);
            listener.on_resolution_event(event);
        }
    }

    // =========================================================================
    // Change detection
    // =========================================================================

    /// Re-scan this heap and its nested heaps now.
    ///
    /// Returns whether any change was detected. Each change is reported to
    /// listeners exactly once, however many checks observe it.
    pub fn check_now(&self) -> Result<bool> {
        let mut changed = false;
        for nested in &self.composition {
            changed |= nested.check_now()?;
        }
        Ok(self.check_own()? || changed)
    }

    fn check_own(&self) -> Result<bool> {
        if self.patterns.is_empty() {
            return Ok(false);
        }

        let event = {
            let _guard = self.checking.lock();
            let fresh = scan(self.backend.as_ref(), &self.patterns)?;
            let diff = self.state.read().snapshot.diff(&fresh);
            if diff.is_empty() {
                return Ok(false);
            }
            let nuts = create_nuts(&self.backend, &fresh, &self.patterns)?;
            let mut state = self.state.write();
            state.snapshot = fresh;
            state.nuts = nuts;
            ResolutionEvent {
                heap_id: self.id.clone(),
                origin_id: self.id.clone(),
                diff,
            }
        };

        log!(
            "heap"; "'{}' changed: {} added, {} removed, {} updated",
            self.id,
            event.diff.added.len(),
            event.diff.removed.len(),
            event.diff.changed.len()
        );
        self.fire(&event);
        Ok(true)
    }

    fn start_polling(&self, interval: Duration) {
        let heap = self.this.clone();
        let handle = SCHEDULER.schedule_every(interval, move || {
            let Some(heap) = heap.upgrade() else {
                return;
            };
            if let Err(e) = heap.check_own() {
                log!("poll"; "'{}' failed: {}", heap.id, e);
            }
        });
        *self.polling.lock() = Some(handle);
    }

    pub fn is_polling(&self) -> bool {
        self.polling.lock().as_ref().is_some_and(TaskHandle::is_active)
    }

    /// Stop polling; `check_now` still works.
    pub fn stop_polling(&self) {
        self.polling.lock().take();
    }
}

impl fmt::Debug for Heap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Heap")
            .field("id", &self.id)
            .field("patterns", &self.patterns)
            .field("backend", &self.backend.name())
            .field("composition", &self.composition.len())
            .finish_non_exhaustive()
    }
}

/// Re-emits a nested heap's changes to its parent's listeners.
struct Relay {
    parent: Weak<Heap>,
}

impl HeapListener for Relay {
    fn on_resource_changed(&self, _: &Heap) {}

    fn on_resolution_event(&self, event: &ResolutionEvent) {
        if let Some(parent) = self.parent.upgrade() {
            parent.fire(&ResolutionEvent {
                heap_id: parent.id.clone(),
                origin_id: event.origin_id.clone(),
                diff: event.diff.clone(),
            });
        }
    }
}

// =============================================================================
// Scanning
// =============================================================================

fn scan(backend: &dyn Backend, patterns: &[String]) -> Result<Snapshot> {
    let mut snapshot = Snapshot::default();
    for pattern in patterns {
        snapshot.touch_pattern(pattern);
        for path in backend.list_paths(pattern)? {
            validate_path(&path)?;
            let timestamp = backend.last_update(&path)?;
            snapshot.insert(pattern, path, timestamp);
        }
    }
    Ok(snapshot)
}

fn create_nuts(backend: &Arc<dyn Backend>, snapshot: &Snapshot, patterns: &[String]) -> Result<Vec<Nut>> {
    snapshot
        .paths(patterns)
        .iter()
        .map(|path| Nut::from_backend(backend.clone(), path))
        .collect()
}

/// The first segment of a path is reserved for injected version numbers.
fn validate_path(path: &str) -> Result<()> {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    if let Some((first, _)) = trimmed.split_once('/')
        && is_number(first)
    {
        return Err(EngineError::config(format!(
            "first level of a path cannot be numeric: '{path}'"
        )));
    }
    Ok(())
}

/// An optionally negative run of digits.
fn is_number(segment: &str) -> bool {
    let digits = segment.strip_prefix('-').unwrap_or(segment);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

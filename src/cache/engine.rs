//! The caching head node.

use dashmap::DashMap;
use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use super::result::{BEST_EFFORT_PREFIX, CacheResult};
use super::size::parse_size;
use super::store::CacheStore;
use crate::engine::{EngineRequest, HeadNode, RequestKey, Stage, run_chains_over};
use crate::error::Result;
use crate::heap::{Heap, HeapListener};
use crate::nut::Nut;
use crate::scheduler::{SCHEDULER, TaskHandle};
use crate::{debug, log};

/// Cache settings.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub enabled: bool,
    pub best_effort: bool,
    /// Memory budget in bytes
    pub max_memory: u64,
    /// Clear everything this often; zero keeps entries until invalidated
    pub time_to_live: Duration,
    pub spill_dir: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            best_effort: false,
            max_memory: 10 * 1024 * 1024,
            time_to_live: Duration::ZERO,
            spill_dir: None,
        }
    }
}

impl CacheConfig {
    /// Set the budget from a size such as `10MB`.
    pub fn max_memory(mut self, size: &str) -> Result<Self> {
        self.max_memory = parse_size(size)?;
        Ok(self)
    }
}

/// Memoizes whole executions per request key.
///
/// Exactly one invalidation listener is registered per heap, however many
/// requests over that heap are parsed. When it fires, every entry whose key
/// came from that heap is removed.
///
/// Each heap also has a generation, bumped on every invalidation. A result
/// computed while its heap's generation moved is dropped right after being
/// stored, so a change seen mid-computation is never lost.
pub struct CacheEngine {
    inner: Arc<CacheInner>,
    _expiry: Option<TaskHandle>,
}

struct CacheInner {
    config: CacheConfig,
    store: CacheStore,
    /// Keys computed from each heap, by heap id
    dependents: DashMap<String, FxHashSet<RequestKey>>,
    /// Invalidations seen per heap id
    generations: DashMap<String, u64>,
    /// Per-key locks so a key is only computed once at a time
    locks: DashMap<RequestKey, Arc<Mutex<()>>>,
    /// Listener registration key, unique per cache
    listener_key: String,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheEngine {
    pub fn new(config: CacheConfig) -> Result<Self> {
        let store = CacheStore::new(config.max_memory, config.spill_dir.as_deref())?;
        let ttl = config.time_to_live;
        let inner = Arc::new_cyclic(|this: &Weak<CacheInner>| CacheInner {
            listener_key: format!("cache:{:p}", this.as_ptr()),
            config,
            store,
            dependents: DashMap::new(),
            generations: DashMap::new(),
            locks: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        });

        let expiry = (!ttl.is_zero()).then(|| {
            let cache = Arc::downgrade(&inner);
            SCHEDULER.schedule_every(ttl, move || {
                if let Some(cache) = cache.upgrade() {
                    debug!("cache"; "time to live elapsed, clearing");
                    cache.clear();
                }
            })
        });

        Ok(Self {
            inner,
            _expiry: expiry,
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    // =========================================================================
    // Administration
    // =========================================================================

    pub fn put_to_cache(&self, key: RequestKey, result: CacheResult) -> Result<()> {
        self.inner.store.put(key, result)
    }

    pub fn get_from_cache(&self, key: &RequestKey) -> Result<Option<CacheResult>> {
        self.inner.store.get(key)
    }

    pub fn remove_from_cache(&self, key: &RequestKey) -> bool {
        self.inner.remove(key)
    }

    pub fn clear_cache(&self) {
        self.inner.clear();
    }

    pub fn memory_in_use(&self) -> u64 {
        self.inner.store.memory_in_use()
    }

    pub fn len(&self) -> usize {
        self.inner.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.store.is_empty()
    }

    pub fn spilled_count(&self) -> usize {
        self.inner.store.spilled_count()
    }

    /// (hits, misses) since creation.
    pub fn stats(&self) -> (u64, u64) {
        (
            self.inner.hits.load(Ordering::Relaxed),
            self.inner.misses.load(Ordering::Relaxed),
        )
    }

    /// Find a cached nut by name for `request`'s current key.
    ///
    /// Names under `best-effort/` are served from the best-effort result.
    pub fn lookup(&self, request: &EngineRequest, name: &str) -> Result<Option<Nut>> {
        let key = request.key();
        Ok(self
            .inner
            .store
            .get(&key)?
            .and_then(|result| result.get(name).cloned()))
    }
}

impl CacheInner {
    fn remove(&self, key: &RequestKey) -> bool {
        self.locks.remove(key);
        self.store.remove(key)
    }

    fn clear(&self) {
        self.store.clear();
        self.dependents.clear();
        self.locks.clear();
    }

    fn lock_for(&self, key: &RequestKey) -> Arc<Mutex<()>> {
        self.locks.entry(key.clone()).or_default().clone()
    }

    /// Remember that `key` depends on `heap` and make sure this cache
    /// listens to it.
    fn register_interest(self: &Arc<Self>, heap: &Heap, key: &RequestKey) {
        self.dependents
            .entry(heap.id().to_string())
            .or_default()
            .insert(key.clone());

        let added = heap.add_listener_once(
            &self.listener_key,
            self,
            Arc::new(Invalidator {
                cache: Arc::downgrade(self),
            }),
        );
        if added {
            debug!("cache"; "listening to heap '{}'", heap.id());
        }
    }

    fn generation(&self, heap_id: &str) -> u64 {
        self.generations.get(heap_id).map_or(0, |g| *g)
    }

    /// Store `result` under `key`, then take it back out if `heap_id` was
    /// invalidated after `generation` was read.
    fn put_if_current(
        &self,
        heap_id: &str,
        generation: u64,
        key: &RequestKey,
        result: CacheResult,
    ) -> Result<bool> {
        self.store.put(key.clone(), result)?;
        if self.generation(heap_id) != generation {
            self.remove(key);
            debug!("cache"; "heap '{heap_id}' changed while computing {key}, not kept");
            return Ok(false);
        }
        Ok(true)
    }

    fn invalidate_heap(&self, heap_id: &str) {
        // Bump first: a computation storing after this sees the new value
        *self.generations.entry(heap_id.to_string()).or_default() += 1;
        let Some((_, keys)) = self.dependents.remove(heap_id) else {
            return;
        };
        let removed = keys.iter().filter(|key| self.remove(key)).count();
        if removed > 0 {
            log!("cache"; "heap '{heap_id}' changed, invalidated {removed} entry(ies)");
        }
    }

    /// Run the chains with every stage and freeze the output.
    fn compute(request: &EngineRequest, nuts: Vec<Nut>) -> Result<Vec<Nut>> {
        run_chains_over(request, nuts)?
            .iter()
            .map(Nut::materialize)
            .collect()
    }

    /// Run without the costly stages and freeze the output under
    /// `best-effort/`.
    fn compute_best_effort(request: &EngineRequest, nuts: Vec<Nut>) -> Result<Vec<Nut>> {
        let quick = request.excluding(&Stage::BEST_EFFORT_SKIPPED);
        run_chains_over(&quick, nuts)?
            .iter()
            .map(|nut| -> Result<Nut> { Ok(nut.materialize()?.with_prefix(BEST_EFFORT_PREFIX)) })
            .collect()
    }

    /// Complete a best-effort entry with the default result.
    fn complete(
        &self,
        request: &EngineRequest,
        generation: u64,
        key: &RequestKey,
        nuts: Vec<Nut>,
    ) -> Result<()> {
        let lock = self.lock_for(key);
        let _guard = lock.lock();

        // Invalidated meanwhile: a later parse will start over
        let Some(mut entry) = self.store.get(key)? else {
            return Ok(());
        };
        if entry.default_result().is_some() {
            return Ok(());
        }
        entry.set_default(Self::compute(request, nuts)?);
        if self.put_if_current(request.heap().id(), generation, key, entry)? {
            debug!("cache"; "completed best-effort entry {key}");
        }
        Ok(())
    }
}

impl HeadNode for CacheEngine {
    fn parse(&self, request: &EngineRequest) -> Result<Vec<Nut>> {
        if !self.inner.config.enabled {
            return run_chains_over(request, request.heap().nuts());
        }

        // Read before resolving so any later change is noticed when storing
        let heap_id = request.heap().id();
        let generation = self.inner.generation(heap_id);
        let nuts = request.heap().nuts();

        let (dynamic, stable): (Vec<_>, Vec<_>) = nuts.into_iter().partition(Nut::is_dynamic);
        let key = RequestKey::new(request.workflow_id(), &stable);
        self.inner.register_interest(request.heap(), &key);

        let mut submit_default = false;
        let mut out = {
            let lock = self.inner.lock_for(&key);
            let _guard = lock.lock();

            match self.inner.store.get(&key)? {
                Some(result) => {
                    self.inner.hits.fetch_add(1, Ordering::Relaxed);
                    debug!("cache"; "hit {key}");
                    result.nuts().to_vec()
                }
                None if stable.is_empty() => Vec::new(),
                None if self.inner.config.best_effort => {
                    self.inner.misses.fetch_add(1, Ordering::Relaxed);
                    let quick = CacheInner::compute_best_effort(request, stable.clone())?;
                    submit_default = self.inner.put_if_current(
                        heap_id,
                        generation,
                        &key,
                        CacheResult::with_best_effort(quick.clone()),
                    )?;
                    quick
                }
                None => {
                    self.inner.misses.fetch_add(1, Ordering::Relaxed);
                    debug!("cache"; "miss {key}");
                    let computed = CacheInner::compute(request, stable.clone())?;
                    self.inner.put_if_current(
                        heap_id,
                        generation,
                        &key,
                        CacheResult::with_default(computed.clone()),
                    )?;
                    computed
                }
            }
        };

        if submit_default {
            let cache = self.inner.clone();
            let background = request.clone();
            let _ = request.context().execute_asap(move || {
                if let Err(e) = cache.complete(&background, generation, &key, stable) {
                    log!("cache"; "best-effort completion failed: {e}");
                }
            });
        }

        // Dynamic nuts are never cached; their filters run on every read
        if !dynamic.is_empty() {
            out.extend(run_chains_over(request, dynamic)?);
        }
        Ok(out)
    }
}

/// Drops the entries of a heap when it changes.
struct Invalidator {
    cache: Weak<CacheInner>,
}

impl HeapListener for Invalidator {
    fn on_resource_changed(&self, heap: &Heap) {
        if let Some(cache) = self.cache.upgrade() {
            cache.invalidate_heap(heap.id());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::engine::{Chain, Node};
    use crate::nut::NutType;
    use crate::error::EngineError;
    use crate::pipe::{Filter, Input, Output};
    use crate::scheduler::InlineContext;
    use crossbeam::channel::{self, Receiver, Sender};
    use std::io;
    use std::sync::atomic::AtomicUsize;

    /// Minification-stage node counting the nuts it sees.
    #[derive(Default)]
    struct Counter {
        seen: AtomicUsize,
    }

    impl Node for Counter {
        fn name(&self) -> &str {
            "counter"
        }

        fn stage(&self) -> Stage {
            Stage::Minification
        }

        fn nut_types(&self) -> &[NutType] {
            &[NutType::Javascript]
        }

        fn internal_parse(&self, _: &EngineRequest, nuts: Vec<Nut>) -> Result<Vec<Nut>> {
            self.seen.fetch_add(nuts.len(), Ordering::SeqCst);
            nuts.into_iter()
                .map(|mut nut| -> Result<Nut> {
                    nut.add_filter(Arc::new(Shout))?;
                    Ok(nut)
                })
                .collect()
        }
    }

    struct Shout;

    impl Filter for Shout {
        fn name(&self) -> &str {
            "shout"
        }

        fn transform(&self, input: &mut Input, output: &mut Output, _: &Nut) -> io::Result<bool> {
            let text = input.as_str().map_err(io::Error::other)?;
            output.write_str(&text.to_uppercase());
            Ok(true)
        }
    }

    /// Converter node that freezes its nuts, then waits once for a release.
    struct Gate {
        once: Mutex<Option<(Sender<()>, Receiver<()>)>>,
    }

    impl Node for Gate {
        fn name(&self) -> &str {
            "gate"
        }

        fn stage(&self) -> Stage {
            Stage::Converter
        }

        fn nut_types(&self) -> &[NutType] {
            &[NutType::Javascript]
        }

        fn internal_parse(&self, _: &EngineRequest, nuts: Vec<Nut>) -> Result<Vec<Nut>> {
            let frozen = nuts.iter().map(Nut::materialize).collect::<Result<Vec<_>>>()?;
            if let Some((entered, release)) = self.once.lock().take() {
                entered.send(()).ok();
                release.recv().ok();
            }
            Ok(frozen)
        }
    }

    fn setup(config: CacheConfig) -> (Arc<MemoryBackend>, Arc<Heap>, Arc<Counter>, CacheEngine) {
        let backend = Arc::new(MemoryBackend::new("mem"));
        backend.put("a.js", "var a;", 1);
        backend.put("b.js", "var b;", 1);
        let heap = Heap::builder("scripts", backend.clone()).pattern(r".*\.js").build().unwrap();
        let counter = Arc::new(Counter::default());
        let cache = CacheEngine::new(config).unwrap();
        (backend, heap, counter, cache)
    }

    fn request(workflow: &str, heap: &Arc<Heap>, counter: &Arc<Counter>) -> EngineRequest {
        let node: Arc<dyn Node> = counter.clone();
        EngineRequest::builder(workflow, heap.clone())
            .chain(NutType::Javascript, Chain::of([node]).unwrap())
            .context(Arc::new(InlineContext))
            .build()
    }

    #[test]
    fn test_second_parse_is_a_hit() {
        let (_, heap, counter, cache) = setup(CacheConfig::default());
        let request = request("wf", &heap, &counter);

        let first = cache.parse(&request).unwrap();
        let second = cache.parse(&request).unwrap();
        assert_eq!(counter.seen.load(Ordering::SeqCst), 2);
        assert_eq!(first.len(), 2);
        assert_eq!(second[0].transform().unwrap().as_str().unwrap(), "VAR A;");
        assert_eq!(cache.stats(), (1, 1));
        assert_eq!(cache.memory_in_use(), 12);
    }

    #[test]
    fn test_one_listener_per_heap_and_invalidation() {
        let (backend, heap, counter, cache) = setup(CacheConfig::default());
        let first = request("one", &heap, &counter);
        let second = request("two", &heap, &counter);

        for _ in 0..5 {
            cache.parse(&first).unwrap();
            cache.parse(&second).unwrap();
        }
        assert_eq!(heap.listener_count(), 1);
        assert_eq!(cache.len(), 2);

        backend.touch("a.js", 2);
        assert!(heap.check_now().unwrap());
        assert!(cache.is_empty());
        assert_eq!(cache.memory_in_use(), 0);

        // Recomputed with the new content
        backend.put("a.js", "var c;", 3);
        heap.check_now().unwrap();
        let nuts = cache.parse(&first).unwrap();
        assert_eq!(nuts[0].transform().unwrap().as_str().unwrap(), "VAR C;");
        assert_eq!(heap.listener_count(), 1);
    }

    #[test]
    fn test_listener_dropped_with_cache() {
        let (_, heap, counter, cache) = setup(CacheConfig::default());
        cache.parse(&request("wf", &heap, &counter)).unwrap();
        assert_eq!(heap.listener_count(), 1);
        drop(cache);
        assert_eq!(heap.listener_count(), 0);
    }

    #[test]
    fn test_dynamic_nuts_are_recomputed() {
        let (backend, heap, counter, cache) = setup(CacheConfig::default());
        backend.put("live.js", "var x;", 1);
        backend.mark_dynamic("live.js");
        heap.check_now().unwrap();
        let request = request("wf", &heap, &counter);

        let first = cache.parse(&request).unwrap();
        let live = first.iter().find(|n| n.name() == "live.js").unwrap();
        assert_eq!(live.transform().unwrap().as_str().unwrap(), "VAR X;");

        // Same timestamp, new content: only a dynamic nut can see it
        backend.put("live.js", "var y;", 1);
        let second = cache.parse(&request).unwrap();
        let live = second.iter().find(|n| n.name() == "live.js").unwrap();
        assert_eq!(live.transform().unwrap().as_str().unwrap(), "VAR Y;");
        assert!(live.is_dynamic());
        assert_eq!(live.filters().len(), 1);

        // Static nuts counted once, the dynamic one twice
        assert_eq!(counter.seen.load(Ordering::SeqCst), 4);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_disabled_cache_passes_through() {
        let config = CacheConfig {
            enabled: false,
            ..CacheConfig::default()
        };
        let (_, heap, counter, cache) = setup(config);
        let request = request("wf", &heap, &counter);
        cache.parse(&request).unwrap();
        cache.parse(&request).unwrap();
        assert_eq!(counter.seen.load(Ordering::SeqCst), 4);
        assert!(cache.is_empty());
        assert_eq!(heap.listener_count(), 0);
    }

    #[test]
    fn test_best_effort_then_default() {
        let config = CacheConfig {
            best_effort: true,
            ..CacheConfig::default()
        };
        let (_, heap, counter, cache) = setup(config);
        let request = request("wf", &heap, &counter);

        // Minification is skipped by the quick run
        let quick = cache.parse(&request).unwrap();
        assert_eq!(quick[0].name(), "best-effort/a.js");
        assert_eq!(quick[0].transform().unwrap().as_str().unwrap(), "var a;");

        // The inline context already ran the full execution
        let full = cache.parse(&request).unwrap();
        assert_eq!(full[0].name(), "a.js");
        assert_eq!(full[0].transform().unwrap().as_str().unwrap(), "VAR A;");

        let best = cache.lookup(&request, "best-effort/b.js").unwrap().unwrap();
        assert_eq!(best.transform().unwrap().as_str().unwrap(), "var b;");
        assert!(cache.lookup(&request, "b.js").unwrap().is_some());
    }

    #[test]
    fn test_concurrent_parses_compute_once() {
        let (_, heap, counter, cache) = setup(CacheConfig::default());
        let cache = Arc::new(cache);
        let request = request("wf", &heap, &counter);

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let cache = cache.clone();
                let request = request.clone();
                std::thread::spawn(move || cache.parse(&request).unwrap().len())
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), 2);
        }

        assert_eq!(counter.seen.load(Ordering::SeqCst), 2);
        assert_eq!(heap.listener_count(), 1);
        assert_eq!(cache.memory_in_use(), 12);
        assert_eq!(cache.stats(), (15, 1));
    }

    #[test]
    fn test_change_during_computation_is_not_lost() {
        let backend = Arc::new(MemoryBackend::new("mem"));
        backend.put("a.js", "var old;", 1);
        let heap = Heap::builder("scripts", backend.clone()).pattern(r".*\.js").build().unwrap();

        let (entered_tx, entered_rx) = channel::bounded(1);
        let (release_tx, release_rx) = channel::bounded(1);
        let gate: Arc<dyn Node> = Arc::new(Gate {
            once: Mutex::new(Some((entered_tx, release_rx))),
        });
        let request = EngineRequest::builder("wf", heap.clone())
            .chain(NutType::Javascript, Chain::of([gate]).unwrap())
            .context(Arc::new(InlineContext))
            .build();
        let cache = Arc::new(CacheEngine::new(CacheConfig::default()).unwrap());

        let worker = {
            let cache = cache.clone();
            let request = request.clone();
            std::thread::spawn(move || cache.parse(&request).unwrap())
        };

        // Change the source while the worker holds the old content
        entered_rx.recv().unwrap();
        backend.put("a.js", "var new;", 2);
        assert!(heap.check_now().unwrap());
        release_tx.send(()).unwrap();

        let stale = worker.join().unwrap();
        assert_eq!(stale[0].transform().unwrap().as_str().unwrap(), "var old;");
        assert!(cache.is_empty());

        let fresh = cache.parse(&request).unwrap();
        assert_eq!(fresh[0].transform().unwrap().as_str().unwrap(), "var new;");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_backend_error_caches_nothing() {
        let (backend, heap, counter, cache) = setup(CacheConfig::default());
        // Resolved, then gone before the content is read
        backend.remove("b.js");

        let err = cache.parse(&request("wf", &heap, &counter)).unwrap_err();
        assert!(matches!(err, EngineError::Backend { .. }), "{err}");
        assert!(cache.is_empty());
        assert_eq!(cache.memory_in_use(), 0);
    }

    #[test]
    fn test_admin_operations() {
        let (_, heap, counter, cache) = setup(CacheConfig::default().max_memory("1kb").unwrap());
        let request = request("wf", &heap, &counter);
        cache.parse(&request).unwrap();

        let key = request.key();
        assert!(cache.get_from_cache(&key).unwrap().is_some());
        assert!(cache.remove_from_cache(&key));
        assert!(cache.get_from_cache(&key).unwrap().is_none());

        cache
            .put_to_cache(key.clone(), CacheResult::with_default(vec![]))
            .unwrap();
        assert_eq!(cache.len(), 1);
        cache.clear_cache();
        assert!(cache.is_empty());
        assert_eq!(cache.config().max_memory, 1024);
    }
}

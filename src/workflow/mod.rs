//! Workflows and the engine that runs them by id.
//!
//! A [`Workflow`] binds a heap to per-type chains, optionally behind the
//! shared cache. The [`Engine`] is a registry of workflows that can be
//! swapped atomically, so a config reload never disturbs a running request.

use arc_swap::ArcSwap;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::backend::{Backend, DirBackend};
use crate::cache::{CacheEngine, is_best_effort};
use crate::config::{EngineConfig, WorkflowConfig};
use crate::engine::{self, Chain, EngineRequest, HeadNode, Node, Stage};
use crate::error::{EngineError, Result};
use crate::heap::Heap;
use crate::nodes::{Compressor, CssInspector, Minifier, TextAggregator};
use crate::nut::{Nut, NutType, find_by_name};
use crate::scheduler::ExecutionContext;
use crate::{debug, log};

// ============================================================================
// Workflow
// ============================================================================

/// A named heap with its chains.
pub struct Workflow {
    id: String,
    heap: Arc<Heap>,
    chains: BTreeMap<NutType, Chain>,
    cache: Option<Arc<CacheEngine>>,
    excluded: Vec<Stage>,
}

pub struct WorkflowBuilder {
    id: String,
    heap: Arc<Heap>,
    chains: BTreeMap<NutType, Chain>,
    cache: Option<Arc<CacheEngine>>,
    excluded: Vec<Stage>,
}

impl WorkflowBuilder {
    pub fn chain(mut self, nut_type: NutType, chain: Chain) -> Self {
        self.chains.insert(nut_type, chain);
        self
    }

    pub fn cache(mut self, cache: Arc<CacheEngine>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn exclude(mut self, stage: Stage) -> Self {
        if !self.excluded.contains(&stage) {
            self.excluded.push(stage);
        }
        self
    }

    pub fn build(self) -> Result<Workflow> {
        if self.id.is_empty() {
            return Err(EngineError::config("workflow id must not be empty"));
        }
        Ok(Workflow {
            id: self.id,
            heap: self.heap,
            chains: self.chains,
            cache: self.cache,
            excluded: self.excluded,
        })
    }
}

impl Workflow {
    pub fn builder(id: impl Into<String>, heap: Arc<Heap>) -> WorkflowBuilder {
        WorkflowBuilder {
            id: id.into(),
            heap,
            chains: BTreeMap::new(),
            cache: None,
            excluded: Vec::new(),
        }
    }

    /// Build a workflow from its config section: a directory backend, a
    /// heap over the patterns, and minify + aggregate chains for JS and CSS.
    ///
    /// CSS is inspected for references first. With `gzip`, every type ends
    /// with a compressor.
    pub fn from_config(config: &WorkflowConfig, cache: Option<Arc<CacheEngine>>) -> Result<Self> {
        let backend = DirBackend::new(&config.dir);
        let backend: Arc<dyn Backend> = if config.content_version {
            Arc::new(backend.with_content_version())
        } else {
            Arc::new(backend)
        };

        let mut heap = Heap::builder(config.id.clone(), backend).patterns(config.patterns.iter());
        if let Some(interval) = config.polling_interval() {
            heap = heap.polling(interval);
        }

        let text = Chain::of([
            Arc::new(Minifier::new(config.minify)) as Arc<dyn Node>,
            Arc::new(TextAggregator::new(config.aggregate)),
        ])?;
        let mut chains = BTreeMap::from([
            (NutType::Javascript, text.clone()),
            (NutType::Css, text.with(Arc::new(CssInspector::new()?))),
        ]);
        if config.gzip {
            let compressor: Arc<dyn Node> = Arc::new(Compressor::default());
            for nut_type in NutType::ALL {
                let chain = match chains.get(&nut_type) {
                    Some(chain) => chain.with(compressor.clone()),
                    None => Chain::of([compressor.clone()])?,
                };
                chains.insert(nut_type, chain);
            }
        }

        let mut builder = Self::builder(config.id.clone(), heap.build()?);
        for (nut_type, chain) in chains {
            builder = builder.chain(nut_type, chain);
        }
        if let Some(cache) = cache {
            builder = builder.cache(cache);
        }
        builder.build()
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn heap(&self) -> &Arc<Heap> {
        &self.heap
    }

    pub fn cache(&self) -> Option<&Arc<CacheEngine>> {
        self.cache.as_ref()
    }

    /// The request this workflow executes in `context`.
    pub fn request(&self, context: Arc<dyn ExecutionContext>) -> EngineRequest {
        let mut builder = EngineRequest::builder(self.id.clone(), self.heap.clone())
            .chains(self.chains.clone())
            .context(context);
        for stage in &self.excluded {
            builder = builder.exclude(*stage);
        }
        builder.build()
    }

    /// Execute every chain over the heap.
    pub fn run(&self, context: Arc<dyn ExecutionContext>) -> Result<Vec<Nut>> {
        self.execute(&self.request(context))
    }

    /// Execute and return the nut named `name`.
    ///
    /// Names under `best-effort/` come from the cache. A default name that
    /// a pending best-effort entry does not hold yet is computed without
    /// the cache.
    pub fn run_one(&self, name: &str, context: Arc<dyn ExecutionContext>) -> Result<Nut> {
        let request = self.request(context);
        let nuts = self.execute(&request)?;
        if let Some(nut) = find_by_name(&nuts, name) {
            return Ok(nut.clone());
        }

        if let Some(cache) = &self.cache {
            if let Some(nut) = cache.lookup(&request, name)? {
                return Ok(nut);
            }
            if cache.config().best_effort && !is_best_effort(name) {
                debug!("workflow"; "'{name}' not ready in '{}', computing directly", self.id);
                let nuts = engine::run_chains(&request)?;
                if let Some(nut) = find_by_name(&nuts, name) {
                    return nut.materialize();
                }
            }
        }

        Err(EngineError::NutNotFound {
            workflow: self.id.clone(),
            name: name.to_string(),
        })
    }

    fn execute(&self, request: &EngineRequest) -> Result<Vec<Nut>> {
        let head = self.cache.as_deref().map(|c| c as &dyn HeadNode);
        engine::execute(request, head)
    }
}

// ============================================================================
// Engine
// ============================================================================

type Registry = BTreeMap<String, Arc<Workflow>>;

/// Registry of workflows by id.
pub struct Engine {
    workflows: ArcSwap<Registry>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    pub fn new() -> Self {
        Self {
            workflows: ArcSwap::from_pointee(Registry::new()),
        }
    }

    /// One workflow per `[[workflow]]`, all sharing one cache.
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        let engine = Self::new();
        engine.reload(config)?;
        Ok(engine)
    }

    /// Replace every workflow with those of `config`.
    ///
    /// Nothing changes if any workflow fails to build.
    pub fn reload(&self, config: &EngineConfig) -> Result<()> {
        let cache = Arc::new(CacheEngine::new(config.to_cache_config()?)?);
        let mut registry = Registry::new();
        for section in &config.workflow {
            let workflow = Workflow::from_config(section, Some(cache.clone()))?;
            if registry.insert(workflow.id.clone(), Arc::new(workflow)).is_some() {
                return Err(EngineError::config(format!(
                    "workflow '{}' is declared twice",
                    section.id
                )));
            }
        }
        log!("engine"; "{} workflow(s) ready", registry.len());
        self.workflows.store(Arc::new(registry));
        Ok(())
    }

    /// Add a workflow; its id must be new.
    pub fn register(&self, workflow: Workflow) -> Result<()> {
        let workflow = Arc::new(workflow);
        let mut duplicate = false;
        // Checked inside the update so racing registrations see each other
        self.workflows.rcu(|registry| {
            duplicate = registry.contains_key(&workflow.id);
            if duplicate {
                return Arc::clone(registry);
            }
            let mut registry = Registry::clone(registry);
            registry.insert(workflow.id.clone(), workflow.clone());
            Arc::new(registry)
        });
        if duplicate {
            return Err(EngineError::config(format!(
                "workflow '{}' is already registered",
                workflow.id
            )));
        }
        Ok(())
    }

    pub fn workflow(&self, id: &str) -> Result<Arc<Workflow>> {
        self.workflows
            .load()
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::WorkflowNotFound(id.to_string()))
    }

    pub fn workflow_ids(&self) -> Vec<String> {
        self.workflows.load().keys().cloned().collect()
    }

    pub fn workflows(&self) -> Vec<Arc<Workflow>> {
        self.workflows.load().values().cloned().collect()
    }

    pub fn run(&self, workflow_id: &str, context: Arc<dyn ExecutionContext>) -> Result<Vec<Nut>> {
        self.workflow(workflow_id)?.run(context)
    }

    pub fn run_one(
        &self,
        workflow_id: &str,
        name: &str,
        context: Arc<dyn ExecutionContext>,
    ) -> Result<Nut> {
        self.workflow(workflow_id)?.run_one(name, context)
    }
}

// ============================================================================
// tests
// ============================================================================

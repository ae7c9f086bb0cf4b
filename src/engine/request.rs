//! Engine requests and their cache keys.

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use super::chain::Chain;
use super::stage::Stage;
use crate::heap::Heap;
use crate::nut::{Nut, NutType};
use crate::scheduler::{ExecutionContext, ThreadPoolContext};

/// Everything needed to execute one workflow.
#[derive(Clone)]
pub struct EngineRequest {
    workflow_id: String,
    heap: Arc<Heap>,
    chains: Arc<BTreeMap<NutType, Chain>>,
    excluded: FxHashSet<Stage>,
    context: Arc<dyn ExecutionContext>,
}

pub struct EngineRequestBuilder {
    workflow_id: String,
    heap: Arc<Heap>,
    chains: BTreeMap<NutType, Chain>,
    excluded: FxHashSet<Stage>,
    context: Arc<dyn ExecutionContext>,
}

impl EngineRequestBuilder {
    /// Chain run over nuts of `nut_type`. Nuts without a chain pass through.
    pub fn chain(mut self, nut_type: NutType, chain: Chain) -> Self {
        self.chains.insert(nut_type, chain);
        self
    }

    pub fn chains(mut self, chains: BTreeMap<NutType, Chain>) -> Self {
        self.chains.extend(chains);
        self
    }

    pub fn exclude(mut self, stage: Stage) -> Self {
        self.excluded.insert(stage);
        self
    }

    pub fn context(mut self, context: Arc<dyn ExecutionContext>) -> Self {
        self.context = context;
        self
    }

    pub fn build(self) -> EngineRequest {
        EngineRequest {
            workflow_id: self.workflow_id,
            heap: self.heap,
            chains: Arc::new(self.chains),
            excluded: self.excluded,
            context: self.context,
        }
    }
}

impl EngineRequest {
    pub fn builder(workflow_id: impl Into<String>, heap: Arc<Heap>) -> EngineRequestBuilder {
        EngineRequestBuilder {
            workflow_id: workflow_id.into(),
            heap,
            chains: BTreeMap::new(),
            excluded: FxHashSet::default(),
            context: Arc::new(ThreadPoolContext),
        }
    }

    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    pub fn heap(&self) -> &Arc<Heap> {
        &self.heap
    }

    pub fn chain(&self, nut_type: NutType) -> Option<&Chain> {
        self.chains.get(&nut_type)
    }

    pub fn context(&self) -> &Arc<dyn ExecutionContext> {
        &self.context
    }

    pub fn should_skip(&self, stage: Stage) -> bool {
        self.excluded.contains(&stage)
    }

    /// Same request with extra stages excluded.
    pub fn excluding(&self, stages: &[Stage]) -> EngineRequest {
        let mut request = self.clone();
        request.excluded.extend(stages.iter().copied());
        request
    }

    /// Cache key for the heap's current nuts.
    pub fn key(&self) -> RequestKey {
        RequestKey::new(&self.workflow_id, &self.heap.nuts())
    }
}

impl fmt::Debug for EngineRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineRequest")
            .field("workflow_id", &self.workflow_id)
            .field("heap", &self.heap.id())
            .field("chains", &self.chains.keys().collect::<Vec<_>>())
            .field("excluded", &self.excluded)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Key
// =============================================================================

/// Identity of a request for caching: workflow id plus a fingerprint of
/// the nuts it runs over.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestKey {
    workflow_id: String,
    fingerprint: String,
}

impl RequestKey {
    /// Digest the initial names of the non-dynamic nuts, in order.
    pub fn new(workflow_id: &str, nuts: &[Nut]) -> Self {
        let mut hasher = blake3::Hasher::new();
        for nut in nuts.iter().filter(|n| !n.is_dynamic()) {
            hasher.update(nut.initial_name().as_bytes());
            hasher.update(&[0]);
        }
        Self {
            workflow_id: workflow_id.to_string(),
            fingerprint: hasher.finalize().to_hex().to_string(),
        }
    }

    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// File name safe form, used for spill files.
    pub fn file_stem(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.workflow_id.as_bytes());
        hasher.update(&[0]);
        hasher.update(self.fingerprint.as_bytes());
        hex::encode(&hasher.finalize().as_bytes()[..16])
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.workflow_id, &self.fingerprint[..12])
    }
}

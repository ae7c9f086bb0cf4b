//! Ordered node chains.
//!
//! A chain holds at most one node per stage, sorted by stage. Merging
//! follows two rules:
//! - a node already present (same `Arc`) is not added again
//! - a node of a stage already present takes that node's slot

use std::fmt;
use std::sync::Arc;

use super::node::{self, Node};
use super::request::EngineRequest;
use super::stage::Stage;
use crate::error::{EngineError, Result};
use crate::nut::Nut;

#[derive(Clone)]
pub struct Chain {
    nodes: Vec<Arc<dyn Node>>,
}

impl Chain {
    /// Build a chain from nodes in any order.
    pub fn of<I>(nodes: I) -> Result<Self>
    where
        I: IntoIterator<Item = Arc<dyn Node>>,
    {
        let mut merged = Vec::new();
        for node in nodes {
            merge(&mut merged, node);
        }
        if merged.is_empty() {
            return Err(EngineError::config("cannot build a chain from no nodes"));
        }
        merged.sort_by_key(|n: &Arc<dyn Node>| n.stage());
        Ok(Self { nodes: merged })
    }

    /// Merge `other` into this chain; its nodes win on shared stages.
    pub fn compose(&self, other: &Chain) -> Chain {
        let mut nodes = self.nodes.clone();
        for node in &other.nodes {
            merge(&mut nodes, node.clone());
        }
        nodes.sort_by_key(|n| n.stage());
        Chain { nodes }
    }

    /// This chain with `node` added, or replacing the node of its stage.
    pub fn with(&self, node: Arc<dyn Node>) -> Chain {
        let mut nodes = self.nodes.clone();
        merge(&mut nodes, node);
        nodes.sort_by_key(|n| n.stage());
        Chain { nodes }
    }

    pub fn nodes(&self) -> &[Arc<dyn Node>] {
        &self.nodes
    }

    pub fn head(&self) -> &Arc<dyn Node> {
        // Never empty: `of` rejects empty input and merging only grows
        &self.nodes[0]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn stage(&self, stage: Stage) -> Option<&Arc<dyn Node>> {
        self.nodes.iter().find(|n| n.stage() == stage)
    }

    /// Node following `node`, if `node` is part of this chain.
    pub fn next(&self, node: &Arc<dyn Node>) -> Option<&Arc<dyn Node>> {
        let index = self.position(node)?;
        self.nodes.get(index + 1)
    }

    /// Node preceding `node`, if `node` is part of this chain.
    pub fn previous(&self, node: &Arc<dyn Node>) -> Option<&Arc<dyn Node>> {
        let index = self.position(node)?;
        index.checked_sub(1).and_then(|i| self.nodes.get(i))
    }

    fn position(&self, node: &Arc<dyn Node>) -> Option<usize> {
        self.nodes.iter().position(|n| Arc::ptr_eq(n, node))
    }

    /// Run every node in order.
    ///
    /// The first failing node aborts the whole run.
    pub fn parse(&self, request: &EngineRequest, nuts: Vec<Nut>) -> Result<Vec<Nut>> {
        self.nodes
            .iter()
            .try_fold(nuts, |nuts, n| node::parse(n.as_ref(), request, nuts))
    }
}

fn merge(nodes: &mut Vec<Arc<dyn Node>>, node: Arc<dyn Node>) {
    if nodes.iter().any(|n| Arc::ptr_eq(n, &node)) {
        return;
    }
    match nodes.iter_mut().find(|n| n.stage() == node.stage()) {
        Some(slot) => *slot = node,
        None => nodes.push(node),
    }
}

impl fmt::Debug for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.nodes.iter().map(|n| format!("{}({})", n.name(), n.stage())))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::engine::node::compare;
    use crate::heap::Heap;
    use crate::nut::NutType;
    use std::cmp::Ordering;

    /// Appends its name to each nut's name.
    struct Tag {
        name: &'static str,
        stage: Stage,
        types: Vec<NutType>,
    }

    impl Node for Tag {
        fn name(&self) -> &str {
            self.name
        }

        fn stage(&self) -> Stage {
            self.stage
        }

        fn nut_types(&self) -> &[NutType] {
            &self.types
        }

        fn internal_parse(&self, _: &EngineRequest, nuts: Vec<Nut>) -> Result<Vec<Nut>> {
            Ok(nuts
                .into_iter()
                .map(|n| {
                    let name = format!("{}.{}", n.name(), self.name);
                    n.with_name(name)
                })
                .collect())
        }
    }

    struct Broken;

    impl Node for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn stage(&self) -> Stage {
            Stage::Aggregator
        }

        fn nut_types(&self) -> &[NutType] {
            &[NutType::Javascript]
        }

        fn internal_parse(&self, _: &EngineRequest, _: Vec<Nut>) -> Result<Vec<Nut>> {
            Err(EngineError::filter("*", "broken", "always fails"))
        }
    }

    fn tag(name: &'static str, stage: Stage) -> Arc<dyn Node> {
        Arc::new(Tag {
            name,
            stage,
            types: vec![NutType::Javascript],
        })
    }

    fn request() -> EngineRequest {
        let backend = Arc::new(MemoryBackend::new("mem"));
        backend.put("a.js", "", 1);
        backend.put("b.css", "", 1);
        let heap = Heap::builder("heap", backend).pattern(".*").build().unwrap();
        EngineRequest::builder("wf", heap).build()
    }

    #[test]
    fn test_chain_order_regardless_of_input_order() {
        let a = tag("a", Stage::Inspector);
        let b = tag("b", Stage::Minification);
        let c = tag("c", Stage::Aggregator);

        assert_eq!(compare(a.as_ref(), b.as_ref()), Ordering::Less);
        assert_eq!(compare(c.as_ref(), b.as_ref()), Ordering::Greater);

        for input in [
            vec![a.clone(), b.clone(), c.clone()],
            vec![c.clone(), a.clone(), b.clone()],
            vec![b.clone(), c.clone(), a.clone(), b.clone(), a.clone()],
        ] {
            let chain = Chain::of(input).unwrap();
            assert_eq!(chain.len(), 3);
            assert!(Arc::ptr_eq(chain.head(), &a));
            assert!(Arc::ptr_eq(chain.next(&a).unwrap(), &b));
            assert!(Arc::ptr_eq(chain.next(&b).unwrap(), &c));
            assert!(chain.next(&c).is_none());
            assert!(Arc::ptr_eq(chain.previous(&c).unwrap(), &b));
            assert!(Arc::ptr_eq(chain.previous(&b).unwrap(), &a));
            assert!(chain.previous(&a).is_none());
        }
    }

    #[test]
    fn test_same_stage_replaces_at_first_position() {
        let a = tag("a", Stage::Inspector);
        let b = tag("b", Stage::Minification);
        let b2 = tag("b2", Stage::Minification);
        let c = tag("c", Stage::Aggregator);

        let chain = Chain::of([a.clone(), b.clone(), c.clone()]).unwrap();
        let replaced = chain.with(b2.clone());
        assert_eq!(replaced.len(), 3);
        assert!(Arc::ptr_eq(replaced.next(&a).unwrap(), &b2));
        assert!(Arc::ptr_eq(replaced.next(&b2).unwrap(), &c));
        assert!(replaced.next(&b).is_none());

        let composed = Chain::of([a.clone(), b.clone()])
            .unwrap()
            .compose(&Chain::of([b2.clone(), c.clone()]).unwrap());
        let names: Vec<_> = composed.nodes().iter().map(|n| n.name().to_string()).collect();
        assert_eq!(names, vec!["a", "b2", "c"]);
    }

    #[test]
    fn test_empty_chain_rejected() {
        let err = Chain::of(Vec::<Arc<dyn Node>>::new()).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_parse_filters_types_and_honors_exclusions() {
        let request = request();
        let chain = Chain::of([tag("min", Stage::Minification), tag("agg", Stage::Aggregator)]).unwrap();

        let out = chain.parse(&request, request.heap().nuts()).unwrap();
        let names: Vec<_> = out.iter().map(|n| n.name().to_string()).collect();
        assert_eq!(names, vec!["a.js.min.agg", "b.css"]);

        let skipping = request.excluding(&[Stage::Aggregator]);
        let out = chain.parse(&skipping, skipping.heap().nuts()).unwrap();
        assert_eq!(out[0].name(), "a.js.min");
    }

    #[test]
    fn test_failing_node_aborts_parse() {
        let request = request();
        let chain = Chain::of([tag("min", Stage::Minification), Arc::new(Broken) as Arc<dyn Node>]).unwrap();
        assert!(chain.parse(&request, request.heap().nuts()).is_err());
    }
}

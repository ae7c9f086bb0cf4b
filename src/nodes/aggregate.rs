//! Text aggregation.

use std::collections::BTreeMap;

use smallvec::{SmallVec, smallvec};

use crate::debug;
use crate::engine::{EngineRequest, Node, Stage};
use crate::error::Result;
use crate::nut::{Nut, NutType};

/// Base name of aggregated nuts, completed by the type's extension.
pub const AGGREGATE_NAME: &str = "aggregate";

/// Aggregator stage: concatenates every nut of a text type into one
/// composite `aggregate.<ext>`.
///
/// Dynamic nuts and nuts whose pending filters cannot be concatenated pass
/// through unchanged, after the aggregate.
pub struct TextAggregator {
    enabled: bool,
    types: SmallVec<[NutType; 2]>,
}

impl TextAggregator {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            types: smallvec![NutType::Javascript, NutType::Css],
        }
    }

    /// Aggregate these text types instead of JavaScript and CSS.
    pub fn with_types(mut self, types: impl IntoIterator<Item = NutType>) -> Self {
        self.types = types.into_iter().filter(|t| t.is_text()).collect();
        self
    }
}

impl Default for TextAggregator {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Node for TextAggregator {
    fn name(&self) -> &str {
        "text-aggregator"
    }

    fn stage(&self) -> Stage {
        Stage::Aggregator
    }

    fn nut_types(&self) -> &[NutType] {
        &self.types
    }

    fn works(&self) -> bool {
        self.enabled
    }

    fn internal_parse(&self, request: &EngineRequest, nuts: Vec<Nut>) -> Result<Vec<Nut>> {
        let mut groups: BTreeMap<NutType, Vec<Nut>> = BTreeMap::new();
        let mut passthrough = Vec::new();
        for nut in nuts {
            if nut.is_dynamic() || !nut.can_aggregate() {
                passthrough.push(nut);
            } else {
                groups.entry(nut.nut_type()).or_default().push(nut);
            }
        }

        let mut out: Vec<Nut> = groups
            .into_iter()
            .map(|(nut_type, components)| {
                debug!(
                    "aggregate"; "{}: {} {} nut(s)",
                    request.workflow_id(),
                    components.len(),
                    nut_type.extension()
                );
                let name = format!("{AGGREGATE_NAME}.{}", nut_type.extension());
                Nut::composite(name, nut_type, components)
            })
            .collect();
        out.extend(passthrough);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::Arc;

    use super::*;
    use crate::backend::MemoryBackend;
    use crate::engine::{Chain, execute};
    use crate::heap::Heap;
    use crate::pipe::{Filter, Input, Output};

    struct Gzip;

    impl Filter for Gzip {
        fn name(&self) -> &str {
            "gzip"
        }

        fn transform(&self, _: &mut Input, _: &mut Output, _: &Nut) -> io::Result<bool> {
            Ok(false)
        }

        fn can_aggregate(&self) -> bool {
            false
        }
    }

    fn request(backend: Arc<MemoryBackend>) -> EngineRequest {
        let heap = Heap::builder("h", backend).pattern(".*").build().unwrap();
        let chain = Chain::of([Arc::new(TextAggregator::default()) as Arc<dyn Node>]).unwrap();
        EngineRequest::builder("wf", heap)
            .chain(NutType::Javascript, chain.clone())
            .chain(NutType::Css, chain)
            .build()
    }

    #[test]
    fn test_aggregates_per_type() {
        let backend = Arc::new(MemoryBackend::new("mem"));
        backend.put("a.js", "var a = 1;", 3);
        backend.put("b.js", "var b = 2;", 5);
        backend.put("a.css", "a{}", 1);
        let out = execute(&request(backend), None).unwrap();

        let names: Vec<_> = out.iter().map(Nut::name).collect();
        // Css sorts before Javascript
        assert_eq!(names, ["aggregate.css", "aggregate.js"]);

        let js = &out[1];
        assert_eq!(js.sources().len(), 2);
        assert_eq!(
            js.transform().unwrap().as_str().unwrap(),
            "var a = 1;\nvar b = 2;\n"
        );
        assert_ne!(js.version().unwrap(), 3);
        assert_eq!(out[0].transform().unwrap().as_str().unwrap(), "a{}");
    }

    #[test]
    fn test_dynamic_passes_through() {
        let backend = Arc::new(MemoryBackend::new("mem"));
        backend.put("a.js", "a", 1);
        backend.put("now.js", "b", 1);
        backend.mark_dynamic("now.js");
        let out = execute(&request(backend), None).unwrap();

        let names: Vec<_> = out.iter().map(Nut::name).collect();
        assert_eq!(names, ["aggregate.js", "now.js"]);
        assert_eq!(out[0].sources().len(), 1);
    }

    #[test]
    fn test_non_aggregatable_passes_through() {
        let nut = {
            let mut nut = Nut::from_bytes("z.js", NutType::Javascript, "z", 1);
            nut.add_filter(Arc::new(Gzip)).unwrap();
            nut
        };
        let plain = Nut::from_bytes("y.js", NutType::Javascript, "y", 1);

        let backend = Arc::new(MemoryBackend::new("mem"));
        backend.put("x.js", "x", 1);
        let request = request(backend);
        let out = TextAggregator::default()
            .internal_parse(&request, vec![nut, plain])
            .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].name(), "aggregate.js");
        assert_eq!(out[1].name(), "z.js");
    }

    #[test]
    fn test_with_types_keeps_text_only() {
        let node = TextAggregator::default().with_types([NutType::Json, NutType::Png]);
        assert_eq!(node.nut_types(), &[NutType::Json]);
    }
}

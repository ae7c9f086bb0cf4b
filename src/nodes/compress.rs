//! Binary compression.

use std::io::{self, Write};
use std::sync::Arc;

use flate2::Compression;
use flate2::write::GzEncoder;

use crate::engine::{EngineRequest, Node, Stage};
use crate::error::Result;
use crate::nut::{Nut, NutType};
use crate::pipe::{Filter, Input, Output};

/// Gzip filter. Its output cannot be concatenated with anything.
pub struct GzipFilter;

impl Filter for GzipFilter {
    fn name(&self) -> &str {
        "gzip"
    }

    fn transform(&self, input: &mut Input, output: &mut Output, _nut: &Nut) -> io::Result<bool> {
        let mut encoder = GzEncoder::new(&mut *output, Compression::default());
        encoder.write_all(input.as_bytes())?;
        encoder.finish()?;
        Ok(true)
    }

    fn can_aggregate(&self) -> bool {
        false
    }

    fn content_encoding(&self) -> Option<&str> {
        Some("gzip")
    }
}

/// Binary compression stage: gzips every nut and everything it references.
///
/// Nuts whose content is already encoded are left alone.
pub struct Compressor {
    enabled: bool,
    filter: Arc<dyn Filter>,
}

impl Compressor {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            filter: Arc::new(GzipFilter),
        }
    }

    fn compress(&self, nut: &mut Nut) -> Result<()> {
        if nut.content_encoding().is_none() {
            nut.add_filter(self.filter.clone())?;
        }
        for referenced in nut.referenced_mut() {
            self.compress(referenced)?;
        }
        Ok(())
    }
}

impl Default for Compressor {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Node for Compressor {
    fn name(&self) -> &str {
        "gzip-compressor"
    }

    fn stage(&self) -> Stage {
        Stage::BinaryCompression
    }

    fn nut_types(&self) -> &[NutType] {
        &NutType::ALL
    }

    fn works(&self) -> bool {
        self.enabled
    }

    fn internal_parse(&self, _request: &EngineRequest, nuts: Vec<Nut>) -> Result<Vec<Nut>> {
        nuts.into_iter()
            .map(|mut nut| {
                self.compress(&mut nut)?;
                Ok(nut)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use flate2::read::GzDecoder;

    use super::*;
    use crate::backend::MemoryBackend;
    use crate::engine::{Chain, execute, parse};
    use crate::heap::Heap;
    use crate::nodes::{CssInspector, TextAggregator};

    fn gunzip(bytes: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        GzDecoder::new(bytes).read_to_end(&mut out).unwrap();
        out
    }

    fn request(backend: Arc<MemoryBackend>) -> EngineRequest {
        let heap = Heap::builder("h", backend).pattern(r"css/.*\.css").build().unwrap();
        let chain = Chain::of([
            Arc::new(CssInspector::new().unwrap()) as Arc<dyn Node>,
            Arc::new(TextAggregator::default()),
            Arc::new(Compressor::default()),
        ])
        .unwrap();
        EngineRequest::builder("app", heap)
            .chain(NutType::Css, chain)
            .build()
    }

    #[test]
    fn test_filter_gzips() {
        let mut nut = Nut::from_bytes("a.js", NutType::Javascript, "var a = 1;", 1);
        nut.add_filter(Arc::new(GzipFilter)).unwrap();
        assert_eq!(nut.content_encoding(), Some("gzip"));
        assert!(!nut.can_aggregate());

        let bytes = nut.transform().unwrap().as_bytes().to_vec();
        assert_eq!(gunzip(&bytes), b"var a = 1;");

        let frozen = nut.materialize().unwrap();
        assert!(frozen.filters().is_empty());
        assert_eq!(frozen.content_encoding(), Some("gzip"));
        assert_eq!(frozen.transform().unwrap().as_bytes(), &bytes[..]);
    }

    #[test]
    fn test_compresses_aggregate_and_references() {
        let backend = Arc::new(MemoryBackend::new("mem"));
        backend.put("css/a.css", "a { background: url(../img/x.png); }\n", 1);
        backend.put("css/b.css", "b { color: red; }\n", 2);
        backend.put("img/x.png", [7u8, 7, 7], 3);

        let out = execute(&request(backend), None).unwrap();
        assert_eq!(out.len(), 1);
        let css = &out[0];
        assert_eq!(css.name(), "aggregate.css");
        assert_eq!(css.content_encoding(), Some("gzip"));

        let text = String::from_utf8(gunzip(css.transform().unwrap().as_bytes())).unwrap();
        assert_eq!(text, "a { background: url(/app/3/img/x.png); }\nb { color: red; }\n");

        let png = &css.referenced()[0];
        assert_eq!(png.name(), "img/x.png");
        assert_eq!(png.content_encoding(), Some("gzip"));
        assert_eq!(gunzip(png.transform().unwrap().as_bytes()), [7, 7, 7]);
    }

    #[test]
    fn test_encoded_nut_is_not_compressed_twice() {
        let backend = Arc::new(MemoryBackend::new("mem"));
        let request = request(backend);
        let mut nut = Nut::from_bytes("a.css", NutType::Css, "a{}", 1);
        nut.add_filter(Arc::new(GzipFilter)).unwrap();

        let out = parse(&Compressor::default(), &request, vec![nut]).unwrap();
        assert_eq!(out[0].filters().len(), 1);
        assert_eq!(gunzip(out[0].transform().unwrap().as_bytes()), b"a{}");

        let out = parse(&Compressor::new(false), &request, vec![Nut::from_bytes("b.css", NutType::Css, "b{}", 1)]).unwrap();
        assert!(out[0].content_encoding().is_none());
    }
}

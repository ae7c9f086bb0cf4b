//! JS and CSS minification.
//!
//! Uses oxc for JavaScript and lightningcss for CSS. Content that does not
//! parse is passed through untouched.

use std::io::{self, Write};
use std::sync::Arc;

use lightningcss::stylesheet::{ParserOptions, PrinterOptions, StyleSheet};
use oxc::allocator::Allocator;
use oxc::codegen::{Codegen, CodegenOptions, CommentOptions};
use oxc::mangler::MangleOptions;
use oxc::minifier::{CompressOptions, Minifier as OxcMinifier, MinifierOptions};
use oxc::parser::Parser;
use oxc::span::SourceType;
use smallvec::{SmallVec, smallvec};

use crate::debug;
use crate::engine::{EngineRequest, Node, Stage};
use crate::error::Result;
use crate::nut::{Nut, NutType};
use crate::pipe::{Filter, Input, Output};

/// Minify JavaScript source code.
pub fn minify_js(source: &str) -> Option<String> {
    let allocator = Allocator::default();
    let ret = Parser::new(&allocator, source, SourceType::mjs()).parse();
    if !ret.errors.is_empty() {
        return None;
    }
    let mut program = ret.program;
    let options = MinifierOptions {
        mangle: Some(MangleOptions::default()),
        compress: Some(CompressOptions::smallest()),
    };
    let ret = OxcMinifier::new(options).minify(&allocator, &mut program);
    let code = Codegen::new()
        .with_options(CodegenOptions {
            minify: true,
            comments: CommentOptions::disabled(),
            ..CodegenOptions::default()
        })
        .with_scoping(ret.scoping)
        .build(&program)
        .code;
    Some(code)
}

/// Minify CSS source code.
pub fn minify_css(source: &str) -> Option<String> {
    let stylesheet = StyleSheet::parse(source, ParserOptions::default()).ok()?;
    let result = stylesheet
        .to_css(PrinterOptions {
            minify: true,
            ..PrinterOptions::default()
        })
        .ok()?;
    Some(result.code)
}

/// Filter minifying a nut by its type.
pub struct MinifyFilter;

impl Filter for MinifyFilter {
    fn name(&self) -> &str {
        "minify"
    }

    fn transform(&self, input: &mut Input, output: &mut Output, nut: &Nut) -> io::Result<bool> {
        let Ok(source) = input.as_str() else {
            return Ok(false);
        };
        let minified = match nut.nut_type() {
            NutType::Javascript => minify_js(source),
            NutType::Css => minify_css(source),
            _ => None,
        };
        match minified {
            Some(code) => {
                output.write_all(code.as_bytes())?;
                Ok(true)
            }
            None => {
                debug!("minify"; "{} does not parse, left as is", nut.name());
                Ok(false)
            }
        }
    }
}

/// Minification stage: attaches a [`MinifyFilter`] to JavaScript and CSS.
pub struct Minifier {
    enabled: bool,
    types: SmallVec<[NutType; 2]>,
    filter: Arc<dyn Filter>,
}

impl Minifier {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            types: smallvec![NutType::Javascript, NutType::Css],
            filter: Arc::new(MinifyFilter),
        }
    }
}

impl Default for Minifier {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Node for Minifier {
    fn name(&self) -> &str {
        "minifier"
    }

    fn stage(&self) -> Stage {
        Stage::Minification
    }

    fn nut_types(&self) -> &[NutType] {
        &self.types
    }

    fn works(&self) -> bool {
        self.enabled
    }

    fn internal_parse(&self, _request: &EngineRequest, nuts: Vec<Nut>) -> Result<Vec<Nut>> {
        nuts.into_iter()
            .map(|mut nut| {
                nut.add_filter(self.filter.clone())?;
                Ok(nut)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::engine::{Chain, execute};
    use crate::heap::Heap;

    #[test]
    fn test_minify_js() {
        let out = minify_js("function add(first, second) {\n  return first + second;\n}\nexport { add };").unwrap();
        assert!(out.len() < 60);
        assert!(!out.contains('\n'));
        assert!(minify_js("function (").is_none());
    }

    #[test]
    fn test_minify_css() {
        let out = minify_css("body {\n  color: red;\n  margin: 0px;\n}\n").unwrap();
        assert_eq!(out, "body{color:red;margin:0}");
    }

    #[test]
    fn test_filter_declines_on_parse_error() {
        let mut nut = Nut::from_bytes("bad.js", NutType::Javascript, "let = ;", 1);
        nut.add_filter(Arc::new(MinifyFilter)).unwrap();
        assert_eq!(nut.transform().unwrap().as_str().unwrap(), "let = ;");
    }

    #[test]
    fn test_node_attaches_filter() {
        let backend = Arc::new(MemoryBackend::new("memory"));
        backend.put("a.css", "a {\n  color: blue;\n}\n", 1);
        backend.put("b.png", [0u8, 1, 2], 1);
        let heap = Heap::builder("h", backend).pattern(".*").build().unwrap();

        let chain = Chain::of([Arc::new(Minifier::default()) as Arc<dyn Node>]).unwrap();
        let request = EngineRequest::builder("wf", heap)
            .chain(NutType::Css, chain.clone())
            .chain(NutType::Png, chain)
            .build();

        let out = execute(&request, None).unwrap();
        assert_eq!(out.len(), 2);
        let css = out.iter().find(|n| n.name() == "a.css").unwrap();
        assert_eq!(css.filters().len(), 1);
        let text = css.transform().unwrap().text().into_owned();
        assert!(text.starts_with("a{color:"));
        assert!(!text.contains(char::is_whitespace));
        let png = out.iter().find(|n| n.name() == "b.png").unwrap();
        assert!(png.filters().is_empty());
    }

    #[test]
    fn test_disabled_node_passes_through() {
        let backend = Arc::new(MemoryBackend::new("memory"));
        backend.put("a.css", "a { color: blue; }", 1);
        let heap = Heap::builder("h", backend).pattern(".*").build().unwrap();
        let chain = Chain::of([Arc::new(Minifier::new(false)) as Arc<dyn Node>]).unwrap();
        let request = EngineRequest::builder("wf", heap)
            .chain(NutType::Css, chain)
            .build();

        let out = execute(&request, None).unwrap();
        assert!(out[0].filters().is_empty());
    }
}

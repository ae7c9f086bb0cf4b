//! CSS reference inspection.
//!
//! Finds `url(...)` and `@import` targets in stylesheets, loads each local
//! target as a referenced nut and rewrites the reference to the URL the
//! target is served at.

use std::io;
use std::sync::Arc;

use regex::Regex;

use crate::backend::Backend;
use crate::debug;
use crate::engine::{EngineRequest, Node, Stage, run_chains_over};
use crate::error::{EngineError, Result};
use crate::nut::{Content, Nut, NutType};
use crate::pipe::{Filter, Input, Output};

/// Comments first so a reference inside one is never matched.
const REFERENCE_PATTERN: &str = concat!(
    r"(?s)/\*.*?\*/",
    r#"|url\([ \t\r\n]*(?:"([^"]*)"|'([^']*)'|([^)"' \t\r\n]*))[ \t\r\n]*\)"#,
    r#"|@import[ \t\r\n]+(?:"([^"]*)"|'([^']*)')"#,
);

/// Stages a referenced nut does not go through.
const NESTED_SKIPPED: [Stage; 3] = [Stage::Inspector, Stage::Aggregator, Stage::BinaryCompression];

/// Inspector stage for CSS.
///
/// Each local reference that exists in the stylesheet's backend becomes a
/// referenced nut, processed by the request's chains without inspection,
/// aggregation or compression. The stylesheet's version then follows the
/// versions of what it references. References to data, absolute paths
/// and other hosts are left alone.
pub struct CssInspector {
    pattern: Arc<Regex>,
}

impl CssInspector {
    pub fn new() -> Result<Self> {
        let pattern = Regex::new(REFERENCE_PATTERN)
            .map_err(|e| EngineError::config(format!("css reference pattern: {e}")))?;
        Ok(Self {
            pattern: Arc::new(pattern),
        })
    }

    fn inspect(&self, request: &EngineRequest, nested: &EngineRequest, mut nut: Nut) -> Result<Nut> {
        let execution = nut.transform()?;
        let Ok(css) = execution.as_str() else {
            return Ok(nut);
        };

        let mut paths: Vec<String> = Vec::new();
        rewrite_references(&self.pattern, css, |reference| {
            let path = local_path(reference).and_then(|p| resolve(nut.initial_name(), p))?;
            if !paths.contains(&path) {
                paths.push(path);
            }
            None
        });

        let backend: Arc<dyn Backend> = match nut.content() {
            Content::Backend { backend, .. } => backend.clone(),
            _ => request.heap().backend().clone(),
        };
        let mut targets = Vec::new();
        for path in paths {
            if NutType::from_name(&path).is_none() || !backend.exists(&path)? {
                debug!("inspect"; "{}: skipping '{path}'", nut.name());
                continue;
            }
            let found = Nut::from_backend(backend.clone(), &path)?;
            for processed in run_chains_over(nested, vec![found])? {
                targets.push((path.clone(), processed.clone()));
                nut.add_referenced(processed);
            }
        }
        if targets.is_empty() {
            return Ok(nut);
        }

        debug!("inspect"; "{}: {} reference(s)", nut.name(), targets.len());
        nut.combine_referenced_versions();
        nut.add_filter(Arc::new(UrlRewriteFilter {
            pattern: self.pattern.clone(),
            workflow: request.workflow_id().to_string(),
            targets,
        }))?;
        Ok(nut)
    }
}

impl Node for CssInspector {
    fn name(&self) -> &str {
        "css-inspector"
    }

    fn stage(&self) -> Stage {
        Stage::Inspector
    }

    fn nut_types(&self) -> &[NutType] {
        &[NutType::Css]
    }

    fn internal_parse(&self, request: &EngineRequest, nuts: Vec<Nut>) -> Result<Vec<Nut>> {
        let nested = request.excluding(&NESTED_SKIPPED);
        nuts.into_iter()
            .map(|nut| self.inspect(request, &nested, nut))
            .collect()
    }
}

/// Rewrites references to inspected nuts as `/<workflow>/<version>/<name>`.
struct UrlRewriteFilter {
    pattern: Arc<Regex>,
    workflow: String,
    /// Resolved backend path and the nut loaded from it.
    targets: Vec<(String, Nut)>,
}

impl Filter for UrlRewriteFilter {
    fn name(&self) -> &str {
        "css-url-rewrite"
    }

    fn transform(&self, input: &mut Input, output: &mut Output, nut: &Nut) -> io::Result<bool> {
        let Ok(css) = input.as_str() else {
            return Ok(false);
        };
        let mut failure = None;
        let rewritten = rewrite_references(&self.pattern, css, |reference| {
            let path = local_path(reference).and_then(|p| resolve(nut.initial_name(), p))?;
            let (_, target) = self.targets.iter().find(|(p, _)| *p == path)?;
            match target.version() {
                Ok(version) => Some(format!("/{}/{version}/{}", self.workflow, target.name())),
                Err(e) => {
                    failure.get_or_insert(e);
                    None
                }
            }
        });
        if let Some(e) = failure {
            return Err(io::Error::other(e.to_string()));
        }
        output.write_str(&rewritten);
        Ok(true)
    }
}

/// Replace each reference in `css` with what `replace` returns for it.
///
/// `None` keeps the reference as written. Comments are copied untouched.
fn rewrite_references(
    pattern: &Regex,
    css: &str,
    mut replace: impl FnMut(&str) -> Option<String>,
) -> String {
    let mut out = String::with_capacity(css.len());
    let mut last = 0;
    for caps in pattern.captures_iter(css) {
        let Some(target) = (1..=5).find_map(|i| caps.get(i)) else {
            continue;
        };
        if let Some(new) = replace(target.as_str()) {
            out.push_str(&css[last..target.start()]);
            out.push_str(&new);
            last = target.end();
        }
    }
    out.push_str(&css[last..]);
    out
}

/// The path part of a reference into the same backend, if it is one.
fn local_path(reference: &str) -> Option<&str> {
    let path = reference.split(['?', '#']).next().unwrap_or_default().trim();
    let foreign = path.is_empty()
        || path.starts_with('/')
        || path.starts_with("data:")
        || path.contains("://");
    (!foreign).then_some(path)
}

/// Resolve `reference` against the directory of `base`.
///
/// `None` when it climbs above the backend root.
fn resolve(base: &str, reference: &str) -> Option<String> {
    let mut parts: Vec<&str> = base.split('/').collect();
    parts.pop();
    for segment in reference.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            segment => parts.push(segment),
        }
    }
    (!parts.is_empty()).then(|| parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::engine::{Chain, execute};
    use crate::heap::Heap;
    use crate::nut::combine;

    const SITE: &str = concat!(
        "/* url(old.png) */\n",
        "body { background: url( \"../img/bg.png?v=1\" ); }\n",
        "@import 'parts/fonts.css';\n",
        ".a { background: url(data:image/png;base64,AA); }\n",
        ".b { background: url(http://cdn.example.com/x.png); }\n",
        ".c { background: url(missing.png); }\n",
        ".d { background: url(../../outside.png); }\n",
        ".e { background: url(../img/bg.png); }\n",
    );

    fn backend() -> Arc<MemoryBackend> {
        let backend = Arc::new(MemoryBackend::new("mem"));
        backend.put("css/site.css", SITE, 1);
        backend.put("css/parts/fonts.css", ".f { src: url(f.woff); }", 2);
        backend.put("img/bg.png", [1u8, 2, 3], 4);
        backend.put("css/old.png", [9u8], 5);
        backend
    }

    fn run(backend: Arc<MemoryBackend>) -> Nut {
        let heap = Heap::builder("h", backend).pattern(r"css/site\.css").build().unwrap();
        let chain = Chain::of([Arc::new(CssInspector::new().unwrap()) as Arc<dyn Node>]).unwrap();
        let request = EngineRequest::builder("app", heap)
            .chain(NutType::Css, chain)
            .build();
        let mut out = execute(&request, None).unwrap();
        assert_eq!(out.len(), 1);
        out.remove(0)
    }

    #[test]
    fn test_references_become_nuts() {
        let css = run(backend());
        let names: Vec<_> = css.referenced().iter().map(Nut::name).collect();
        assert_eq!(names, ["img/bg.png", "css/parts/fonts.css"]);
        // The nested stylesheet is not inspected again
        assert!(css.referenced()[1].referenced().is_empty());
        assert_eq!(css.version().unwrap(), combine(&[1, 4, 2]));
    }

    #[test]
    fn test_references_are_rewritten() {
        let css = run(backend());
        let text = css.transform().unwrap().text().into_owned();
        assert!(text.starts_with("/* url(old.png) */\n"));
        assert!(text.contains("url( \"/app/4/img/bg.png\" )"));
        assert!(text.contains("@import '/app/2/css/parts/fonts.css';"));
        assert!(text.contains("url(data:image/png;base64,AA)"));
        assert!(text.contains("url(http://cdn.example.com/x.png)"));
        assert!(text.contains("url(missing.png)"));
        assert!(text.contains("url(../../outside.png)"));
        assert!(text.contains(".e { background: url(/app/4/img/bg.png); }"));
    }

    #[test]
    fn test_stylesheet_without_references_is_untouched() {
        let backend = Arc::new(MemoryBackend::new("mem"));
        backend.put("css/site.css", "a { color: red; }", 3);
        let css = run(backend);
        assert!(css.referenced().is_empty());
        assert!(css.filters().is_empty());
        assert_eq!(css.version().unwrap(), 3);
    }

    #[test]
    fn test_resolve() {
        assert_eq!(resolve("css/site.css", "../img/a.png").as_deref(), Some("img/a.png"));
        assert_eq!(resolve("site.css", "./img/a.png").as_deref(), Some("img/a.png"));
        assert_eq!(resolve("css/site.css", "../../a.png"), None);
        assert_eq!(local_path("a.png?v=2#top"), Some("a.png"));
        assert_eq!(local_path("#filter"), None);
        assert_eq!(local_path("/abs/a.png"), None);
        assert_eq!(local_path("//cdn/a.png"), None);
    }
}

//! Storage backends.
//!
//! A backend lists paths matching a pattern, reports their last update and
//! opens their content. Heaps resolve through a backend; nuts read from it.
//!
//! Patterns are regular expressions matched against the whole path, so
//! `js/.*\.js` matches `js/app.js` but not `vendor/js/app.js`.

mod dir;
mod memory;

pub use dir::DirBackend;
pub use memory::MemoryBackend;

use regex::Regex;
use std::io::Read;

use crate::error::{EngineError, Result};
use crate::nut::VersionStrategy;

/// Source of raw resources.
pub trait Backend: Send + Sync {
    /// Name used in logs and errors.
    fn name(&self) -> &str;

    /// Paths matching `pattern`, sorted.
    fn list_paths(&self, pattern: &str) -> Result<Vec<String>>;

    /// Last update of `path` in milliseconds.
    fn last_update(&self, path: &str) -> Result<u64>;

    fn open(&self, path: &str) -> Result<Box<dyn Read + Send>>;

    fn exists(&self, path: &str) -> Result<bool>;

    /// How nuts created from this backend compute their version.
    fn version_strategy(&self) -> VersionStrategy {
        VersionStrategy::Timestamp
    }

    /// Whether the content of `path` may differ on each read.
    fn is_dynamic(&self, _path: &str) -> bool {
        false
    }
}

/// Compile a pattern anchored on both ends.
pub fn compile_pattern(pattern: &str) -> Result<Regex> {
    Regex::new(&format!("^(?:{pattern})$"))
        .map_err(|e| EngineError::config(format!("invalid pattern '{pattern}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_matches_whole_path() {
        let re = compile_pattern(r"js/.*\.js").unwrap();
        assert!(re.is_match("js/app.js"));
        assert!(!re.is_match("vendor/js/app.js"));
        assert!(!re.is_match("js/app.js.map"));
    }

    #[test]
    fn test_invalid_pattern() {
        let err = compile_pattern("js/(").unwrap_err();
        assert!(err.is_configuration());
    }
}

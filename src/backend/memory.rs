//! In-process backend with explicit timestamps.

use parking_lot::RwLock;
use rustc_hash::FxHashSet;
use std::collections::BTreeMap;
use std::io::{self, Cursor, Read};
use std::sync::Arc;

use super::{Backend, compile_pattern};
use crate::error::{EngineError, Result};
use crate::nut::VersionStrategy;

struct Entry {
    content: Arc<[u8]>,
    timestamp: u64,
}

/// Resources held in memory, keyed by path.
///
/// Timestamps are set by the caller, which makes change detection fully
/// deterministic.
pub struct MemoryBackend {
    name: String,
    entries: RwLock<BTreeMap<String, Entry>>,
    dynamic: RwLock<FxHashSet<String>>,
    strategy: VersionStrategy,
}

impl MemoryBackend {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: RwLock::new(BTreeMap::new()),
            dynamic: RwLock::new(FxHashSet::default()),
            strategy: VersionStrategy::Timestamp,
        }
    }

    /// Use content digests instead of timestamps for versions.
    pub fn with_content_version(mut self) -> Self {
        self.strategy = VersionStrategy::Content;
        self
    }

    /// Insert or replace a resource.
    pub fn put(&self, path: impl Into<String>, content: impl AsRef<[u8]>, timestamp: u64) {
        self.entries.write().insert(
            path.into(),
            Entry {
                content: Arc::from(content.as_ref()),
                timestamp,
            },
        );
    }

    /// Update the timestamp of an existing resource.
    pub fn touch(&self, path: &str, timestamp: u64) -> bool {
        match self.entries.write().get_mut(path) {
            Some(entry) => {
                entry.timestamp = timestamp;
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, path: &str) -> bool {
        self.entries.write().remove(path).is_some()
    }

    /// Flag a path as dynamic: nuts created from it are never cached.
    pub fn mark_dynamic(&self, path: impl Into<String>) {
        self.dynamic.write().insert(path.into());
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn missing(&self, path: &str) -> EngineError {
        EngineError::backend(
            &self.name,
            path,
            io::Error::new(io::ErrorKind::NotFound, "no such resource"),
        )
    }
}

impl Backend for MemoryBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_paths(&self, pattern: &str) -> Result<Vec<String>> {
        let re = compile_pattern(pattern)?;
        Ok(self
            .entries
            .read()
            .keys()
            .filter(|path| re.is_match(path))
            .cloned()
            .collect())
    }

    fn last_update(&self, path: &str) -> Result<u64> {
        self.entries
            .read()
            .get(path)
            .map(|e| e.timestamp)
            .ok_or_else(|| self.missing(path))
    }

    fn open(&self, path: &str) -> Result<Box<dyn Read + Send>> {
        let content = self
            .entries
            .read()
            .get(path)
            .map(|e| e.content.clone())
            .ok_or_else(|| self.missing(path))?;
        Ok(Box::new(Cursor::new(content)))
    }

    fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.entries.read().contains_key(path))
    }

    fn version_strategy(&self) -> VersionStrategy {
        self.strategy
    }

    fn is_dynamic(&self, path: &str) -> bool {
        self.dynamic.read().contains(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_list_open() {
        let backend = MemoryBackend::new("mem");
        backend.put("js/b.js", "b", 1);
        backend.put("js/a.js", "a", 2);
        backend.put("css/a.css", "c", 3);

        assert_eq!(backend.list_paths(r"js/.*").unwrap(), vec!["js/a.js", "js/b.js"]);
        assert_eq!(backend.last_update("js/a.js").unwrap(), 2);

        let mut content = String::new();
        backend.open("css/a.css").unwrap().read_to_string(&mut content).unwrap();
        assert_eq!(content, "c");
    }

    #[test]
    fn test_missing_path_is_backend_error() {
        let backend = MemoryBackend::new("mem");
        assert!(matches!(
            backend.last_update("nope.js"),
            Err(EngineError::Backend { .. })
        ));
        assert!(!backend.exists("nope.js").unwrap());
        assert!(!backend.touch("nope.js", 1));
    }

    #[test]
    fn test_remove_and_dynamic() {
        let backend = MemoryBackend::new("mem");
        backend.put("a.js", "a", 1);
        backend.mark_dynamic("a.js");
        assert!(backend.is_dynamic("a.js"));
        assert!(backend.remove("a.js"));
        assert!(backend.is_empty());
    }
}

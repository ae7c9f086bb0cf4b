//! Last-seen paths and timestamps, and the diff between two scans.

use std::collections::BTreeMap;

/// Paths seen per pattern, with their last update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    patterns: BTreeMap<String, BTreeMap<String, u64>>,
}

/// Difference between two snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub changed: Vec<String>,
}

impl Snapshot {
    pub fn insert(&mut self, pattern: &str, path: String, timestamp: u64) {
        self.patterns
            .entry(pattern.to_string())
            .or_default()
            .insert(path, timestamp);
    }

    /// Make sure a pattern that matched nothing is still recorded.
    pub fn touch_pattern(&mut self, pattern: &str) {
        self.patterns.entry(pattern.to_string()).or_default();
    }

    /// Matched paths in pattern order, deduplicated across patterns.
    pub fn paths(&self, patterns: &[String]) -> Vec<String> {
        let mut seen = rustc_hash::FxHashSet::default();
        patterns
            .iter()
            .filter_map(|p| self.patterns.get(p))
            .flat_map(|paths| paths.keys())
            .filter(|path| seen.insert(path.as_str()))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.patterns.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// What changed going from `self` to `fresh`.
    pub fn diff(&self, fresh: &Snapshot) -> SnapshotDiff {
        let mut diff = SnapshotDiff::default();
        let empty = BTreeMap::new();

        for (pattern, paths) in &fresh.patterns {
            let old = self.patterns.get(pattern).unwrap_or(&empty);
            for (path, timestamp) in paths {
                match old.get(path) {
                    None => diff.added.push(path.clone()),
                    Some(previous) if previous != timestamp => diff.changed.push(path.clone()),
                    Some(_) => {}
                }
            }
        }
        for (pattern, paths) in &self.patterns {
            let new = fresh.patterns.get(pattern).unwrap_or(&empty);
            diff.removed
                .extend(paths.keys().filter(|p| !new.contains_key(*p)).cloned());
        }
        diff
    }
}

impl SnapshotDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }

    pub fn len(&self) -> usize {
        self.added.len() + self.removed.len() + self.changed.len()
    }
}

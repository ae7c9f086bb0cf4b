//! Cached results and their serializable form.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::nut::{Nut, NutSnapshot, find_by_name};

/// Name prefix of nuts produced by a best-effort execution.
pub const BEST_EFFORT_PREFIX: &str = "best-effort";

/// What the cache remembers for one key.
///
/// A best-effort execution stores its quick results first; the full
/// execution later adds the default result to the same entry.
#[derive(Debug, Clone, Default)]
pub struct CacheResult {
    default: Option<Vec<Nut>>,
    best_effort: Option<Vec<Nut>>,
}

impl CacheResult {
    pub fn with_default(nuts: Vec<Nut>) -> Self {
        Self {
            default: Some(nuts),
            best_effort: None,
        }
    }

    pub fn with_best_effort(nuts: Vec<Nut>) -> Self {
        Self {
            default: None,
            best_effort: Some(nuts),
        }
    }

    pub fn set_default(&mut self, nuts: Vec<Nut>) {
        self.default = Some(nuts);
    }

    pub fn default_result(&self) -> Option<&[Nut]> {
        self.default.as_deref()
    }

    pub fn best_effort_result(&self) -> Option<&[Nut]> {
        self.best_effort.as_deref()
    }

    /// The most complete result available.
    pub fn nuts(&self) -> &[Nut] {
        self.default
            .as_deref()
            .or(self.best_effort.as_deref())
            .unwrap_or_default()
    }

    /// Find a nut by name; best-effort names are looked up in the
    /// best-effort result.
    pub fn get(&self, name: &str) -> Option<&Nut> {
        let name = name.trim_start_matches('/');
        let source = if is_best_effort(name) {
            self.best_effort.as_deref()
        } else {
            self.default.as_deref()
        };
        source.and_then(|nuts| find_by_name(nuts, name))
    }

    /// Content bytes held, including referenced and source nuts.
    pub fn footprint(&self) -> u64 {
        [&self.default, &self.best_effort]
            .into_iter()
            .flatten()
            .flatten()
            .map(Nut::footprint)
            .sum()
    }

    pub(crate) fn snapshot(&self) -> Result<CacheSnapshot> {
        let snap = |nuts: &Option<Vec<Nut>>| -> Result<Option<Vec<NutSnapshot>>> {
            nuts.as_ref()
                .map(|nuts| nuts.iter().map(Nut::snapshot).collect())
                .transpose()
        };
        Ok(CacheSnapshot {
            default: snap(&self.default)?,
            best_effort: snap(&self.best_effort)?,
        })
    }

    pub(crate) fn from_snapshot(snapshot: CacheSnapshot) -> Self {
        let restore = |nuts: Option<Vec<NutSnapshot>>| {
            nuts.map(|nuts| nuts.into_iter().map(Nut::from_snapshot).collect())
        };
        Self {
            default: restore(snapshot.default),
            best_effort: restore(snapshot.best_effort),
        }
    }
}

/// Whether `name` designates a best-effort nut.
pub fn is_best_effort(name: &str) -> bool {
    name.trim_start_matches('/')
        .strip_prefix(BEST_EFFORT_PREFIX)
        .is_some_and(|rest| rest.starts_with('/'))
}

/// On-disk form of a spilled entry.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct CacheSnapshot {
    default: Option<Vec<NutSnapshot>>,
    best_effort: Option<Vec<NutSnapshot>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nut::NutType;

    #[test]
    fn test_lookup_by_name() {
        let mut result = CacheResult::with_best_effort(vec![
            Nut::from_bytes("a.js", NutType::Javascript, "a", 1).with_prefix(BEST_EFFORT_PREFIX),
        ]);
        assert!(result.get("best-effort/a.js").is_some());
        assert!(result.get("a.js").is_none());
        assert_eq!(result.nuts()[0].name(), "best-effort/a.js");

        result.set_default(vec![Nut::from_bytes("aggregate.js", NutType::Javascript, "ab", 1)]);
        assert!(result.get("/aggregate.js").is_some());
        assert!(result.get("best-effort/a.js").is_some());
        assert_eq!(result.nuts()[0].name(), "aggregate.js");
        assert_eq!(result.footprint(), 3);
    }

    #[test]
    fn test_is_best_effort() {
        assert!(is_best_effort("best-effort/a.js"));
        assert!(is_best_effort("/best-effort/a.js"));
        assert!(!is_best_effort("best-effort.js"));
        assert!(!is_best_effort("a.js"));
    }
}

//! `[cache]` section configuration.
//!
//! # Example
//!
//! ```toml
//! [cache]
//! enabled = true
//! best_effort = false        # Serve per-file results while the full run completes
//! max_memory = "10MB"        # digits, optionally followed by KB or MB
//! time_to_live = 0           # seconds; 0 keeps entries until invalidated
//! spill_dir = "~/.cache/assetflow"
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::{CacheConfig, parse_size};
use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    pub enabled: bool,
    pub best_effort: bool,
    pub max_memory: String,
    /// Seconds between full clears.
    pub time_to_live: u64,
    /// Directory for entries that do not fit in memory.
    pub spill_dir: Option<PathBuf>,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            enabled: true,
            best_effort: false,
            max_memory: "10MB".into(),
            time_to_live: 0,
            spill_dir: None,
        }
    }
}

impl CacheSection {
    pub fn to_cache_config(&self) -> Result<CacheConfig> {
        Ok(CacheConfig {
            enabled: self.enabled,
            best_effort: self.best_effort,
            max_memory: parse_size(&self.max_memory)?,
            time_to_live: Duration::from_secs(self.time_to_live),
            spill_dir: self.spill_dir.clone(),
        })
    }
}

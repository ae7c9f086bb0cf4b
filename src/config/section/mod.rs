//! Configuration section definitions.
//!
//! | Module     | TOML Section   | Purpose                              |
//! |------------|----------------|--------------------------------------|
//! | `cache`    | `[cache]`      | Cache switch, budget, expiry, spill  |
//! | `serve`    | `[serve]`      | Asset server                         |
//! | `workflow` | `[[workflow]]` | Asset sources and their pipelines    |
//!
//! `[output]` is small enough to live here.

mod cache;
mod serve;
mod workflow;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub use cache::CacheSection;
pub use serve::ServeConfig;
pub use workflow::WorkflowConfig;

/// `[output]` section: where `build` writes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("dist"),
        }
    }
}

//! `[[workflow]]` sections.
//!
//! # Example
//!
//! ```toml
//! [[workflow]]
//! id = "app"
//! dir = "assets"                  # relative to the config file
//! patterns = ["js/.*\\.js", ".*\\.css"]
//! polling = 2                     # seconds; 0 disables polling
//! minify = true
//! aggregate = true
//! content_version = false         # version by content hash instead of mtime
//! gzip = false                    # serve and write gzip-encoded nuts
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    pub id: String,
    pub dir: PathBuf,
    /// Path regexes, matched against the whole relative path.
    pub patterns: Vec<String>,
    pub polling: u64,
    pub minify: bool,
    pub aggregate: bool,
    pub content_version: bool,
    pub gzip: bool,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            dir: PathBuf::from("."),
            patterns: Vec::new(),
            polling: 0,
            minify: true,
            aggregate: true,
            content_version: false,
            gzip: false,
        }
    }
}

impl WorkflowConfig {
    pub fn polling_interval(&self) -> Option<Duration> {
        (self.polling > 0).then(|| Duration::from_secs(self.polling))
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(EngineError::config("workflow id must not be empty"));
        }
        if self.id.contains('/') {
            return Err(EngineError::config(format!(
                "workflow id '{}' must not contain '/'",
                self.id
            )));
        }
        if self.patterns.is_empty() {
            return Err(EngineError::config(format!(
                "workflow '{}' declares no patterns",
                self.id
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::config::test_parse_config;

    #[test]
    fn test_workflow_defaults() {
        let config = test_parse_config("[[workflow]]\nid = \"app\"\npatterns = [\".*\\\\.js\"]");
        let wf = &config.workflow[0];
        assert_eq!(wf.id, "app");
        assert_eq!(wf.patterns, vec![".*\\.js"]);
        assert!(wf.minify);
        assert!(wf.aggregate);
        assert!(!wf.content_version);
        assert!(!wf.gzip);
        assert!(wf.polling_interval().is_none());
    }

    #[test]
    fn test_workflow_polling() {
        let config = test_parse_config(
            "[[workflow]]\nid = \"app\"\npatterns = [\"a\"]\npolling = 3\nminify = false\ngzip = true",
        );
        let wf = &config.workflow[0];
        assert_eq!(wf.polling_interval().unwrap().as_secs(), 3);
        assert!(!wf.minify);
        assert!(wf.gzip);
    }
}

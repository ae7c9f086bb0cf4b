//! Engine configuration management.
//!
//! Handles loading `assetflow.toml`.
//!
//! # Configuration Structure
//!
//! ```toml
//! [cache]               # Result cache (enabled, best_effort, max_memory, ...)
//! [output]              # Build output directory
//! [serve]               # Asset server (interface, port)
//! [[workflow]]          # One table per workflow (id, dir, patterns, ...)
//! ```
//!
//! Relative paths are resolved against the directory holding the config
//! file, after `~` expansion.

pub mod section;

pub use section::{CacheSection, OutputConfig, ServeConfig, WorkflowConfig};

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::cache::CacheConfig;
use crate::error::{EngineError, Result};
use crate::log;

/// Default config file name, searched upward from the working directory.
pub const CONFIG_FILE: &str = "assetflow.toml";

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory of the config file; relative paths resolve against it
    #[serde(skip)]
    root: PathBuf,

    pub cache: CacheSection,
    pub output: OutputConfig,
    pub serve: ServeConfig,
    pub workflow: Vec<WorkflowConfig>,
}

impl EngineConfig {
    /// Load from `path`, or from the nearest `assetflow.toml` when `None`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => find_config_file(Path::new(CONFIG_FILE)).ok_or_else(|| {
                EngineError::config(format!("{CONFIG_FILE} not found in this or any parent directory"))
            })?,
        };
        Self::from_path(&path)
    }

    /// Parse configuration from TOML text, relative to the working directory.
    pub fn from_str(content: &str) -> Result<Self> {
        let (mut config, _) = Self::parse_with_ignored(content)?;
        config.finalize(Path::new("."))?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            EngineError::config(format!("cannot read `{}`: {e}", path.display()))
        })?;
        let (mut config, ignored) = Self::parse_with_ignored(&content)
            .map_err(|e| EngineError::config(format!("`{}`: {e}", path.display())))?;
        if !ignored.is_empty() {
            Self::print_unknown_fields_warning(&ignored, path);
        }

        let root = path.parent().filter(|p| !p.as_os_str().is_empty());
        config.finalize(root.unwrap_or(Path::new(".")))?;
        Ok(config)
    }

    fn parse_with_ignored(content: &str) -> Result<(Self, Vec<String>)> {
        let mut ignored = Vec::new();
        let deserializer = toml::Deserializer::new(content);
        let config = serde_ignored::deserialize(deserializer, |path: serde_ignored::Path| {
            ignored.push(path.to_string());
        })
        .map_err(|e| EngineError::config(e.to_string()))?;
        Ok((config, ignored))
    }

    fn print_unknown_fields_warning(fields: &[String], path: &Path) {
        let display_path = path
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_else(|| path.to_string_lossy());
        eprintln!();
        log!("warning"; "unknown fields in {}:", display_path);
        log!("warning"; "ignoring:");
        for field in fields {
            eprintln!("- {}", field);
        }
        eprintln!();
    }

    fn finalize(&mut self, root: &Path) -> Result<()> {
        self.root = root.to_path_buf();
        self.normalize_paths();
        self.validate()
    }

    // ========================================================================
    // paths
    // ========================================================================

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn root_join(&self, path: impl AsRef<Path>) -> PathBuf {
        self.root.join(path)
    }

    fn normalize_paths(&mut self) {
        let root = self.root.clone();
        self.output.dir = expand_path(&self.output.dir, &root);
        if let Some(dir) = self.cache.spill_dir.take() {
            self.cache.spill_dir = Some(expand_path(&dir, &root));
        }
        for workflow in &mut self.workflow {
            workflow.dir = expand_path(&workflow.dir, &root);
        }
    }

    // ========================================================================
    // validation
    // ========================================================================

    /// Check everything that would otherwise fail later, at construction.
    pub fn validate(&self) -> Result<()> {
        self.cache.to_cache_config()?;

        let mut seen = FxHashSet::default();
        for workflow in &self.workflow {
            workflow.validate()?;
            if !seen.insert(workflow.id.as_str()) {
                return Err(EngineError::config(format!(
                    "workflow '{}' is declared twice",
                    workflow.id
                )));
            }
        }
        Ok(())
    }

    pub fn to_cache_config(&self) -> Result<CacheConfig> {
        self.cache.to_cache_config()
    }

    pub fn find_workflow(&self, id: &str) -> Option<&WorkflowConfig> {
        self.workflow.iter().find(|w| w.id == id)
    }
}

/// Expand `~` and resolve relative paths against `root`.
fn expand_path(path: &Path, root: &Path) -> PathBuf {
    let expanded = PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).into_owned());
    if expanded.is_relative() {
        root.join(expanded)
    } else {
        expanded
    }
}

/// Find config file by searching upward from current directory.
///
/// ```text
/// /home/user/app/assets/js/   ← cwd
/// /home/user/app/assetflow.toml  ← found
/// ```
pub fn find_config_file(config_name: &Path) -> Option<PathBuf> {
    if config_name.is_absolute() {
        return config_name.exists().then(|| config_name.to_path_buf());
    }

    let cwd = std::env::current_dir().ok()?;
    let mut current = cwd.as_path();
    loop {
        let candidate = current.join(config_name);
        if candidate.exists() {
            return Some(candidate);
        }
        current = current.parent()?;
    }
}

/// Parse a config snippet, asserting it has no unknown fields.
#[cfg(test)]
pub fn test_parse_config(content: &str) -> EngineConfig {
    let (parsed, ignored) = EngineConfig::parse_with_ignored(content).unwrap();
    assert!(
        ignored.is_empty(),
        "test config has unknown fields: {:?}",
        ignored
    );
    parsed
}

// ============================================================================
// tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_from_str_invalid_toml() {
        let err = EngineConfig::from_str("[cache\nenabled = true").unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_unknown_fields_detected() {
        let (_, ignored) =
            EngineConfig::parse_with_ignored("[cache]\nenabled = true\ncolour = \"red\"\n[extra]\nx = 1")
                .unwrap();
        assert!(ignored.contains(&"cache.colour".to_string()));
        assert!(ignored.contains(&"extra".to_string()));
    }

    #[test]
    fn test_no_unknown_fields() {
        let (_, ignored) = EngineConfig::parse_with_ignored(
            "[output]\ndir = \"out\"\n[[workflow]]\nid = \"a\"\npatterns = [\"x\"]",
        )
        .unwrap();
        assert!(ignored.is_empty());
    }

    #[test]
    fn test_duplicate_workflow_rejected() {
        let err = EngineConfig::from_str(
            "[[workflow]]\nid = \"a\"\npatterns = [\"x\"]\n[[workflow]]\nid = \"a\"\npatterns = [\"y\"]",
        )
        .unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("declared twice"));
    }

    #[test]
    fn test_invalid_workflows_rejected() {
        for text in [
            "[[workflow]]\npatterns = [\"x\"]",
            "[[workflow]]\nid = \"a\"",
            "[[workflow]]\nid = \"a/b\"\npatterns = [\"x\"]",
            "[cache]\nmax_memory = \"lots\"",
        ] {
            let err = EngineConfig::from_str(text).unwrap_err();
            assert!(err.is_configuration(), "{text:?} should be rejected");
        }
    }

    #[test]
    fn test_paths_resolved_against_config_dir() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(
            &path,
            "[output]\ndir = \"public\"\n[cache]\nspill_dir = \"/tmp/spill\"\n\
             [[workflow]]\nid = \"app\"\ndir = \"assets\"\npatterns = [\".*\"]",
        )
        .unwrap();

        let config = EngineConfig::load(Some(&path)).unwrap();
        assert_eq!(config.root(), dir.path());
        assert_eq!(config.output.dir, dir.path().join("public"));
        assert_eq!(config.workflow[0].dir, dir.path().join("assets"));
        assert_eq!(config.cache.spill_dir.as_deref(), Some(Path::new("/tmp/spill")));
        assert!(config.find_workflow("app").is_some());
        assert!(config.find_workflow("web").is_none());
    }

    #[test]
    fn test_tilde_expanded() {
        let home = shellexpand::tilde("~").into_owned();
        let expanded = expand_path(Path::new("~/cache"), Path::new("/root/dir"));
        assert_eq!(expanded, Path::new(&home).join("cache"));
    }

    #[test]
    fn test_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = EngineConfig::load(Some(&dir.path().join("nope.toml"))).unwrap_err();
        assert!(err.is_configuration());
    }
}

//! Engine error types.
//!
//! Every failure surfaced by the engine is an [`EngineError`]. Variants carry
//! enough context (workflow id, resource name, path) to be diagnosed without
//! inspecting internals.

use std::path::PathBuf;
use thiserror::Error;

/// Engine result alias.
pub type Result<T, E = EngineError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Invalid setup, raised at construction and never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// I/O failure while listing, opening or checking a resource.
    #[error("backend '{backend}' failed on '{path}'")]
    Backend {
        backend: String,
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("workflow '{0}' not found")]
    WorkflowNotFound(String),

    #[error("nut '{name}' not found in workflow '{workflow}'")]
    NutNotFound { workflow: String, name: String },

    /// A filter failed while a pipe was executing.
    #[error("filter '{filter}' failed on '{nut}': {message}")]
    Filter {
        nut: String,
        filter: String,
        message: String,
    },

    // NOTE: spill files are internal, so serde errors are flattened to text
    #[error("cache spill store failed on `{0}`: {1}")]
    Cache(PathBuf, String),
}

impl EngineError {
    /// Shorthand for a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Wrap an I/O error raised by a backend.
    pub fn backend(
        backend: impl Into<String>,
        path: impl Into<String>,
        source: std::io::Error,
    ) -> Self {
        Self::Backend {
            backend: backend.into(),
            path: path.into(),
            source,
        }
    }

    /// Build a filter error.
    pub fn filter(
        nut: impl Into<String>,
        filter: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Filter {
            nut: nut.into(),
            filter: filter.into(),
            message: message.into(),
        }
    }

    /// Whether this error means "no such workflow or nut".
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::WorkflowNotFound(_) | Self::NutNotFound { .. })
    }

    /// Whether this error was raised by a misconfiguration.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;
    use std::io::{Error, ErrorKind};

    #[test]
    fn test_backend_error_keeps_source() {
        let err = EngineError::backend(
            "dir:assets",
            "js/app.js",
            Error::new(ErrorKind::NotFound, "gone"),
        );
        let display = format!("{err}");
        assert!(display.contains("dir:assets"));
        assert!(display.contains("js/app.js"));
        assert!(err.source().is_some());
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_not_found_is_distinct() {
        let err = EngineError::NutNotFound {
            workflow: "scripts".into(),
            name: "app.js".into(),
        };
        assert!(err.is_not_found());
        assert!(format!("{err}").contains("scripts"));
        assert!(EngineError::WorkflowNotFound("styles".into()).is_not_found());
        assert!(!EngineError::config("bad").is_not_found());
    }
}

//! Version numbers of nuts.
//!
//! A version is either resolved (a plain `u64`) or unresolved (a recipe to
//! compute it). Resolution happens at most once; the value is memoized.
//! Backends choose between timestamp-based and content-based versions.

use parking_lot::Mutex;
use std::fmt;
use std::io::{self, Read};
use std::sync::Arc;

use crate::backend::Backend;
use crate::error::{EngineError, Result};

/// How a backend derives version numbers for its paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VersionStrategy {
    /// Last update timestamp reported by the backend.
    #[default]
    Timestamp,
    /// Digest of the content (blake3).
    Content,
}

/// Recipe for an unresolved version.
pub enum VersionSource {
    Backend {
        backend: Arc<dyn Backend>,
        path: String,
        strategy: VersionStrategy,
    },
    /// Derived nut: combination of the versions it was built from.
    Combined(Vec<Arc<Version>>),
}

enum VersionState {
    Unresolved(VersionSource),
    Resolved(u64),
}

/// Lazily computed, memoized version number.
pub struct Version {
    state: Mutex<VersionState>,
}

impl Version {
    pub fn resolved(value: u64) -> Self {
        Self {
            state: Mutex::new(VersionState::Resolved(value)),
        }
    }

    pub fn lazy(source: VersionSource) -> Self {
        Self {
            state: Mutex::new(VersionState::Unresolved(source)),
        }
    }

    /// Get the version, computing it on first call.
    ///
    /// A failed computation leaves the version unresolved so the next call
    /// retries against the backend.
    pub fn get(&self) -> Result<u64> {
        let mut state = self.state.lock();
        let value = match &*state {
            VersionState::Resolved(v) => return Ok(*v),
            VersionState::Unresolved(source) => compute(source)?,
        };
        *state = VersionState::Resolved(value);
        Ok(value)
    }

    pub fn is_resolved(&self) -> bool {
        matches!(&*self.state.lock(), VersionState::Resolved(_))
    }
}

impl fmt::Debug for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.state.lock() {
            VersionState::Resolved(v) => write!(f, "Version({v})"),
            VersionState::Unresolved(_) => write!(f, "Version(<unresolved>)"),
        }
    }
}

fn compute(source: &VersionSource) -> Result<u64> {
    match source {
        VersionSource::Backend {
            backend,
            path,
            strategy: VersionStrategy::Timestamp,
        } => backend.last_update(path),
        VersionSource::Backend {
            backend,
            path,
            strategy: VersionStrategy::Content,
        } => {
            let reader = backend.open(path)?;
            digest_reader(reader).map_err(|e| EngineError::backend(backend.name(), path, e))
        }
        VersionSource::Combined(parts) => {
            let values = parts.iter().map(|p| p.get()).collect::<Result<Vec<_>>>()?;
            Ok(combine(&values))
        }
    }
}

/// Combine several versions into one.
///
/// A single version is returned unchanged so a derived nut wrapping one
/// source keeps the source's version.
pub fn combine(versions: &[u64]) -> u64 {
    if let [single] = versions {
        return *single;
    }
    let mut hasher = blake3::Hasher::new();
    for v in versions {
        hasher.update(&v.to_be_bytes());
    }
    truncate(hasher.finalize())
}

/// Version derived from in-memory content.
pub fn digest(bytes: &[u8]) -> u64 {
    truncate(blake3::hash(bytes))
}

fn digest_reader(mut reader: impl Read) -> io::Result<u64> {
    let mut hasher = blake3::Hasher::new();
    let mut buffer = [0u8; 64 * 1024];
    loop {
        match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => {
                hasher.update(&buffer[..n]);
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(truncate(hasher.finalize()))
}

fn truncate(hash: blake3::Hash) -> u64 {
    let mut head = [0u8; 8];
    head.copy_from_slice(&hash.as_bytes()[..8]);
    u64::from_be_bytes(head)
}

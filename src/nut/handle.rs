//! The resource handle.

use std::fmt;
use std::io::{Cursor, Read};
use std::sync::Arc;

use super::kind::NutType;
use super::snapshot::NutSnapshot;
use super::version::{Version, VersionSource};
use crate::backend::Backend;
use crate::error::{EngineError, Result};
use crate::pipe::{Execution, Filter, OnReady, Pipe, check_registration};

/// Where a nut's raw content comes from.
#[derive(Clone)]
pub enum Content {
    /// Opened lazily from a backend.
    Backend {
        backend: Arc<dyn Backend>,
        path: String,
    },
    /// Materialized or generated content.
    Bytes(Arc<[u8]>),
    /// Concatenation of each component's transformed output.
    Composite(Vec<Nut>),
}

/// One versioned asset flowing through the engine.
///
/// The initial name and type never change; stages rename or retype a nut
/// by producing a modified clone. Filters are pending: they run when the
/// nut is transformed.
#[derive(Clone)]
pub struct Nut {
    name: String,
    initial_name: String,
    nut_type: NutType,
    initial_type: NutType,
    version: Arc<Version>,
    content: Content,
    referenced: Vec<Nut>,
    sources: Vec<Nut>,
    filters: Vec<Arc<dyn Filter>>,
    dynamic: bool,
    /// Encoding of bytes frozen after an encoding filter ran.
    encoding: Option<String>,
}

impl Nut {
    /// Create a nut for a backend path.
    ///
    /// Fails if the extension maps to no known type.
    pub fn from_backend(backend: Arc<dyn Backend>, path: &str) -> Result<Self> {
        let name = path.trim_start_matches('/').to_string();
        let nut_type = NutType::from_name(&name).ok_or_else(|| {
            EngineError::config(format!(
                "'{path}' from backend '{}' has no known content type",
                backend.name()
            ))
        })?;
        let version = Version::lazy(VersionSource::Backend {
            backend: backend.clone(),
            path: path.to_string(),
            strategy: backend.version_strategy(),
        });
        Ok(Self {
            dynamic: backend.is_dynamic(path),
            content: Content::Backend {
                backend,
                path: path.to_string(),
            },
            ..Self::base(name, nut_type, version)
        })
    }

    /// Create a nut holding its content in memory.
    pub fn from_bytes(
        name: impl Into<String>,
        nut_type: NutType,
        content: impl AsRef<[u8]>,
        version: u64,
    ) -> Self {
        Self {
            content: Content::Bytes(Arc::from(content.as_ref())),
            ..Self::base(name.into(), nut_type, Version::resolved(version))
        }
    }

    /// Create a nut concatenating `components`.
    ///
    /// Its version combines the components' versions and its source record
    /// lists them. It references what the components reference, once per
    /// name.
    pub fn composite(name: impl Into<String>, nut_type: NutType, components: Vec<Nut>) -> Self {
        let version = Version::lazy(VersionSource::Combined(
            components.iter().map(|c| c.version.clone()).collect(),
        ));
        let mut referenced: Vec<Nut> = Vec::new();
        for nut in components.iter().flat_map(|c| c.referenced.iter()) {
            if !referenced.iter().any(|r| r.name == nut.name) {
                referenced.push(nut.clone());
            }
        }
        Self {
            referenced,
            sources: components.clone(),
            content: Content::Composite(components),
            ..Self::base(name.into(), nut_type, version)
        }
    }

    fn base(name: String, nut_type: NutType, version: Version) -> Self {
        Self {
            initial_name: name.clone(),
            name,
            nut_type,
            initial_type: nut_type,
            version: Arc::new(version),
            content: Content::Bytes(Arc::from(&[][..])),
            referenced: Vec::new(),
            sources: Vec::new(),
            filters: Vec::new(),
            dynamic: false,
            encoding: None,
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn initial_name(&self) -> &str {
        &self.initial_name
    }

    pub fn nut_type(&self) -> NutType {
        self.nut_type
    }

    pub fn initial_type(&self) -> NutType {
        self.initial_type
    }

    /// Version number, computed on first access.
    pub fn version(&self) -> Result<u64> {
        self.version.get()
    }

    pub fn referenced(&self) -> &[Nut] {
        &self.referenced
    }

    pub fn referenced_mut(&mut self) -> &mut [Nut] {
        &mut self.referenced
    }

    pub fn sources(&self) -> &[Nut] {
        &self.sources
    }

    pub fn filters(&self) -> &[Arc<dyn Filter>] {
        &self.filters
    }

    pub fn content(&self) -> &Content {
        &self.content
    }

    pub fn is_dynamic(&self) -> bool {
        self.dynamic
    }

    /// Name of the place the content comes from, for error reports.
    pub fn origin(&self) -> &str {
        match &self.content {
            Content::Backend { backend, .. } => backend.name(),
            Content::Bytes(_) => "memory",
            Content::Composite(_) => "composite",
        }
    }

    /// Whether every pending filter keeps the output aggregatable.
    pub fn can_aggregate(&self) -> bool {
        self.filters.iter().all(|f| f.can_aggregate())
    }

    /// Encoding of the transformed content, such as `gzip`.
    pub fn content_encoding(&self) -> Option<&str> {
        self.filters
            .iter()
            .rev()
            .find_map(|f| f.content_encoding())
            .or(self.encoding.as_deref())
    }

    // ========================================================================
    // Derivation
    // ========================================================================

    /// Same nut under another name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Same nut under `prefix/name`.
    pub fn with_prefix(self, prefix: &str) -> Self {
        let name = format!("{}/{}", prefix.trim_end_matches('/'), self.name);
        self.with_name(name)
    }

    pub fn with_type(mut self, nut_type: NutType) -> Self {
        self.nut_type = nut_type;
        self
    }

    pub fn with_dynamic(mut self, dynamic: bool) -> Self {
        self.dynamic = dynamic;
        self
    }

    pub fn add_referenced(&mut self, nut: Nut) {
        self.referenced.push(nut);
    }

    /// Make the version change whenever a referenced nut's version does.
    pub fn combine_referenced_versions(&mut self) {
        if self.referenced.is_empty() {
            return;
        }
        let mut parts = vec![self.version.clone()];
        parts.extend(self.referenced.iter().map(|r| r.version.clone()));
        self.version = Arc::new(Version::lazy(VersionSource::Combined(parts)));
    }

    /// Append a pending filter.
    ///
    /// Fails when an aggregatable filter would follow a non-aggregatable one.
    pub fn add_filter(&mut self, filter: Arc<dyn Filter>) -> Result<()> {
        check_registration(&self.filters, filter.as_ref(), &self.name)?;
        self.filters.push(filter);
        Ok(())
    }

    // ========================================================================
    // Content
    // ========================================================================

    /// Raw content, before pending filters.
    pub fn open(&self) -> Result<Box<dyn Read + Send>> {
        match &self.content {
            Content::Backend { backend, path } => backend.open(path),
            Content::Bytes(bytes) => Ok(Box::new(Cursor::new(bytes.clone()))),
            Content::Composite(components) => {
                let mut joined = Vec::new();
                for component in components {
                    let execution = component.transform()?;
                    joined.extend_from_slice(execution.as_bytes());
                    if self.nut_type == NutType::Javascript
                        && !execution.as_bytes().ends_with(b"\n")
                    {
                        // Avoid gluing a statement to the next file's first line
                        joined.push(b'\n');
                    }
                }
                Ok(Box::new(Cursor::new(joined)))
            }
        }
    }

    /// Run the pending filters over the raw content.
    pub fn transform(&self) -> Result<Execution> {
        self.pipe()?.execute()
    }

    /// Run the pending filters and hand the result to every callback.
    pub fn transform_with(&self, callbacks: &mut [&mut dyn OnReady]) -> Result<Execution> {
        self.pipe()?.execute_with(callbacks)
    }

    fn pipe(&self) -> Result<Pipe<'_>> {
        let mut pipe = Pipe::new(self, self.open()?);
        for filter in &self.filters {
            pipe.register(filter.clone())?;
        }
        Ok(pipe)
    }

    /// Transform and freeze this nut and everything it references.
    ///
    /// The result holds its content in memory, has no pending filters and
    /// a resolved version, so it can be cached and replayed.
    pub fn materialize(&self) -> Result<Nut> {
        let version = self.version()?;
        let execution = self.transform()?;
        Ok(Self {
            name: self.name.clone(),
            initial_name: self.initial_name.clone(),
            nut_type: self.nut_type,
            initial_type: self.initial_type,
            version: Arc::new(Version::resolved(version)),
            content: Content::Bytes(execution.shared_bytes()),
            referenced: self
                .referenced
                .iter()
                .map(Nut::materialize)
                .collect::<Result<_>>()?,
            sources: self
                .sources
                .iter()
                .map(Nut::materialize)
                .collect::<Result<_>>()?,
            filters: Vec::new(),
            dynamic: self.dynamic,
            encoding: self.content_encoding().map(str::to_string),
        })
    }

    /// Content bytes held in memory, including referenced and source nuts.
    pub fn footprint(&self) -> u64 {
        let own = match &self.content {
            Content::Bytes(bytes) => bytes.len() as u64,
            Content::Backend { .. } | Content::Composite(_) => 0,
        };
        own + self.referenced.iter().map(Nut::footprint).sum::<u64>()
            + self.sources.iter().map(Nut::footprint).sum::<u64>()
    }

    /// Serializable form of the materialized nut.
    pub fn snapshot(&self) -> Result<NutSnapshot> {
        let frozen = match (&self.content, self.filters.is_empty()) {
            (Content::Bytes(_), true) => self.clone(),
            _ => self.materialize()?,
        };
        let content = match &frozen.content {
            Content::Bytes(bytes) => bytes.to_vec(),
            _ => frozen.transform()?.as_bytes().to_vec(),
        };
        Ok(NutSnapshot {
            version: frozen.version()?,
            name: frozen.name,
            initial_name: frozen.initial_name,
            nut_type: frozen.nut_type,
            initial_type: frozen.initial_type,
            content,
            referenced: frozen
                .referenced
                .iter()
                .map(Nut::snapshot)
                .collect::<Result<_>>()?,
            sources: frozen
                .sources
                .iter()
                .map(Nut::snapshot)
                .collect::<Result<_>>()?,
            encoding: frozen.encoding,
        })
    }

    pub fn from_snapshot(snapshot: NutSnapshot) -> Self {
        Self {
            name: snapshot.name,
            initial_name: snapshot.initial_name,
            nut_type: snapshot.nut_type,
            initial_type: snapshot.initial_type,
            version: Arc::new(Version::resolved(snapshot.version)),
            content: Content::Bytes(Arc::from(snapshot.content)),
            referenced: snapshot
                .referenced
                .into_iter()
                .map(Nut::from_snapshot)
                .collect(),
            sources: snapshot.sources.into_iter().map(Nut::from_snapshot).collect(),
            filters: Vec::new(),
            dynamic: false,
            encoding: snapshot.encoding,
        }
    }
}

impl fmt::Debug for Nut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Nut")
            .field("name", &self.name)
            .field("initial_name", &self.initial_name)
            .field("type", &self.nut_type)
            .field("version", &self.version)
            .field("filters", &self.filters.len())
            .field("dynamic", &self.dynamic)
            .field("encoding", &self.content_encoding())
            .finish_non_exhaustive()
    }
}

/// Find a nut by name among `nuts` and, recursively, their referenced nuts.
pub fn find_by_name<'a>(nuts: &'a [Nut], name: &str) -> Option<&'a Nut> {
    let name = name.trim_start_matches('/');
    nuts.iter().find_map(|nut| {
        if nut.name() == name {
            Some(nut)
        } else {
            find_by_name(nut.referenced(), name)
        }
    })
}

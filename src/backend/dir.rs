//! Directory backend walked with jwalk.

use jwalk::WalkDir;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use super::{Backend, compile_pattern};
use crate::error::{EngineError, Result};
use crate::nut::VersionStrategy;

/// Files commonly left around by editors and OSes.
const IGNORED_FILES: &[&str] = &[".DS_Store", "Thumbs.db"];

/// Resources read from a directory.
///
/// Paths are relative to the root and always `/`-separated.
pub struct DirBackend {
    name: String,
    root: PathBuf,
    strategy: VersionStrategy,
}

impl DirBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            name: format!("dir:{}", root.display()),
            root,
            strategy: VersionStrategy::Timestamp,
        }
    }

    pub fn with_content_version(mut self) -> Self {
        self.strategy = VersionStrategy::Content;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a backend path to a file below the root.
    ///
    /// Paths escaping the root (`..`, absolute) are rejected as not found.
    fn file(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(EngineError::backend(
                &self.name,
                path,
                io::Error::new(io::ErrorKind::NotFound, "path escapes backend root"),
            ));
        }
        Ok(self.root.join(relative))
    }

    fn relative(&self, file: &Path) -> Option<String> {
        let rel = file.strip_prefix(&self.root).ok()?;
        let parts: Vec<_> = rel
            .components()
            .map(|c| c.as_os_str().to_str())
            .collect::<Option<_>>()?;
        Some(parts.join("/"))
    }
}

impl Backend for DirBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_paths(&self, pattern: &str) -> Result<Vec<String>> {
        let re = compile_pattern(pattern)?;
        if !self.root.is_dir() {
            return Err(EngineError::backend(
                &self.name,
                pattern,
                io::Error::new(io::ErrorKind::NotFound, "root is not a directory"),
            ));
        }

        // An unreadable directory fails the listing rather than making its
        // files look removed
        let mut paths = Vec::new();
        for entry in WalkDir::new(&self.root) {
            let entry = entry.map_err(|e| EngineError::backend(&self.name, pattern, io::Error::from(e)))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_str().unwrap_or_default();
            if IGNORED_FILES.contains(&name) {
                continue;
            }
            if let Some(path) = self.relative(&entry.path())
                && re.is_match(&path)
            {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }

    fn last_update(&self, path: &str) -> Result<u64> {
        let file = self.file(path)?;
        let modified = fs::metadata(&file)
            .and_then(|m| m.modified())
            .map_err(|e| EngineError::backend(&self.name, path, e))?;
        Ok(modified
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0))
    }

    fn open(&self, path: &str) -> Result<Box<dyn Read + Send>> {
        let file = self.file(path)?;
        let handle = File::open(&file).map_err(|e| EngineError::backend(&self.name, path, e))?;
        Ok(Box::new(handle))
    }

    fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.file(path).map(|f| f.is_file()).unwrap_or(false))
    }

    fn version_strategy(&self) -> VersionStrategy {
        self.strategy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fixture() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("js/lib")).unwrap();
        fs::create_dir_all(dir.path().join("css")).unwrap();
        fs::write(dir.path().join("js/app.js"), "var app;").unwrap();
        fs::write(dir.path().join("js/lib/util.js"), "var util;").unwrap();
        fs::write(dir.path().join("css/site.css"), "body{}").unwrap();
        fs::write(dir.path().join("js/.DS_Store"), "").unwrap();
        dir
    }

    #[test]
    fn test_list_paths_relative_and_sorted() {
        let dir = fixture();
        let backend = DirBackend::new(dir.path());

        assert_eq!(
            backend.list_paths(r"js/.*").unwrap(),
            vec!["js/app.js", "js/lib/util.js"]
        );
        assert_eq!(backend.list_paths(r".*\.css").unwrap(), vec!["css/site.css"]);
    }

    #[test]
    fn test_open_and_exists() {
        let dir = fixture();
        let backend = DirBackend::new(dir.path());

        let mut content = String::new();
        backend.open("js/app.js").unwrap().read_to_string(&mut content).unwrap();
        assert_eq!(content, "var app;");
        assert!(backend.exists("css/site.css").unwrap());
        assert!(!backend.exists("css/none.css").unwrap());
        assert!(backend.last_update("js/app.js").unwrap() > 0);
    }

    #[test]
    fn test_rejects_escaping_paths() {
        let dir = fixture();
        let backend = DirBackend::new(dir.path().join("js"));
        assert!(backend.open("../css/site.css").is_err());
        assert!(!backend.exists("../css/site.css").unwrap());
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_directory_fails_listing() {
        use std::os::unix::fs::PermissionsExt;

        let dir = fixture();
        let locked = dir.path().join("js/lib");
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
        // Permission bits do not bind root
        if fs::read_dir(&locked).is_ok() {
            fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
            return;
        }

        let result = DirBackend::new(dir.path()).list_paths(r"js/.*");
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
        assert!(matches!(result, Err(EngineError::Backend { .. })));
    }

    #[test]
    fn test_missing_root() {
        let dir = TempDir::new().unwrap();
        let backend = DirBackend::new(dir.path().join("nope"));
        assert!(matches!(
            backend.list_paths(".*"),
            Err(EngineError::Backend { .. })
        ));
    }
}

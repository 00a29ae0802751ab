//! Host abstraction over the corpus.
//!
//! The engine never touches the vault directly; it goes through
//! [`CorpusHost`], which lists sources, reads bytes, and knows which
//! document is in the foreground. The host application (editor plugin,
//! test harness) implements this trait and pushes [`CorpusEvent`]s into
//! the watcher.
//!
//! [`FsVault`] is the bundled filesystem implementation: a directory
//! tree walked with glob filtering, suitable for hosts that simply point
//! the engine at a notes folder, and for the integration tests.

use async_trait::async_trait;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use walkdir::WalkDir;

use crate::error::{EngineError, Result};

/// Metadata handle for one corpus source.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SourceHandle {
    /// Vault-relative path with forward slashes.
    pub path: String,
    /// Display basename.
    pub name: String,
    /// Extension without the dot, lowercased; empty if none.
    pub extension: String,
    /// Last modification time, ms since epoch.
    pub mtime_ms: i64,
    /// Size in bytes.
    pub size: u64,
}

/// Event stream the host feeds into the watcher.
#[derive(Debug, Clone)]
pub enum CorpusEvent {
    Modified { path: String },
    Renamed { old_path: String, new_path: String },
    Deleted { path: String },
    ActiveChanged { path: Option<String> },
}

/// The engine's view of the host application.
#[async_trait]
pub trait CorpusHost: Send + Sync {
    /// Every source currently in the corpus (notes and images alike).
    async fn list_sources(&self) -> Result<Vec<SourceHandle>>;

    /// Full contents of one source.
    async fn read_bytes(&self, path: &str) -> Result<Vec<u8>>;

    /// The document currently in the user's foreground, if any.
    fn active_path(&self) -> Option<String>;

    /// Resolve a single path to its handle.
    async fn source(&self, path: &str) -> Result<Option<SourceHandle>> {
        Ok(self
            .list_sources()
            .await?
            .into_iter()
            .find(|s| s.path == path))
    }
}

/// Filesystem-backed corpus: one root directory, glob-filtered.
pub struct FsVault {
    root: PathBuf,
    include: GlobSet,
    exclude: GlobSet,
    active: RwLock<Option<String>>,
}

impl FsVault {
    /// Vault over `root` with default filters (everything included,
    /// VCS/editor internals excluded).
    pub fn new(root: PathBuf) -> Result<Self> {
        Self::with_globs(root, &["**/*".to_string()], &[])
    }

    pub fn with_globs(root: PathBuf, include: &[String], exclude: &[String]) -> Result<Self> {
        let mut default_excludes = vec![
            "**/.git/**".to_string(),
            "**/.obsidian/**".to_string(),
            "**/.trash/**".to_string(),
            "**/node_modules/**".to_string(),
        ];
        default_excludes.extend_from_slice(exclude);
        Ok(Self {
            root,
            include: build_globset(include)?,
            exclude: build_globset(&default_excludes)?,
            active: RwLock::new(None),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Record the document the user switched to. The host calls this
    /// before forwarding the corresponding [`CorpusEvent::ActiveChanged`].
    pub fn set_active(&self, path: Option<String>) {
        *self.active.write().unwrap() = path;
    }

    fn handle_for(&self, abs: &Path, rel: &str) -> Option<SourceHandle> {
        let meta = std::fs::metadata(abs).ok()?;
        let mtime_ms = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::SystemTime::UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        let name = abs.file_name()?.to_string_lossy().to_string();
        let extension = abs
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        Some(SourceHandle {
            path: rel.to_string(),
            name,
            extension,
            mtime_ms,
            size: meta.len(),
        })
    }
}

#[async_trait]
impl CorpusHost for FsVault {
    async fn list_sources(&self) -> Result<Vec<SourceHandle>> {
        if !self.root.exists() {
            return Err(EngineError::SourceRead {
                path: self.root.display().to_string(),
                reason: "vault root does not exist".to_string(),
            });
        }
        let mut sources = Vec::new();
        for entry in WalkDir::new(&self.root).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(&self.root)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .replace('\\', "/");
            if self.exclude.is_match(&rel) || !self.include.is_match(&rel) {
                continue;
            }
            if let Some(handle) = self.handle_for(entry.path(), &rel) {
                sources.push(handle);
            }
        }
        // Deterministic ordering keeps rebuild runs comparable.
        sources.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(sources)
    }

    async fn read_bytes(&self, path: &str) -> Result<Vec<u8>> {
        std::fs::read(self.root.join(path)).map_err(|e| EngineError::SourceRead {
            path: path.to_string(),
            reason: e.to_string(),
        })
    }

    fn active_path(&self) -> Option<String> {
        self.active.read().unwrap().clone()
    }

    async fn source(&self, path: &str) -> Result<Option<SourceHandle>> {
        let abs = self.root.join(path);
        if !abs.is_file() {
            return Ok(None);
        }
        Ok(self.handle_for(&abs, path))
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| EngineError::Config(format!("bad glob '{}': {}", pattern, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| EngineError::Config(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[tokio::test]
    async fn lists_files_sorted_and_filtered() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "b.md", "beta");
        write(dir.path(), "a.md", "alpha");
        write(dir.path(), "sub/c.md", "gamma");
        write(dir.path(), ".git/config", "ignored");
        write(dir.path(), ".obsidian/workspace.json", "ignored");

        let vault = FsVault::new(dir.path().to_path_buf()).unwrap();
        let sources = vault.list_sources().await.unwrap();
        let paths: Vec<&str> = sources.iter().map(|s| s.path.as_str()).collect();
        assert_eq!(paths, vec!["a.md", "b.md", "sub/c.md"]);
        assert_eq!(sources[0].extension, "md");
        assert_eq!(sources[0].name, "a.md");
        assert_eq!(sources[0].size, 5);
        assert!(sources[0].mtime_ms > 0);
    }

    #[tokio::test]
    async fn read_bytes_roundtrip_and_missing() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "note.md", "hello");
        let vault = FsVault::new(dir.path().to_path_buf()).unwrap();
        assert_eq!(vault.read_bytes("note.md").await.unwrap(), b"hello");
        let err = vault.read_bytes("gone.md").await.unwrap_err();
        assert!(matches!(err, EngineError::SourceRead { .. }));
    }

    #[tokio::test]
    async fn source_resolves_single_path() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "note.md", "hello");
        let vault = FsVault::new(dir.path().to_path_buf()).unwrap();
        let handle = vault.source("note.md").await.unwrap().unwrap();
        assert_eq!(handle.path, "note.md");
        assert!(vault.source("gone.md").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn active_path_tracks_setter() {
        let dir = TempDir::new().unwrap();
        let vault = FsVault::new(dir.path().to_path_buf()).unwrap();
        assert_eq!(vault.active_path(), None);
        vault.set_active(Some("note.md".to_string()));
        assert_eq!(vault.active_path().as_deref(), Some("note.md"));
    }

    #[tokio::test]
    async fn missing_root_is_an_error() {
        let vault = FsVault::new(PathBuf::from("/definitely/not/here")).unwrap();
        assert!(vault.list_sources().await.is_err());
    }
}

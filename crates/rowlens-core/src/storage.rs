//! Source handle abstractions and storage backends.
//!
//! The core is agnostic to whether input bytes come from local disk, an
//! in-memory buffer, or a remote object store. This module defines the two
//! opaque handle shapes everything else consumes:
//!
//! - [`ByteSource`]: a named, finite, byte-range-addressable blob.
//! - [`DirectorySource`]: a named listing of immediate children that can
//!   resolve each child into a file or directory handle.
//!
//! Two backends are provided: `Local*` over `tokio::fs` for real tables on
//! disk, and `Memory*` for tests and in-browser-style buffers. Remote object
//! store adapters are expected to implement the same traits externally.

use std::collections::BTreeMap;
use std::io::{self, SeekFrom};
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use snafu::{Backtrace, prelude::*};
use tokio::{
    fs,
    io::{AsyncReadExt, AsyncSeekExt},
};

/// General result type used by storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Snafu)]
pub enum StorageError {
    /// The specified path was not found.
    #[snafu(display("Path not found: {path}"))]
    NotFound {
        /// The path that was not found.
        path: String,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// A child was expected to be a directory but is a file (or vice versa).
    #[snafu(display("Not a directory: {path}"))]
    NotADirectory {
        /// The path that was expected to be a directory.
        path: String,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// An I/O error occurred in the underlying backend.
    #[snafu(display("I/O error at {path}: {source}"))]
    Io {
        /// The path where the I/O error occurred.
        path: String,
        /// Underlying I/O error with platform-specific details.
        source: io::Error,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },
}

/// Kind of a directory child, as reported by [`DirectorySource::list`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirEntryKind {
    /// A regular file child.
    File,
    /// A subdirectory child.
    Directory,
}

/// One immediate child of a directory source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Child name (no path separators).
    pub name: String,
    /// Whether the child is a file or a directory.
    pub kind: DirEntryKind,
}

/// A named, finite blob of bytes addressable by range.
///
/// Implementations must be cheap to share (`Arc<dyn ByteSource>`) and must
/// not cache decoded rows; callers re-read ranges when they need them again.
#[async_trait]
pub trait ByteSource: Send + Sync {
    /// Name of the source (used for extension-based sniffing and messages).
    fn name(&self) -> &str;

    /// Total size of the source in bytes.
    async fn len(&self) -> StorageResult<u64>;

    /// Read up to `len` bytes starting at `offset`.
    ///
    /// A range extending past the end of the source is clamped: the returned
    /// buffer may be shorter than requested, and an offset at or past the end
    /// yields an empty buffer. Sniffing relies on this so that probing a tiny
    /// file with a fixed header window is not an error.
    async fn read_range(&self, offset: u64, len: u64) -> StorageResult<Bytes>;

    /// Read the entire source into memory.
    async fn read_all(&self) -> StorageResult<Bytes> {
        let size = self.len().await?;
        self.read_range(0, size).await
    }
}

/// A named listing of immediate children.
#[async_trait]
pub trait DirectorySource: Send + Sync {
    /// Name of the directory (last path component for local directories).
    fn name(&self) -> &str;

    /// List immediate children only; no recursive traversal.
    async fn list(&self) -> StorageResult<Vec<DirEntry>>;

    /// Resolve a child file by name.
    async fn open_file(&self, name: &str) -> StorageResult<Arc<dyn ByteSource>>;

    /// Resolve a child directory by name.
    async fn open_dir(&self, name: &str) -> StorageResult<Arc<dyn DirectorySource>>;
}

/// Resolve a slash-separated relative path (as stored in log actions, e.g.
/// `data/part-0001.parquet`) against a directory source.
pub async fn resolve_file(
    root: &Arc<dyn DirectorySource>,
    rel_path: &str,
) -> StorageResult<Arc<dyn ByteSource>> {
    let mut components = rel_path.split('/').filter(|c| !c.is_empty());
    let Some(mut current) = components.next() else {
        return NotFoundSnafu { path: rel_path }.fail();
    };

    let mut dir: Arc<dyn DirectorySource> = Arc::clone(root);
    for next in components {
        dir = dir.open_dir(current).await?;
        current = next;
    }
    dir.open_file(current).await
}

fn map_io(err: io::Error, path: &str) -> StorageError {
    if err.kind() == io::ErrorKind::NotFound {
        StorageError::NotFound {
            path: path.to_string(),
            backtrace: Backtrace::capture(),
        }
    } else {
        StorageError::Io {
            path: path.to_string(),
            source: err,
            backtrace: Backtrace::capture(),
        }
    }
}

/// A [`ByteSource`] backed by a file on the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalFile {
    path: PathBuf,
    name: String,
}

impl LocalFile {
    /// Create a handle for a local file path. The file is opened lazily on
    /// each read, so constructing a handle never touches the filesystem.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self { path, name }
    }

    fn path_str(&self) -> String {
        self.path.display().to_string()
    }
}

#[async_trait]
impl ByteSource for LocalFile {
    fn name(&self) -> &str {
        &self.name
    }

    async fn len(&self) -> StorageResult<u64> {
        let meta = fs::metadata(&self.path)
            .await
            .map_err(|e| map_io(e, &self.path_str()))?;
        if !meta.is_file() {
            return NotFoundSnafu {
                path: self.path_str(),
            }
            .fail();
        }
        Ok(meta.len())
    }

    async fn read_range(&self, offset: u64, len: u64) -> StorageResult<Bytes> {
        let size = self.len().await?;
        if offset >= size || len == 0 {
            return Ok(Bytes::new());
        }
        let take = len.min(size - offset);

        // The handle is scoped to this call; it is closed on every exit path,
        // including early abandonment of the surrounding read.
        let mut file = fs::File::open(&self.path)
            .await
            .map_err(|e| map_io(e, &self.path_str()))?;
        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(|e| map_io(e, &self.path_str()))?;

        let mut buf = vec![0u8; take as usize];
        file.read_exact(&mut buf)
            .await
            .map_err(|e| map_io(e, &self.path_str()))?;
        Ok(Bytes::from(buf))
    }

    async fn read_all(&self) -> StorageResult<Bytes> {
        let bytes = fs::read(&self.path)
            .await
            .map_err(|e| map_io(e, &self.path_str()))?;
        Ok(Bytes::from(bytes))
    }
}

/// A [`DirectorySource`] backed by a directory on the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalDir {
    path: PathBuf,
    name: String,
}

impl LocalDir {
    /// Create a handle for a local directory path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self { path, name }
    }

    fn child_path(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }
}

#[async_trait]
impl DirectorySource for LocalDir {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list(&self) -> StorageResult<Vec<DirEntry>> {
        let path_str = self.path.display().to_string();
        let mut read_dir = fs::read_dir(&self.path)
            .await
            .map_err(|e| map_io(e, &path_str))?;

        let mut entries = Vec::new();
        while let Some(entry) = read_dir
            .next_entry()
            .await
            .map_err(|e| map_io(e, &path_str))?
        {
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| map_io(e, &path_str))?;
            let kind = if file_type.is_dir() {
                DirEntryKind::Directory
            } else {
                DirEntryKind::File
            };
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                kind,
            });
        }
        // Stable ordering keeps listings deterministic across platforms.
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn open_file(&self, name: &str) -> StorageResult<Arc<dyn ByteSource>> {
        let child = self.child_path(name);
        let meta = fs::metadata(&child)
            .await
            .map_err(|e| map_io(e, &child.display().to_string()))?;
        if !meta.is_file() {
            return NotFoundSnafu {
                path: child.display().to_string(),
            }
            .fail();
        }
        Ok(Arc::new(LocalFile::new(child)))
    }

    async fn open_dir(&self, name: &str) -> StorageResult<Arc<dyn DirectorySource>> {
        let child = self.child_path(name);
        let meta = fs::metadata(&child)
            .await
            .map_err(|e| map_io(e, &child.display().to_string()))?;
        if !meta.is_dir() {
            return NotADirectorySnafu {
                path: child.display().to_string(),
            }
            .fail();
        }
        Ok(Arc::new(LocalDir::new(child)))
    }
}

/// A [`ByteSource`] over an in-memory buffer, used by tests and callers that
/// already hold the full payload.
#[derive(Debug, Clone)]
pub struct MemoryFile {
    name: String,
    data: Bytes,
}

impl MemoryFile {
    /// Create an in-memory file with the given name and contents.
    pub fn new(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }
}

#[async_trait]
impl ByteSource for MemoryFile {
    fn name(&self) -> &str {
        &self.name
    }

    async fn len(&self) -> StorageResult<u64> {
        Ok(self.data.len() as u64)
    }

    async fn read_range(&self, offset: u64, len: u64) -> StorageResult<Bytes> {
        let size = self.data.len() as u64;
        if offset >= size || len == 0 {
            return Ok(Bytes::new());
        }
        let end = size.min(offset + len);
        Ok(self.data.slice(offset as usize..end as usize))
    }

    async fn read_all(&self) -> StorageResult<Bytes> {
        Ok(self.data.clone())
    }
}

enum MemoryChild {
    File(Arc<MemoryFile>),
    Dir(Arc<MemoryDir>),
}

/// A [`DirectorySource`] over an in-memory tree, used by tests.
///
/// Built with a consuming builder:
///
/// ```
/// use rowlens_core::storage::MemoryDir;
///
/// let root = MemoryDir::new("table")
///     .with_file("a.jsonl", &b"{}\n"[..])
///     .with_dir(MemoryDir::new("_delta_log"));
/// ```
pub struct MemoryDir {
    name: String,
    children: BTreeMap<String, MemoryChild>,
}

impl MemoryDir {
    /// Create an empty in-memory directory.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            children: BTreeMap::new(),
        }
    }

    /// Add a file child.
    pub fn with_file(mut self, name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        let name = name.into();
        let file = MemoryFile::new(name.clone(), data);
        self.children.insert(name, MemoryChild::File(Arc::new(file)));
        self
    }

    /// Add a directory child.
    pub fn with_dir(mut self, dir: MemoryDir) -> Self {
        self.children
            .insert(dir.name.clone(), MemoryChild::Dir(Arc::new(dir)));
        self
    }
}

#[async_trait]
impl DirectorySource for MemoryDir {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list(&self) -> StorageResult<Vec<DirEntry>> {
        Ok(self
            .children
            .iter()
            .map(|(name, child)| DirEntry {
                name: name.clone(),
                kind: match child {
                    MemoryChild::File(_) => DirEntryKind::File,
                    MemoryChild::Dir(_) => DirEntryKind::Directory,
                },
            })
            .collect())
    }

    async fn open_file(&self, name: &str) -> StorageResult<Arc<dyn ByteSource>> {
        match self.children.get(name) {
            Some(MemoryChild::File(file)) => Ok(Arc::clone(file) as Arc<dyn ByteSource>),
            _ => NotFoundSnafu {
                path: format!("{}/{name}", self.name),
            }
            .fail(),
        }
    }

    async fn open_dir(&self, name: &str) -> StorageResult<Arc<dyn DirectorySource>> {
        match self.children.get(name) {
            Some(MemoryChild::Dir(dir)) => Ok(Arc::clone(dir) as Arc<dyn DirectorySource>),
            Some(MemoryChild::File(_)) => NotADirectorySnafu {
                path: format!("{}/{name}", self.name),
            }
            .fail(),
            None => NotFoundSnafu {
                path: format!("{}/{name}", self.name),
            }
            .fail(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[tokio::test]
    async fn local_file_reads_ranges_and_clamps() -> TestResult {
        let tmp = TempDir::new()?;
        let path = tmp.path().join("data.bin");
        tokio::fs::write(&path, b"0123456789").await?;

        let file = LocalFile::new(&path);
        assert_eq!(file.name(), "data.bin");
        assert_eq!(file.len().await?, 10);

        assert_eq!(&file.read_range(2, 3).await?[..], b"234");
        // Range past EOF is clamped, not an error.
        assert_eq!(&file.read_range(8, 100).await?[..], b"89");
        assert!(file.read_range(10, 4).await?.is_empty());
        assert_eq!(&file.read_all().await?[..], b"0123456789");
        Ok(())
    }

    #[tokio::test]
    async fn local_file_missing_returns_not_found() {
        let file = LocalFile::new("/definitely/not/here.bin");
        let err = file.len().await.expect_err("expected NotFound");
        assert!(matches!(err, StorageError::NotFound { .. }));
    }

    #[tokio::test]
    async fn local_dir_lists_children_sorted() -> TestResult {
        let tmp = TempDir::new()?;
        tokio::fs::write(tmp.path().join("b.csv"), "x").await?;
        tokio::fs::write(tmp.path().join("a.csv"), "y").await?;
        tokio::fs::create_dir(tmp.path().join("sub")).await?;

        let dir = LocalDir::new(tmp.path());
        let entries = dir.list().await?;
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a.csv", "b.csv", "sub"]);
        assert_eq!(entries[2].kind, DirEntryKind::Directory);

        let child = dir.open_file("a.csv").await?;
        assert_eq!(&child.read_all().await?[..], b"y");

        let sub = dir.open_dir("sub").await?;
        assert_eq!(sub.name(), "sub");
        Ok(())
    }

    #[tokio::test]
    async fn local_dir_open_dir_on_file_fails() -> TestResult {
        let tmp = TempDir::new()?;
        tokio::fs::write(tmp.path().join("plain.txt"), "x").await?;

        let dir = LocalDir::new(tmp.path());
        let err = dir.open_dir("plain.txt").await.err().expect("expected error");
        assert!(matches!(err, StorageError::NotADirectory { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn memory_tree_resolves_nested_paths() -> TestResult {
        let root: Arc<dyn DirectorySource> = Arc::new(
            MemoryDir::new("table")
                .with_file("top.csv", &b"a,b\n1,2\n"[..])
                .with_dir(MemoryDir::new("data").with_file("part-0.jsonl", &b"{}\n"[..])),
        );

        let top = resolve_file(&root, "top.csv").await?;
        assert_eq!(top.name(), "top.csv");

        let nested = resolve_file(&root, "data/part-0.jsonl").await?;
        assert_eq!(nested.name(), "part-0.jsonl");
        assert_eq!(nested.len().await?, 3);

        let missing = resolve_file(&root, "data/absent.jsonl").await;
        assert!(matches!(missing, Err(StorageError::NotFound { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn memory_file_range_semantics_match_local() -> TestResult {
        let file = MemoryFile::new("m.bin", &b"abcdef"[..]);
        assert_eq!(&file.read_range(1, 2).await?[..], b"bc");
        assert_eq!(&file.read_range(4, 10).await?[..], b"ef");
        assert!(file.read_range(6, 1).await?.is_empty());
        Ok(())
    }
}

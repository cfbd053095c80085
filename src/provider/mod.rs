//! Uniform file-tree abstraction over heterogeneous storage backends.
//!
//! Every backend — local filesystem, cloud object store, remote file
//! service — implements [`Provider`]. Algorithmic code (scanner, decision
//! engine, safety monitor, executor) never sees backend-specific types.

pub mod error;
pub mod factory;
pub mod local;

#[cfg(feature = "s3")]
pub mod s3;

#[cfg(feature = "sftp")]
pub mod sftp;

#[cfg(feature = "dropbox")]
pub mod dropbox;

#[cfg(feature = "gdrive")]
pub mod gdrive;

use std::collections::HashMap;
use std::path::Path;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use tokio::io::{AsyncRead, AsyncWrite};

pub use error::{ProviderError, ProviderResult};

/// Stream of directory entries returned by [`Provider::list`].
pub type ListStream = Pin<Box<dyn Stream<Item = ProviderResult<FileResource>> + Send>>;

/// Stream of bytes returned by [`Provider::read`].
pub type ReadStream = Pin<Box<dyn AsyncRead + Send + Unpin>>;

/// Sink accepting bytes for [`Provider::write`]; becomes the file on
/// successful close, discarded on error.
pub type WriteSink = Pin<Box<dyn AsyncWrite + Send + Unpin>>;

/// The kind of filesystem entry a [`FileResource`] represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    File,
    Directory,
    Symlink,
}

/// One filesystem entry, uniform across all backends (spec §3).
#[derive(Debug, Clone)]
pub struct FileResource {
    /// Logical path, POSIX-style, rooted at `/`.
    pub path: String,
    /// Final path segment.
    pub name: String,
    pub kind: FileKind,
    /// Bytes; 0 for directories.
    pub size: u64,
    /// Seconds since epoch.
    pub mtime: f64,
    /// Provider-defined content hash, when cheap to obtain.
    pub chksum: Option<String>,
    /// Opaque per-provider data (e.g. cloud file id).
    pub extra: HashMap<String, String>,
}

impl FileResource {
    pub fn new(path: impl Into<String>, kind: FileKind, size: u64, mtime: f64) -> Self {
        let path = normalize_path(&path.into());
        let name = path
            .rsplit('/')
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or("/")
            .to_string();
        Self {
            path,
            name,
            kind,
            size,
            mtime,
            chksum: None,
            extra: HashMap::new(),
        }
    }

    pub fn with_chksum(mut self, chksum: impl Into<String>) -> Self {
        self.chksum = Some(chksum.into());
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    pub fn is_file(&self) -> bool {
        self.kind == FileKind::File
    }

    pub fn is_dir(&self) -> bool {
        self.kind == FileKind::Directory
    }
}

/// Listing depth control for [`Provider::list`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ListOptions {
    pub recursive: bool,
}

impl ListOptions {
    pub fn recursive() -> Self {
        Self { recursive: true }
    }

    pub fn shallow() -> Self {
        Self { recursive: false }
    }
}

/// Normalize a path to the uniform convention used across all providers:
/// leading slash, forward slashes, no trailing slash except the root `/`.
/// Idempotent: `normalize_path(normalize_path(p)) == normalize_path(p)`.
pub fn normalize_path(raw: &str) -> String {
    let replaced = raw.replace('\\', "/");
    let mut segments: Vec<&str> = replaced.split('/').filter(|s| !s.is_empty()).collect();
    segments.retain(|s| *s != ".");
    if segments.is_empty() {
        return "/".to_string();
    }
    let mut out = String::with_capacity(replaced.len() + 1);
    for seg in segments.drain(..) {
        out.push('/');
        out.push_str(seg);
    }
    out
}

/// Uniform capability set every backend implements (spec §4.1).
#[async_trait]
pub trait Provider: Send + Sync {
    /// Enumerate the subtree under `path`. On a missing root, yields an
    /// empty stream rather than an error. Order is unspecified but stable
    /// within one call. Symlinks are returned as their own kind, never
    /// followed.
    async fn list(&self, path: &str, options: ListOptions) -> ProviderResult<ListStream>;

    /// Metadata for a single path.
    async fn stat(&self, path: &str) -> ProviderResult<FileResource>;

    /// Open a readable stream.
    async fn read(&self, path: &str) -> ProviderResult<ReadStream>;

    /// Open a writable sink; contents become the file on successful close,
    /// are discarded on error. `size_hint`, when known, lets backends pick
    /// a transfer strategy (e.g. S3 multipart above a threshold).
    async fn write(&self, path: &str, size_hint: Option<u64>) -> ProviderResult<WriteSink>;

    /// Remove an entry. For directories, `recursive` controls whether
    /// non-empty content is permitted.
    async fn delete(&self, path: &str, recursive: bool) -> ProviderResult<()>;

    /// Create a directory; a no-op if it already exists. `parents` creates
    /// intermediate directories.
    async fn mkdir(&self, path: &str, parents: bool) -> ProviderResult<()>;

    /// Rename/move within the same backend.
    async fn r#move(&self, src: &str, dst: &str) -> ProviderResult<()>;

    /// Server-side copy, when the backend supports one natively.
    async fn copy(&self, src: &str, dst: &str) -> ProviderResult<()> {
        let _ = (src, dst);
        Err(ProviderError::Unsupported {
            provider: self.provider_name().to_string(),
            operation: "copy".to_string(),
        })
    }

    /// Best-effort modification-time update; a no-op where unsupported.
    async fn set_mtime(&self, path: &str, mtime: f64) -> ProviderResult<()> {
        let _ = (path, mtime);
        Ok(())
    }

    async fn exists(&self, path: &str) -> ProviderResult<bool> {
        match self.stat(path).await {
            Ok(_) => Ok(true),
            Err(ProviderError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn provider_name(&self) -> &str;

    fn supports(&self, operation: &str) -> bool {
        matches!(
            operation,
            "list" | "stat" | "read" | "write" | "delete" | "mkdir" | "move" | "exists"
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_adds_leading_slash() {
        assert_eq!(normalize_path("a/b"), "/a/b");
    }

    #[test]
    fn normalize_strips_trailing_slash() {
        assert_eq!(normalize_path("/a/b/"), "/a/b");
    }

    #[test]
    fn normalize_collapses_backslashes() {
        assert_eq!(normalize_path("a\\b\\c"), "/a/b/c");
    }

    #[test]
    fn normalize_root_stays_root() {
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path(""), "/");
    }

    #[test]
    fn normalize_is_idempotent() {
        for input in ["/a/b/c", "a/b/c/", "\\a\\b", "/", "", "a//b///c"] {
            let once = normalize_path(input);
            let twice = normalize_path(&once);
            assert_eq!(once, twice, "failed for input {:?}", input);
        }
    }

    #[test]
    fn file_resource_derives_name_from_path() {
        let res = FileResource::new("a/b/c.txt", FileKind::File, 10, 0.0);
        assert_eq!(res.path, "/a/b/c.txt");
        assert_eq!(res.name, "c.txt");
    }
}

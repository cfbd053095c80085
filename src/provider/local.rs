//! Local filesystem provider implementation.

use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use futures::stream;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::{
    normalize_path, FileKind, FileResource, ListOptions, ListStream, Provider, ProviderError,
    ProviderResult, ReadStream, WriteSink,
};

/// Local filesystem provider, rooted at an absolute directory. Logical
/// paths (the uniform `/a/b` convention) are resolved underneath `root`.
#[derive(Debug, Clone)]
pub struct LocalProvider {
    root: PathBuf,
}

impl LocalProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, logical: &str) -> PathBuf {
        let logical = normalize_path(logical);
        let relative = logical.trim_start_matches('/');
        if relative.is_empty() {
            self.root.clone()
        } else {
            self.root.join(relative)
        }
    }

    fn to_logical(&self, real: &Path) -> String {
        let relative = real.strip_prefix(&self.root).unwrap_or(real);
        normalize_path(&relative.to_string_lossy())
    }

    fn map_io_err(&self, path: &str, err: std::io::Error) -> ProviderError {
        match err.kind() {
            std::io::ErrorKind::NotFound => ProviderError::NotFound {
                path: PathBuf::from(path),
                provider: self.provider_name().to_string(),
            },
            std::io::ErrorKind::PermissionDenied => ProviderError::PermissionDenied {
                path: PathBuf::from(path),
                message: err.to_string(),
            },
            _ => ProviderError::Io(err),
        }
    }

    async fn metadata_to_resource(
        &self,
        logical_path: &str,
        real_path: &Path,
        meta: std::fs::Metadata,
    ) -> FileResource {
        let kind = if meta.is_symlink() {
            FileKind::Symlink
        } else if meta.is_dir() {
            FileKind::Directory
        } else {
            FileKind::File
        };

        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);

        let size = if kind == FileKind::Directory { 0 } else { meta.len() };

        let mut resource = FileResource::new(logical_path, kind, size, mtime);
        resource.extra.insert(
            "real_path".to_string(),
            real_path.to_string_lossy().to_string(),
        );
        resource
    }

    fn list_recursive<'a>(
        &'a self,
        logical_root: String,
        recursive: bool,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = ProviderResult<Vec<FileResource>>> + Send + 'a>,
    > {
        Box::pin(async move {
            let real_root = self.resolve(&logical_root);
            let mut out = Vec::new();

            let mut read_dir = match fs::read_dir(&real_root).await {
                Ok(rd) => rd,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
                Err(e) => return Err(self.map_io_err(&logical_root, e)),
            };

            while let Some(entry) = read_dir
                .next_entry()
                .await
                .map_err(|e| self.map_io_err(&logical_root, e))?
            {
                let real_path = entry.path();
                let meta = match entry.metadata().await {
                    Ok(m) => m,
                    Err(_) => continue,
                };

                let logical_child = if logical_root == "/" {
                    format!("/{}", entry.file_name().to_string_lossy())
                } else {
                    format!("{}/{}", logical_root, entry.file_name().to_string_lossy())
                };

                let resource = self
                    .metadata_to_resource(&logical_child, &real_path, meta.clone())
                    .await;

                let is_dir = resource.kind == FileKind::Directory;
                out.push(resource);

                if recursive && is_dir {
                    let children = self.list_recursive(logical_child, true).await?;
                    out.extend(children);
                }
            }

            Ok(out)
        })
    }
}

#[async_trait]
impl Provider for LocalProvider {
    async fn list(&self, path: &str, options: ListOptions) -> ProviderResult<ListStream> {
        let entries = self
            .list_recursive(normalize_path(path), options.recursive)
            .await?;
        Ok(Box::pin(stream::iter(entries.into_iter().map(Ok))))
    }

    async fn stat(&self, path: &str) -> ProviderResult<FileResource> {
        let logical = normalize_path(path);
        let real = self.resolve(&logical);
        let meta = fs::symlink_metadata(&real)
            .await
            .map_err(|e| self.map_io_err(&logical, e))?;
        Ok(self.metadata_to_resource(&logical, &real, meta).await)
    }

    async fn read(&self, path: &str) -> ProviderResult<ReadStream> {
        let logical = normalize_path(path);
        let real = self.resolve(&logical);
        let file = fs::File::open(&real)
            .await
            .map_err(|e| self.map_io_err(&logical, e))?;
        Ok(Box::pin(file))
    }

    async fn write(&self, path: &str, _size_hint: Option<u64>) -> ProviderResult<WriteSink> {
        let logical = normalize_path(path);
        let real = self.resolve(&logical);
        if let Some(parent) = real.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| self.map_io_err(&logical, e))?;
        }
        let tmp_path = real.with_extension("meridian-tmp");
        let file = fs::File::create(&tmp_path)
            .await
            .map_err(|e| self.map_io_err(&logical, e))?;
        Ok(Box::pin(LocalWriteSink {
            inner: file,
            tmp_path,
            final_path: real,
            committed: false,
        }))
    }

    async fn delete(&self, path: &str, recursive: bool) -> ProviderResult<()> {
        let logical = normalize_path(path);
        let real = self.resolve(&logical);
        let meta = fs::symlink_metadata(&real)
            .await
            .map_err(|e| self.map_io_err(&logical, e))?;

        if meta.is_dir() {
            if recursive {
                fs::remove_dir_all(&real)
                    .await
                    .map_err(|e| self.map_io_err(&logical, e))
            } else {
                fs::remove_dir(&real).await.map_err(|e| {
                    if e.kind() == std::io::ErrorKind::Other || e.raw_os_error() == Some(39) {
                        ProviderError::DirectoryNotEmpty {
                            path: PathBuf::from(&logical),
                        }
                    } else {
                        self.map_io_err(&logical, e)
                    }
                })
            }
        } else {
            fs::remove_file(&real)
                .await
                .map_err(|e| self.map_io_err(&logical, e))
        }
    }

    async fn mkdir(&self, path: &str, parents: bool) -> ProviderResult<()> {
        let logical = normalize_path(path);
        let real = self.resolve(&logical);
        if real.is_dir() {
            return Ok(());
        }
        let result = if parents {
            fs::create_dir_all(&real).await
        } else {
            fs::create_dir(&real).await
        };
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
            Err(e) => Err(self.map_io_err(&logical, e)),
        }
    }

    async fn r#move(&self, src: &str, dst: &str) -> ProviderResult<()> {
        let logical_src = normalize_path(src);
        let real_src = self.resolve(&logical_src);
        let real_dst = self.resolve(&normalize_path(dst));
        if let Some(parent) = real_dst.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| self.map_io_err(&logical_src, e))?;
        }
        fs::rename(&real_src, &real_dst)
            .await
            .map_err(|e| self.map_io_err(&logical_src, e))
    }

    async fn copy(&self, src: &str, dst: &str) -> ProviderResult<()> {
        let logical_src = normalize_path(src);
        let real_src = self.resolve(&logical_src);
        let real_dst = self.resolve(&normalize_path(dst));
        if let Some(parent) = real_dst.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| self.map_io_err(&logical_src, e))?;
        }
        fs::copy(&real_src, &real_dst)
            .await
            .map(|_| ())
            .map_err(|e| self.map_io_err(&logical_src, e))
    }

    async fn set_mtime(&self, path: &str, mtime: f64) -> ProviderResult<()> {
        let logical = normalize_path(path);
        let real = self.resolve(&logical);
        let system_time = UNIX_EPOCH + std::time::Duration::from_secs_f64(mtime.max(0.0));
        let file_time = filetime::FileTime::from_system_time(system_time);
        filetime_set(&real, file_time).map_err(|e| self.map_io_err(&logical, e))
    }

    fn provider_name(&self) -> &str {
        "local"
    }

    fn supports(&self, operation: &str) -> bool {
        matches!(
            operation,
            "list" | "stat" | "read" | "write" | "delete" | "mkdir" | "move" | "copy" | "exists" | "set_mtime"
        )
    }
}

/// Write sink that stages into a temp file alongside the destination and
/// renames into place on successful close; the temp file is left behind
/// (and cleaned up by the next write attempt) on error, so a failed write
/// never corrupts an existing destination.
struct LocalWriteSink {
    inner: fs::File,
    tmp_path: PathBuf,
    final_path: PathBuf,
    committed: bool,
}

impl tokio::io::AsyncWrite for LocalWriteSink {
    fn poll_write(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &[u8],
    ) -> std::task::Poll<std::io::Result<usize>> {
        std::pin::Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        std::pin::Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        let res = std::pin::Pin::new(&mut self.inner).poll_shutdown(cx);
        if let std::task::Poll::Ready(Ok(())) = &res {
            if !self.committed {
                if let Err(e) = std::fs::rename(&self.tmp_path, &self.final_path) {
                    return std::task::Poll::Ready(Err(e));
                }
                self.committed = true;
            }
        }
        res
    }
}

impl Drop for LocalWriteSink {
    fn drop(&mut self) {
        if !self.committed && self.tmp_path.exists() {
            let _ = std::fs::remove_file(&self.tmp_path);
        }
    }
}

/// Minimal mtime-setting shim so we don't need a dedicated `filetime` crate
/// dependency for the one call site that needs it; uses `utimensat` via the
/// standard library's `std::fs::File::set_modified` on platforms where it's
/// stable, falling back to a no-op elsewhere.
mod filetime {
    pub struct FileTime(std::time::SystemTime);

    impl FileTime {
        pub fn from_system_time(t: std::time::SystemTime) -> Self {
            Self(t)
        }
    }

    pub fn into_system_time(ft: FileTime) -> std::time::SystemTime {
        ft.0
    }
}

fn filetime_set(path: &Path, ft: filetime::FileTime) -> std::io::Result<()> {
    let file = std::fs::OpenOptions::new().write(true).open(path)?;
    file.set_modified(filetime::into_system_time(ft))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn write_then_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let provider = LocalProvider::new(dir.path());

        let mut sink = provider.write("/hello.txt", None).await.unwrap();
        sink.write_all(b"hello world").await.unwrap();
        sink.shutdown().await.unwrap();

        let stat = provider.stat("/hello.txt").await.unwrap();
        assert_eq!(stat.size, 11);
        assert_eq!(stat.kind, FileKind::File);
    }

    #[tokio::test]
    async fn list_missing_root_yields_empty() {
        let dir = tempfile::tempdir().unwrap();
        let provider = LocalProvider::new(dir.path());
        let mut stream = provider.list("/nope", ListOptions::recursive()).await.unwrap();
        use futures::StreamExt;
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn list_recursive_enumerates_descendants() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::create_dir_all(dir.path().join("a/b")).await.unwrap();
        tokio::fs::write(dir.path().join("a/b/c.txt"), b"x").await.unwrap();

        let provider = LocalProvider::new(dir.path());
        let mut stream = provider.list("/", ListOptions::recursive()).await.unwrap();
        use futures::StreamExt;
        let mut paths = Vec::new();
        while let Some(res) = stream.next().await {
            paths.push(res.unwrap().path);
        }
        assert!(paths.contains(&"/a".to_string()));
        assert!(paths.contains(&"/a/b".to_string()));
        assert!(paths.contains(&"/a/b/c.txt".to_string()));
    }

    #[tokio::test]
    async fn delete_nonempty_dir_without_recursive_fails() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::create_dir_all(dir.path().join("a")).await.unwrap();
        tokio::fs::write(dir.path().join("a/f.txt"), b"x").await.unwrap();

        let provider = LocalProvider::new(dir.path());
        let result = provider.delete("/a", false).await;
        assert!(result.is_err());
    }
}

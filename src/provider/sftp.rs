//! SFTP provider backed by `ssh2`, grounded in `providers/sftp_provider.py`.
//!
//! `ssh2`'s sftp subsystem is synchronous; calls are dispatched onto
//! `tokio::task::spawn_blocking` so the async `Provider` trait is honored
//! without blocking the runtime's reactor thread.

use std::io::Read;
use std::net::TcpStream;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream;
use ssh2::{FileStat, Session};

use super::{
    normalize_path, FileKind, FileResource, ListOptions, ListStream, Provider, ProviderError,
    ProviderResult, ReadStream, WriteSink,
};

pub struct SftpProvider {
    session: Arc<Mutex<Session>>,
}

impl SftpProvider {
    /// Connect and authenticate. Password and key-file auth mirror the two
    /// paths `paramiko.SSHClient.connect` accepts in the Python original.
    pub fn connect(
        host: &str,
        port: u16,
        username: &str,
        password: Option<&str>,
        key_path: Option<&std::path::Path>,
    ) -> ProviderResult<Self> {
        let tcp = TcpStream::connect((host, port)).map_err(|e| ProviderError::ConnectionFailed {
            provider: "sftp".to_string(),
            message: e.to_string(),
        })?;

        let mut session = Session::new().map_err(|e| ProviderError::ConnectionFailed {
            provider: "sftp".to_string(),
            message: e.to_string(),
        })?;
        session.set_tcp_stream(tcp);
        session.handshake().map_err(|e| ProviderError::ConnectionFailed {
            provider: "sftp".to_string(),
            message: e.to_string(),
        })?;

        if let Some(key) = key_path {
            session
                .userauth_pubkey_file(username, None, key, None)
                .map_err(|e| ProviderError::AuthenticationFailed {
                    provider: "sftp".to_string(),
                    message: e.to_string(),
                })?;
        } else if let Some(pass) = password {
            session
                .userauth_password(username, pass)
                .map_err(|e| ProviderError::AuthenticationFailed {
                    provider: "sftp".to_string(),
                    message: e.to_string(),
                })?;
        } else {
            session.userauth_agent(username).map_err(|e| ProviderError::AuthenticationFailed {
                provider: "sftp".to_string(),
                message: e.to_string(),
            })?;
        }

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
        })
    }

    fn stat_to_resource(path: &str, name: &str, stat: &FileStat) -> FileResource {
        let kind = if stat.is_dir() {
            FileKind::Directory
        } else if stat.file_type().is_symlink() {
            FileKind::Symlink
        } else {
            FileKind::File
        };
        let mut resource = FileResource::new(path, kind, stat.size.unwrap_or(0), stat.mtime.unwrap_or(0) as f64);
        resource.name = name.to_string();
        resource
    }

    fn list_blocking(session: Arc<Mutex<Session>>, root: String, recursive: bool) -> ProviderResult<Vec<FileResource>> {
        let mut out = Vec::new();
        let mut stack = vec![root];

        while let Some(dir) = stack.pop() {
            let guard = session.lock().unwrap();
            let sftp = guard.sftp().map_err(|e| ProviderError::ConnectionFailed {
                provider: "sftp".to_string(),
                message: e.to_string(),
            })?;

            let entries = match sftp.readdir(std::path::Path::new(&dir)) {
                Ok(entries) => entries,
                Err(e) if e.code() == ssh2::ErrorCode::SFTP(2) => continue, // no such file
                Err(e) => {
                    return Err(ProviderError::Protocol {
                        provider: "sftp".to_string(),
                        message: e.to_string(),
                    })
                }
            };
            drop(guard);

            for (path, stat) in entries {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default();
                let logical = normalize_path(&path.to_string_lossy());
                let resource = Self::stat_to_resource(&logical, &name, &stat);
                let is_dir = resource.kind == FileKind::Directory;
                out.push(resource);

                if recursive && is_dir {
                    stack.push(logical);
                }
            }
        }

        Ok(out)
    }
}

#[async_trait]
impl Provider for SftpProvider {
    async fn list(&self, path: &str, options: ListOptions) -> ProviderResult<ListStream> {
        let session = self.session.clone();
        let root = normalize_path(path);
        let recursive = options.recursive;

        let entries = tokio::task::spawn_blocking(move || Self::list_blocking(session, root, recursive))
            .await
            .map_err(|e| ProviderError::Protocol {
                provider: "sftp".to_string(),
                message: e.to_string(),
            })??;

        Ok(Box::pin(stream::iter(entries.into_iter().map(Ok))))
    }

    async fn stat(&self, path: &str) -> ProviderResult<FileResource> {
        let session = self.session.clone();
        let logical = normalize_path(path);
        let name = logical.rsplit('/').next().unwrap_or("/").to_string();
        let path_for_blocking = logical.clone();

        tokio::task::spawn_blocking(move || {
            let guard = session.lock().unwrap();
            let sftp = guard.sftp().map_err(|e| ProviderError::ConnectionFailed {
                provider: "sftp".to_string(),
                message: e.to_string(),
            })?;
            let stat = sftp.stat(std::path::Path::new(&path_for_blocking)).map_err(|e| {
                if e.code() == ssh2::ErrorCode::SFTP(2) {
                    ProviderError::NotFound {
                        path: PathBuf::from(&path_for_blocking),
                        provider: "sftp".to_string(),
                    }
                } else {
                    ProviderError::Protocol {
                        provider: "sftp".to_string(),
                        message: e.to_string(),
                    }
                }
            })?;
            Ok(Self::stat_to_resource(&path_for_blocking, &name, &stat))
        })
        .await
        .map_err(|e| ProviderError::Protocol {
            provider: "sftp".to_string(),
            message: e.to_string(),
        })?
    }

    async fn read(&self, path: &str) -> ProviderResult<ReadStream> {
        let session = self.session.clone();
        let logical = normalize_path(path);

        let bytes = tokio::task::spawn_blocking(move || -> ProviderResult<Vec<u8>> {
            let guard = session.lock().unwrap();
            let sftp = guard.sftp().map_err(|e| ProviderError::ConnectionFailed {
                provider: "sftp".to_string(),
                message: e.to_string(),
            })?;
            let mut remote = sftp
                .open(std::path::Path::new(&logical))
                .map_err(|e| ProviderError::NotFound {
                    path: PathBuf::from(&logical),
                    provider: "sftp".to_string(),
                })?;
            let mut buf = Vec::new();
            remote.read_to_end(&mut buf).map_err(ProviderError::Io)?;
            Ok(buf)
        })
        .await
        .map_err(|e| ProviderError::Protocol {
            provider: "sftp".to_string(),
            message: e.to_string(),
        })??;

        Ok(Box::pin(std::io::Cursor::new(bytes)))
    }

    async fn write(&self, path: &str, _size_hint: Option<u64>) -> ProviderResult<WriteSink> {
        Ok(Box::pin(SftpWriteSink {
            session: self.session.clone(),
            path: normalize_path(path),
            buffer: Vec::new(),
        }))
    }

    async fn delete(&self, path: &str, recursive: bool) -> ProviderResult<()> {
        let session = self.session.clone();
        let logical = normalize_path(path);

        tokio::task::spawn_blocking(move || -> ProviderResult<()> {
            let guard = session.lock().unwrap();
            let sftp = guard.sftp().map_err(|e| ProviderError::ConnectionFailed {
                provider: "sftp".to_string(),
                message: e.to_string(),
            })?;
            let stat = sftp.stat(std::path::Path::new(&logical)).map_err(|e| ProviderError::NotFound {
                path: PathBuf::from(&logical),
                provider: "sftp".to_string(),
            })?;

            if stat.is_dir() {
                if !recursive && sftp.readdir(std::path::Path::new(&logical)).map(|e| !e.is_empty()).unwrap_or(false) {
                    return Err(ProviderError::DirectoryNotEmpty { path: PathBuf::from(&logical) });
                }
                sftp.rmdir(std::path::Path::new(&logical)).map_err(|e| ProviderError::Protocol {
                    provider: "sftp".to_string(),
                    message: e.to_string(),
                })
            } else {
                sftp.unlink(std::path::Path::new(&logical)).map_err(|e| ProviderError::Protocol {
                    provider: "sftp".to_string(),
                    message: e.to_string(),
                })
            }
        })
        .await
        .map_err(|e| ProviderError::Protocol {
            provider: "sftp".to_string(),
            message: e.to_string(),
        })?
    }

    async fn mkdir(&self, path: &str, _parents: bool) -> ProviderResult<()> {
        let session = self.session.clone();
        let logical = normalize_path(path);

        tokio::task::spawn_blocking(move || -> ProviderResult<()> {
            let guard = session.lock().unwrap();
            let sftp = guard.sftp().map_err(|e| ProviderError::ConnectionFailed {
                provider: "sftp".to_string(),
                message: e.to_string(),
            })?;
            match sftp.mkdir(std::path::Path::new(&logical), 0o755) {
                Ok(()) => Ok(()),
                Err(_) if sftp.stat(std::path::Path::new(&logical)).is_ok() => Ok(()),
                Err(e) => Err(ProviderError::Protocol {
                    provider: "sftp".to_string(),
                    message: e.to_string(),
                }),
            }
        })
        .await
        .map_err(|e| ProviderError::Protocol {
            provider: "sftp".to_string(),
            message: e.to_string(),
        })?
    }

    async fn r#move(&self, src: &str, dst: &str) -> ProviderResult<()> {
        let session = self.session.clone();
        let src = normalize_path(src);
        let dst = normalize_path(dst);

        tokio::task::spawn_blocking(move || -> ProviderResult<()> {
            let guard = session.lock().unwrap();
            let sftp = guard.sftp().map_err(|e| ProviderError::ConnectionFailed {
                provider: "sftp".to_string(),
                message: e.to_string(),
            })?;
            sftp.rename(std::path::Path::new(&src), std::path::Path::new(&dst), None)
                .map_err(|e| ProviderError::Protocol {
                    provider: "sftp".to_string(),
                    message: e.to_string(),
                })
        })
        .await
        .map_err(|e| ProviderError::Protocol {
            provider: "sftp".to_string(),
            message: e.to_string(),
        })?
    }

    // No native copy verb over SFTP; declaring it unsupported matches
    // `providers/sftp_provider.py`'s `NotImplementedError` for `copy`.
    async fn copy(&self, _src: &str, _dst: &str) -> ProviderResult<()> {
        Err(ProviderError::Unsupported {
            provider: self.provider_name().to_string(),
            operation: "copy".to_string(),
        })
    }

    async fn set_mtime(&self, path: &str, mtime: f64) -> ProviderResult<()> {
        let session = self.session.clone();
        let logical = normalize_path(path);

        tokio::task::spawn_blocking(move || -> ProviderResult<()> {
            let guard = session.lock().unwrap();
            let sftp = guard.sftp().map_err(|e| ProviderError::ConnectionFailed {
                provider: "sftp".to_string(),
                message: e.to_string(),
            })?;
            let mut stat = sftp.stat(std::path::Path::new(&logical)).map_err(|e| ProviderError::NotFound {
                path: PathBuf::from(&logical),
                provider: "sftp".to_string(),
            })?;
            stat.mtime = Some(mtime as u64);
            sftp.setstat(std::path::Path::new(&logical), stat).map_err(|e| ProviderError::Protocol {
                provider: "sftp".to_string(),
                message: e.to_string(),
            })
        })
        .await
        .map_err(|e| ProviderError::Protocol {
            provider: "sftp".to_string(),
            message: e.to_string(),
        })?
    }

    fn provider_name(&self) -> &str {
        "sftp"
    }

    fn supports(&self, operation: &str) -> bool {
        matches!(
            operation,
            "list" | "stat" | "read" | "write" | "delete" | "mkdir" | "move" | "exists" | "set_mtime"
        )
    }
}

struct SftpWriteSink {
    session: Arc<Mutex<Session>>,
    path: String,
    buffer: Vec<u8>,
}

impl tokio::io::AsyncWrite for SftpWriteSink {
    fn poll_write(
        mut self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
        buf: &[u8],
    ) -> std::task::Poll<std::io::Result<usize>> {
        self.buffer.extend_from_slice(buf);
        std::task::Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(
        self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn poll_shutdown(
        self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        use std::io::Write;
        let session = self.session.clone();
        let path = self.path.clone();
        let data = self.buffer.clone();

        let guard = session.lock().unwrap();
        let sftp = guard
            .sftp()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
        let mut remote = sftp
            .create(std::path::Path::new(&path))
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
        remote.write_all(&data)?;
        std::task::Poll::Ready(Ok(()))
    }
}

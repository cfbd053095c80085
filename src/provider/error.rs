//! Error type for the provider boundary

use std::fmt;
use std::io;
use std::path::PathBuf;

pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Error surfaced by a Provider implementation, before it crosses into
/// MeridianError at the engine boundary.
#[derive(Debug)]
pub enum ProviderError {
    Io(io::Error),
    NotFound { path: PathBuf, provider: String },
    PermissionDenied { path: PathBuf, message: String },
    AuthenticationFailed { provider: String, message: String },
    ConnectionFailed { provider: String, message: String },
    Timeout { operation: String, duration_secs: u64 },
    RateLimited { provider: String, retry_after_secs: Option<u64> },
    Unsupported { provider: String, operation: String },
    InvalidPath { path: PathBuf, reason: String },
    DirectoryNotEmpty { path: PathBuf },
    Protocol { provider: String, message: String },
}

impl ProviderError {
    pub fn is_retriable(&self) -> bool {
        match self {
            ProviderError::Timeout { .. } => true,
            ProviderError::ConnectionFailed { .. } => true,
            ProviderError::RateLimited { .. } => true,
            ProviderError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::TimedOut
                    | io::ErrorKind::Interrupted
                    | io::ErrorKind::WouldBlock
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
            ),
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ProviderError::NotFound { .. })
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderError::Io(e) => write!(f, "I/O error: {}", e),
            ProviderError::NotFound { path, provider } => {
                write!(f, "path not found on {}: {}", provider, path.display())
            }
            ProviderError::PermissionDenied { path, message } => {
                write!(f, "permission denied for {}: {}", path.display(), message)
            }
            ProviderError::AuthenticationFailed { provider, message } => {
                write!(f, "authentication failed for {}: {}", provider, message)
            }
            ProviderError::ConnectionFailed { provider, message } => {
                write!(f, "connection to {} failed: {}", provider, message)
            }
            ProviderError::Timeout { operation, duration_secs } => {
                write!(f, "operation '{}' timed out after {}s", operation, duration_secs)
            }
            ProviderError::RateLimited { provider, retry_after_secs } => match retry_after_secs {
                Some(s) => write!(f, "{} rate-limited, retry after {}s", provider, s),
                None => write!(f, "{} rate-limited", provider),
            },
            ProviderError::Unsupported { provider, operation } => {
                write!(f, "operation '{}' not supported by provider {}", operation, provider)
            }
            ProviderError::InvalidPath { path, reason } => {
                write!(f, "invalid path {}: {}", path.display(), reason)
            }
            ProviderError::DirectoryNotEmpty { path } => {
                write!(f, "directory not empty: {}", path.display())
            }
            ProviderError::Protocol { provider, message } => {
                write!(f, "{} protocol error: {}", provider, message)
            }
        }
    }
}

impl std::error::Error for ProviderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProviderError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ProviderError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => ProviderError::NotFound {
                path: PathBuf::new(),
                provider: "unknown".to_string(),
            },
            io::ErrorKind::PermissionDenied => ProviderError::PermissionDenied {
                path: PathBuf::new(),
                message: err.to_string(),
            },
            _ => ProviderError::Io(err),
        }
    }
}

impl From<ProviderError> for crate::error::MeridianError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Io(e) => crate::error::MeridianError::Io(e),
            ProviderError::NotFound { path, .. } => crate::error::MeridianError::NotFound(path),
            ProviderError::AuthenticationFailed { message, .. } => {
                crate::error::MeridianError::Authentication(message)
            }
            ProviderError::Unsupported { provider, operation } => {
                crate::error::MeridianError::Unsupported { provider, operation }
            }
            ProviderError::RateLimited { retry_after_secs, .. } => {
                crate::error::MeridianError::RateLimited { retry_after_secs }
            }
            other => crate::error::MeridianError::Protocol(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limited_is_retriable() {
        let err = ProviderError::RateLimited {
            provider: "dropbox".into(),
            retry_after_secs: Some(5),
        };
        assert!(err.is_retriable());
    }

    #[test]
    fn not_found_converts_to_meridian_not_found() {
        let err = ProviderError::NotFound {
            path: PathBuf::from("/x"),
            provider: "local".into(),
        };
        let converted: crate::error::MeridianError = err.into();
        assert!(matches!(converted, crate::error::MeridianError::NotFound(_)));
    }

    #[test]
    fn rate_limited_converts_preserving_retry_after_hint() {
        let err = ProviderError::RateLimited {
            provider: "dropbox".into(),
            retry_after_secs: Some(17),
        };
        let converted: crate::error::MeridianError = err.into();
        assert_eq!(converted.category(), crate::error::ErrorCategory::RateLimited);
        match converted {
            crate::error::MeridianError::RateLimited { retry_after_secs } => {
                assert_eq!(retry_after_secs, Some(17));
            }
            other => panic!("expected RateLimited, got {other:?}"),
        }
    }
}

/*!
 * Error types for Meridian
 */

use std::fmt;
use std::io;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, MeridianError>;

#[derive(Debug)]
pub enum MeridianError {
    /// Path not found on a provider
    NotFound(PathBuf),

    /// Path is invalid or malformed
    InvalidPath(PathBuf),

    /// I/O error
    Io(io::Error),

    /// Configuration error
    Config(String),

    /// Authentication/credential error
    Authentication(String),

    /// Provider-level protocol error (network, remote API)
    Protocol(String),

    /// Provider reported a rate limit, optionally with a retry-after hint
    RateLimited { retry_after_secs: Option<u64> },

    /// Operation not supported by this provider
    Unsupported { provider: String, operation: String },

    /// A run was rejected by the Safety Monitor
    Safety(String),

    /// Durable state store error
    Store(String),

    /// Compression/decompression error
    Compression(String),

    /// Retries exhausted
    RetriesExhausted { attempts: u32 },

    /// Generic error with message
    Other(String),
}

impl MeridianError {
    /// Error taxonomy per spec §7
    pub fn category(&self) -> ErrorCategory {
        match self {
            MeridianError::NotFound(_) => ErrorCategory::NotFound,
            MeridianError::InvalidPath(_) => ErrorCategory::Fatal,
            MeridianError::Io(e) => {
                if Self::is_io_transient(e) {
                    ErrorCategory::Transient
                } else {
                    ErrorCategory::Fatal
                }
            }
            MeridianError::Config(_) => ErrorCategory::Fatal,
            MeridianError::Authentication(_) => ErrorCategory::AuthExpired,
            MeridianError::Protocol(_) => ErrorCategory::Transient,
            MeridianError::RateLimited { .. } => ErrorCategory::RateLimited,
            MeridianError::Unsupported { .. } => ErrorCategory::Fatal,
            MeridianError::Safety(_) => ErrorCategory::Safety,
            MeridianError::Store(_) => ErrorCategory::Fatal,
            MeridianError::Compression(_) => ErrorCategory::Transient,
            MeridianError::RetriesExhausted { .. } => ErrorCategory::Fatal,
            MeridianError::Other(_) => ErrorCategory::Fatal,
        }
    }

    /// Whether this error is worth retrying under the documented backoff policy
    pub fn is_retriable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Transient | ErrorCategory::RateLimited
        )
    }

    fn is_io_transient(io_err: &io::Error) -> bool {
        use io::ErrorKind::*;
        matches!(
            io_err.kind(),
            ConnectionRefused
                | ConnectionReset
                | ConnectionAborted
                | NotConnected
                | BrokenPipe
                | TimedOut
                | Interrupted
                | WouldBlock
                | WriteZero
        )
    }
}

/// Error taxonomy from spec §7
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Transient,
    RateLimited,
    AuthExpired,
    NotFound,
    Conflict,
    Fatal,
    Safety,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Transient => write!(f, "transient"),
            ErrorCategory::RateLimited => write!(f, "rate_limited"),
            ErrorCategory::AuthExpired => write!(f, "auth_expired"),
            ErrorCategory::NotFound => write!(f, "not_found"),
            ErrorCategory::Conflict => write!(f, "conflict"),
            ErrorCategory::Fatal => write!(f, "fatal"),
            ErrorCategory::Safety => write!(f, "safety"),
        }
    }
}

impl fmt::Display for MeridianError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeridianError::NotFound(path) => write!(f, "not found: {}", path.display()),
            MeridianError::InvalidPath(path) => write!(f, "invalid path: {}", path.display()),
            MeridianError::Io(err) => write!(f, "I/O error: {}", err),
            MeridianError::Config(msg) => write!(f, "configuration error: {}", msg),
            MeridianError::Authentication(msg) => write!(f, "authentication error: {}", msg),
            MeridianError::Protocol(msg) => write!(f, "protocol error: {}", msg),
            MeridianError::RateLimited { retry_after_secs } => match retry_after_secs {
                Some(s) => write!(f, "rate-limited, retry after {}s", s),
                None => write!(f, "rate-limited"),
            },
            MeridianError::Unsupported { provider, operation } => {
                write!(f, "operation '{}' not supported by provider {}", operation, provider)
            }
            MeridianError::Safety(msg) => write!(f, "safety rejection: {}", msg),
            MeridianError::Store(msg) => write!(f, "state store error: {}", msg),
            MeridianError::Compression(msg) => write!(f, "compression error: {}", msg),
            MeridianError::RetriesExhausted { attempts } => {
                write!(f, "all {} retry attempts exhausted", attempts)
            }
            MeridianError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for MeridianError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MeridianError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for MeridianError {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::NotFound {
            MeridianError::NotFound(PathBuf::new())
        } else {
            MeridianError::Io(err)
        }
    }
}

impl From<serde_json::Error> for MeridianError {
    fn from(err: serde_json::Error) -> Self {
        MeridianError::Other(format!("JSON error: {}", err))
    }
}

impl From<toml::de::Error> for MeridianError {
    fn from(err: toml::de::Error) -> Self {
        MeridianError::Config(format!("TOML parse error: {}", err))
    }
}

impl From<rusqlite::Error> for MeridianError {
    fn from(err: rusqlite::Error) -> Self {
        MeridianError::Store(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_categories() {
        assert_eq!(
            MeridianError::Config("bad".into()).category(),
            ErrorCategory::Fatal
        );
        assert_eq!(
            MeridianError::InvalidPath(PathBuf::from("/x")).category(),
            ErrorCategory::Fatal
        );
    }

    #[test]
    fn transient_io_is_retriable() {
        let err = MeridianError::Io(io::Error::new(io::ErrorKind::TimedOut, "slow"));
        assert!(err.is_retriable());
    }

    #[test]
    fn not_found_is_not_retriable() {
        let err = MeridianError::NotFound(PathBuf::from("/missing"));
        assert!(!err.is_retriable());
    }

    #[test]
    fn safety_category_display() {
        assert_eq!(ErrorCategory::Safety.to_string(), "safety");
    }

    #[test]
    fn rate_limited_is_its_own_category_and_retriable() {
        let err = MeridianError::RateLimited { retry_after_secs: Some(5) };
        assert_eq!(err.category(), ErrorCategory::RateLimited);
        assert!(err.is_retriable());
    }
}

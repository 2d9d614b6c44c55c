//! Storage error types.

use thiserror::Error;

/// Storage operation errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("S3 error: {0}")]
    S3(#[from] Box<dyn std::error::Error + Send + Sync>),

    /// Timeouts, dispatch failures, throttling, and server-side errors.
    #[error("transient store error: {0}")]
    Transient(String),

    #[error("access denied: {0}")]
    Unauthorized(String),

    #[error("bucket not found: {0}")]
    BucketNotFound(String),

    /// A conditional write lost against a concurrent writer.
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl StorageError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            StorageError::Transient(_) => true,
            StorageError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }

    /// Whether the run must stop: bad credentials, a missing bucket, a
    /// malformed key, or an error the store did not explain.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            StorageError::Unauthorized(_)
                | StorageError::BucketNotFound(_)
                | StorageError::InvalidKey(_)
                | StorageError::Config(_)
                | StorageError::S3(_)
        )
    }

    /// Whether the error indicates the object does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

//! Synchronization error types.

use bucketgames_storage::StorageError;
use thiserror::Error;

/// Errors that prevent a synchronization run from starting. Failures during
/// the run are recorded in the [`SyncReport`](crate::SyncReport) instead.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("failed to read remote state: {0}")]
    RemoteState(#[source] StorageError),

    #[error("{backend} store cannot keep per-object fingerprints; use the index strategy")]
    UnsupportedStrategy { backend: &'static str },

    #[error("invalid sync configuration: {0}")]
    Config(String),

    #[error("cancelled before any change was made")]
    Cancelled,
}

pub type SyncResult<T> = std::result::Result<T, SyncError>;

//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid hash: {0}")]
    InvalidHash(String),

    #[error("invalid fingerprint: {0}")]
    InvalidFingerprint(String),

    #[error("unsupported fingerprint scheme: {found} (expected {expected})")]
    UnsupportedScheme {
        found: String,
        expected: &'static str,
    },

    #[error("invalid date: {0}")]
    InvalidDate(String),

    #[error("invalid object path: {0}")]
    InvalidPath(String),

    #[error("duplicate artifact path: {0}")]
    DuplicatePath(String),

    #[error("reserved artifact path: {0}")]
    ReservedPath(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;

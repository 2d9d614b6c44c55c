//! Site build error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while building the site. All of them abort the build
/// before any network activity.
#[derive(Debug, Error)]
pub enum SiteError {
    /// A definition file or the bucket layout is invalid.
    #[error("{}: {message}", path.display())]
    Config { path: PathBuf, message: String },

    #[error("failed to render {template} for {page}: {source}")]
    Render {
        template: String,
        page: String,
        #[source]
        source: minijinja::Error,
    },

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SiteError {
    pub(crate) fn config(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        SiteError::Config {
            path: path.into(),
            message: message.into(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SiteError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type for site operations.
pub type SiteResult<T> = std::result::Result<T, SiteError>;

//! Output artifacts: what the site build produces and the publisher uploads.

use bytes::Bytes;
use std::path::{Path, PathBuf};

/// Content of an artifact.
#[derive(Clone, Debug)]
pub enum ArtifactContent {
    /// Rendered in memory (pages, stylesheets, scripts).
    Bytes(Bytes),
    /// Copied from the bucket tree as-is (screenshots, release files).
    File(PathBuf),
}

/// One object of the published site.
#[derive(Clone, Debug)]
pub struct Artifact {
    /// Relative object path using `/` separators.
    pub path: String,
    pub content: ArtifactContent,
    pub content_type: &'static str,
}

impl Artifact {
    /// Create a rendered artifact.
    pub fn rendered(path: impl Into<String>, body: impl Into<Bytes>) -> Self {
        let path = path.into();
        let content_type = content_type_for(&path);
        Self {
            path,
            content: ArtifactContent::Bytes(body.into()),
            content_type,
        }
    }

    /// Create an artifact backed by a file on disk.
    pub fn file(path: impl Into<String>, source: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let content_type = content_type_for(&path);
        Self {
            path,
            content: ArtifactContent::File(source.into()),
            content_type,
        }
    }
}

/// Content type derived from the extension of an object path.
pub fn content_type_for(path: &str) -> &'static str {
    let ext = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "js" | "mjs" => "text/javascript; charset=utf-8",
        "json" => "application/json",
        "txt" | "md" => "text/plain; charset=utf-8",
        "xml" => "application/xml",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "ico" => "image/x-icon",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        "bz2" => "application/x-bzip2",
        "xz" => "application/x-xz",
        "apk" => "application/vnd.android.package-archive",
        "wasm" => "application/wasm",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "ogg" => "audio/ogg",
        "mp3" => "audio/mpeg",
        "woff2" => "font/woff2",
        _ => "application/octet-stream",
    }
}

/// Validate a relative object path: non-empty `/`-separated segments, no
/// `.`/`..` segments, no leading slash, no backslashes.
pub fn validate_object_path(path: &str) -> crate::Result<()> {
    if path.is_empty() {
        return Err(crate::Error::InvalidPath("empty path".to_string()));
    }
    if path.starts_with('/') || path.contains('\\') {
        return Err(crate::Error::InvalidPath(path.to_string()));
    }
    for segment in path.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            return Err(crate::Error::InvalidPath(path.to_string()));
        }
    }
    Ok(())
}

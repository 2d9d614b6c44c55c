//! Writes a build to the bucket's output directory.

use crate::error::{SiteError, SiteResult};
use bucketgames_core::{Artifact, ArtifactContent, WEBSITE_DIR};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Recreate `<root>/_website` holding exactly `artifacts`.
pub fn write_output(root: &Path, artifacts: &[Artifact]) -> SiteResult<PathBuf> {
    let out = root.join(WEBSITE_DIR);
    if out.exists() {
        fs::remove_dir_all(&out).map_err(|e| SiteError::io(&out, e))?;
    }
    fs::create_dir_all(&out).map_err(|e| SiteError::io(&out, e))?;

    for artifact in artifacts {
        let dest = artifact
            .path
            .split('/')
            .fold(out.clone(), |path, segment| path.join(segment));
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|e| SiteError::io(parent, e))?;
        }
        match &artifact.content {
            ArtifactContent::Bytes(bytes) => {
                fs::write(&dest, bytes).map_err(|e| SiteError::io(&dest, e))?;
            }
            ArtifactContent::File(source) => {
                fs::copy(source, &dest).map_err(|e| SiteError::io(source, e))?;
            }
        }
    }
    info!(path = %out.display(), files = artifacts.len(), "Wrote site");
    Ok(out)
}

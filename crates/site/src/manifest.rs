//! Fingerprints a build's artifacts into a [`LocalManifest`].

use crate::cache::FingerprintCache;
use crate::error::{SiteError, SiteResult};
use bucketgames_core::{Artifact, ArtifactContent, Fingerprint, INDEX_KEY, LocalManifest};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::debug;

/// Reject duplicate output paths and the reserved index key before anything
/// is written or hashed.
pub fn check_artifact_paths(root: &Path, artifacts: &[Artifact]) -> SiteResult<()> {
    let mut seen = BTreeSet::new();
    for artifact in artifacts {
        bucketgames_core::validate_object_path(&artifact.path)
            .map_err(|e| SiteError::config(root, e.to_string()))?;
        if artifact.path == INDEX_KEY {
            return Err(SiteError::config(
                root,
                format!("{INDEX_KEY} is reserved for the publish index"),
            ));
        }
        if !seen.insert(artifact.path.as_str()) {
            return Err(SiteError::config(
                root,
                format!("two artifacts map to {}", artifact.path),
            ));
        }
    }
    Ok(())
}

/// Fingerprint every artifact. Rendered content is hashed in memory; files
/// are streamed, or taken from the cache when unchanged.
pub fn build_local_manifest(
    root: &Path,
    artifacts: Vec<Artifact>,
    cache: &mut FingerprintCache,
) -> SiteResult<LocalManifest> {
    let mut manifest = LocalManifest::new();
    for artifact in artifacts {
        let (fingerprint, size) = match &artifact.content {
            ArtifactContent::Bytes(bytes) => (Fingerprint::of_bytes(bytes), bytes.len() as u64),
            ArtifactContent::File(source) => cache.fingerprint_file(source)?,
        };
        manifest
            .insert(artifact, fingerprint, size)
            .map_err(|e| SiteError::config(root, e.to_string()))?;
    }
    let (hits, misses) = cache.stats();
    debug!(
        artifacts = manifest.len(),
        cache_hits = hits,
        hashed = misses,
        "Built local manifest"
    );
    Ok(manifest)
}

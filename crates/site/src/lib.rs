//! Builds a bucket's static site.
//!
//! The pipeline reads the bucket tree into a [`Catalog`], renders the pages,
//! collects the raw files published next to them, and fingerprints the
//! result into a [`LocalManifest`] for publishing.

pub mod cache;
pub mod error;
pub mod manifest;
pub mod output;
pub mod render;
pub mod scan;

pub use cache::FingerprintCache;
pub use error::{SiteError, SiteResult};
pub use manifest::{build_local_manifest, check_artifact_paths};
pub use output::write_output;
pub use render::{Renderer, markdown_to_html};
pub use scan::{collect_assets, load_catalog};

use bucketgames_core::{Artifact, Catalog, LocalManifest};
use std::path::{Path, PathBuf};
use tracing::info;

/// Everything one build produces, before fingerprinting.
#[derive(Debug)]
pub struct SiteBuild {
    pub catalog: Catalog,
    pub artifacts: Vec<Artifact>,
}

/// Read, render, and collect the site of the bucket at `root`.
pub fn build_site(root: &Path) -> SiteResult<SiteBuild> {
    let catalog = load_catalog(root)?;
    let mut artifacts = Renderer::new(root).render(&catalog)?;
    artifacts.extend(collect_assets(&catalog)?);
    check_artifact_paths(root, &artifacts)?;
    info!(
        games = catalog.games.len(),
        artifacts = artifacts.len(),
        "Built site"
    );
    Ok(SiteBuild { catalog, artifacts })
}

/// Build the site and write it to `<root>/_website`.
pub fn generate(root: &Path) -> SiteResult<PathBuf> {
    let build = build_site(root)?;
    write_output(root, &build.artifacts)
}

/// Build the site and fingerprint it for publishing. With `use_cache`, file
/// fingerprints are reused from and saved to the bucket's cache.
pub fn build_manifest(root: &Path, use_cache: bool) -> SiteResult<(Catalog, LocalManifest)> {
    let build = build_site(root)?;
    let mut cache = if use_cache {
        FingerprintCache::load(root)
    } else {
        FingerprintCache::disabled(root)
    };
    let manifest = build_local_manifest(root, build.artifacts, &mut cache)?;
    cache.save()?;
    Ok((build.catalog, manifest))
}

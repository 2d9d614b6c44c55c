//! The `upload` command: build, fingerprint, and publish.

use anyhow::{Context, Result};
use bucketgames_sync::Synchronizer;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

pub struct UploadOptions {
    pub config: Option<PathBuf>,
    pub dry_run: bool,
    pub rehash: bool,
    pub report: Option<PathBuf>,
}

/// Publish the bucket. The site is rebuilt in memory, so `_website` need not
/// exist. Returns a failing exit code when the store did not converge.
pub async fn run(bucket: &Path, options: UploadOptions) -> Result<ExitCode> {
    let config = crate::config::load(bucket, options.config.as_deref())?;

    let root = bucket.to_path_buf();
    let use_cache = !options.rehash;
    let (catalog, manifest) =
        tokio::task::spawn_blocking(move || bucketgames_site::build_manifest(&root, use_cache))
            .await
            .context("site build task failed")?
            .with_context(|| format!("failed to build site from {}", bucket.display()))?;
    tracing::info!(
        games = catalog.games.len(),
        objects = manifest.len(),
        bytes = manifest.total_size(),
        "Site ready to publish"
    );

    let store = bucketgames_storage::from_config(&config.storage)
        .await
        .context("failed to initialize storage")?;
    store
        .health_check()
        .await
        .context("storage health check failed")?;

    let synchronizer = Synchronizer::new(store, config.sync.clone());
    let cancel = synchronizer.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, waiting for in-flight requests");
            cancel.cancel();
        }
    });

    let report = synchronizer
        .sync(&manifest, options.dry_run)
        .await
        .context("sync failed")?;

    {
        let mut stdout = std::io::stdout().lock();
        report.write_lines(&mut stdout)?;
        stdout.flush()?;
    }
    if let Some(path) = &options.report {
        let json = report.to_json().context("failed to encode report")?;
        std::fs::write(path, json)
            .with_context(|| format!("failed to write report to {}", path.display()))?;
    }

    if !report.is_success() {
        return Ok(ExitCode::FAILURE);
    }
    if !options.dry_run
        && let Some(url) = &config.public_url
    {
        println!("Published to {url}");
    }
    Ok(ExitCode::SUCCESS)
}

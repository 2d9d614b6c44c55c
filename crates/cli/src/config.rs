//! Publishing configuration loading.
//!
//! Sources, lowest precedence first: the bucket folder name as the default
//! storage bucket, the configuration file, then `BUCKETGAMES_*` environment
//! variables with `__` separating nested keys.

use anyhow::{Context, Result};
use bucketgames_core::{PublishConfig, StorageConfig};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use std::path::{Path, PathBuf};

pub const CREDENTIALS_FILE: &str = "credentials.toml";
pub const ENV_PREFIX: &str = "BUCKETGAMES_";

/// Load and validate the publishing configuration for `bucket`.
///
/// `explicit` replaces `<bucket>/credentials.toml` and must exist. A relative
/// filesystem store path is resolved against the bucket folder.
pub fn load(bucket: &Path, explicit: Option<&Path>) -> Result<PublishConfig> {
    let path = explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(|| bucket.join(CREDENTIALS_FILE));

    let mut figment = Figment::new();
    if let Some(name) = bucket_name(bucket) {
        figment = figment.merge(Serialized::default("storage.bucket", name));
    }
    if path.is_file() {
        tracing::debug!(config_path = %path.display(), "Loading configuration from file");
        figment = figment.merge(Toml::file(&path));
    } else if explicit.is_some() {
        anyhow::bail!("configuration file {} does not exist", path.display());
    } else {
        tracing::debug!("No config file found at {}", path.display());
    }

    // BUCKETGAMES_CONFIG is the path of the file, not a setting.
    let mut config: PublishConfig = figment
        .merge(Env::prefixed(ENV_PREFIX).ignore(&["config"]).split("__"))
        .extract()
        .with_context(|| format!("failed to load configuration from {}", path.display()))?;

    if let StorageConfig::Filesystem { path: target } = &mut config.storage
        && target.is_relative()
    {
        *target = bucket.join(&*target);
    }

    config
        .validate()
        .map_err(anyhow::Error::msg)
        .context("invalid publishing configuration")?;
    Ok(config)
}

/// Folder name of the bucket, which doubles as the default storage bucket.
fn bucket_name(bucket: &Path) -> Option<String> {
    let canonical: PathBuf = bucket.canonicalize().ok()?;
    canonical
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn bucket_with(config: &str) -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let bucket = dir.path().join("arcade");
        fs::create_dir(&bucket).unwrap();
        fs::write(bucket.join(CREDENTIALS_FILE), config).unwrap();
        (dir, bucket)
    }

    #[test]
    fn test_bucket_defaults_to_folder_name() {
        let (_dir, bucket) = bucket_with(
            r#"
[storage]
type = "s3"
endpoint = "http://localhost:9000"
access_key_id = "key"
secret_access_key = "secret"

[sync]
concurrency = 3
"#,
        );
        let config = load(&bucket, None).unwrap();
        match config.storage {
            StorageConfig::S3 {
                bucket, endpoint, ..
            } => {
                assert_eq!(bucket, "arcade");
                assert_eq!(endpoint.as_deref(), Some("http://localhost:9000"));
            }
            other => panic!("unexpected storage {other:?}"),
        }
        assert_eq!(config.sync.concurrency, 3);
        assert_eq!(config.sync.max_attempts, 5);
    }

    #[test]
    fn test_file_overrides_bucket_name() {
        let (_dir, bucket) = bucket_with(
            r#"
public_url = "https://games.example.com"

[storage]
type = "s3"
bucket = "games-prod"
"#,
        );
        let config = load(&bucket, None).unwrap();
        assert!(matches!(config.storage, StorageConfig::S3 { ref bucket, .. } if bucket == "games-prod"));
        assert_eq!(config.public_url.as_deref(), Some("https://games.example.com"));
    }

    #[test]
    fn test_relative_filesystem_path_is_resolved() {
        let (_dir, bucket) = bucket_with(
            r#"
[storage]
type = "filesystem"
path = "../published"
"#,
        );
        let config = load(&bucket, None).unwrap();
        match config.storage {
            StorageConfig::Filesystem { path } => assert_eq!(path, bucket.join("../published")),
            other => panic!("unexpected storage {other:?}"),
        }
    }

    #[test]
    fn test_invalid_combination_rejected() {
        let (_dir, bucket) = bucket_with(
            r#"
[storage]
type = "filesystem"
path = "out"

[sync]
remote_state = "metadata"
"#,
        );
        let err = load(&bucket, None).unwrap_err();
        assert!(format!("{err:#}").contains("remote_state"));
    }

    #[test]
    fn test_explicit_file_must_exist() {
        let (dir, bucket) = bucket_with("");
        let missing = dir.path().join("missing.toml");
        assert!(load(&bucket, Some(&missing)).is_err());
    }

    #[test]
    fn test_missing_storage_type_is_an_error() {
        let (_dir, bucket) = bucket_with("[sync]\nconcurrency = 2\n");
        assert!(load(&bucket, None).is_err());
    }
}

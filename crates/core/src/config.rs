//! Publishing configuration shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Storage backend configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Local directory standing in for a static host.
    Filesystem {
        /// Root directory the site is published into.
        path: PathBuf,
    },
    /// S3-compatible storage (AWS S3, Cloudflare R2, Backblaze B2, MinIO).
    S3 {
        /// Bucket name.
        bucket: String,
        /// Optional endpoint URL for non-AWS services.
        #[serde(alias = "endpoint_url")]
        endpoint: Option<String>,
        /// Region. R2 uses "auto".
        region: Option<String>,
        /// Publish prefix inside the bucket.
        prefix: Option<String>,
        /// Access key ID. Falls back to the ambient AWS credential chain if unset.
        #[serde(alias = "key_id")]
        access_key_id: Option<String>,
        /// Secret access key. Falls back to the ambient AWS credential chain if unset.
        #[serde(alias = "secret_key")]
        secret_access_key: Option<String>,
        /// Force path-style URLs (`endpoint/bucket/key`).
        /// Required for MinIO and most S3-compatible services.
        #[serde(default)]
        force_path_style: bool,
    },
}

impl StorageConfig {
    /// Validate storage configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            StorageConfig::S3 {
                bucket,
                access_key_id,
                secret_access_key,
                ..
            } => {
                if bucket.trim().is_empty() {
                    return Err("s3 config requires a non-empty bucket".to_string());
                }
                match (access_key_id.as_ref(), secret_access_key.as_ref()) {
                    (Some(_), Some(_)) | (None, None) => Ok(()),
                    _ => Err(
                        "s3 config requires both access_key_id and secret_access_key when either is set"
                            .to_string(),
                    ),
                }
            }
            StorageConfig::Filesystem { path } => {
                if path.as_os_str().is_empty() {
                    return Err("filesystem config requires a path".to_string());
                }
                Ok(())
            }
        }
    }
}

/// How the remote state reader recovers fingerprints of published objects.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RemoteStateStrategy {
    /// Read a single index object written at the end of every publish.
    #[default]
    Index,
    /// Read the fingerprint metadata field of every object.
    Metadata,
}

/// Synchronizer tuning.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Number of concurrent upload/delete workers.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Attempts per object (first try included) before recording a failure.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// First retry delay in milliseconds; doubles on every further retry.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Upper bound for a single retry delay in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Fingerprint recovery strategy.
    #[serde(default)]
    pub remote_state: RemoteStateStrategy,
}

fn default_concurrency() -> usize {
    8
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    8_000
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            remote_state: RemoteStateStrategy::default(),
        }
    }
}

impl SyncConfig {
    /// First retry delay.
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    /// Maximum retry delay.
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Validate synchronizer settings.
    pub fn validate(&self) -> Result<(), String> {
        if self.concurrency == 0 {
            return Err("sync.concurrency must be at least 1".to_string());
        }
        if self.max_attempts == 0 {
            return Err("sync.max_attempts must be at least 1".to_string());
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(format!(
                "sync.max_delay_ms ({}) is smaller than sync.base_delay_ms ({})",
                self.max_delay_ms, self.base_delay_ms
            ));
        }
        Ok(())
    }
}

/// Complete publishing configuration (`credentials.toml`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PublishConfig {
    /// Where the site is published.
    pub storage: StorageConfig,
    /// Synchronizer settings.
    #[serde(default)]
    pub sync: SyncConfig,
    /// Public base URL the published site is reachable at.
    #[serde(default)]
    pub public_url: Option<String>,
}

impl PublishConfig {
    /// Validate every section.
    pub fn validate(&self) -> Result<(), String> {
        self.storage.validate()?;
        self.sync.validate()?;
        if matches!(self.storage, StorageConfig::Filesystem { .. })
            && self.sync.remote_state == RemoteStateStrategy::Metadata
        {
            return Err(
                "the filesystem store keeps no object metadata; use remote_state = \"index\""
                    .to_string(),
            );
        }
        Ok(())
    }
}

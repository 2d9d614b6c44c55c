//! Local filesystem storage backend.
//!
//! Publishes into a plain directory, for hosts that serve a directory tree
//! or for trying a publish locally. Custom metadata is not persisted.

use crate::error::{StorageError, StorageResult};
use crate::traits::{
    ObjectEntry, ObjectMeta, ObjectStore, PutBody, PutCondition, PutOptions, StoreCapabilities,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::instrument;
use uuid::Uuid;
use walkdir::WalkDir;

/// Local filesystem object store.
pub struct FilesystemBackend {
    root: PathBuf,
    /// Serializes conditional writes made through this backend.
    conditional_lock: Mutex<()>,
}

impl FilesystemBackend {
    /// Create a new filesystem backend rooted at `root`, creating it if needed.
    pub async fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self {
            root,
            conditional_lock: Mutex::new(()),
        })
    }

    /// Root directory objects are written under.
    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn key_path(&self, key: &str) -> StorageResult<PathBuf> {
        let root = self.root.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || Self::key_path_sync(&root, &key))
            .await
            .map_err(|e| {
                StorageError::Io(std::io::Error::other(format!("spawn_blocking failed: {e}")))
            })?
    }

    /// Resolve a key to a path under the root.
    ///
    /// Rejects keys with non-normal components and keys that resolve outside
    /// the root through a symlink, including symlinked ancestors of paths
    /// that do not exist yet.
    fn key_path_sync(root: &Path, key: &str) -> StorageResult<PathBuf> {
        if key.is_empty() || key.starts_with('/') || key.contains('\\') {
            return Err(StorageError::InvalidKey(format!(
                "path traversal not allowed: {key}"
            )));
        }
        if Path::new(key)
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(StorageError::InvalidKey(format!(
                "contains unsafe path component: {key}"
            )));
        }

        let path = root.join(key);
        let root_canonical = root.canonicalize()?;

        // Nearest existing ancestor (the path itself included) must resolve
        // inside the root.
        let mut candidate = Some(path.as_path());
        while let Some(current) = candidate {
            match std::fs::symlink_metadata(current) {
                Ok(meta) => {
                    let canonical = current.canonicalize().map_err(|e| {
                        if meta.file_type().is_symlink() {
                            StorageError::InvalidKey(format!(
                                "symlink target missing or invalid: {key}"
                            ))
                        } else {
                            StorageError::Io(e)
                        }
                    })?;
                    if !canonical.starts_with(&root_canonical) {
                        return Err(StorageError::InvalidKey(format!(
                            "resolved path escapes storage root: {key}"
                        )));
                    }
                    return Ok(path);
                }
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    candidate = current.parent();
                }
                Err(err) => return Err(StorageError::Io(err)),
            }
        }

        Ok(path)
    }

    fn temp_path_for(path: &Path) -> PathBuf {
        let temp_name = format!(".tmp.{}", Uuid::new_v4());
        path.with_file_name(
            path.file_name()
                .map(|n| format!("{}{}", n.to_string_lossy(), temp_name))
                .unwrap_or_else(|| temp_name.clone()),
        )
    }

    /// Entity tag derived from length and modification time.
    fn etag_for(meta: &std::fs::Metadata) -> String {
        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        format!("{:x}-{:x}", meta.len(), mtime)
    }

    async fn check_condition(
        &self,
        key: &str,
        path: &Path,
        condition: &PutCondition,
    ) -> StorageResult<()> {
        let current = match fs::metadata(path).await {
            Ok(meta) => Some(Self::etag_for(&meta)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(StorageError::Io(e)),
        };
        let satisfied = match (condition, current) {
            (PutCondition::IfAbsent, None) => true,
            (PutCondition::IfMatch(expected), Some(actual)) => *expected == actual,
            _ => false,
        };
        if satisfied {
            Ok(())
        } else {
            Err(StorageError::PreconditionFailed(key.to_string()))
        }
    }

    async fn write_atomic(&self, path: &Path, body: &PutBody) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let temp_path = Self::temp_path_for(path);
        let written = async {
            match body {
                PutBody::Bytes(data) => {
                    let mut file = fs::File::create(&temp_path).await?;
                    file.write_all(data).await?;
                    file.sync_all().await?;
                }
                PutBody::File(source) => {
                    fs::copy(source, &temp_path).await?;
                    fs::File::open(&temp_path).await?.sync_all().await?;
                }
            }
            fs::rename(&temp_path, path).await
        }
        .await;
        if written.is_err() {
            let _ = fs::remove_file(&temp_path).await;
        }
        written.map_err(StorageError::Io)
    }

    /// Remove directories left empty by a delete, up to the root.
    async fn prune_empty_parents(&self, path: &Path) {
        let mut current = path.parent();
        while let Some(dir) = current {
            if dir == self.root || !dir.starts_with(&self.root) {
                break;
            }
            if fs::remove_dir(dir).await.is_err() {
                break;
            }
            current = dir.parent();
        }
    }
}

#[async_trait]
impl ObjectStore for FilesystemBackend {
    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn list(&self, prefix: &str) -> StorageResult<Vec<ObjectEntry>> {
        let root = self.root.clone();
        let prefix = prefix.to_string();
        tokio::task::spawn_blocking(move || {
            let mut results = Vec::new();
            // Symlinks are not followed and not listed.
            for entry in WalkDir::new(&root).follow_links(false).sort_by_file_name() {
                let entry = entry.map_err(|e| StorageError::Io(std::io::Error::other(e)))?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let Ok(rel) = entry.path().strip_prefix(&root) else {
                    continue;
                };
                let key = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                if !key.starts_with(&prefix) {
                    continue;
                }
                let meta = entry
                    .metadata()
                    .map_err(|e| StorageError::Io(std::io::Error::other(e)))?;
                results.push(ObjectEntry {
                    key,
                    size: meta.len(),
                    etag: Some(Self::etag_for(&meta)),
                });
            }
            Ok(results)
        })
        .await
        .map_err(|e| {
            StorageError::Io(std::io::Error::other(format!("spawn_blocking failed: {e}")))
        })?
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn head(&self, key: &str) -> StorageResult<ObjectMeta> {
        let path = self.key_path(key).await?;
        let metadata = fs::metadata(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(key.to_string())
            } else {
                StorageError::Io(e)
            }
        })?;

        Ok(ObjectMeta {
            size: metadata.len(),
            etag: Some(Self::etag_for(&metadata)),
            content_type: None,
            metadata: Default::default(),
        })
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        let path = self.key_path(key).await?;
        let data = fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(key.to_string())
            } else {
                StorageError::Io(e)
            }
        })?;
        Ok(Bytes::from(data))
    }

    #[instrument(skip(self, body, options), fields(backend = "filesystem"))]
    async fn put(
        &self,
        key: &str,
        body: PutBody,
        options: &PutOptions,
    ) -> StorageResult<Option<String>> {
        let path = self.key_path(key).await?;
        match &options.condition {
            Some(condition) => {
                let _guard = self.conditional_lock.lock().await;
                self.check_condition(key, &path, condition).await?;
                self.write_atomic(&path, &body).await?;
            }
            None => self.write_atomic(&path, &body).await?,
        }
        let meta = fs::metadata(&path).await?;
        Ok(Some(Self::etag_for(&meta)))
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.key_path(key).await?;
        fs::remove_file(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(key.to_string())
            } else {
                StorageError::Io(e)
            }
        })?;
        self.prune_empty_parents(&path).await;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "filesystem"
    }

    fn capabilities(&self) -> StoreCapabilities {
        StoreCapabilities {
            custom_metadata: false,
            conditional_put: true,
        }
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn health_check(&self) -> StorageResult<()> {
        let metadata = fs::metadata(&self.root).await.map_err(|e| {
            StorageError::Io(std::io::Error::new(
                e.kind(),
                format!("storage root not accessible: {e}"),
            ))
        })?;

        if !metadata.is_dir() {
            return Err(StorageError::Config(format!(
                "storage root is not a directory: {}",
                self.root.display()
            )));
        }

        Ok(())
    }
}

//! Storage trait definitions.

use crate::error::StorageResult;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// One object returned by a listing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectEntry {
    /// Key relative to the store's prefix.
    pub key: String,
    pub size: u64,
    pub etag: Option<String>,
}

/// Metadata about a stored object.
#[derive(Clone, Debug, Default)]
pub struct ObjectMeta {
    /// Object size in bytes.
    pub size: u64,
    /// Entity tag used for conditional writes.
    pub etag: Option<String>,
    /// Content type (if available).
    pub content_type: Option<String>,
    /// Custom metadata. Empty for backends without metadata support.
    pub metadata: BTreeMap<String, String>,
}

/// Body of a put request.
#[derive(Clone, Debug)]
pub enum PutBody {
    Bytes(Bytes),
    /// Streamed from a local file.
    File(PathBuf),
}

/// Precondition attached to a put.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PutCondition {
    /// Succeed only if no object exists at the key (`If-None-Match: *`).
    IfAbsent,
    /// Succeed only if the current object has this entity tag (`If-Match`).
    IfMatch(String),
}

/// Options for a put request.
#[derive(Clone, Debug, Default)]
pub struct PutOptions {
    pub content_type: Option<String>,
    pub metadata: BTreeMap<String, String>,
    pub condition: Option<PutCondition>,
}

/// What a backend can do beyond plain reads and writes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StoreCapabilities {
    /// Custom metadata set on put is returned by head.
    pub custom_metadata: bool,
    /// Puts honor [`PutCondition`].
    pub conditional_put: bool,
}

/// Narrow object store abstraction used by the publisher.
///
/// Keys are relative to the store's configured prefix and always use `/`
/// separators.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// List every object whose key starts with `prefix`.
    async fn list(&self, prefix: &str) -> StorageResult<Vec<ObjectEntry>>;

    /// Get an object's metadata without fetching content.
    async fn head(&self, key: &str) -> StorageResult<ObjectMeta>;

    /// Get an object's content.
    async fn get(&self, key: &str) -> StorageResult<Bytes>;

    /// Write an object, replacing any existing one unless a condition says
    /// otherwise. A failed condition is [`StorageError::PreconditionFailed`].
    ///
    /// Returns the entity tag of the written object when the store reports
    /// one. It matches the tag a later listing or head returns.
    ///
    /// [`StorageError::PreconditionFailed`]: crate::StorageError::PreconditionFailed
    async fn put(
        &self,
        key: &str,
        body: PutBody,
        options: &PutOptions,
    ) -> StorageResult<Option<String>>;

    /// Delete an object. Missing objects are [`StorageError::NotFound`] on
    /// backends that can tell.
    ///
    /// [`StorageError::NotFound`]: crate::StorageError::NotFound
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Get the name of this storage backend.
    fn backend_name(&self) -> &'static str;

    /// Capabilities of this backend.
    fn capabilities(&self) -> StoreCapabilities;

    /// Verify storage backend connectivity.
    ///
    /// The default implementation returns Ok(()), suitable for backends that
    /// don't require connectivity verification.
    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }
}

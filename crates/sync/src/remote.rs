//! Recovers the published state of the store.

use crate::error::{SyncError, SyncResult};
use crate::retry::RetryPolicy;
use bucketgames_core::{
    FINGERPRINT_METADATA_KEY, Fingerprint, INDEX_KEY, IndexDocument, RemoteEntry, RemoteManifest,
    RemoteStateStrategy,
};
use bucketgames_storage::{ObjectEntry, ObjectStore, StorageError};
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What was found at the index key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IndexState {
    Missing,
    /// Readable with the current format and fingerprint scheme.
    Current { etag: Option<String> },
    /// Present but unreadable, written by another format or scheme, or not
    /// read at all.
    Outdated { etag: Option<String> },
}

impl IndexState {
    pub fn etag(&self) -> Option<&str> {
        match self {
            IndexState::Missing => None,
            IndexState::Current { etag } | IndexState::Outdated { etag } => etag.as_deref(),
        }
    }

    pub fn exists(&self) -> bool {
        !matches!(self, IndexState::Missing)
    }
}

#[derive(Clone, Debug)]
pub struct RemoteState {
    pub manifest: RemoteManifest,
    pub index: IndexState,
    /// Entity tags of the listed objects, recorded again when the index is
    /// committed.
    pub etags: BTreeMap<String, String>,
}

/// Reads the remote state with one listing plus either the index object or
/// one metadata read per object.
pub struct RemoteStateReader<'a> {
    store: &'a Arc<dyn ObjectStore>,
    retry: RetryPolicy,
    concurrency: usize,
    cancel: &'a CancellationToken,
}

impl<'a> RemoteStateReader<'a> {
    pub fn new(
        store: &'a Arc<dyn ObjectStore>,
        retry: RetryPolicy,
        concurrency: usize,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            store,
            retry,
            concurrency: concurrency.max(1),
            cancel,
        }
    }

    pub async fn read(&self, strategy: RemoteStateStrategy) -> SyncResult<RemoteState> {
        if strategy == RemoteStateStrategy::Metadata && !self.store.capabilities().custom_metadata {
            return Err(SyncError::UnsupportedStrategy {
                backend: self.store.backend_name(),
            });
        }

        let (listing, _) = self.retry.run(self.cancel, || self.store.list("")).await;
        let listing = listing.map_err(SyncError::RemoteState)?;
        let index_entry = listing.iter().find(|e| e.key == INDEX_KEY).cloned();
        let objects: Vec<ObjectEntry> = listing.into_iter().filter(|e| e.key != INDEX_KEY).collect();
        debug!(objects = objects.len(), index = index_entry.is_some(), "Listed remote objects");

        let state = match strategy {
            RemoteStateStrategy::Index => self.read_with_index(objects, index_entry).await?,
            RemoteStateStrategy::Metadata => self.read_with_metadata(objects, index_entry).await?,
        };
        info!(
            objects = state.manifest.len(),
            unknown = state.manifest.unknown_count(),
            strategy = ?strategy,
            "Read remote state"
        );
        Ok(state)
    }

    async fn index_etag(&self, entry: &ObjectEntry) -> SyncResult<Option<String>> {
        if entry.etag.is_some() {
            return Ok(entry.etag.clone());
        }
        let (meta, _) = self.retry.run(self.cancel, || self.store.head(INDEX_KEY)).await;
        match meta {
            Ok(meta) => Ok(meta.etag),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(SyncError::RemoteState(e)),
        }
    }

    async fn read_with_index(
        &self,
        objects: Vec<ObjectEntry>,
        index_entry: Option<ObjectEntry>,
    ) -> SyncResult<RemoteState> {
        let (document, index) = match index_entry {
            None => (None, IndexState::Missing),
            Some(entry) => {
                let etag = self.index_etag(&entry).await?;
                let (body, _) = self.retry.run(self.cancel, || self.store.get(INDEX_KEY)).await;
                match body {
                    Ok(body) => match serde_json::from_slice::<IndexDocument>(&body) {
                        Ok(doc) if doc.is_current() => (Some(doc), IndexState::Current { etag }),
                        Ok(doc) => {
                            info!(
                                format = doc.format,
                                scheme = %doc.fingerprint_scheme,
                                "Ignoring index written by another format or scheme"
                            );
                            (None, IndexState::Outdated { etag })
                        }
                        Err(e) => {
                            warn!(error = %e, "Ignoring unreadable index");
                            (None, IndexState::Outdated { etag })
                        }
                    },
                    // Removed between listing and read.
                    Err(e) if e.is_not_found() => (None, IndexState::Missing),
                    Err(e) => return Err(SyncError::RemoteState(e)),
                }
            }
        };

        let mut manifest = RemoteManifest::new();
        let mut etags = BTreeMap::new();
        for object in objects {
            let fingerprint = document.as_ref().and_then(|doc| {
                doc.fingerprint_for(&object.key, object.size, object.etag.as_deref())
            });
            if let Some(etag) = object.etag {
                etags.insert(object.key.clone(), etag);
            }
            manifest.insert(
                object.key,
                RemoteEntry {
                    fingerprint,
                    size: object.size,
                },
            );
        }
        Ok(RemoteState {
            manifest,
            index,
            etags,
        })
    }

    async fn read_with_metadata(
        &self,
        objects: Vec<ObjectEntry>,
        index_entry: Option<ObjectEntry>,
    ) -> SyncResult<RemoteState> {
        let index = match index_entry {
            None => IndexState::Missing,
            Some(entry) => IndexState::Outdated {
                etag: self.index_etag(&entry).await?,
            },
        };

        let mut manifest = RemoteManifest::new();
        let mut etags = BTreeMap::new();
        let mut in_flight = FuturesUnordered::new();
        let mut pending = objects.into_iter();

        loop {
            while in_flight.len() < self.concurrency
                && let Some(object) = pending.next()
            {
                in_flight.push(async move {
                    let (meta, _) = self.retry.run(self.cancel, || self.store.head(&object.key)).await;
                    (object, meta)
                });
            }
            let Some((object, meta)) = in_flight.next().await else {
                break;
            };
            match meta {
                Ok(meta) => {
                    let fingerprint = meta
                        .metadata
                        .get(FINGERPRINT_METADATA_KEY)
                        .and_then(|value| Fingerprint::parse_remote(value));
                    if let Some(etag) = meta.etag.or(object.etag) {
                        etags.insert(object.key.clone(), etag);
                    }
                    manifest.insert(
                        object.key,
                        RemoteEntry {
                            fingerprint,
                            size: meta.size,
                        },
                    );
                }
                // Deleted since the listing.
                Err(StorageError::NotFound(_)) => {}
                Err(e) => return Err(SyncError::RemoteState(e)),
            }
        }
        Ok(RemoteState {
            manifest,
            index,
            etags,
        })
    }
}

//! Local and remote manifests, and the published index document.

use crate::artifact::{Artifact, ArtifactContent, validate_object_path};
use crate::hash::{FINGERPRINT_SCHEME, Fingerprint};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Object key of the index written at the publish prefix root.
pub const INDEX_KEY: &str = ".bucketgames-index.json";

/// Current index document format.
pub const INDEX_FORMAT: u32 = 1;

/// A fingerprinted artifact.
#[derive(Clone, Debug)]
pub struct ManifestEntry {
    pub fingerprint: Fingerprint,
    pub size: u64,
    pub content_type: &'static str,
    pub content: ArtifactContent,
}

/// Every artifact of one build, keyed by object path.
#[derive(Clone, Debug, Default)]
pub struct LocalManifest {
    entries: BTreeMap<String, ManifestEntry>,
}

impl LocalManifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a fingerprinted artifact.
    ///
    /// Rejects invalid paths, the reserved index key, and paths already
    /// present.
    pub fn insert(
        &mut self,
        artifact: Artifact,
        fingerprint: Fingerprint,
        size: u64,
    ) -> crate::Result<()> {
        validate_object_path(&artifact.path)?;
        if artifact.path == INDEX_KEY {
            return Err(crate::Error::ReservedPath(artifact.path));
        }
        if self.entries.contains_key(&artifact.path) {
            return Err(crate::Error::DuplicatePath(artifact.path));
        }
        self.entries.insert(
            artifact.path,
            ManifestEntry {
                fingerprint,
                size,
                content_type: artifact.content_type,
                content: artifact.content,
            },
        );
        Ok(())
    }

    pub fn get(&self, path: &str) -> Option<&ManifestEntry> {
        self.entries.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in path order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &ManifestEntry)> {
        self.entries.iter()
    }

    pub fn total_size(&self) -> u64 {
        self.entries.values().map(|e| e.size).sum()
    }

    /// Index document describing this manifest. `etags` holds the entity tag
    /// each object had when it was written or last listed.
    pub fn to_index(&self, etags: &BTreeMap<String, String>) -> IndexDocument {
        IndexDocument {
            format: INDEX_FORMAT,
            fingerprint_scheme: FINGERPRINT_SCHEME.to_string(),
            objects: self
                .entries
                .iter()
                .map(|(path, entry)| {
                    (
                        path.clone(),
                        IndexEntry {
                            fingerprint: entry.fingerprint.to_string(),
                            size: entry.size,
                            etag: etags.get(path).cloned(),
                        },
                    )
                })
                .collect(),
        }
    }
}

/// What is known about a published object.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RemoteEntry {
    /// `None` when the fingerprint could not be recovered.
    pub fingerprint: Option<Fingerprint>,
    pub size: u64,
}

/// Published objects under the prefix, keyed by relative path.
///
/// Never contains [`INDEX_KEY`].
#[derive(Clone, Debug, Default)]
pub struct RemoteManifest {
    entries: BTreeMap<String, RemoteEntry>,
}

impl RemoteManifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<String>, entry: RemoteEntry) {
        let path = path.into();
        if path != INDEX_KEY {
            self.entries.insert(path, entry);
        }
    }

    pub fn get(&self, path: &str) -> Option<&RemoteEntry> {
        self.entries.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &RemoteEntry)> {
        self.entries.iter()
    }

    /// Number of objects whose fingerprint is unknown.
    pub fn unknown_count(&self) -> usize {
        self.entries
            .values()
            .filter(|e| e.fingerprint.is_none())
            .count()
    }
}

/// JSON document stored at [`INDEX_KEY`].
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexDocument {
    pub format: u32,
    pub fingerprint_scheme: String,
    pub objects: BTreeMap<String, IndexEntry>,
}

/// One object recorded in the index.
///
/// The fingerprint is kept as a string so that entries written under another
/// scheme still parse; they are resolved to "unknown" on read.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexEntry {
    pub fingerprint: String,
    pub size: u64,
    /// Entity tag of the object this entry describes. An object listed with
    /// a different tag was rewritten after the index was committed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

impl IndexDocument {
    /// Whether this index was written by the current format and scheme.
    pub fn is_current(&self) -> bool {
        self.format == INDEX_FORMAT && self.fingerprint_scheme == FINGERPRINT_SCHEME
    }

    /// Fingerprint recorded for `path`, if the recorded size matches and the
    /// object still carries the recorded entity tag. Entries without a tag
    /// are checked by size only.
    pub fn fingerprint_for(
        &self,
        path: &str,
        size: u64,
        etag: Option<&str>,
    ) -> Option<Fingerprint> {
        if !self.is_current() {
            return None;
        }
        self.objects
            .get(path)
            .filter(|entry| entry.size == size)
            .filter(|entry| match (entry.etag.as_deref(), etag) {
                (Some(recorded), Some(listed)) => recorded == listed,
                (Some(_), None) => false,
                (None, _) => true,
            })
            .and_then(|entry| Fingerprint::parse_remote(&entry.fingerprint))
    }
}

//! On-disk fingerprint cache for file-backed artifacts.
//!
//! A cached fingerprint is reused only when the source file's length and
//! modification time match and the cache was written with the current
//! fingerprint scheme. The cache never feeds the remote comparison directly.

use crate::error::{SiteError, SiteResult};
use bucketgames_core::{FINGERPRINT_SCHEME, Fingerprint};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::{debug, warn};

pub const CACHE_DIR: &str = ".bucketgames";
pub const CACHE_FILE: &str = "fingerprints.json";

#[derive(Debug, Serialize, Deserialize)]
struct CacheDocument {
    fingerprint_scheme: String,
    entries: BTreeMap<String, CacheEntry>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
struct CacheEntry {
    size: u64,
    mtime_ns: u64,
    fingerprint: String,
}

/// Fingerprints keyed by source path relative to the bucket root.
#[derive(Debug)]
pub struct FingerprintCache {
    root: PathBuf,
    /// `None` when the cache is disabled.
    file: Option<PathBuf>,
    previous: BTreeMap<String, CacheEntry>,
    current: BTreeMap<String, CacheEntry>,
    hits: usize,
    misses: usize,
}

impl FingerprintCache {
    /// A cache that hashes every file and persists nothing.
    pub fn disabled(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            file: None,
            previous: BTreeMap::new(),
            current: BTreeMap::new(),
            hits: 0,
            misses: 0,
        }
    }

    /// Load the cache of the bucket at `root`. A missing, unreadable, or
    /// outdated cache file starts an empty cache.
    pub fn load(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let file = root.join(CACHE_DIR).join(CACHE_FILE);
        let previous = match fs::read(&file) {
            Ok(bytes) => match serde_json::from_slice::<CacheDocument>(&bytes) {
                Ok(doc) if doc.fingerprint_scheme == FINGERPRINT_SCHEME => doc.entries,
                Ok(doc) => {
                    debug!(
                        scheme = %doc.fingerprint_scheme,
                        "Discarding fingerprint cache written with another scheme"
                    );
                    BTreeMap::new()
                }
                Err(e) => {
                    warn!(path = %file.display(), error = %e, "Ignoring corrupt fingerprint cache");
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                warn!(path = %file.display(), error = %e, "Could not read fingerprint cache");
                BTreeMap::new()
            }
        };
        Self {
            root,
            file: Some(file),
            previous,
            current: BTreeMap::new(),
            hits: 0,
            misses: 0,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.file.is_some()
    }

    /// Number of cache hits and misses so far.
    pub fn stats(&self) -> (usize, usize) {
        (self.hits, self.misses)
    }

    fn key_for(&self, source: &Path) -> String {
        source
            .strip_prefix(&self.root)
            .unwrap_or(source)
            .to_string_lossy()
            .replace('\\', "/")
    }

    /// Fingerprint and length of a file, from the cache when still valid.
    pub fn fingerprint_file(&mut self, source: &Path) -> SiteResult<(Fingerprint, u64)> {
        let meta = fs::metadata(source).map_err(|e| SiteError::io(source, e))?;
        let mtime_ns = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .and_then(|d| u64::try_from(d.as_nanos()).ok());

        let key = self.key_for(source);
        if self.file.is_some()
            && let Some(mtime_ns) = mtime_ns
            && let Some(entry) = self.previous.get(&key)
            && entry.size == meta.len()
            && entry.mtime_ns == mtime_ns
            && let Ok(fingerprint) = Fingerprint::parse(&entry.fingerprint)
        {
            self.hits += 1;
            self.current.insert(key, entry.clone());
            return Ok((fingerprint, meta.len()));
        }

        self.misses += 1;
        let file = File::open(source).map_err(|e| SiteError::io(source, e))?;
        let (fingerprint, size) =
            Fingerprint::of_reader(file).map_err(|e| SiteError::io(source, e))?;
        if let Some(mtime_ns) = mtime_ns
            && size == meta.len()
        {
            self.current.insert(
                key,
                CacheEntry {
                    size,
                    mtime_ns,
                    fingerprint: fingerprint.to_string(),
                },
            );
        }
        Ok((fingerprint, size))
    }

    /// Persist the entries used in this run. No-op when disabled.
    pub fn save(&self) -> SiteResult<()> {
        let Some(file) = &self.file else {
            return Ok(());
        };
        let dir = file.parent().unwrap_or(&self.root);
        fs::create_dir_all(dir).map_err(|e| SiteError::io(dir, e))?;

        let doc = CacheDocument {
            fingerprint_scheme: FINGERPRINT_SCHEME.to_string(),
            entries: self.current.clone(),
        };
        let bytes = serde_json::to_vec(&doc)
            .map_err(|e| SiteError::config(file, format!("could not encode cache: {e}")))?;

        let temp = dir.join(format!(".{CACHE_FILE}.{}.tmp", uuid::Uuid::new_v4()));
        fs::write(&temp, &bytes).map_err(|e| SiteError::io(&temp, e))?;
        if let Err(e) = fs::rename(&temp, file) {
            let _ = fs::remove_file(&temp);
            return Err(SiteError::io(file, e));
        }
        debug!(entries = doc.entries.len(), "Saved fingerprint cache");
        Ok(())
    }
}

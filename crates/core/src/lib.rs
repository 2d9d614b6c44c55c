//! Core domain types and shared logic for bucketgames.
//!
//! This crate defines the data model used across all other crates:
//! - Game, release, and screenshot definitions read from a bucket tree
//! - Output artifacts and their content types
//! - Versioned content fingerprints
//! - Local and remote manifests compared by the synchronizer
//! - Publishing configuration

pub mod artifact;
pub mod config;
pub mod error;
pub mod hash;
pub mod manifest;
pub mod model;

pub use artifact::{Artifact, ArtifactContent, content_type_for, validate_object_path};
pub use config::{PublishConfig, RemoteStateStrategy, StorageConfig, SyncConfig};
pub use error::{Error, Result};
pub use hash::{ContentHash, FINGERPRINT_SCHEME, Fingerprint, FingerprintHasher};
pub use manifest::{
    INDEX_FORMAT, INDEX_KEY, IndexDocument, IndexEntry, LocalManifest, ManifestEntry, RemoteEntry,
    RemoteManifest,
};
pub use model::{
    Catalog, GameDefinition, Release, ReleaseFile, Screenshot, format_date, parse_date,
};

/// Name of the build output directory inside a bucket.
pub const WEBSITE_DIR: &str = "_website";

/// Object metadata field carrying an object's fingerprint.
pub const FINGERPRINT_METADATA_KEY: &str = "bucketgames-fingerprint";

//! Three-way diff between a local build and the published state.

use bucketgames_core::{LocalManifest, RemoteManifest};
use serde::Serialize;

/// What a run has to do. Every path of the local and remote manifests is in
/// exactly one of the three lists.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DiffPlan {
    /// Ascending by size, ties broken by path.
    pub to_upload: Vec<String>,
    /// Ascending by path.
    pub to_delete: Vec<String>,
    /// Ascending by path.
    pub unchanged: Vec<String>,
}

impl DiffPlan {
    /// Whether the run changes nothing remotely.
    pub fn is_noop(&self) -> bool {
        self.to_upload.is_empty() && self.to_delete.is_empty()
    }
}

/// Compare the local manifest with the remote one.
///
/// A path is unchanged only when its remote fingerprint is known, equal to
/// the local fingerprint, and the sizes match. Unknown remote fingerprints
/// are always re-uploaded.
pub fn diff(local: &LocalManifest, remote: &RemoteManifest) -> DiffPlan {
    let mut uploads = Vec::new();
    let mut unchanged = Vec::new();

    for (path, entry) in local.iter() {
        let same = remote.get(path).is_some_and(|r| {
            r.size == entry.size && r.fingerprint.as_ref() == Some(&entry.fingerprint)
        });
        if same {
            unchanged.push(path.clone());
        } else {
            uploads.push((entry.size, path.clone()));
        }
    }
    uploads.sort();

    let to_delete = remote
        .iter()
        .filter(|(path, _)| !local.contains(path))
        .map(|(path, _)| path.clone())
        .collect();

    DiffPlan {
        to_upload: uploads.into_iter().map(|(_, path)| path).collect(),
        to_delete,
        unchanged,
    }
}

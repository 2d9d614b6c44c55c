use bucketgames_core::{Artifact, Fingerprint, LocalManifest, RemoteStateStrategy, SyncConfig};

/// A manifest of rendered artifacts.
pub fn manifest(files: &[(&str, &str)]) -> LocalManifest {
    let mut manifest = LocalManifest::new();
    for (path, body) in files {
        manifest
            .insert(
                Artifact::rendered(path.to_string(), body.to_string()),
                Fingerprint::of_bytes(body.as_bytes()),
                body.len() as u64,
            )
            .unwrap();
    }
    manifest
}

/// Fast retries so failure tests stay quick.
pub fn sync_config(concurrency: usize, remote_state: RemoteStateStrategy) -> SyncConfig {
    SyncConfig {
        concurrency,
        max_attempts: 3,
        base_delay_ms: 1,
        max_delay_ms: 4,
        remote_state,
    }
}

mod common;

use bucketgames_core::{
    Artifact, FINGERPRINT_METADATA_KEY, Fingerprint, INDEX_KEY, IndexDocument, LocalManifest,
    RemoteStateStrategy,
};
use bucketgames_storage::{FilesystemBackend, ObjectStore};
use bucketgames_sync::{SyncError, SyncOp, SyncOutcome, Synchronizer};
use common::{Call, FaultKind, MemoryStore, Op, manifest, sync_config};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

fn synchronizer(store: &Arc<MemoryStore>, concurrency: usize) -> Synchronizer {
    Synchronizer::new(
        store.clone(),
        sync_config(concurrency, RemoteStateStrategy::Index),
    )
}

fn site_v1() -> LocalManifest {
    manifest(&[
        ("index.html", "<h1>games</h1>"),
        ("style.css", "body{}"),
        ("space/index.html", "<h1>space</h1>"),
        ("space/1.0/space.zip", "zip-bytes-1.0"),
    ])
}

fn position(calls: &[Call], op: Op, key: &str) -> usize {
    calls
        .iter()
        .position(|c| c.op == op && c.key == key)
        .unwrap_or_else(|| panic!("no {op:?} {key}"))
}

fn stored_index(store: &MemoryStore) -> IndexDocument {
    serde_json::from_slice(&store.object(INDEX_KEY).unwrap().data).unwrap()
}

#[tokio::test]
async fn test_first_publish_uploads_everything() {
    let store = Arc::new(MemoryStore::new());
    let local = site_v1();

    let report = synchronizer(&store, 4).sync(&local, false).await.unwrap();
    assert_eq!(report.outcome(), SyncOutcome::Converged);
    assert_eq!(report.uploaded.len(), 4);
    assert!(report.deleted.is_empty());
    assert!(report.index_committed);

    let page = store.object("space/index.html").unwrap();
    assert_eq!(page.data, "<h1>space</h1>");
    assert_eq!(page.content_type.as_deref(), Some("text/html; charset=utf-8"));
    assert_eq!(
        page.metadata.get(FINGERPRINT_METADATA_KEY),
        Some(&Fingerprint::of_bytes(b"<h1>space</h1>").to_string())
    );

    let index = stored_index(&store);
    assert!(index.is_current());
    assert_eq!(index.objects.len(), 4);

    // Uploads are ordered by size, the index is written last.
    let puts = store.calls_for(Op::Put);
    assert_eq!(puts.first().map(String::as_str), Some("style.css"));
    assert_eq!(puts.last().map(String::as_str), Some(INDEX_KEY));
}

#[tokio::test]
async fn test_noop_rebuild_makes_no_writes() {
    let store = Arc::new(MemoryStore::new());
    let local = site_v1();
    synchronizer(&store, 4).sync(&local, false).await.unwrap();
    store.clear_calls();

    let report = synchronizer(&store, 4).sync(&site_v1(), false).await.unwrap();
    assert_eq!(report.outcome(), SyncOutcome::Converged);
    assert!(report.uploaded.is_empty());
    assert!(report.deleted.is_empty());
    assert_eq!(report.unchanged, 4);
    assert!(!report.index_committed);
    assert_eq!(
        store.calls(),
        [
            Call { op: Op::List, key: String::new() },
            Call { op: Op::Get, key: INDEX_KEY.to_string() },
        ]
    );
}

#[tokio::test]
async fn test_stale_files_are_deleted_after_uploads() {
    let store = Arc::new(MemoryStore::new());
    synchronizer(&store, 2).sync(&site_v1(), false).await.unwrap();
    store.clear_calls();

    let v2 = manifest(&[
        ("index.html", "<h1>games v2</h1>"),
        ("style.css", "body{}"),
        ("space/index.html", "<h1>space</h1>"),
        ("space/1.1/space.zip", "zip-bytes-1.1"),
    ]);
    let report = synchronizer(&store, 2).sync(&v2, false).await.unwrap();
    assert_eq!(report.outcome(), SyncOutcome::Converged);
    assert_eq!(report.uploaded, ["index.html", "space/1.1/space.zip"]);
    assert_eq!(report.deleted, ["space/1.0/space.zip"]);
    assert!(store.object("space/1.0/space.zip").is_none());

    let calls = store.calls();
    let delete = position(&calls, Op::Delete, "space/1.0/space.zip");
    assert!(position(&calls, Op::Put, "index.html") < delete);
    assert!(position(&calls, Op::Put, "space/1.1/space.zip") < delete);
    assert!(delete < position(&calls, Op::Put, INDEX_KEY));

    let index = stored_index(&store);
    assert!(index.objects.contains_key("space/1.1/space.zip"));
    assert!(!index.objects.contains_key("space/1.0/space.zip"));
}

#[tokio::test]
async fn test_one_transient_failure_is_retried() {
    let store = Arc::new(MemoryStore::new());
    store.fail(Op::Put, "style.css", FaultKind::Transient, 1);

    let report = synchronizer(&store, 4).sync(&site_v1(), false).await.unwrap();
    assert_eq!(report.outcome(), SyncOutcome::Converged);
    assert!(report.uploaded.contains(&"style.css".to_string()));
    assert_eq!(
        store.calls_for(Op::Put).iter().filter(|k| *k == "style.css").count(),
        2
    );
    assert!(store.object("style.css").is_some());
}

#[tokio::test]
async fn test_partial_failure_skips_deletes_and_index() {
    let store = Arc::new(MemoryStore::new());
    store.insert("old.html", "stale", BTreeMap::new());
    store.fail(Op::Put, "space/1.0/space.zip", FaultKind::Transient, 100);

    let report = synchronizer(&store, 2).sync(&site_v1(), false).await.unwrap();
    assert_eq!(report.outcome(), SyncOutcome::Partial);
    assert_eq!(report.uploaded.len(), 3);
    assert_eq!(report.failures.len(), 1);
    let failure = &report.failures[0];
    assert_eq!(failure.op, SyncOp::Upload);
    assert_eq!(failure.path, "space/1.0/space.zip");
    assert_eq!(failure.attempts, 3);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].op, SyncOp::Delete);
    assert!(!report.index_committed);

    assert!(store.object("old.html").is_some());
    assert!(store.object(INDEX_KEY).is_none());
    assert!(store.calls_for(Op::Delete).is_empty());

    // The next run converges.
    store.clear_faults();
    let report = synchronizer(&store, 2).sync(&site_v1(), false).await.unwrap();
    assert_eq!(report.outcome(), SyncOutcome::Converged);
    assert_eq!(report.deleted, ["old.html"]);
    assert!(report.index_committed);
}

#[tokio::test]
async fn test_fatal_error_stops_scheduling() {
    let store = Arc::new(MemoryStore::new());
    let files: Vec<(String, String)> = (0..10)
        .map(|i| (format!("page{i:02}.html"), "x".repeat(i + 1)))
        .collect();
    let refs: Vec<_> = files.iter().map(|(p, b)| (p.as_str(), b.as_str())).collect();
    store.fail(Op::Put, "page00.html", FaultKind::Unauthorized, 1);

    let report = synchronizer(&store, 1)
        .sync(&manifest(&refs), false)
        .await
        .unwrap();
    assert_eq!(report.outcome(), SyncOutcome::Aborted);
    assert!(report.fatal.as_deref().unwrap().contains("access denied"));
    assert_eq!(store.calls_for(Op::Put), ["page00.html"]);
    assert_eq!(report.skipped.len(), 9);
    assert!(!report.index_committed);
}

#[tokio::test]
async fn test_malformed_key_aborts_the_run() {
    let store = Arc::new(MemoryStore::new());
    store.fail(Op::Put, "style.css", FaultKind::InvalidKey, 1);

    let report = synchronizer(&store, 1).sync(&site_v1(), false).await.unwrap();
    assert_eq!(report.outcome(), SyncOutcome::Aborted);
    assert!(report.fatal.is_some());
    assert_eq!(store.calls_for(Op::Put), ["style.css"]);
    assert_eq!(report.failures[0].attempts, 1);
    assert_eq!(report.skipped.len(), 3);
    assert!(store.object(INDEX_KEY).is_none());
}

#[tokio::test]
async fn test_objects_rewritten_by_an_uncommitted_run_are_reuploaded() {
    let store = Arc::new(MemoryStore::new());
    let v1 = manifest(&[("a.html", "AAAA"), ("z.zip", "zip-1")]);
    synchronizer(&store, 2).sync(&v1, false).await.unwrap();
    let committed = stored_index(&store);
    assert_eq!(
        committed.objects["a.html"].etag,
        Some(store.object("a.html").unwrap().etag)
    );

    // v2 replaces a.html but never commits its index.
    store.fail(Op::Put, "z.zip", FaultKind::Transient, 100);
    let v2 = manifest(&[("a.html", "BBBB"), ("z.zip", "zip-2")]);
    let report = synchronizer(&store, 2).sync(&v2, false).await.unwrap();
    assert_eq!(report.outcome(), SyncOutcome::Partial);
    assert_eq!(store.object("a.html").unwrap().data, "BBBB");
    assert_eq!(stored_index(&store), committed);

    // Same size as the committed entry, but the object was rewritten.
    store.clear_faults();
    let report = synchronizer(&store, 2).sync(&v1, false).await.unwrap();
    assert_eq!(report.outcome(), SyncOutcome::Converged);
    assert_eq!(report.uploaded, ["a.html"]);
    assert_eq!(report.unchanged, 1);
    assert_eq!(store.object("a.html").unwrap().data, "AAAA");

    let report = synchronizer(&store, 2).sync(&v1, false).await.unwrap();
    assert!(report.uploaded.is_empty());
    assert!(!report.index_committed);
}

#[tokio::test]
async fn test_concurrent_publish_is_detected_at_index_commit() {
    let store = Arc::new(MemoryStore::new());
    synchronizer(&store, 2).sync(&site_v1(), false).await.unwrap();

    // Another run rewrites the index while this one uploads.
    store.on_put(|store, key| {
        if key == "index.html" {
            store.insert(INDEX_KEY, "{\"format\":1}", BTreeMap::new());
        }
    });
    let v2 = manifest(&[("index.html", "<h1>games v2</h1>")]);
    let report = synchronizer(&store, 2).sync(&v2, false).await.unwrap();

    assert_eq!(report.outcome(), SyncOutcome::Aborted);
    assert!(report.fatal.as_deref().unwrap().contains("concurrent publish"));
    assert!(!report.index_committed);
    assert_eq!(store.object(INDEX_KEY).unwrap().data, "{\"format\":1}");
}

#[tokio::test]
async fn test_concurrent_first_publish_is_detected() {
    let store = Arc::new(MemoryStore::new());
    store.on_put(|store, key| {
        if key == "style.css" {
            store.insert(INDEX_KEY, "{}", BTreeMap::new());
        }
    });
    let report = synchronizer(&store, 1).sync(&site_v1(), false).await.unwrap();
    assert_eq!(report.outcome(), SyncOutcome::Aborted);
    assert!(!report.index_committed);
}

#[tokio::test]
async fn test_foreign_index_scheme_forces_reupload() {
    let store = Arc::new(MemoryStore::new());
    synchronizer(&store, 2).sync(&site_v1(), false).await.unwrap();

    let mut index = stored_index(&store);
    index.fingerprint_scheme = "v0-md5".to_string();
    store.insert(INDEX_KEY, serde_json::to_vec(&index).unwrap(), BTreeMap::new());

    let report = synchronizer(&store, 2).sync(&site_v1(), false).await.unwrap();
    assert_eq!(report.uploaded.len(), 4);
    assert_eq!(report.unchanged, 0);
    assert!(report.index_committed);
    assert!(stored_index(&store).is_current());
}

#[tokio::test]
async fn test_metadata_strategy() {
    let store = Arc::new(MemoryStore::new());
    let current = Fingerprint::of_bytes(b"body{}").to_string();
    store.insert(
        "style.css",
        "body{}",
        BTreeMap::from([(FINGERPRINT_METADATA_KEY.to_string(), current)]),
    );
    store.insert(
        "index.html",
        "<h1>games</h1>",
        BTreeMap::from([(FINGERPRINT_METADATA_KEY.to_string(), "v0-md5:abcd".to_string())]),
    );

    let sync = Synchronizer::new(
        store.clone(),
        sync_config(2, RemoteStateStrategy::Metadata),
    );
    let local = manifest(&[("index.html", "<h1>games</h1>"), ("style.css", "body{}")]);
    let report = sync.sync(&local, false).await.unwrap();

    assert_eq!(report.uploaded, ["index.html"]);
    assert_eq!(report.unchanged, 1);
    assert_eq!(store.calls_for(Op::Head).len(), 2);
    assert!(store.calls_for(Op::Get).is_empty());
}

#[tokio::test]
async fn test_metadata_strategy_noop_rerun_writes_nothing() {
    let store = Arc::new(MemoryStore::new());
    let sync = || {
        Synchronizer::new(
            store.clone(),
            sync_config(2, RemoteStateStrategy::Metadata),
        )
    };
    let report = sync().sync(&site_v1(), false).await.unwrap();
    assert!(report.index_committed);
    store.clear_calls();

    let report = sync().sync(&site_v1(), false).await.unwrap();
    assert_eq!(report.outcome(), SyncOutcome::Converged);
    assert!(report.uploaded.is_empty());
    assert_eq!(report.unchanged, 4);
    assert!(!report.index_committed);
    assert!(store.calls_for(Op::Put).is_empty());
    assert!(store.calls_for(Op::Delete).is_empty());
}

#[tokio::test]
async fn test_metadata_strategy_needs_metadata_support() {
    let store = Arc::new(MemoryStore::with_capabilities(
        bucketgames_storage::StoreCapabilities {
            custom_metadata: false,
            conditional_put: true,
        },
    ));
    let sync = Synchronizer::new(
        store.clone(),
        sync_config(2, RemoteStateStrategy::Metadata),
    );
    let err = sync.sync(&site_v1(), false).await.unwrap_err();
    assert!(matches!(err, SyncError::UnsupportedStrategy { .. }));
    assert!(store.calls().is_empty());
}

#[tokio::test]
async fn test_dry_run_writes_nothing() {
    let store = Arc::new(MemoryStore::new());
    store.insert("old.html", "stale", BTreeMap::new());

    let report = synchronizer(&store, 4).sync(&site_v1(), true).await.unwrap();
    assert!(report.dry_run);
    assert_eq!(report.planned_uploads.len(), 4);
    assert_eq!(report.planned_deletes, ["old.html"]);
    assert!(report.uploaded.is_empty());
    assert!(store.calls_for(Op::Put).is_empty());
    assert!(store.calls_for(Op::Delete).is_empty());

    let mut out = Vec::new();
    report.write_lines(&mut out).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("would delete old.html"));
}

#[tokio::test]
async fn test_cancellation_stops_new_work() {
    let store = Arc::new(MemoryStore::new());
    let sync = synchronizer(&store, 1);
    let token = sync.cancel_token();
    store.on_put(move |_, _| token.cancel());

    let report = sync.sync(&site_v1(), false).await.unwrap();
    assert!(report.cancelled);
    assert_eq!(report.outcome(), SyncOutcome::Aborted);
    assert_eq!(report.uploaded.len(), 1);
    assert_eq!(report.skipped.len(), 3);
    assert!(store.object(INDEX_KEY).is_none());

    let err = sync.sync(&site_v1(), false).await.unwrap_err();
    assert!(matches!(err, SyncError::Cancelled));
}

#[tokio::test]
async fn test_worker_pool_is_bounded() {
    let store = Arc::new(MemoryStore::new().with_latency(Duration::from_millis(5)));
    let files: Vec<(String, String)> = (0..24)
        .map(|i| (format!("f{i:02}.txt"), format!("{i}")))
        .collect();
    let refs: Vec<_> = files.iter().map(|(p, b)| (p.as_str(), b.as_str())).collect();

    let report = synchronizer(&store, 3)
        .sync(&manifest(&refs), false)
        .await
        .unwrap();
    assert_eq!(report.uploaded.len(), 24);
    assert!(store.peak_concurrent_puts() <= 3);
    assert!(store.peak_concurrent_puts() >= 2);
}

#[tokio::test]
async fn test_filesystem_store_round_trip() {
    let source_dir = tempfile::TempDir::new().unwrap();
    let target_dir = tempfile::TempDir::new().unwrap();
    let zip = source_dir.path().join("game.zip");
    std::fs::write(&zip, vec![9u8; 70_000]).unwrap();

    let build = |page: &str| {
        let mut local = manifest(&[("index.html", page)]);
        local
            .insert(
                Artifact::file("game/1.0/game.zip", &zip),
                Fingerprint::of_bytes(&vec![9u8; 70_000]),
                70_000,
            )
            .unwrap();
        local
    };

    let store: Arc<dyn ObjectStore> = Arc::new(FilesystemBackend::new(target_dir.path()).await.unwrap());
    let sync = Synchronizer::new(store.clone(), sync_config(4, RemoteStateStrategy::Index));

    let first = sync.sync(&build("<h1>v1</h1>"), false).await.unwrap();
    assert_eq!(first.outcome(), SyncOutcome::Converged);
    assert_eq!(
        std::fs::read(target_dir.path().join("game/1.0/game.zip")).unwrap().len(),
        70_000
    );

    let again = sync.sync(&build("<h1>v1</h1>"), false).await.unwrap();
    assert!(again.uploaded.is_empty());
    assert_eq!(again.unchanged, 2);

    let changed = sync.sync(&build("<h1>v2</h1>"), false).await.unwrap();
    assert_eq!(changed.uploaded, ["index.html"]);
    assert!(changed.index_committed);
    assert_eq!(
        std::fs::read_to_string(target_dir.path().join("index.html")).unwrap(),
        "<h1>v2</h1>"
    );
}

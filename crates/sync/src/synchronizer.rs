//! Reconciles a local manifest with the store.

use crate::error::{SyncError, SyncResult};
use crate::plan::{DiffPlan, diff};
use crate::pool::run_pool;
use crate::remote::{IndexState, RemoteState, RemoteStateReader};
use crate::report::{SkippedOp, SyncFailure, SyncOp, SyncReport};
use crate::retry::RetryPolicy;
use bucketgames_core::{
    ArtifactContent, FINGERPRINT_METADATA_KEY, INDEX_KEY, LocalManifest, ManifestEntry,
    RemoteStateStrategy, SyncConfig,
};
use bucketgames_storage::{ObjectStore, PutBody, PutCondition, PutOptions, StorageError};
use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

struct Job {
    path: String,
    entry: Option<ManifestEntry>,
}

struct JobResult {
    op: SyncOp,
    path: String,
    attempts: u32,
    /// Entity tag of the written object, for uploads.
    result: Result<Option<String>, StorageError>,
}

/// Publishes a [`LocalManifest`] to an object store.
pub struct Synchronizer {
    store: Arc<dyn ObjectStore>,
    config: SyncConfig,
    cancel: CancellationToken,
}

impl Synchronizer {
    pub fn new(store: Arc<dyn ObjectStore>, config: SyncConfig) -> Self {
        Self {
            store,
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Cancelling this token stops scheduling new work; in-flight requests
    /// finish and the run is reported as aborted.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Read the remote state and compute the plan without writing anything.
    pub async fn plan(&self, local: &LocalManifest) -> SyncResult<(RemoteState, DiffPlan)> {
        self.config.validate().map_err(SyncError::Config)?;
        let retry = RetryPolicy::from_config(&self.config);
        let reader = RemoteStateReader::new(&self.store, retry, self.config.concurrency, &self.cancel);
        let state = reader.read(self.config.remote_state).await?;
        if self.cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        let plan = diff(local, &state.manifest);
        info!(
            upload = plan.to_upload.len(),
            delete = plan.to_delete.len(),
            unchanged = plan.unchanged.len(),
            "Computed sync plan"
        );
        Ok((state, plan))
    }

    /// Make the store match `local`.
    ///
    /// Uploads run first, smallest first. Deletes run only once every upload
    /// succeeded. The index is committed last with a single conditional
    /// write, and only when the run converged.
    pub async fn sync(&self, local: &LocalManifest, dry_run: bool) -> SyncResult<SyncReport> {
        let (state, plan) = self.plan(local).await?;
        let mut report = SyncReport {
            dry_run,
            unchanged: plan.unchanged.len(),
            ..Default::default()
        };
        if dry_run {
            report.planned_uploads = plan.to_upload;
            report.planned_deletes = plan.to_delete;
            return Ok(report);
        }
        report.planned_uploads = plan.to_upload.clone();
        report.planned_deletes = plan.to_delete.clone();

        // Fatal errors cancel the run token only; user cancellation reaches it
        // through the parent.
        let run_token = self.cancel.child_token();
        let retry = RetryPolicy::from_config(&self.config);
        let mut etags: BTreeMap<String, String> = plan
            .unchanged
            .iter()
            .filter_map(|path| Some((path.clone(), state.etags.get(path)?.clone())))
            .collect();

        let uploads = plan
            .to_upload
            .iter()
            .map(|path| Job {
                path: path.clone(),
                entry: local.get(path).cloned(),
            })
            .collect();
        self.run_phase(
            SyncOp::Upload,
            uploads,
            retry,
            &run_token,
            &mut report,
            &mut etags,
        )
        .await;

        let uploads_done = report.failures.is_empty() && report.skipped.is_empty() && report.fatal.is_none();
        if uploads_done && !run_token.is_cancelled() {
            let deletes = plan
                .to_delete
                .iter()
                .map(|path| Job {
                    path: path.clone(),
                    entry: None,
                })
                .collect();
            self.run_phase(
                SyncOp::Delete,
                deletes,
                retry,
                &run_token,
                &mut report,
                &mut etags,
            )
            .await;
        } else {
            if !plan.to_delete.is_empty() {
                warn!(
                    deletes = plan.to_delete.len(),
                    "Skipping deletes because not every upload succeeded"
                );
            }
            report.skipped.extend(plan.to_delete.iter().map(|path| SkippedOp {
                op: SyncOp::Delete,
                path: path.clone(),
            }));
        }

        report.cancelled = self.cancel.is_cancelled();
        // The metadata strategy never reads the index document, so an
        // existing one is only rewritten when something changed.
        let index_stale = match self.config.remote_state {
            RemoteStateStrategy::Index => !matches!(state.index, IndexState::Current { .. }),
            RemoteStateStrategy::Metadata => !state.index.exists(),
        };
        if report.is_success() && (!plan.is_noop() || index_stale) {
            self.commit_index(local, &etags, &state.index, retry, &run_token, &mut report)
                .await;
        }

        report.normalize();
        info!(
            uploaded = report.uploaded.len(),
            deleted = report.deleted.len(),
            failed = report.failures.len(),
            skipped = report.skipped.len(),
            outcome = ?report.outcome(),
            "Sync finished"
        );
        Ok(report)
    }

    async fn run_phase(
        &self,
        op: SyncOp,
        jobs: Vec<Job>,
        retry: RetryPolicy,
        run_token: &CancellationToken,
        report: &mut SyncReport,
        etags: &mut BTreeMap<String, String>,
    ) {
        if jobs.is_empty() {
            return;
        }
        let store = self.store.clone();
        let token = run_token.clone();
        let output = run_pool(jobs, self.config.concurrency, run_token, move |job: Job| {
            let store = store.clone();
            let token = token.clone();
            async move { execute(store, op, job, retry, token).await }
        })
        .await;

        for done in output.results {
            match done.result {
                Ok(etag) => match done.op {
                    SyncOp::Delete => report.deleted.push(done.path),
                    _ => {
                        // Without a tag the index entry is checked by size only.
                        if let Some(etag) = etag {
                            etags.insert(done.path.clone(), etag);
                        }
                        report.uploaded.push(done.path);
                    }
                },
                Err(e) if e.is_fatal() => {
                    error!(op = %done.op, path = %done.path, error = %e, "Fatal store error");
                    if report.fatal.is_none() {
                        report.fatal = Some(e.to_string());
                    }
                    report.failures.push(SyncFailure {
                        op: done.op,
                        path: done.path,
                        attempts: done.attempts,
                        cause: e.to_string(),
                    });
                }
                Err(e) => {
                    warn!(op = %done.op, path = %done.path, attempts = done.attempts, error = %e, "Operation failed");
                    report.failures.push(SyncFailure {
                        op: done.op,
                        path: done.path,
                        attempts: done.attempts,
                        cause: e.to_string(),
                    });
                }
            }
        }
        report
            .skipped
            .extend(output.skipped.into_iter().map(|job| SkippedOp { op, path: job.path }));
        if output.panicked > 0 && report.fatal.is_none() {
            report.fatal = Some(format!("{} sync worker(s) panicked", output.panicked));
        }
    }

    async fn commit_index(
        &self,
        local: &LocalManifest,
        etags: &BTreeMap<String, String>,
        index: &IndexState,
        retry: RetryPolicy,
        run_token: &CancellationToken,
        report: &mut SyncReport,
    ) {
        let body = match serde_json::to_vec_pretty(&local.to_index(etags)) {
            Ok(body) => Bytes::from(body),
            Err(e) => {
                report.failures.push(SyncFailure {
                    op: SyncOp::IndexCommit,
                    path: INDEX_KEY.to_string(),
                    attempts: 0,
                    cause: format!("could not encode index: {e}"),
                });
                return;
            }
        };

        let condition = if !self.store.capabilities().conditional_put {
            None
        } else {
            match index {
                IndexState::Missing => Some(PutCondition::IfAbsent),
                other => match other.etag() {
                    Some(etag) => Some(PutCondition::IfMatch(etag.to_string())),
                    None => {
                        warn!("Existing index has no entity tag; committing without a precondition");
                        None
                    }
                },
            }
        };
        let options = PutOptions {
            content_type: Some("application/json".to_string()),
            metadata: BTreeMap::new(),
            condition,
        };

        let (result, attempts) = retry
            .run(run_token, || {
                self.store
                    .put(INDEX_KEY, PutBody::Bytes(body.clone()), &options)
            })
            .await;
        match result {
            Ok(_) => {
                debug!(objects = local.len(), "Committed index");
                report.index_committed = true;
            }
            Err(StorageError::PreconditionFailed(_)) => {
                error!("Index changed since this run read it; another publish ran concurrently");
                report.fatal = Some(
                    "concurrent publish detected: the index changed since this run read it"
                        .to_string(),
                );
            }
            Err(e) => {
                if e.is_fatal() {
                    report.fatal = Some(e.to_string());
                }
                report.failures.push(SyncFailure {
                    op: SyncOp::IndexCommit,
                    path: INDEX_KEY.to_string(),
                    attempts,
                    cause: e.to_string(),
                });
            }
        }
    }
}

async fn execute(
    store: Arc<dyn ObjectStore>,
    op: SyncOp,
    job: Job,
    retry: RetryPolicy,
    token: CancellationToken,
) -> JobResult {
    let (result, attempts) = match (op, &job.entry) {
        (SyncOp::Upload, Some(entry)) => {
            let body = match &entry.content {
                ArtifactContent::Bytes(bytes) => PutBody::Bytes(bytes.clone()),
                ArtifactContent::File(path) => PutBody::File(path.clone()),
            };
            let options = PutOptions {
                content_type: Some(entry.content_type.to_string()),
                metadata: BTreeMap::from([(
                    FINGERPRINT_METADATA_KEY.to_string(),
                    entry.fingerprint.to_string(),
                )]),
                condition: None,
            };
            retry
                .run(&token, || store.put(&job.path, body.clone(), &options))
                .await
        }
        (SyncOp::Delete, _) => {
            let (result, attempts) = retry.run(&token, || store.delete(&job.path)).await;
            match result {
                Ok(()) => (Ok(None), attempts),
                Err(e) if e.is_not_found() => (Ok(None), attempts),
                Err(e) => (Err(e), attempts),
            }
        }
        _ => (
            Err(StorageError::InvalidKey(format!("no local entry for {}", job.path))),
            0,
        ),
    };

    if let Err(e) = &result
        && e.is_fatal()
    {
        token.cancel();
    }
    if result.is_ok() {
        debug!(op = %op, path = %job.path, attempts, "Done");
    }
    JobResult {
        op,
        path: job.path,
        attempts,
        result,
    }
}

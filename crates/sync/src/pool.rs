//! Fixed-size worker pool fed from a shared queue.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::error;

pub(crate) struct PoolOutput<J, R> {
    /// One result per job that ran, in completion order.
    pub results: Vec<R>,
    /// Jobs never started because the token was cancelled.
    pub skipped: Vec<J>,
    /// Workers that panicked; their current job has no result.
    pub panicked: usize,
}

enum Outcome<J, R> {
    Done(R),
    Skipped(J),
}

/// Run `jobs` in queue order on `workers` tasks. Once `cancel` fires, workers
/// finish their current job and take no new ones.
pub(crate) async fn run_pool<J, R, F, Fut>(
    jobs: Vec<J>,
    workers: usize,
    cancel: &CancellationToken,
    handler: F,
) -> PoolOutput<J, R>
where
    J: Send + 'static,
    R: Send + 'static,
    F: Fn(J) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
{
    let (job_tx, job_rx) = mpsc::unbounded_channel();
    let workers = workers.clamp(1, jobs.len().max(1));
    for job in jobs {
        // The receiver is alive until the pool returns.
        let _ = job_tx.send(job);
    }
    drop(job_tx);

    let queue = Arc::new(Mutex::new(job_rx));
    let handler = Arc::new(handler);
    let (result_tx, mut result_rx) = mpsc::unbounded_channel();
    let mut set = JoinSet::new();

    for _ in 0..workers {
        let queue = queue.clone();
        let handler = handler.clone();
        let results = result_tx.clone();
        let cancel = cancel.clone();
        set.spawn(async move {
            loop {
                let job = queue.lock().await.recv().await;
                let Some(job) = job else { break };
                if cancel.is_cancelled() {
                    let _ = results.send(Outcome::Skipped(job));
                    continue;
                }
                let result = handler(job).await;
                if results.send(Outcome::Done(result)).is_err() {
                    break;
                }
            }
        });
    }
    drop(result_tx);

    let mut panicked = 0;
    while let Some(joined) = set.join_next().await {
        if let Err(e) = joined {
            error!(error = %e, "Sync worker failed");
            panicked += 1;
        }
    }

    let mut output = PoolOutput {
        results: Vec::new(),
        skipped: Vec::new(),
        panicked,
    };
    while let Some(outcome) = result_rx.recv().await {
        match outcome {
            Outcome::Done(result) => output.results.push(result),
            Outcome::Skipped(job) => output.skipped.push(job),
        }
    }
    // Left behind by panicked workers.
    let mut queue = queue.lock().await;
    while let Ok(job) = queue.try_recv() {
        output.skipped.push(job);
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_pool_bounds_concurrency() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (a, p) = (active.clone(), peak.clone());
        let output = run_pool((0..20).collect(), 3, &CancellationToken::new(), move |i: u32| {
            let (active, peak) = (a.clone(), p.clone());
            async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                i * 2
            }
        })
        .await;
        assert_eq!(output.results.len(), 20);
        assert!(output.skipped.is_empty());
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_cancellation_skips_unstarted_jobs() {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let output = run_pool((0..10).collect(), 1, &cancel, move |i: u32| {
            let token = token.clone();
            async move {
                if i == 2 {
                    token.cancel();
                }
                i
            }
        })
        .await;
        let mut done = output.results;
        done.sort();
        assert_eq!(done, [0, 1, 2]);
        assert_eq!(output.skipped.len(), 7);
    }
}

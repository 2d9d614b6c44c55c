//! Retry with capped exponential backoff for transient store errors.

use bucketgames_core::SyncConfig;
use bucketgames_storage::{StorageError, StorageResult};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: config.base_delay(),
            max_delay: config.max_delay(),
        }
    }

    /// Delay before retry number `retry` (1-based): base, 2x base, 4x base,
    /// capped at `max_delay`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails with a non-transient error, or runs
    /// out of attempts. Cancellation interrupts the backoff sleep but never
    /// an in-flight request. Returns the result and the number of attempts.
    pub async fn run<T, F, Fut>(&self, cancel: &CancellationToken, mut op: F) -> (StorageResult<T>, u32)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StorageResult<T>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let err: StorageError = match op().await {
                Ok(value) => return (Ok(value), attempt),
                Err(e) => e,
            };
            if !err.is_transient() || attempt >= self.max_attempts {
                return (Err(err), attempt);
            }
            let delay = self.delay_for(attempt);
            debug!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "Retrying after transient error");
            tokio::select! {
                _ = cancel.cancelled() => return (Err(err), attempt),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

//! Diff-based publishing of a built site to an object store.
//!
//! A run reads the published state, diffs it against the local manifest,
//! uploads changed objects on a bounded worker pool with retries, deletes
//! stale objects only after every upload succeeded, and finally commits the
//! publish index with a conditional write.

pub mod error;
pub mod plan;
mod pool;
pub mod remote;
pub mod report;
pub mod retry;
pub mod synchronizer;

pub use error::{SyncError, SyncResult};
pub use plan::{DiffPlan, diff};
pub use remote::{IndexState, RemoteState, RemoteStateReader};
pub use report::{SkippedOp, SyncFailure, SyncOp, SyncOutcome, SyncReport};
pub use retry::RetryPolicy;
pub use synchronizer::Synchronizer;

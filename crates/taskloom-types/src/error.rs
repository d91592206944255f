use thiserror::Error;
use uuid::Uuid;

/// Errors from job store operations (used by the `JobStore` trait in taskloom-core).
#[derive(Debug, Error)]
pub enum StoreError {
    /// The caller's lock token no longer matches the job. The job was
    /// reclaimed or already finalized; the caller must stop writing.
    #[error("stale lock on job {job_id}")]
    StaleLock { job_id: Uuid },

    #[error("job store unavailable: {0}")]
    Unavailable(String),

    #[error("job not found")]
    NotFound,

    #[error("query error: {0}")]
    Query(String),
}

impl StoreError {
    pub fn is_stale_lock(&self) -> bool {
        matches!(self, StoreError::StaleLock { .. })
    }
}

//! Job store trait definition.

use chrono::{DateTime, Duration, Utc};
use taskloom_types::error::StoreError;
use taskloom_types::job::{CheckpointWrite, Finalization, Job, JobFilter, LockToken, NewJob};
use uuid::Uuid;

/// Durable record of jobs and their checkpoint ledgers.
///
/// Every method must be safe under concurrent callers, including callers in
/// other processes sharing the same backing store.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait JobStore: Send + Sync {
    /// Insert a validated job with status `queued` and return the stored record.
    fn insert_job(
        &self,
        job: NewJob,
    ) -> impl std::future::Future<Output = Result<Job, StoreError>> + Send;

    /// Atomically claim the oldest eligible job in `queue`.
    ///
    /// Eligible means `queued` with no future `wait_until`, or `running` with a
    /// lock acquired at least `stale_after` before `now`. The claimed job is
    /// returned as `running`, with a fresh lock token and `total_tried`
    /// incremented. No two callers may ever receive the same claim.
    fn claim_next(
        &self,
        queue: &str,
        now: DateTime<Utc>,
        stale_after: Duration,
    ) -> impl std::future::Future<Output = Result<Option<Job>, StoreError>> + Send {
        self.claim_next_excluding(queue, now, stale_after, &[])
    }

    /// [`claim_next`](JobStore::claim_next), skipping every job in `exclude`.
    ///
    /// A run passes the ids it already processed so a requeued job waits for
    /// the next run instead of burning its retries back to back.
    fn claim_next_excluding(
        &self,
        queue: &str,
        now: DateTime<Utc>,
        stale_after: Duration,
        exclude: &[Uuid],
    ) -> impl std::future::Future<Output = Result<Option<Job>, StoreError>> + Send;

    /// Upsert one step record (and append its log entry) on a claimed job.
    ///
    /// Completed records are immutable; writing over one is a no-op. Fails
    /// with `StoreError::StaleLock` when `lock` is not the job's current lock.
    fn update_checkpoint(
        &self,
        job_id: &Uuid,
        lock: &LockToken,
        write: &CheckpointWrite,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    /// Release the claim: transition to `completed`, `failed`, or back to
    /// `queued`. Fails with `StoreError::StaleLock` on a lock mismatch.
    fn finalize(
        &self,
        job_id: &Uuid,
        lock: &LockToken,
        finalization: &Finalization,
        now: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    /// Get a job by its UUID.
    fn get_job(
        &self,
        job_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Job>, StoreError>> + Send;

    /// List jobs ordered by `created_at` ascending, optionally filtered by
    /// queue and status.
    fn list_jobs(
        &self,
        filter: &JobFilter,
    ) -> impl std::future::Future<Output = Result<Vec<Job>, StoreError>> + Send;

    /// Delete a single job. Returns `true` if it existed.
    fn delete_job(
        &self,
        job_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<bool, StoreError>> + Send;

    /// Delete terminal jobs (`completed` and `failed`), optionally limited to
    /// one queue. Returns the number of rows removed.
    fn delete_completed(
        &self,
        queue: Option<&str>,
    ) -> impl std::future::Future<Output = Result<u64, StoreError>> + Send;
}

//! SQLite job store implementation.
//!
//! Implements `JobStore` from `taskloom-core` using sqlx with split
//! read/write pools. The checkpoint ledger and execution log are stored as
//! JSON columns. Claims are a single `UPDATE .. RETURNING` statement, so two
//! runners (in this process or another one sharing the file) can never
//! receive the same job.

use chrono::{DateTime, Duration, SecondsFormat, SubsecRound, Utc};
use sqlx::Row;
use taskloom_core::repository::job::JobStore;
use taskloom_types::error::StoreError;
use taskloom_types::job::{
    CheckpointLedger, CheckpointWrite, ErrorInfo, Finalization, Job, JobFilter, JobKind,
    JobLogEntry, JobStatus, LockToken, NewJob,
};
use uuid::Uuid;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `JobStore`.
pub struct SqliteJobStore {
    pool: DatabasePool,
}

impl SqliteJobStore {
    /// Create a new store backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Internal row type
// ---------------------------------------------------------------------------

struct JobRow {
    id: String,
    kind: String,
    slug: String,
    input: String,
    queue: String,
    status: String,
    task_status: String,
    total_tried: i64,
    has_error: bool,
    error: Option<String>,
    log: String,
    wait_until: Option<String>,
    lock_token: Option<String>,
    locked_at: Option<String>,
    created_at: String,
    updated_at: String,
    completed_at: Option<String>,
}

impl JobRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            kind: row.try_get("kind")?,
            slug: row.try_get("slug")?,
            input: row.try_get("input")?,
            queue: row.try_get("queue")?,
            status: row.try_get("status")?,
            task_status: row.try_get("task_status")?,
            total_tried: row.try_get("total_tried")?,
            has_error: row.try_get("has_error")?,
            error: row.try_get("error")?,
            log: row.try_get("log")?,
            wait_until: row.try_get("wait_until")?,
            lock_token: row.try_get("lock_token")?,
            locked_at: row.try_get("locked_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }

    fn into_job(self) -> Result<Job, StoreError> {
        let id = parse_uuid(&self.id)?;
        let kind = JobKind::from_parts(&self.kind, self.slug.clone()).ok_or_else(|| {
            StoreError::Query(format!("invalid job kind: {}:{}", self.kind, self.slug))
        })?;
        let status: JobStatus = self
            .status
            .parse()
            .map_err(|e: String| StoreError::Query(e))?;

        let input = parse_json(&self.input, "input")?;
        let task_status: CheckpointLedger = parse_json(&self.task_status, "task_status")?;
        let log: Vec<JobLogEntry> = parse_json(&self.log, "log")?;
        let error: Option<ErrorInfo> = self
            .error
            .as_deref()
            .map(|s| parse_json(s, "error"))
            .transpose()?;

        let lock = match (self.lock_token.as_deref(), self.locked_at.as_deref()) {
            (Some(token), Some(at)) => Some(LockToken {
                token: parse_uuid(token)?,
                acquired_at: parse_datetime(at)?,
            }),
            _ => None,
        };

        Ok(Job {
            id,
            kind,
            input,
            queue: self.queue,
            status,
            task_status,
            total_tried: u32::try_from(self.total_tried).unwrap_or(u32::MAX),
            has_error: self.has_error,
            error,
            log,
            wait_until: self.wait_until.as_deref().map(parse_datetime).transpose()?,
            lock,
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
            completed_at: self
                .completed_at
                .as_deref()
                .map(parse_datetime)
                .transpose()?,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_uuid(s: &str) -> Result<Uuid, StoreError> {
    s.parse::<Uuid>()
        .map_err(|e| StoreError::Query(format!("invalid UUID: {e}")))
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Query(format!("invalid datetime: {e}")))
}

/// Fixed-width UTC form: string comparison in SQL matches time order.
fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_json<T: serde::de::DeserializeOwned>(s: &str, column: &str) -> Result<T, StoreError> {
    serde_json::from_str(s).map_err(|e| StoreError::Query(format!("invalid {column} JSON: {e}")))
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|e| StoreError::Query(format!("serialize: {e}")))
}

/// Connection-level trouble is `Unavailable`; everything else is a query error.
fn store_err(e: sqlx::Error) -> StoreError {
    match &e {
        sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed
        | sqlx::Error::Io(_) => StoreError::Unavailable(e.to_string()),
        sqlx::Error::Database(db) if db.message().contains("database is locked") => {
            StoreError::Unavailable(e.to_string())
        }
        _ => StoreError::Query(e.to_string()),
    }
}

fn rows_to_jobs(rows: &[sqlx::sqlite::SqliteRow]) -> Result<Vec<Job>, StoreError> {
    let mut jobs = Vec::with_capacity(rows.len());
    for row in rows {
        let r = JobRow::from_row(row).map_err(store_err)?;
        jobs.push(r.into_job()?);
    }
    Ok(jobs)
}

impl SqliteJobStore {
    /// Distinguish a missing row from a lost claim after a guarded write
    /// touched nothing.
    async fn lock_mismatch(&self, job_id: &Uuid) -> StoreError {
        match sqlx::query("SELECT 1 FROM jobs WHERE id = ?")
            .bind(job_id.to_string())
            .fetch_optional(&self.pool.writer)
            .await
        {
            Ok(Some(_)) => StoreError::StaleLock { job_id: *job_id },
            Ok(None) => StoreError::NotFound,
            Err(e) => store_err(e),
        }
    }
}

// ---------------------------------------------------------------------------
// JobStore impl
// ---------------------------------------------------------------------------

impl JobStore for SqliteJobStore {
    async fn insert_job(&self, mut job: NewJob) -> Result<Job, StoreError> {
        // Match the stored precision so the returned record equals a reload.
        job.wait_until = job.wait_until.map(|at| at.trunc_subsecs(6));
        let job = Job::queued(Uuid::now_v7(), job, Utc::now().trunc_subsecs(6));

        sqlx::query(
            r#"INSERT INTO jobs
               (id, kind, slug, input, queue, status, task_status, total_tried, has_error,
                error, log, wait_until, lock_token, locked_at, created_at, updated_at, completed_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, 0, 0, NULL, '[]', ?, NULL, NULL, ?, ?, NULL)"#,
        )
        .bind(job.id.to_string())
        .bind(job.kind.kind_name())
        .bind(job.kind.slug())
        .bind(to_json(&job.input)?)
        .bind(&job.queue)
        .bind(job.status.as_str())
        .bind(to_json(&job.task_status)?)
        .bind(job.wait_until.as_ref().map(format_datetime))
        .bind(format_datetime(&job.created_at))
        .bind(format_datetime(&job.updated_at))
        .execute(&self.pool.writer)
        .await
        .map_err(store_err)?;

        Ok(job)
    }

    async fn claim_next_excluding(
        &self,
        queue: &str,
        now: DateTime<Utc>,
        stale_after: Duration,
        exclude: &[Uuid],
    ) -> Result<Option<Job>, StoreError> {
        let lock = LockToken::new(now);
        let excluded: Vec<String> = exclude.iter().map(Uuid::to_string).collect();
        let now_str = format_datetime(&now);
        // No cutoff (NULL) when the window reaches past the calendar: nothing is stale.
        let stale_cutoff = now
            .checked_sub_signed(stale_after)
            .map(|cutoff| format_datetime(&cutoff));

        let row = sqlx::query(
            r#"UPDATE jobs SET
                 status = 'running',
                 lock_token = ?,
                 locked_at = ?,
                 total_tried = total_tried + 1,
                 wait_until = NULL,
                 updated_at = ?
               WHERE id = (
                 SELECT id FROM jobs
                 WHERE queue = ?
                   AND ((status = 'queued' AND (wait_until IS NULL OR wait_until <= ?))
                     OR (status = 'running' AND locked_at <= ?))
                   AND id NOT IN (SELECT value FROM json_each(?))
                 ORDER BY created_at ASC, rowid ASC
                 LIMIT 1
               )
               RETURNING *"#,
        )
        .bind(lock.token.to_string())
        .bind(format_datetime(&lock.acquired_at))
        .bind(&now_str)
        .bind(queue)
        .bind(&now_str)
        .bind(&stale_cutoff)
        .bind(to_json(&excluded)?)
        .fetch_optional(&self.pool.writer)
        .await
        .map_err(store_err)?;

        match row {
            Some(row) => {
                let job = JobRow::from_row(&row).map_err(store_err)?.into_job()?;
                tracing::debug!(job_id = %job.id, queue, total_tried = job.total_tried, "job row claimed");
                Ok(Some(job))
            }
            None => Ok(None),
        }
    }

    async fn update_checkpoint(
        &self,
        job_id: &Uuid,
        lock: &LockToken,
        write: &CheckpointWrite,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.writer.begin().await.map_err(store_err)?;

        let row = sqlx::query(
            "SELECT task_status, log FROM jobs WHERE id = ? AND status = 'running' AND lock_token = ?",
        )
        .bind(job_id.to_string())
        .bind(lock.token.to_string())
        .fetch_optional(&mut *tx)
        .await
        .map_err(store_err)?;

        let Some(row) = row else {
            drop(tx);
            return Err(self.lock_mismatch(job_id).await);
        };

        let ledger_json: String = row.try_get("task_status").map_err(store_err)?;
        let log_json: String = row.try_get("log").map_err(store_err)?;
        let mut ledger: CheckpointLedger = parse_json(&ledger_json, "task_status")?;

        if !ledger.apply(&write.task_slug, &write.step_id, write.record.clone()) {
            // Completed records are immutable.
            return Ok(());
        }

        let mut log: Vec<JobLogEntry> = parse_json(&log_json, "log")?;
        if let Some(entry) = &write.log {
            log.push(entry.clone());
        }

        sqlx::query("UPDATE jobs SET task_status = ?, log = ?, updated_at = ? WHERE id = ?")
            .bind(to_json(&ledger)?)
            .bind(to_json(&log)?)
            .bind(format_datetime(&Utc::now()))
            .bind(job_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;

        tx.commit().await.map_err(store_err)?;
        Ok(())
    }

    async fn finalize(
        &self,
        job_id: &Uuid,
        lock: &LockToken,
        finalization: &Finalization,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let error = finalization.error().map(to_json).transpose()?;
        let (wait_until, completed_at) = match finalization {
            Finalization::Completed | Finalization::Failed { .. } => (None, Some(now)),
            Finalization::Requeue { wait_until, .. } => (*wait_until, None),
        };

        // A completed job keeps any error from earlier attempts as history.
        let result = sqlx::query(
            r#"UPDATE jobs SET
                 status = ?,
                 lock_token = NULL,
                 locked_at = NULL,
                 has_error = has_error OR ?,
                 error = COALESCE(?, error),
                 wait_until = ?,
                 completed_at = ?,
                 updated_at = ?
               WHERE id = ? AND status = 'running' AND lock_token = ?"#,
        )
        .bind(finalization.target_status().as_str())
        .bind(error.is_some())
        .bind(&error)
        .bind(wait_until.as_ref().map(format_datetime))
        .bind(completed_at.as_ref().map(format_datetime))
        .bind(format_datetime(&now))
        .bind(job_id.to_string())
        .bind(lock.token.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(store_err)?;

        if result.rows_affected() == 0 {
            return Err(self.lock_mismatch(job_id).await);
        }
        Ok(())
    }

    async fn get_job(&self, job_id: &Uuid) -> Result<Option<Job>, StoreError> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = ?")
            .bind(job_id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(store_err)?;

        match row {
            Some(row) => Ok(Some(JobRow::from_row(&row).map_err(store_err)?.into_job()?)),
            None => Ok(None),
        }
    }

    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>, StoreError> {
        let status = filter.status.map(|s| s.as_str());
        let rows = sqlx::query(
            r#"SELECT * FROM jobs
               WHERE (?1 IS NULL OR queue = ?1)
                 AND (?2 IS NULL OR status = ?2)
               ORDER BY created_at ASC, rowid ASC
               LIMIT ?3"#,
        )
        .bind(filter.queue.as_deref())
        .bind(status)
        .bind(i64::from(filter.limit))
        .fetch_all(&self.pool.reader)
        .await
        .map_err(store_err)?;

        rows_to_jobs(&rows)
    }

    async fn delete_job(&self, job_id: &Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = ?")
            .bind(job_id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(store_err)?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_completed(&self, queue: Option<&str>) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "DELETE FROM jobs WHERE status IN ('completed', 'failed') AND (?1 IS NULL OR queue = ?1)",
        )
        .bind(queue)
        .execute(&self.pool.writer)
        .await
        .map_err(store_err)?;

        Ok(result.rows_affected())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use serde_json::json;
    use taskloom_types::job::{JobLogState, StepRecord};

    use super::*;

    async fn test_store() -> (SqliteJobStore, String) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("jobs.db").display());
        let pool = DatabasePool::new(&url).await.unwrap();
        // Keep the directory alive for the duration of the test
        std::mem::forget(dir);
        (SqliteJobStore::new(pool), url)
    }

    fn stale_after() -> Duration {
        Duration::seconds(300)
    }

    fn step_write(slug: &str, step_id: &str, record: StepRecord) -> CheckpointWrite {
        let now = Utc::now();
        let state = if record.complete {
            JobLogState::Succeeded
        } else {
            JobLogState::Failed
        };
        CheckpointWrite {
            task_slug: slug.to_string(),
            step_id: step_id.to_string(),
            log: Some(JobLogEntry {
                task_slug: slug.to_string(),
                step_id: step_id.to_string(),
                state,
                error: record.error.clone(),
                executed_at: now,
                completed_at: now,
            }),
            record,
        }
    }

    #[tokio::test]
    async fn test_insert_and_get_roundtrip() {
        let (store, _) = test_store().await;
        let job = store
            .insert_job(NewJob::workflow("publish", json!({"title": "Hi"})).queue("posts"))
            .await
            .unwrap();

        let loaded = store.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(loaded.kind, JobKind::workflow("publish"));
        assert_eq!(loaded.input, json!({"title": "Hi"}));
        assert_eq!(loaded.queue, "posts");
        assert_eq!(loaded.status, JobStatus::Queued);
        assert_eq!(loaded.total_tried, 0);
        assert!(loaded.lock.is_none());
        assert!(loaded.task_status.is_empty());
        assert_eq!(loaded.created_at, job.created_at);

        assert!(store.get_job(&Uuid::now_v7()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_claim_is_fifo_within_queue() {
        let (store, _) = test_store().await;
        let mut ids = Vec::new();
        for n in 0..3 {
            ids.push(store.insert_job(NewJob::task("echo", json!(n))).await.unwrap().id);
        }
        store
            .insert_job(NewJob::task("echo", json!("elsewhere")).queue("other"))
            .await
            .unwrap();

        let now = Utc::now();
        let mut claimed = Vec::new();
        while let Some(job) = store.claim_next("default", now, stale_after()).await.unwrap() {
            assert_eq!(job.status, JobStatus::Running);
            assert_eq!(job.total_tried, 1);
            assert!(job.lock.is_some());
            claimed.push(job.id);
        }
        assert_eq!(claimed, ids);
    }

    #[tokio::test]
    async fn test_claim_respects_wait_until() {
        let (store, _) = test_store().await;
        let now = Utc::now();
        store
            .insert_job(NewJob::task("echo", json!(null)).wait_until(now + Duration::minutes(5)))
            .await
            .unwrap();

        assert!(store.claim_next("default", now, stale_after()).await.unwrap().is_none());
        let later = now + Duration::minutes(6);
        assert!(store.claim_next("default", later, stale_after()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_claim_skips_excluded_jobs() {
        let (store, _) = test_store().await;
        let first = store.insert_job(NewJob::task("echo", json!(1))).await.unwrap();
        let second = store.insert_job(NewJob::task("echo", json!(2))).await.unwrap();

        let now = Utc::now();
        let claimed = store
            .claim_next_excluding("default", now, stale_after(), &[first.id])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.id, second.id);

        let none = store
            .claim_next_excluding("default", now, stale_after(), &[first.id, second.id])
            .await
            .unwrap();
        assert!(none.is_none());
        assert_eq!(
            store.get_job(&first.id).await.unwrap().unwrap().status,
            JobStatus::Queued
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_claims_are_exclusive() {
        let (store, url) = test_store().await;
        for n in 0..20 {
            store.insert_job(NewJob::task("echo", json!(n))).await.unwrap();
        }

        // A second pool on the same file stands in for another process.
        let other = Arc::new(SqliteJobStore::new(DatabasePool::new(&url).await.unwrap()));
        let store = Arc::new(store);

        let mut handles = Vec::new();
        for i in 0..8 {
            let s = if i % 2 == 0 { None } else { Some(other.clone()) };
            let primary = store.clone();
            handles.push(tokio::spawn(async move {
                let mut mine = Vec::new();
                loop {
                    let claimed = match &s {
                        Some(o) => o.claim_next("default", Utc::now(), stale_after()).await,
                        None => primary.claim_next("default", Utc::now(), stale_after()).await,
                    };
                    match claimed {
                        Ok(Some(job)) => mine.push(job.id),
                        Ok(None) => break,
                        // Cross-connection contention; try again.
                        Err(StoreError::Unavailable(_)) => continue,
                        Err(e) => panic!("claim failed: {e}"),
                    }
                }
                mine
            }));
        }

        let mut seen = HashSet::new();
        let mut total = 0;
        for handle in handles {
            for id in handle.await.unwrap() {
                total += 1;
                assert!(seen.insert(id), "job {id} claimed twice");
            }
        }
        assert_eq!(total, 20);
    }

    #[tokio::test]
    async fn test_stale_lock_reclaim_rejects_old_holder() {
        let (store, _) = test_store().await;
        let job = store.insert_job(NewJob::task("echo", json!(1))).await.unwrap();

        let t0 = Utc::now();
        let first = store.claim_next("default", t0, stale_after()).await.unwrap().unwrap();
        let old_lock = first.lock.unwrap();

        // Not yet stale.
        let t1 = t0 + Duration::seconds(10);
        assert!(store.claim_next("default", t1, stale_after()).await.unwrap().is_none());

        let t2 = t0 + Duration::seconds(301);
        let second = store.claim_next("default", t2, stale_after()).await.unwrap().unwrap();
        assert_eq!(second.id, job.id);
        assert_eq!(second.total_tried, 2);
        let new_lock = second.lock.unwrap();
        assert_ne!(new_lock.token, old_lock.token);

        let write = step_write("echo", &job.id.to_string(), StepRecord::succeeded(json!(1), 1));
        let err = store.update_checkpoint(&job.id, &old_lock, &write).await.unwrap_err();
        assert!(err.is_stale_lock());
        let err = store
            .finalize(&job.id, &old_lock, &Finalization::Completed, t2)
            .await
            .unwrap_err();
        assert!(err.is_stale_lock());

        store.update_checkpoint(&job.id, &new_lock, &write).await.unwrap();
        store
            .finalize(&job.id, &new_lock, &Finalization::Completed, t2)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_checkpoint_merge_and_write_once() {
        let (store, _) = test_store().await;
        let job = store.insert_job(NewJob::workflow("publish", json!({}))).await.unwrap();
        let claimed = store
            .claim_next("default", Utc::now(), stale_after())
            .await
            .unwrap()
            .unwrap();
        let lock = claimed.lock.unwrap();

        let failed = StepRecord::failed(ErrorInfo::new("boom"), 1);
        store
            .update_checkpoint(&job.id, &lock, &step_write("createPost", "a", failed))
            .await
            .unwrap();
        store
            .update_checkpoint(
                &job.id,
                &lock,
                &step_write("createPost", "a", StepRecord::succeeded(json!({"id": 7}), 2)),
            )
            .await
            .unwrap();
        store
            .update_checkpoint(
                &job.id,
                &lock,
                &step_write("notify", "b", StepRecord::succeeded(json!("sent"), 1)),
            )
            .await
            .unwrap();
        // Overwriting a completed record is a no-op.
        store
            .update_checkpoint(
                &job.id,
                &lock,
                &step_write("createPost", "a", StepRecord::succeeded(json!({"id": 8}), 3)),
            )
            .await
            .unwrap();

        let loaded = store.get_job(&job.id).await.unwrap().unwrap();
        let record = loaded.task_status.get("createPost", "a").unwrap();
        assert!(record.complete);
        assert_eq!(record.attempts, 2);
        assert_eq!(record.output, Some(json!({"id": 7})));
        assert_eq!(
            loaded.task_status.completed_output("notify", "b"),
            Some(&json!("sent"))
        );
        assert_eq!(loaded.log.len(), 3);
        assert_eq!(loaded.log[0].state, JobLogState::Failed);
    }

    #[tokio::test]
    async fn test_finalize_transitions() {
        let (store, _) = test_store().await;
        for n in 0..3 {
            store.insert_job(NewJob::task("echo", json!(n))).await.unwrap();
        }
        let now = Utc::now();

        let a = store.claim_next("default", now, stale_after()).await.unwrap().unwrap();
        let later = (now + Duration::seconds(30)).trunc_subsecs(6);
        store
            .finalize(
                &a.id,
                &a.lock.unwrap(),
                &Finalization::Requeue {
                    error: ErrorInfo::new("flaky"),
                    wait_until: Some(later),
                },
                now,
            )
            .await
            .unwrap();
        let a = store.get_job(&a.id).await.unwrap().unwrap();
        assert_eq!(a.status, JobStatus::Queued);
        assert!(a.has_error);
        assert_eq!(a.error.as_ref().unwrap().message, "flaky");
        assert_eq!(a.wait_until, Some(later));
        assert!(a.lock.is_none());
        assert!(a.completed_at.is_none());

        let b = store.claim_next("default", now, stale_after()).await.unwrap().unwrap();
        store
            .finalize(
                &b.id,
                &b.lock.unwrap(),
                &Finalization::Failed {
                    error: ErrorInfo::new("fatal").with_details(json!({"code": 3})),
                },
                now,
            )
            .await
            .unwrap();
        let b = store.get_job(&b.id).await.unwrap().unwrap();
        assert_eq!(b.status, JobStatus::Failed);
        assert_eq!(b.error.unwrap().details, Some(json!({"code": 3})));
        assert!(b.completed_at.is_some());

        let c = store.claim_next("default", now, stale_after()).await.unwrap().unwrap();
        let lock = c.lock.unwrap();
        store
            .finalize(&c.id, &lock, &Finalization::Completed, now)
            .await
            .unwrap();
        let c_loaded = store.get_job(&c.id).await.unwrap().unwrap();
        assert_eq!(c_loaded.status, JobStatus::Completed);
        assert!(!c_loaded.has_error);
        assert!(c_loaded.error.is_none());

        // The claim is released; the same token cannot finalize again.
        let err = store
            .finalize(&c.id, &lock, &Finalization::Completed, now)
            .await
            .unwrap_err();
        assert!(err.is_stale_lock());

        let err = store
            .finalize(&Uuid::now_v7(), &lock, &Finalization::Completed, now)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }

    #[tokio::test]
    async fn test_list_filter_and_purge() {
        let (store, _) = test_store().await;
        let a = store.insert_job(NewJob::task("echo", json!(1))).await.unwrap();
        store.insert_job(NewJob::task("echo", json!(2))).await.unwrap();
        store
            .insert_job(NewJob::task("echo", json!(3)).queue("other"))
            .await
            .unwrap();

        let claimed = store
            .claim_next("default", Utc::now(), stale_after())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.id, a.id);
        store
            .finalize(&a.id, &claimed.lock.unwrap(), &Finalization::Completed, Utc::now())
            .await
            .unwrap();

        let all = store.list_jobs(&JobFilter::default()).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].id, a.id);

        let filter = JobFilter {
            queue: Some("default".to_string()),
            status: Some(JobStatus::Queued),
            ..Default::default()
        };
        assert_eq!(store.list_jobs(&filter).await.unwrap().len(), 1);

        let limited = JobFilter {
            limit: 2,
            ..Default::default()
        };
        assert_eq!(store.list_jobs(&limited).await.unwrap().len(), 2);

        assert_eq!(store.delete_completed(Some("other")).await.unwrap(), 0);
        assert_eq!(store.delete_completed(None).await.unwrap(), 1);
        assert!(store.get_job(&a.id).await.unwrap().is_none());

        let remaining = store.list_jobs(&JobFilter::default()).await.unwrap();
        assert!(store.delete_job(&remaining[0].id).await.unwrap());
        assert!(!store.delete_job(&remaining[0].id).await.unwrap());
    }
}

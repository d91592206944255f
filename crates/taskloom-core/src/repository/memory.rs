//! In-process `JobStore` backed by a mutex-guarded vector.
//!
//! Claim exclusivity comes from doing select-and-transition under one lock.
//! Nothing survives the process, so this store suits tests and hosts that
//! only need deferred execution within one process.

use chrono::{DateTime, Duration, Utc};
use taskloom_types::error::StoreError;
use taskloom_types::job::{
    CheckpointWrite, Finalization, Job, JobFilter, JobStatus, LockToken, NewJob,
};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::job::JobStore;

#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    /// Jobs in insertion order; insertion order breaks `created_at` ties.
    jobs: Mutex<Vec<Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn claimed_by<'a>(jobs: &'a mut [Job], job_id: &Uuid, lock: &LockToken) -> Result<&'a mut Job, StoreError> {
    let job = jobs
        .iter_mut()
        .find(|j| j.id == *job_id)
        .ok_or(StoreError::NotFound)?;
    let holds_lock = job.status == JobStatus::Running
        && job.lock.is_some_and(|current| current.token == lock.token);
    if !holds_lock {
        return Err(StoreError::StaleLock { job_id: *job_id });
    }
    Ok(job)
}

impl JobStore for InMemoryJobStore {
    async fn insert_job(&self, job: NewJob) -> Result<Job, StoreError> {
        let job = Job::queued(Uuid::now_v7(), job, Utc::now());
        self.jobs.lock().await.push(job.clone());
        Ok(job)
    }

    async fn claim_next_excluding(
        &self,
        queue: &str,
        now: DateTime<Utc>,
        stale_after: Duration,
        exclude: &[Uuid],
    ) -> Result<Option<Job>, StoreError> {
        let mut jobs = self.jobs.lock().await;

        let candidate = jobs
            .iter()
            .enumerate()
            .filter(|(_, j)| j.queue == queue && !exclude.contains(&j.id))
            .filter(|(_, j)| {
                j.is_eligible(now)
                    || (j.status == JobStatus::Running
                        && j.lock.is_some_and(|l| l.is_stale(now, stale_after)))
            })
            .min_by_key(|(idx, j)| (j.created_at, *idx))
            .map(|(idx, _)| idx);

        let Some(idx) = candidate else {
            return Ok(None);
        };

        let job = &mut jobs[idx];
        if job.status == JobStatus::Running {
            tracing::warn!(job_id = %job.id, queue, "reclaiming job with stale lock");
        }
        job.status = JobStatus::Running;
        job.lock = Some(LockToken::new(now));
        job.total_tried += 1;
        job.wait_until = None;
        job.updated_at = now;
        Ok(Some(job.clone()))
    }

    async fn update_checkpoint(
        &self,
        job_id: &Uuid,
        lock: &LockToken,
        write: &CheckpointWrite,
    ) -> Result<(), StoreError> {
        let mut jobs = self.jobs.lock().await;
        let job = claimed_by(&mut jobs, job_id, lock)?;

        let applied = job
            .task_status
            .apply(&write.task_slug, &write.step_id, write.record.clone());
        if applied {
            if let Some(entry) = &write.log {
                job.log.push(entry.clone());
            }
            job.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn finalize(
        &self,
        job_id: &Uuid,
        lock: &LockToken,
        finalization: &Finalization,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut jobs = self.jobs.lock().await;
        let job = claimed_by(&mut jobs, job_id, lock)?;

        job.status = finalization.target_status();
        job.lock = None;
        job.updated_at = now;
        match finalization {
            Finalization::Completed => {
                job.completed_at = Some(now);
            }
            Finalization::Failed { error } => {
                job.has_error = true;
                job.error = Some(error.clone());
                job.completed_at = Some(now);
            }
            Finalization::Requeue { error, wait_until } => {
                job.has_error = true;
                job.error = Some(error.clone());
                job.wait_until = *wait_until;
            }
        }
        Ok(())
    }

    async fn get_job(&self, job_id: &Uuid) -> Result<Option<Job>, StoreError> {
        let jobs = self.jobs.lock().await;
        Ok(jobs.iter().find(|j| j.id == *job_id).cloned())
    }

    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>, StoreError> {
        let jobs = self.jobs.lock().await;
        let mut matched: Vec<Job> = jobs
            .iter()
            .filter(|j| filter.queue.as_deref().is_none_or(|q| j.queue == q))
            .filter(|j| filter.status.is_none_or(|s| j.status == s))
            .cloned()
            .collect();
        matched.sort_by_key(|j| j.created_at);
        matched.truncate(filter.limit as usize);
        Ok(matched)
    }

    async fn delete_job(&self, job_id: &Uuid) -> Result<bool, StoreError> {
        let mut jobs = self.jobs.lock().await;
        let before = jobs.len();
        jobs.retain(|j| j.id != *job_id);
        Ok(jobs.len() < before)
    }

    async fn delete_completed(&self, queue: Option<&str>) -> Result<u64, StoreError> {
        let mut jobs = self.jobs.lock().await;
        let before = jobs.len();
        jobs.retain(|j| !(j.status.is_terminal() && queue.is_none_or(|q| j.queue == q)));
        Ok((before - jobs.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;
    use taskloom_types::job::{ErrorInfo, StepRecord};

    use super::*;

    fn stale_after() -> Duration {
        Duration::seconds(300)
    }

    #[tokio::test]
    async fn test_claim_is_fifo_within_queue() {
        let store = InMemoryJobStore::new();
        let a = store.insert_job(NewJob::task("echo", json!(1))).await.unwrap();
        let b = store.insert_job(NewJob::task("echo", json!(2))).await.unwrap();
        let c = store.insert_job(NewJob::task("echo", json!(3))).await.unwrap();
        store
            .insert_job(NewJob::task("echo", json!(4)).queue("other"))
            .await
            .unwrap();

        let now = Utc::now();
        let mut order = Vec::new();
        while let Some(job) = store.claim_next("default", now, stale_after()).await.unwrap() {
            assert_eq!(job.status, JobStatus::Running);
            assert_eq!(job.total_tried, 1);
            assert!(job.lock.is_some());
            order.push(job.id);
        }
        assert_eq!(order, vec![a.id, b.id, c.id]);
    }

    #[tokio::test]
    async fn test_claim_skips_excluded_jobs() {
        let store = InMemoryJobStore::new();
        let a = store.insert_job(NewJob::task("echo", json!(1))).await.unwrap();
        let b = store.insert_job(NewJob::task("echo", json!(2))).await.unwrap();

        let now = Utc::now();
        let claimed = store
            .claim_next_excluding("default", now, stale_after(), &[a.id])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.id, b.id);
        assert!(store
            .claim_next_excluding("default", now, stale_after(), &[a.id, b.id])
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_claims_are_exclusive() {
        let store = Arc::new(InMemoryJobStore::new());
        let only = store.insert_job(NewJob::task("echo", json!({}))).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.claim_next("default", Utc::now(), stale_after()).await.unwrap()
            }));
        }
        let mut winners = Vec::new();
        for handle in handles {
            if let Some(job) = handle.await.unwrap() {
                winners.push(job.id);
            }
        }
        assert_eq!(winners, vec![only.id]);
    }

    #[tokio::test]
    async fn test_wait_until_defers_claim() {
        let store = InMemoryJobStore::new();
        let now = Utc::now();
        store
            .insert_job(NewJob::task("echo", json!({})).wait_until(now + Duration::minutes(1)))
            .await
            .unwrap();
        assert!(store.claim_next("default", now, stale_after()).await.unwrap().is_none());
        assert!(store
            .claim_next("default", now + Duration::minutes(2), stale_after())
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_stale_lock_is_reclaimed_and_old_token_rejected() {
        let store = InMemoryJobStore::new();
        store.insert_job(NewJob::task("echo", json!({}))).await.unwrap();

        let t0 = Utc::now();
        let first = store.claim_next("default", t0, stale_after()).await.unwrap().unwrap();
        assert!(store
            .claim_next("default", t0 + Duration::seconds(10), stale_after())
            .await
            .unwrap()
            .is_none());

        let second = store
            .claim_next("default", t0 + Duration::seconds(301), stale_after())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.total_tried, 2);

        let old_lock = first.lock.unwrap();
        let write = CheckpointWrite {
            task_slug: "echo".into(),
            step_id: first.id.to_string(),
            record: StepRecord::succeeded(json!({}), 1),
            log: None,
        };
        let err = store.update_checkpoint(&first.id, &old_lock, &write).await.unwrap_err();
        assert!(err.is_stale_lock());

        let new_lock = second.lock.unwrap();
        store.update_checkpoint(&first.id, &new_lock, &write).await.unwrap();
    }

    #[tokio::test]
    async fn test_checkpoint_is_write_once() {
        let store = InMemoryJobStore::new();
        store.insert_job(NewJob::workflow("wf", json!({}))).await.unwrap();
        let job = store.claim_next("default", Utc::now(), stale_after()).await.unwrap().unwrap();
        let lock = job.lock.unwrap();

        let write = |out| CheckpointWrite {
            task_slug: "createPost".into(),
            step_id: "1".into(),
            record: StepRecord::succeeded(out, 1),
            log: None,
        };
        store.update_checkpoint(&job.id, &lock, &write(json!({"postID": "p1"}))).await.unwrap();
        store.update_checkpoint(&job.id, &lock, &write(json!({"postID": "p2"}))).await.unwrap();

        let stored = store.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(
            stored.task_status.completed_output("createPost", "1"),
            Some(&json!({"postID": "p1"}))
        );
    }

    #[tokio::test]
    async fn test_finalize_releases_lock() {
        let store = InMemoryJobStore::new();
        store.insert_job(NewJob::task("echo", json!({}))).await.unwrap();
        let now = Utc::now();
        let job = store.claim_next("default", now, stale_after()).await.unwrap().unwrap();
        let lock = job.lock.unwrap();

        store
            .finalize(
                &job.id,
                &lock,
                &Finalization::Requeue {
                    error: ErrorInfo::new("try later"),
                    wait_until: None,
                },
                now,
            )
            .await
            .unwrap();
        let stored = store.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Queued);
        assert!(stored.lock.is_none());
        assert!(stored.has_error);

        let err = store
            .finalize(&job.id, &lock, &Finalization::Completed, now)
            .await
            .unwrap_err();
        assert!(err.is_stale_lock());
    }

    #[tokio::test]
    async fn test_list_and_delete_completed() {
        let store = InMemoryJobStore::new();
        store.insert_job(NewJob::task("echo", json!({}))).await.unwrap();
        store.insert_job(NewJob::task("echo", json!({}))).await.unwrap();
        let now = Utc::now();
        let job = store.claim_next("default", now, stale_after()).await.unwrap().unwrap();
        store
            .finalize(&job.id, &job.lock.unwrap(), &Finalization::Completed, now)
            .await
            .unwrap();

        let completed = store
            .list_jobs(&JobFilter {
                status: Some(JobStatus::Completed),
                ..JobFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(completed.len(), 1);

        assert_eq!(store.delete_completed(Some("other")).await.unwrap(), 0);
        assert_eq!(store.delete_completed(None).await.unwrap(), 1);
        assert_eq!(store.list_jobs(&JobFilter::default()).await.unwrap().len(), 1);
    }
}

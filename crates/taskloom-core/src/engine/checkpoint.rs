//! Checkpoint manager for one claimed job.
//!
//! Wraps `JobStore` with the job id and lock token of the current claim and
//! keeps a local copy of the ledger, so cache lookups during a replayed
//! workflow pass never hit the store. Every write goes through the store
//! first; the local copy only changes once the store accepted the write.

use std::sync::Arc;

use serde_json::Value;
use taskloom_types::job::{CheckpointLedger, CheckpointWrite, LockToken, StepRecord};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::repository::job::JobStore;

// ---------------------------------------------------------------------------
// CheckpointManager
// ---------------------------------------------------------------------------

/// Records step outcomes for a single claimed job.
///
/// Generic over `S: JobStore` so it works with any storage backend.
pub struct CheckpointManager<S: JobStore> {
    store: Arc<S>,
    job_id: Uuid,
    lock: LockToken,
    ledger: Mutex<CheckpointLedger>,
}

impl<S: JobStore> CheckpointManager<S> {
    /// Create a manager for a claim, seeded with the ledger read at claim time.
    pub fn new(store: Arc<S>, job_id: Uuid, lock: LockToken, ledger: CheckpointLedger) -> Self {
        Self {
            store,
            job_id,
            lock,
            ledger: Mutex::new(ledger),
        }
    }

    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    pub fn lock(&self) -> &LockToken {
        &self.lock
    }

    /// Cached output if `(slug, step_id)` already completed.
    pub async fn completed_output(&self, slug: &str, step_id: &str) -> Option<Value> {
        self.ledger.lock().await.completed_output(slug, step_id).cloned()
    }

    /// The current record for `(slug, step_id)`, complete or not.
    pub async fn record(&self, slug: &str, step_id: &str) -> Option<StepRecord> {
        self.ledger.lock().await.get(slug, step_id).cloned()
    }

    /// Persist a step record under the claim's lock token.
    pub async fn write(&self, write: CheckpointWrite) -> Result<(), CheckpointError> {
        self.store
            .update_checkpoint(&self.job_id, &self.lock, &write)
            .await
            .map_err(|e| {
                if e.is_stale_lock() {
                    CheckpointError::StaleLock(self.job_id)
                } else {
                    CheckpointError::Store(e.to_string())
                }
            })?;

        tracing::debug!(
            job_id = %self.job_id,
            slug = %write.task_slug,
            step_id = %write.step_id,
            complete = write.record.complete,
            attempts = write.record.attempts,
            "checkpointed step"
        );

        self.ledger
            .lock()
            .await
            .apply(&write.task_slug, &write.step_id, write.record);
        Ok(())
    }

    /// Snapshot of the ledger as this claim sees it.
    pub async fn snapshot(&self) -> CheckpointLedger {
        self.ledger.lock().await.clone()
    }
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur during checkpoint writes.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CheckpointError {
    /// The claim was lost; the caller must stop writing for this pass.
    #[error("lock lost on job {0}")]
    StaleLock(Uuid),

    /// Underlying store operation failed.
    #[error("checkpoint store error: {0}")]
    Store(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

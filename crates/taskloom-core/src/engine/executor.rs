//! Task executor: one attempt of one task step, recorded in the ledger.
//!
//! The executor never loops or sleeps. A call either returns the cached
//! output of a completed step, or invokes the handler exactly once and
//! records the outcome. Further attempts happen when the owning job is
//! claimed again.
//!
//! # Attempt flow
//!
//! 1. Completed record for `(bucket, step_id)` -> return its output, no invocation.
//! 2. Record already past its retry budget -> terminal failure, no invocation.
//! 3. Validate input (registered tasks only), invoke the handler with panic
//!    capture, validate output.
//! 4. Write the step record and log entry under the claim's lock token.
//! 5. Success -> `on_success` (best effort). Failure -> retry signal, or
//!    `on_fail` plus a terminal failure when the budget is spent.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::FutureExt;
use serde_json::Value;
use taskloom_types::job::{
    CheckpointWrite, ErrorInfo, JobLogEntry, JobLogState, StepRecord, INLINE_BUCKET,
};

use crate::definition::{TaskArgs, TaskHandler};
use crate::registry::RegisteredTask;
use crate::repository::job::JobStore;

use super::checkpoint::{CheckpointError, CheckpointManager};
use super::retry::{RetryHandler, RetryPolicy};

// ---------------------------------------------------------------------------
// StepSource
// ---------------------------------------------------------------------------

/// Where a step's handler comes from.
#[derive(Clone)]
pub enum StepSource {
    /// A registered task: schemas enforced, retry policy from the definition.
    Registered(Arc<RegisteredTask>),
    /// A closure supplied at call time. Recorded under the `inline` bucket,
    /// never schema-checked.
    Inline {
        handler: TaskHandler,
        retry: RetryPolicy,
    },
}

impl StepSource {
    /// Ledger bucket this step is recorded under.
    pub fn bucket(&self) -> &str {
        match self {
            StepSource::Registered(task) => task.slug(),
            StepSource::Inline { .. } => INLINE_BUCKET,
        }
    }

    pub fn retry(&self) -> RetryPolicy {
        match self {
            StepSource::Registered(task) => task.definition.retry,
            StepSource::Inline { retry, .. } => *retry,
        }
    }
}

// ---------------------------------------------------------------------------
// TaskFailure
// ---------------------------------------------------------------------------

/// Why a step did not produce output.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TaskFailure {
    /// The attempt failed and the retry budget is not spent yet.
    #[error("task '{slug}' step '{step_id}' failed on attempt {attempts}, retry pending: {error}")]
    Retry {
        slug: String,
        step_id: String,
        error: ErrorInfo,
        attempts: u32,
        delay: Option<Duration>,
    },

    /// Terminal: retries exhausted, or a schema violation.
    #[error("task '{slug}' step '{step_id}' failed after {attempts} attempt(s): {error}")]
    Exhausted {
        slug: String,
        step_id: String,
        error: ErrorInfo,
        attempts: u32,
    },

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}

enum AttemptError {
    /// Handler failure; counts against the retry budget.
    Failed(ErrorInfo),
    /// Schema violation; terminal regardless of budget.
    Defect(ErrorInfo),
}

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

async fn invoke(handler: &TaskHandler, args: TaskArgs) -> Result<Value, AttemptError> {
    match AssertUnwindSafe(handler(args)).catch_unwind().await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(e)) => Err(AttemptError::Failed(e.to_error_info())),
        Err(payload) => Err(AttemptError::Failed(ErrorInfo::new(format!(
            "handler panicked: {}",
            panic_message(payload.as_ref())
        )))),
    }
}

// ---------------------------------------------------------------------------
// TaskExecutor
// ---------------------------------------------------------------------------

/// Stateless executor. Everything job-specific lives in the checkpoint manager.
pub struct TaskExecutor;

impl TaskExecutor {
    /// Run one attempt of `(source, step_id)` unless it already completed.
    pub async fn execute<S: JobStore>(
        checkpoint: &CheckpointManager<S>,
        source: &StepSource,
        step_id: &str,
        args: TaskArgs,
    ) -> Result<Value, TaskFailure> {
        let slug = source.bucket().to_string();
        let job_id = checkpoint.job_id();

        if let Some(output) = checkpoint.completed_output(&slug, step_id).await {
            tracing::debug!(job_id = %job_id, slug = %slug, step_id, "step already complete, using cached output");
            return Ok(output);
        }

        let policy = source.retry();
        let previous = checkpoint.record(&slug, step_id).await;
        let prior_attempts = previous.as_ref().map_or(0, |r| r.attempts);
        if prior_attempts > policy.retries {
            let error = previous
                .and_then(|r| r.error)
                .unwrap_or_else(|| ErrorInfo::new("retries exhausted"));
            return Err(TaskFailure::Exhausted {
                slug,
                step_id: step_id.to_string(),
                error,
                attempts: prior_attempts,
            });
        }

        let attempts = prior_attempts + 1;
        let job_ctx = args.job.clone();
        let executed_at = Utc::now();

        let outcome = match source {
            StepSource::Registered(task) => match task.validate_input(&args.input) {
                Err(e) => Err(AttemptError::Defect(ErrorInfo::new(e.to_string()))),
                Ok(()) => match invoke(&task.definition.handler, args).await {
                    Ok(output) => task
                        .validate_output(&output)
                        .map(|()| output)
                        .map_err(|e| AttemptError::Defect(ErrorInfo::new(e.to_string()))),
                    Err(e) => Err(e),
                },
            },
            StepSource::Inline { handler, .. } => invoke(handler, args).await,
        };

        let completed_at = Utc::now();
        let log_entry = |state, error: Option<ErrorInfo>| JobLogEntry {
            task_slug: slug.clone(),
            step_id: step_id.to_string(),
            state,
            error,
            executed_at,
            completed_at,
        };

        match outcome {
            Ok(output) => {
                checkpoint
                    .write(CheckpointWrite {
                        task_slug: slug.clone(),
                        step_id: step_id.to_string(),
                        record: StepRecord::succeeded(output.clone(), attempts),
                        log: Some(log_entry(JobLogState::Succeeded, None)),
                    })
                    .await?;

                tracing::info!(job_id = %job_id, slug = %slug, step_id, attempts, "step succeeded");

                if let StepSource::Registered(task) = source {
                    if let Some(hook) = &task.definition.on_success {
                        if let Err(e) = hook(job_ctx, output.clone()).await {
                            tracing::warn!(job_id = %job_id, slug = %slug, error = %e, "on_success hook failed");
                        }
                    }
                }
                Ok(output)
            }
            Err(attempt) => {
                let (error, terminal) = match attempt {
                    AttemptError::Failed(error) => (error, false),
                    AttemptError::Defect(error) => (error, true),
                };

                checkpoint
                    .write(CheckpointWrite {
                        task_slug: slug.clone(),
                        step_id: step_id.to_string(),
                        record: StepRecord::failed(error.clone(), attempts),
                        log: Some(log_entry(JobLogState::Failed, Some(error.clone()))),
                    })
                    .await?;

                if !terminal && RetryHandler::should_retry(&policy, attempts) {
                    tracing::warn!(
                        job_id = %job_id,
                        slug = %slug,
                        step_id,
                        attempts,
                        error = %error,
                        "step failed, retry pending"
                    );
                    return Err(TaskFailure::Retry {
                        slug,
                        step_id: step_id.to_string(),
                        error,
                        attempts,
                        delay: RetryHandler::delay_for(&policy, attempts),
                    });
                }

                tracing::warn!(
                    job_id = %job_id,
                    slug = %slug,
                    step_id,
                    attempts,
                    error = %error,
                    "step failed terminally"
                );

                if let StepSource::Registered(task) = source {
                    if let Some(hook) = &task.definition.on_fail {
                        if let Err(e) = hook(job_ctx, error.clone()).await {
                            tracing::warn!(job_id = %job_id, slug = %slug, error = %e, "on_fail hook failed");
                        }
                    }
                }

                Err(TaskFailure::Exhausted {
                    slug,
                    step_id: step_id.to_string(),
                    error,
                    attempts,
                })
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

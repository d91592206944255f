//! Workflow orchestrator: replays a workflow handler against its ledger.
//!
//! The handler runs from the top on every pass. Each `run_task` /
//! `run_task_inline` call consults the checkpoint ledger first, so steps that
//! completed on an earlier pass return their cached output and the handler's
//! own control flow skips forward to the first unfinished step.
//!
//! A step that fails returns a [`WorkflowInterrupt`]; handlers propagate it
//! with `?`, which abandons the rest of the pass. The first interrupt of a
//! pass is latched: later step calls in the same pass return it again without
//! executing anything, and it decides the pass outcome even if the handler
//! swallowed it.

use std::future::Future;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde_json::Value;
use taskloom_types::job::ErrorInfo;
use uuid::Uuid;

use crate::definition::{
    task_handler, JobContext, RequestContext, TaskArgs, TaskError, TaskHandler, WorkflowArgs,
};
use crate::registry::{DefinitionRegistry, RegisteredWorkflow};
use crate::repository::job::JobStore;

use super::checkpoint::{CheckpointError, CheckpointManager};
use super::executor::{StepSource, TaskExecutor, TaskFailure};
use super::retry::RetryPolicy;

// ---------------------------------------------------------------------------
// WorkflowInterrupt
// ---------------------------------------------------------------------------

/// Control signal that ends a workflow pass early.
#[derive(Debug, Clone, thiserror::Error)]
pub enum WorkflowInterrupt {
    /// A step failed with retries remaining; the job goes back to the queue.
    #[error("task '{slug}' step '{step_id}' failed, retry pending: {error}")]
    Retry {
        slug: String,
        step_id: String,
        error: ErrorInfo,
        delay: Option<Duration>,
    },

    /// A step failed terminally; the job fails.
    #[error("task '{slug}' step '{step_id}' exhausted its retries: {error}")]
    Exhausted {
        slug: String,
        step_id: String,
        error: ErrorInfo,
    },

    /// The claim was lost; nothing more may be written this pass.
    #[error("lock lost on job {job_id}")]
    StaleLock { job_id: Uuid },

    #[error("job store error: {0}")]
    Store(String),

    #[error("unknown task '{0}'")]
    UnknownTask(String),

    /// The workflow handler itself returned an error.
    #[error("workflow handler failed: {0}")]
    Handler(ErrorInfo),
}

impl From<TaskFailure> for WorkflowInterrupt {
    fn from(failure: TaskFailure) -> Self {
        match failure {
            TaskFailure::Retry {
                slug,
                step_id,
                error,
                delay,
                ..
            } => WorkflowInterrupt::Retry {
                slug,
                step_id,
                error,
                delay,
            },
            TaskFailure::Exhausted {
                slug,
                step_id,
                error,
                ..
            } => WorkflowInterrupt::Exhausted {
                slug,
                step_id,
                error,
            },
            TaskFailure::Checkpoint(CheckpointError::StaleLock(job_id)) => {
                WorkflowInterrupt::StaleLock { job_id }
            }
            TaskFailure::Checkpoint(CheckpointError::Store(e)) => WorkflowInterrupt::Store(e),
        }
    }
}

impl From<TaskError> for WorkflowInterrupt {
    fn from(e: TaskError) -> Self {
        WorkflowInterrupt::Handler(e.to_error_info())
    }
}

impl From<anyhow::Error> for WorkflowInterrupt {
    fn from(e: anyhow::Error) -> Self {
        WorkflowInterrupt::Handler(ErrorInfo::new(format!("{e:#}")))
    }
}

impl From<serde_json::Error> for WorkflowInterrupt {
    fn from(e: serde_json::Error) -> Self {
        WorkflowInterrupt::Handler(ErrorInfo::new(format!("json error: {e}")))
    }
}

// ---------------------------------------------------------------------------
// StepDriver / WorkflowSteps
// ---------------------------------------------------------------------------

/// Object-safe step execution, so `WorkflowSteps` does not carry the store type.
trait StepDriver: Send + Sync {
    fn run_task<'a>(
        &'a self,
        slug: &'a str,
        step_id: &'a str,
        input: Value,
    ) -> BoxFuture<'a, Result<Value, WorkflowInterrupt>>;

    fn run_inline<'a>(
        &'a self,
        step_id: &'a str,
        handler: TaskHandler,
        input: Value,
    ) -> BoxFuture<'a, Result<Value, WorkflowInterrupt>>;
}

/// The `runTask` / `runTaskInline` capability handed to workflow handlers.
#[derive(Clone)]
pub struct WorkflowSteps {
    driver: Arc<dyn StepDriver>,
}

impl WorkflowSteps {
    /// Run registered task `slug` as step `step_id`.
    ///
    /// Returns the cached output if the step already completed. Step ids must
    /// be stable across passes of the same job.
    pub async fn run_task(
        &self,
        slug: &str,
        step_id: &str,
        input: Value,
    ) -> Result<Value, WorkflowInterrupt> {
        self.driver.run_task(slug, step_id, input).await
    }

    /// Run a closure as step `step_id` in the `inline` bucket.
    ///
    /// Inline steps skip schema validation and use the workflow's retry policy.
    pub async fn run_task_inline<F, Fut>(
        &self,
        step_id: &str,
        handler: F,
        input: Value,
    ) -> Result<Value, WorkflowInterrupt>
    where
        F: Fn(TaskArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, TaskError>> + Send + 'static,
    {
        self.driver
            .run_inline(step_id, task_handler(handler), input)
            .await
    }
}

struct JobSteps<S: JobStore> {
    registry: Arc<DefinitionRegistry>,
    checkpoint: Arc<CheckpointManager<S>>,
    job: JobContext,
    req: RequestContext,
    inline_retry: RetryPolicy,
    interrupted: OnceLock<WorkflowInterrupt>,
}

impl<S: JobStore> JobSteps<S> {
    fn latch(&self, interrupt: WorkflowInterrupt) -> WorkflowInterrupt {
        let _ = self.interrupted.set(interrupt.clone());
        interrupt
    }

    async fn run(
        &self,
        source: StepSource,
        step_id: &str,
        input: Value,
    ) -> Result<Value, WorkflowInterrupt> {
        if let Some(interrupt) = self.interrupted.get() {
            return Err(interrupt.clone());
        }
        let args = TaskArgs {
            input,
            job: self.job.clone(),
            req: self.req.clone(),
        };
        TaskExecutor::execute(&self.checkpoint, &source, step_id, args)
            .await
            .map_err(|failure| self.latch(failure.into()))
    }
}

impl<S: JobStore> StepDriver for JobSteps<S> {
    fn run_task<'a>(
        &'a self,
        slug: &'a str,
        step_id: &'a str,
        input: Value,
    ) -> BoxFuture<'a, Result<Value, WorkflowInterrupt>> {
        Box::pin(async move {
            match self.registry.task(slug) {
                Ok(task) => self.run(StepSource::Registered(task), step_id, input).await,
                Err(_) => Err(self.latch(WorkflowInterrupt::UnknownTask(slug.to_string()))),
            }
        })
    }

    fn run_inline<'a>(
        &'a self,
        step_id: &'a str,
        handler: TaskHandler,
        input: Value,
    ) -> BoxFuture<'a, Result<Value, WorkflowInterrupt>> {
        Box::pin(async move {
            let source = StepSource::Inline {
                handler,
                retry: self.inline_retry,
            };
            self.run(source, step_id, input).await
        })
    }
}

// ---------------------------------------------------------------------------
// WorkflowOrchestrator
// ---------------------------------------------------------------------------

/// Drives one pass of a workflow handler for a claimed job.
pub struct WorkflowOrchestrator {
    registry: Arc<DefinitionRegistry>,
}

impl WorkflowOrchestrator {
    pub fn new(registry: Arc<DefinitionRegistry>) -> Self {
        Self { registry }
    }

    /// Run the handler once. `Ok(())` means every step it reached completed.
    pub async fn run_pass<S: JobStore + 'static>(
        &self,
        workflow: &RegisteredWorkflow,
        checkpoint: Arc<CheckpointManager<S>>,
        job: JobContext,
        input: Value,
        req: RequestContext,
    ) -> Result<(), WorkflowInterrupt> {
        let job_id = job.job_id;
        let driver = Arc::new(JobSteps {
            registry: self.registry.clone(),
            checkpoint,
            job: job.clone(),
            req: req.clone(),
            inline_retry: workflow.definition.retry,
            interrupted: OnceLock::new(),
        });

        tracing::debug!(job_id = %job_id, slug = workflow.slug(), "workflow pass started");

        let args = WorkflowArgs {
            input,
            job,
            req,
            steps: WorkflowSteps {
                driver: driver.clone(),
            },
        };
        let result = (workflow.definition.handler)(args).await;

        match (result, driver.interrupted.get()) {
            (_, Some(interrupt)) => Err(interrupt.clone()),
            (Err(e), None) => Err(e),
            (Ok(()), None) => {
                tracing::debug!(job_id = %job_id, slug = workflow.slug(), "workflow pass finished");
                Ok(())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

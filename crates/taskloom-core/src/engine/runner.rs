//! Runner: the claim -> dispatch -> finalize loop.
//!
//! A run spawns up to `concurrency` workers that share one claim budget.
//! Each worker claims the next eligible job, dispatches it by kind to the
//! task executor or the workflow orchestrator, and finalizes the outcome.
//! Nothing a handler does (errors, panics) escapes a worker; every claimed
//! job ends the pass `completed`, `failed`, back in `queued`, or abandoned
//! after losing its lock.
//!
//! A run claims each job at most once: a job it requeues waits for the next
//! run, so every run spends at most one attempt per job.
//!
//! Correctness across concurrent runners rests entirely on the store's
//! `claim_next` exclusivity.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures_util::FutureExt;
use taskloom_types::config::RunnerConfig;
use taskloom_types::error::StoreError;
use taskloom_types::job::{ErrorInfo, Finalization, Job, LockToken};
use taskloom_types::run::{JobOutcome, ProcessedJob, RunRequest, RunSummary, StopReason};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::definition::{JobContext, RequestContext, TaskArgs};
use crate::registry::{Definition, DefinitionRegistry};
use crate::repository::job::JobStore;

use super::checkpoint::{CheckpointError, CheckpointManager};
use super::executor::{panic_message, StepSource, TaskExecutor, TaskFailure};
use super::orchestrator::{WorkflowInterrupt, WorkflowOrchestrator};
use super::retry::{RetryHandler, RetryPolicy};

// ---------------------------------------------------------------------------
// Settings / errors
// ---------------------------------------------------------------------------

/// Runner tuning, usually derived from `[runner]` in `config.toml`.
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    /// Locks older than this are treated as crashed runners.
    pub stale_after: chrono::Duration,
    /// Workers per run.
    pub concurrency: usize,
    /// Delete a job as soon as it finalizes `completed`.
    pub delete_on_complete: bool,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self::from(&RunnerConfig::default())
    }
}

impl From<&RunnerConfig> for RunnerSettings {
    fn from(config: &RunnerConfig) -> Self {
        Self {
            stale_after: i64::try_from(config.lock_stale_after_secs)
                .ok()
                .and_then(chrono::Duration::try_seconds)
                .unwrap_or(chrono::Duration::MAX),
            concurrency: config.concurrency.max(1),
            delete_on_complete: config.delete_job_on_complete,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("failed to claim from queue '{queue}': {source}")]
    Claim {
        queue: String,
        #[source]
        source: StoreError,
    },
}

// ---------------------------------------------------------------------------
// Internal bookkeeping
// ---------------------------------------------------------------------------

/// Claim budget shared by all workers of one run.
struct RunBudget {
    limit: u32,
    claimed: AtomicU32,
    deadline: Option<Instant>,
    /// Jobs this run has already claimed. Held across each claim so two
    /// workers never race past the same requeued job.
    seen: tokio::sync::Mutex<Vec<Uuid>>,
}

impl RunBudget {
    fn reserve(&self) -> bool {
        self.claimed
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < self.limit).then_some(n + 1)
            })
            .is_ok()
    }

    fn release(&self) {
        self.claimed.fetch_sub(1, Ordering::SeqCst);
    }

    fn expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

struct WorkerReport {
    jobs: Vec<ProcessedJob>,
    stop: StopReason,
    store_error: Option<String>,
}

/// How a dispatched pass ended, before it is written back.
enum Disposition {
    Completed,
    /// A step failed with budget left.
    Retry {
        error: ErrorInfo,
        delay: Option<Duration>,
    },
    /// A step failed terminally.
    Exhausted { error: ErrorInfo },
    /// Failure outside any step; judged against the job-level budget.
    JobError(ErrorInfo),
    StaleLock,
    Store(String),
}

impl From<TaskFailure> for Disposition {
    fn from(failure: TaskFailure) -> Self {
        match failure {
            TaskFailure::Retry { error, delay, .. } => Disposition::Retry { error, delay },
            TaskFailure::Exhausted { error, .. } => Disposition::Exhausted { error },
            TaskFailure::Checkpoint(CheckpointError::StaleLock(_)) => Disposition::StaleLock,
            TaskFailure::Checkpoint(CheckpointError::Store(e)) => Disposition::Store(e),
        }
    }
}

impl From<WorkflowInterrupt> for Disposition {
    fn from(interrupt: WorkflowInterrupt) -> Self {
        match interrupt {
            WorkflowInterrupt::Retry { error, delay, .. } => Disposition::Retry { error, delay },
            WorkflowInterrupt::Exhausted { error, .. } => Disposition::Exhausted { error },
            WorkflowInterrupt::UnknownTask(slug) => Disposition::Exhausted {
                error: ErrorInfo::new(format!("unknown task '{slug}'")),
            },
            WorkflowInterrupt::StaleLock { .. } => Disposition::StaleLock,
            WorkflowInterrupt::Store(e) => Disposition::Store(e),
            WorkflowInterrupt::Handler(error) => Disposition::JobError(error),
        }
    }
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

/// Execution loop bridging the job store to the executor and orchestrator.
pub struct Runner<S: JobStore> {
    store: Arc<S>,
    registry: Arc<DefinitionRegistry>,
    orchestrator: Arc<WorkflowOrchestrator>,
    settings: RunnerSettings,
    shutdown: CancellationToken,
}

impl<S: JobStore> Clone for Runner<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            registry: self.registry.clone(),
            orchestrator: self.orchestrator.clone(),
            settings: self.settings.clone(),
            shutdown: self.shutdown.clone(),
        }
    }
}

impl<S: JobStore + 'static> Runner<S> {
    pub fn new(store: Arc<S>, registry: Arc<DefinitionRegistry>) -> Self {
        Self {
            store,
            orchestrator: Arc::new(WorkflowOrchestrator::new(registry.clone())),
            registry,
            settings: RunnerSettings::default(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_settings(mut self, settings: RunnerSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Stop starting new claims once `token` is cancelled. In-flight jobs
    /// still finish.
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<DefinitionRegistry> {
        &self.registry
    }

    /// Claim and process up to `request.limit` jobs from `request.queue`.
    pub async fn run(&self, request: RunRequest) -> RunSummary {
        let started = Instant::now();
        let started_at = Utc::now();
        let req = RequestContext::new(request.trigger);
        let budget = Arc::new(RunBudget {
            limit: request.limit,
            claimed: AtomicU32::new(0),
            deadline: request
                .time_budget_ms
                .map(|ms| started + Duration::from_millis(ms)),
            seen: tokio::sync::Mutex::new(Vec::new()),
        });

        let workers = self
            .settings
            .concurrency
            .max(1)
            .min(request.limit.max(1) as usize);

        tracing::info!(
            queue = %request.queue,
            limit = request.limit,
            workers,
            trigger = %request.trigger,
            run_id = %req.run_id,
            "run started"
        );

        let mut set = JoinSet::new();
        for worker in 0..workers {
            let runner = self.clone();
            let queue = request.queue.clone();
            let budget = budget.clone();
            let req = req.clone();
            set.spawn(async move { runner.worker_loop(worker, &queue, &budget, &req).await });
        }

        let mut jobs = Vec::new();
        let mut stops = Vec::new();
        let mut store_error = None;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(report) => {
                    jobs.extend(report.jobs);
                    stops.push(report.stop);
                    if report.store_error.is_some() {
                        store_error = report.store_error;
                    }
                }
                Err(e) => tracing::error!(error = %e, "runner worker aborted"),
            }
        }

        let stop_reason = merge_stop_reasons(&stops);
        let summary = RunSummary {
            queue: request.queue,
            started_at,
            elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            stop_reason,
            jobs,
            store_error,
        };

        tracing::info!(
            queue = %summary.queue,
            claimed = summary.claimed(),
            completed = summary.count(JobOutcome::Completed),
            failed = summary.count(JobOutcome::Failed),
            requeued = summary.count(JobOutcome::Requeued),
            stop_reason = ?summary.stop_reason,
            elapsed_ms = summary.elapsed_ms,
            "run finished"
        );
        summary
    }

    async fn worker_loop(
        &self,
        worker: usize,
        queue: &str,
        budget: &RunBudget,
        req: &RequestContext,
    ) -> WorkerReport {
        let mut jobs = Vec::new();
        loop {
            if self.shutdown.is_cancelled() {
                return WorkerReport { jobs, stop: StopReason::Cancelled, store_error: None };
            }
            if budget.expired() {
                return WorkerReport { jobs, stop: StopReason::TimeBudgetExhausted, store_error: None };
            }
            if !budget.reserve() {
                return WorkerReport { jobs, stop: StopReason::LimitReached, store_error: None };
            }

            let claimed = {
                let mut seen = budget.seen.lock().await;
                let claimed = self.claim_next(queue, &seen).await;
                if let Ok(Some(job)) = &claimed {
                    seen.push(job.id);
                }
                claimed
            };

            match claimed {
                Ok(Some(job)) => jobs.push(self.process(job, req).await),
                Ok(None) => {
                    budget.release();
                    tracing::debug!(worker, queue, "queue drained");
                    return WorkerReport { jobs, stop: StopReason::QueueDrained, store_error: None };
                }
                Err(e) => {
                    budget.release();
                    tracing::error!(worker, queue, error = %e, "claim failed, stopping worker");
                    return WorkerReport {
                        jobs,
                        stop: StopReason::StoreUnavailable,
                        store_error: Some(e.to_string()),
                    };
                }
            }
        }
    }

    /// Claim the next eligible job from `queue` that is not in `exclude`.
    pub async fn claim_next(&self, queue: &str, exclude: &[Uuid]) -> Result<Option<Job>, RunnerError> {
        self.store
            .claim_next_excluding(queue, Utc::now(), self.settings.stale_after, exclude)
            .await
            .map_err(|source| RunnerError::Claim {
                queue: queue.to_string(),
                source,
            })
    }

    /// Run one pass of an already-claimed job and write its outcome back.
    pub async fn process(&self, job: Job, req: &RequestContext) -> ProcessedJob {
        let span = tracing::info_span!(
            "job",
            job_id = %job.id,
            kind = job.kind.kind_name(),
            slug = job.kind.slug(),
            queue = %job.queue,
            total_tried = job.total_tried,
        );
        self.process_claimed(job, req).instrument(span).await
    }

    async fn process_claimed(&self, job: Job, req: &RequestContext) -> ProcessedJob {
        let Some(lock) = job.lock else {
            tracing::error!("claimed job carries no lock");
            return processed(&job, JobOutcome::Abandoned, Some("claimed job carries no lock".into()));
        };
        tracing::info!("job claimed");

        let definition = match self.registry.resolve(&job.kind) {
            Ok(definition) => definition,
            Err(e) => {
                let error = ErrorInfo::new(e.to_string());
                return self.finish(&job, &lock, Finalization::Failed { error }).await;
            }
        };
        let job_policy = match &definition {
            Definition::Task(task) => task.definition.retry,
            Definition::Workflow(workflow) => workflow.definition.retry,
        };

        let dispatch = self.dispatch(&job, lock, definition, req.clone());
        let disposition = match AssertUnwindSafe(dispatch).catch_unwind().await {
            Ok(disposition) => disposition,
            Err(payload) => Disposition::JobError(ErrorInfo::new(format!(
                "job panicked: {}",
                panic_message(payload.as_ref())
            ))),
        };

        let now = Utc::now();
        let finalization = match disposition {
            Disposition::Completed => Finalization::Completed,
            Disposition::Retry { error, delay } => Finalization::Requeue {
                error,
                wait_until: RetryHandler::next_eligible_at(delay, now),
            },
            Disposition::Exhausted { error } => Finalization::Failed { error },
            Disposition::JobError(error) => job_level_failure(&job_policy, job.total_tried, error, now),
            Disposition::StaleLock => {
                tracing::warn!("lock lost mid-pass, abandoning without further writes");
                return processed(&job, JobOutcome::Abandoned, Some("lock lost".into()));
            }
            Disposition::Store(e) => {
                tracing::error!(error = %e, "store failure mid-pass");
                Finalization::Requeue {
                    error: ErrorInfo::new(format!("store failure: {e}")),
                    wait_until: None,
                }
            }
        };

        self.finish(&job, &lock, finalization).await
    }

    async fn dispatch(
        &self,
        job: &Job,
        lock: LockToken,
        definition: Definition,
        req: RequestContext,
    ) -> Disposition {
        let checkpoint = Arc::new(CheckpointManager::new(
            self.store.clone(),
            job.id,
            lock,
            job.task_status.clone(),
        ));
        let ctx = JobContext::from(job);

        match definition {
            Definition::Task(task) => {
                let step_id = job.id.to_string();
                let args = TaskArgs {
                    input: job.input.clone(),
                    job: ctx,
                    req,
                };
                match TaskExecutor::execute(&checkpoint, &StepSource::Registered(task), &step_id, args).await {
                    Ok(_) => Disposition::Completed,
                    Err(failure) => failure.into(),
                }
            }
            Definition::Workflow(workflow) => {
                match self
                    .orchestrator
                    .run_pass(&workflow, checkpoint, ctx, job.input.clone(), req)
                    .await
                {
                    Ok(()) => Disposition::Completed,
                    Err(interrupt) => interrupt.into(),
                }
            }
        }
    }

    async fn finish(&self, job: &Job, lock: &LockToken, finalization: Finalization) -> ProcessedJob {
        let error = finalization.error().map(|e| e.message.clone());
        let outcome = match &finalization {
            Finalization::Completed => JobOutcome::Completed,
            Finalization::Failed { .. } => JobOutcome::Failed,
            Finalization::Requeue { .. } => JobOutcome::Requeued,
        };

        match self.store.finalize(&job.id, lock, &finalization, Utc::now()).await {
            Ok(()) => {
                match outcome {
                    JobOutcome::Failed => {
                        tracing::warn!(error = error.as_deref().unwrap_or_default(), "job failed");
                    }
                    JobOutcome::Requeued => {
                        tracing::info!(error = error.as_deref().unwrap_or_default(), "job requeued");
                    }
                    _ => tracing::info!("job completed"),
                }

                if outcome == JobOutcome::Completed && self.settings.delete_on_complete {
                    if let Err(e) = self.store.delete_job(&job.id).await {
                        tracing::warn!(error = %e, "failed to delete completed job");
                    }
                }
                processed(job, outcome, error)
            }
            Err(e) if e.is_stale_lock() => {
                tracing::warn!("lock lost before finalize");
                processed(job, JobOutcome::Abandoned, Some(e.to_string()))
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to finalize job");
                processed(job, JobOutcome::Abandoned, Some(e.to_string()))
            }
        }
    }
}

fn processed(job: &Job, outcome: JobOutcome, error: Option<String>) -> ProcessedJob {
    ProcessedJob {
        job_id: job.id,
        kind: job.kind.clone(),
        outcome,
        error,
    }
}

/// Failures outside any step are judged against the job-level budget,
/// counted in claims.
fn job_level_failure(
    policy: &RetryPolicy,
    total_tried: u32,
    error: ErrorInfo,
    now: chrono::DateTime<Utc>,
) -> Finalization {
    if RetryHandler::should_retry(policy, total_tried) {
        Finalization::Requeue {
            error,
            wait_until: RetryHandler::next_eligible_at(
                RetryHandler::delay_for(policy, total_tried),
                now,
            ),
        }
    } else {
        Finalization::Failed { error }
    }
}

fn merge_stop_reasons(stops: &[StopReason]) -> StopReason {
    const PRIORITY: [StopReason; 4] = [
        StopReason::StoreUnavailable,
        StopReason::Cancelled,
        StopReason::LimitReached,
        StopReason::TimeBudgetExhausted,
    ];
    PRIORITY
        .into_iter()
        .find(|reason| stops.contains(reason))
        .unwrap_or(StopReason::QueueDrained)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

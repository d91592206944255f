//! Task and workflow definitions.
//!
//! A definition pairs a slug with a handler, optional JSON schemas and a
//! retry policy. Definitions are built once at startup, handed to the
//! [`RegistryBuilder`](crate::registry::RegistryBuilder) and never mutated
//! afterwards.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use serde_json::Value;
use taskloom_types::job::{ErrorInfo, Job, JobKind, DEFAULT_QUEUE};
use taskloom_types::run::Trigger;
use uuid::Uuid;

use crate::engine::orchestrator::{WorkflowInterrupt, WorkflowSteps};
use crate::engine::retry::{Backoff, RetryPolicy};

// ---------------------------------------------------------------------------
// Handler contexts
// ---------------------------------------------------------------------------

/// What a handler knows about the job it runs inside.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job_id: Uuid,
    pub kind: JobKind,
    pub queue: String,
    /// Claims so far, this one included.
    pub total_tried: u32,
    pub created_at: DateTime<Utc>,
}

impl From<&Job> for JobContext {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id,
            kind: job.kind.clone(),
            queue: job.queue.clone(),
            total_tried: job.total_tried,
            created_at: job.created_at,
        }
    }
}

/// What a handler knows about the run cycle that claimed its job.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub run_id: Uuid,
    pub trigger: Trigger,
    pub started_at: DateTime<Utc>,
}

impl RequestContext {
    pub fn new(trigger: Trigger) -> Self {
        Self {
            run_id: Uuid::now_v7(),
            trigger,
            started_at: Utc::now(),
        }
    }
}

/// Arguments passed to every task handler.
#[derive(Debug, Clone)]
pub struct TaskArgs {
    pub input: Value,
    pub job: JobContext,
    pub req: RequestContext,
}

/// Arguments passed to a workflow handler. All work must go through `steps`.
#[derive(Clone)]
pub struct WorkflowArgs {
    pub input: Value,
    pub job: JobContext,
    pub req: RequestContext,
    pub steps: WorkflowSteps,
}

// ---------------------------------------------------------------------------
// TaskError
// ---------------------------------------------------------------------------

/// A failure raised by a task handler or hook.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("{0}")]
    Message(String),

    #[error("{message}")]
    Detailed { message: String, details: Value },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TaskError {
    pub fn msg(message: impl Into<String>) -> Self {
        TaskError::Message(message.into())
    }

    pub fn to_error_info(&self) -> ErrorInfo {
        match self {
            TaskError::Detailed { message, details } => {
                ErrorInfo::new(message.clone()).with_details(details.clone())
            }
            other => ErrorInfo::new(format!("{other:#}")),
        }
    }
}

impl From<serde_json::Error> for TaskError {
    fn from(e: serde_json::Error) -> Self {
        TaskError::Message(format!("json error: {e}"))
    }
}

// ---------------------------------------------------------------------------
// Handler types
// ---------------------------------------------------------------------------

pub type TaskHandler =
    Arc<dyn Fn(TaskArgs) -> BoxFuture<'static, Result<Value, TaskError>> + Send + Sync>;

pub type WorkflowHandler =
    Arc<dyn Fn(WorkflowArgs) -> BoxFuture<'static, Result<(), WorkflowInterrupt>> + Send + Sync>;

pub type SuccessHook =
    Arc<dyn Fn(JobContext, Value) -> BoxFuture<'static, Result<(), TaskError>> + Send + Sync>;

pub type FailHook =
    Arc<dyn Fn(JobContext, ErrorInfo) -> BoxFuture<'static, Result<(), TaskError>> + Send + Sync>;

/// Box an async closure into a [`TaskHandler`].
pub fn task_handler<F, Fut>(f: F) -> TaskHandler
where
    F: Fn(TaskArgs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, TaskError>> + Send + 'static,
{
    Arc::new(move |args| Box::pin(f(args)))
}

// ---------------------------------------------------------------------------
// TaskDefinition
// ---------------------------------------------------------------------------

/// A registered unit of work.
#[derive(Clone)]
pub struct TaskDefinition {
    pub slug: String,
    pub input_schema: Option<Value>,
    pub output_schema: Option<Value>,
    pub retry: RetryPolicy,
    pub handler: TaskHandler,
    pub on_success: Option<SuccessHook>,
    pub on_fail: Option<FailHook>,
}

impl TaskDefinition {
    pub fn new<F, Fut>(slug: impl Into<String>, handler: F) -> Self
    where
        F: Fn(TaskArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, TaskError>> + Send + 'static,
    {
        Self {
            slug: slug.into(),
            input_schema: None,
            output_schema: None,
            retry: RetryPolicy::default(),
            handler: task_handler(handler),
            on_success: None,
            on_fail: None,
        }
    }

    pub fn input_schema(mut self, schema: Value) -> Self {
        self.input_schema = Some(schema);
        self
    }

    pub fn output_schema(mut self, schema: Value) -> Self {
        self.output_schema = Some(schema);
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retry.retries = retries;
        self
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.retry.backoff = Some(backoff);
        self
    }

    /// Called after a successful attempt. Failures are logged, never fatal.
    pub fn on_success<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(JobContext, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        self.on_success = Some(Arc::new(move |ctx, out| Box::pin(hook(ctx, out))));
        self
    }

    /// Called once when the task exhausts its retries.
    pub fn on_fail<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(JobContext, ErrorInfo) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        self.on_fail = Some(Arc::new(move |ctx, err| Box::pin(hook(ctx, err))));
        self
    }
}

impl fmt::Debug for TaskDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskDefinition")
            .field("slug", &self.slug)
            .field("retry", &self.retry)
            .field("has_input_schema", &self.input_schema.is_some())
            .field("has_output_schema", &self.output_schema.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// WorkflowDefinition
// ---------------------------------------------------------------------------

/// A registered orchestration handler.
///
/// The handler is replayed from the top on every pass. Side effects outside
/// `WorkflowSteps::run_task` / `run_task_inline` repeat on each pass.
#[derive(Clone)]
pub struct WorkflowDefinition {
    pub slug: String,
    pub input_schema: Option<Value>,
    pub default_queue: String,
    /// Job-level budget for failures outside task steps, also used by
    /// inline steps.
    pub retry: RetryPolicy,
    pub handler: WorkflowHandler,
}

impl WorkflowDefinition {
    pub fn new<F, Fut>(slug: impl Into<String>, handler: F) -> Self
    where
        F: Fn(WorkflowArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), WorkflowInterrupt>> + Send + 'static,
    {
        Self {
            slug: slug.into(),
            input_schema: None,
            default_queue: DEFAULT_QUEUE.to_string(),
            retry: RetryPolicy::default(),
            handler: Arc::new(move |args| Box::pin(handler(args))),
        }
    }

    pub fn input_schema(mut self, schema: Value) -> Self {
        self.input_schema = Some(schema);
        self
    }

    pub fn default_queue(mut self, queue: impl Into<String>) -> Self {
        self.default_queue = queue.into();
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retry.retries = retries;
        self
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.retry.backoff = Some(backoff);
        self
    }
}

impl fmt::Debug for WorkflowDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowDefinition")
            .field("slug", &self.slug)
            .field("default_queue", &self.default_queue)
            .field("retry", &self.retry)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_task_definition_builder() {
        let def = TaskDefinition::new("createPost", |args| async move { Ok(args.input) })
            .input_schema(json!({"type": "object"}))
            .retries(2)
            .backoff(Backoff::Fixed { delay_ms: 10 });
        assert_eq!(def.slug, "createPost");
        assert_eq!(def.retry.retries, 2);
        assert!(def.input_schema.is_some());
        assert!(def.output_schema.is_none());
        assert!(def.on_success.is_none());
    }

    #[test]
    fn test_workflow_definition_defaults() {
        let def = WorkflowDefinition::new("publish", |_args| async move { Ok(()) });
        assert_eq!(def.default_queue, "default");
        assert_eq!(def.retry.retries, 0);
        let def = def.default_queue("posts");
        assert_eq!(def.default_queue, "posts");
    }

    #[test]
    fn test_task_error_to_error_info() {
        let info = TaskError::msg("boom").to_error_info();
        assert_eq!(info.message, "boom");
        assert!(info.details.is_none());

        let info = TaskError::Detailed {
            message: "rate limited".into(),
            details: json!({"retry_after": 30}),
        }
        .to_error_info();
        assert_eq!(info.details.unwrap()["retry_after"], 30);

        let info = TaskError::from(anyhow::anyhow!("upstream down")).to_error_info();
        assert!(info.message.contains("upstream down"));
    }

    #[tokio::test]
    async fn test_task_handler_invocation() {
        let def = TaskDefinition::new("double", |args| async move {
            let n = args.input["n"].as_i64().unwrap_or_default();
            Ok(json!({"n": n * 2}))
        });
        let args = TaskArgs {
            input: json!({"n": 21}),
            job: JobContext {
                job_id: Uuid::nil(),
                kind: JobKind::task("double"),
                queue: "default".into(),
                total_tried: 1,
                created_at: Utc::now(),
            },
            req: RequestContext::new(Trigger::Programmatic),
        };
        let out = (def.handler)(args).await.unwrap();
        assert_eq!(out, json!({"n": 42}));
    }
}

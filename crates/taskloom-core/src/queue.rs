//! Enqueue service: validate against the registry, then insert.
//!
//! Nothing reaches the store unless the referenced definition exists and the
//! input satisfies its schema. Rejected requests never create a job.

use std::sync::Arc;

use taskloom_types::error::StoreError;
use taskloom_types::job::{EnqueueRequest, Job, NewJob, DEFAULT_QUEUE};

use crate::registry::{Definition, DefinitionRegistry, RegistryError};
use crate::repository::job::JobStore;
use crate::schema::SchemaError;

#[derive(Debug, thiserror::Error)]
pub enum EnqueueError {
    #[error(transparent)]
    Definition(#[from] RegistryError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("failed to store job: {0}")]
    Store(#[from] StoreError),
}

impl EnqueueError {
    /// Whether the caller, not the system, is at fault.
    pub fn is_rejection(&self) -> bool {
        !matches!(self, EnqueueError::Store(_))
    }
}

/// Front door for creating jobs.
pub struct JobQueue<S: JobStore> {
    store: Arc<S>,
    registry: Arc<DefinitionRegistry>,
}

impl<S: JobStore> Clone for JobQueue<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            registry: self.registry.clone(),
        }
    }
}

impl<S: JobStore> JobQueue<S> {
    pub fn new(store: Arc<S>, registry: Arc<DefinitionRegistry>) -> Self {
        Self { store, registry }
    }

    /// Validate and insert a job with status `queued`.
    ///
    /// The queue defaults to the workflow's `default_queue`, then `"default"`.
    pub async fn enqueue(&self, request: EnqueueRequest) -> Result<Job, EnqueueError> {
        let definition = self.registry.resolve(&request.kind)?;
        definition.validate_input(&request.input)?;

        let queue = request.queue.unwrap_or_else(|| match &definition {
            Definition::Workflow(workflow) => workflow.definition.default_queue.clone(),
            Definition::Task(_) => DEFAULT_QUEUE.to_string(),
        });

        let mut new = NewJob::new(request.kind, request.input).queue(queue);
        if let Some(at) = request.wait_until {
            new = new.wait_until(at);
        }

        let job = self.store.insert_job(new).await?;
        tracing::info!(
            job_id = %job.id,
            kind = %job.kind,
            queue = %job.queue,
            "job enqueued"
        );
        Ok(job)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use serde_json::json;
    use taskloom_types::job::{JobKind, JobStatus};

    use super::*;
    use crate::definition::{TaskDefinition, WorkflowDefinition};
    use crate::registry::RegistryBuilder;
    use crate::repository::memory::InMemoryJobStore;

    fn queue() -> JobQueue<InMemoryJobStore> {
        let mut builder = RegistryBuilder::new();
        builder
            .register(
                TaskDefinition::new("createPost", |args| async move { Ok(args.input) })
                    .input_schema(json!({
                        "type": "object",
                        "properties": {"title": {"type": "string"}},
                        "required": ["title"]
                    })),
            )
            .unwrap();
        builder
            .register(
                WorkflowDefinition::new("publish", |_| async { Ok(()) }).default_queue("posts"),
            )
            .unwrap();
        JobQueue::new(Arc::new(InMemoryJobStore::new()), Arc::new(builder.build()))
    }

    #[tokio::test]
    async fn test_enqueue_valid_task() {
        let queue = queue();
        let job = queue
            .enqueue(EnqueueRequest::new(
                JobKind::task("createPost"),
                json!({"title": "Hello"}),
            ))
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.queue, "default");
        assert_eq!(job.total_tried, 0);
        assert!(job.task_status.is_empty());
    }

    #[tokio::test]
    async fn test_enqueue_rejects_schema_mismatch() {
        let queue = queue();
        let err = queue
            .enqueue(EnqueueRequest::new(JobKind::task("createPost"), json!({"title": 1})))
            .await
            .unwrap_err();
        assert!(matches!(err, EnqueueError::Schema(_)));
        assert!(err.is_rejection());
        assert!(queue.store.list_jobs(&Default::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_enqueue_rejects_unknown_slug() {
        let queue = queue();
        let err = queue
            .enqueue(EnqueueRequest::new(JobKind::workflow("createPost"), json!({})))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EnqueueError::Definition(RegistryError::UnknownDefinition { .. })
        ));
    }

    #[tokio::test]
    async fn test_workflow_default_queue_and_override() {
        let queue = queue();
        let job = queue
            .enqueue(EnqueueRequest::new(JobKind::workflow("publish"), json!({})))
            .await
            .unwrap();
        assert_eq!(job.queue, "posts");

        let later = Utc::now() + Duration::hours(1);
        let job = queue
            .enqueue(
                EnqueueRequest::new(JobKind::workflow("publish"), json!({}))
                    .queue("urgent")
                    .wait_until(later),
            )
            .await
            .unwrap();
        assert_eq!(job.queue, "urgent");
        assert_eq!(job.wait_until, Some(later));
    }
}

//! Diagnostic definitions shipped with the binary.
//!
//! `echo`, `sleep` and the `echo-chain` workflow let an operator smoke-test a
//! queue end to end without writing host code. Library users build their own
//! registry instead.

use std::time::Duration;

use serde_json::json;
use taskloom_core::definition::{TaskDefinition, TaskError, WorkflowDefinition};
use taskloom_core::registry::{DefinitionRegistry, RegistryError};

/// Longest sleep the `sleep` task accepts.
const MAX_SLEEP_MS: u64 = 60_000;

pub fn registry() -> Result<DefinitionRegistry, RegistryError> {
    let mut builder = DefinitionRegistry::builder();
    builder
        .register(echo())?
        .register(sleep())?
        .register(echo_chain())?;
    Ok(builder.build())
}

/// Returns its input unchanged.
fn echo() -> TaskDefinition {
    TaskDefinition::new("echo", |args| async move { Ok(args.input) }).retries(2)
}

/// Waits `ms` milliseconds, then reports how long it slept.
fn sleep() -> TaskDefinition {
    TaskDefinition::new("sleep", |args| async move {
        let ms = args
            .input
            .get("ms")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| TaskError::msg("expected {\"ms\": <integer>}"))?;
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(json!({ "slept_ms": ms }))
    })
    .input_schema(json!({
        "type": "object",
        "properties": {
            "ms": { "type": "integer", "minimum": 0, "maximum": MAX_SLEEP_MS }
        },
        "required": ["ms"]
    }))
    .output_schema(json!({
        "type": "object",
        "properties": { "slept_ms": { "type": "integer" } },
        "required": ["slept_ms"]
    }))
}

/// Two linked `echo` steps: the second receives the first one's output.
fn echo_chain() -> WorkflowDefinition {
    WorkflowDefinition::new("echo-chain", |args| async move {
        let first = args.steps.run_task("echo", "first", args.input.clone()).await?;
        let second = args
            .steps
            .run_task("echo", "second", json!({ "previous": first }))
            .await?;
        tracing::info!(job_id = %args.job.job_id, output = %second, "echo-chain finished");
        Ok(())
    })
    .retries(1)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use taskloom_core::engine::runner::Runner;
    use taskloom_core::queue::JobQueue;
    use taskloom_core::repository::job::JobStore;
    use taskloom_core::repository::memory::InMemoryJobStore;
    use taskloom_types::job::{EnqueueRequest, JobKind, JobStatus};
    use taskloom_types::run::{JobOutcome, RunRequest};

    use super::*;

    #[test]
    fn test_registry_contents() {
        let registry = registry().unwrap();
        assert_eq!(registry.task_slugs(), vec!["echo", "sleep"]);
        assert_eq!(registry.workflow_slugs(), vec!["echo-chain"]);
    }

    #[tokio::test]
    async fn test_sleep_rejects_missing_ms() {
        let registry = Arc::new(registry().unwrap());
        let queue = JobQueue::new(Arc::new(InMemoryJobStore::new()), registry);
        let result = queue
            .enqueue(EnqueueRequest::new(JobKind::task("sleep"), json!({})))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_echo_chain_runs_to_completion() {
        let store = Arc::new(InMemoryJobStore::new());
        let registry = Arc::new(registry().unwrap());
        let queue = JobQueue::new(store.clone(), registry.clone());
        let job = queue
            .enqueue(EnqueueRequest::new(
                JobKind::workflow("echo-chain"),
                json!({ "hello": "world" }),
            ))
            .await
            .unwrap();

        let summary = Runner::new(store.clone(), registry)
            .run(RunRequest::new("default", 5))
            .await;
        assert_eq!(summary.count(JobOutcome::Completed), 1);

        let job = store.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(
            job.task_status.completed_output("echo", "second"),
            Some(&json!({ "previous": { "hello": "world" } }))
        );
    }
}

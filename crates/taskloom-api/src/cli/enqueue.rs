//! `taskloom enqueue task|workflow <slug>`.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use console::style;
use serde_json::Value;
use taskloom_types::job::{EnqueueRequest, JobKind};

use crate::state::AppState;

#[derive(Subcommand)]
pub enum EnqueueTarget {
    /// Enqueue a single task.
    Task(EnqueueArgs),
    /// Enqueue a workflow.
    Workflow(EnqueueArgs),
}

#[derive(Args)]
pub struct EnqueueArgs {
    /// Definition slug.
    pub slug: String,

    /// JSON input passed to the handler.
    #[arg(long, default_value = "{}")]
    pub input: String,

    /// Queue (defaults to the definition's queue, then "default").
    #[arg(long)]
    pub queue: Option<String>,

    /// Do not run before this many seconds from now.
    #[arg(long)]
    pub delay: Option<u64>,
}

impl EnqueueTarget {
    fn into_request(self) -> Result<EnqueueRequest> {
        let (kind, args) = match self {
            EnqueueTarget::Task(args) => (JobKind::task(args.slug.clone()), args),
            EnqueueTarget::Workflow(args) => (JobKind::workflow(args.slug.clone()), args),
        };

        let input: Value =
            serde_json::from_str(&args.input).with_context(|| "Invalid JSON input")?;

        let mut request = EnqueueRequest::new(kind, input);
        if let Some(queue) = args.queue {
            request = request.queue(queue);
        }
        if let Some(secs) = args.delay {
            let delay = i64::try_from(secs)
                .ok()
                .and_then(chrono::Duration::try_seconds)
                .context("--delay is too large")?;
            request = request.wait_until(chrono::Utc::now() + delay);
        }
        Ok(request)
    }
}

pub async fn handle_enqueue(target: EnqueueTarget, state: &AppState, json: bool) -> Result<()> {
    let request = target.into_request()?;
    let job = state.queue.enqueue(request).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&job)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} Enqueued {} on queue '{}'",
        style("*").green().bold(),
        style(&job.kind).cyan(),
        job.queue
    );
    println!("  Job ID: {}", job.id);
    if let Some(at) = job.wait_until {
        println!("  Not before: {}", at.to_rfc3339());
    }
    println!();
    println!(
        "  Process it with: {}",
        style(format!("taskloom run --queue {}", job.queue)).dim()
    );
    println!();

    Ok(())
}

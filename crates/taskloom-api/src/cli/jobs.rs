//! `taskloom jobs list|show|purge`.

use anyhow::{bail, Result};
use clap::Subcommand;
use comfy_table::{presets, Cell, Color, ContentArrangement, Table};
use console::style;
use taskloom_core::repository::job::JobStore;
use taskloom_types::job::{Job, JobFilter, JobLogState, JobStatus};
use uuid::Uuid;

use crate::state::AppState;

#[derive(Subcommand)]
pub enum JobsCommand {
    /// List jobs, oldest first.
    List {
        /// Only jobs on this queue.
        #[arg(long)]
        queue: Option<String>,

        /// Only jobs in this status (queued, running, completed, failed).
        #[arg(long)]
        status: Option<JobStatus>,

        /// Maximum rows.
        #[arg(long, default_value_t = 50)]
        limit: u32,
    },

    /// Show one job with its checkpoints and attempt log.
    Show {
        /// Job ID.
        id: Uuid,
    },

    /// Delete completed jobs.
    Purge {
        /// Only purge this queue.
        #[arg(long)]
        queue: Option<String>,
    },

    /// Delete one job in any status.
    Delete {
        /// Job ID.
        id: Uuid,
    },
}

pub async fn handle_jobs(action: JobsCommand, state: &AppState, json: bool) -> Result<()> {
    match action {
        JobsCommand::List {
            queue,
            status,
            limit,
        } => {
            let filter = JobFilter {
                queue,
                status,
                limit,
            };
            list_jobs(state, &filter, json).await
        }
        JobsCommand::Show { id } => show_job(state, &id, json).await,
        JobsCommand::Purge { queue } => {
            let removed = state.store.delete_completed(queue.as_deref()).await?;
            if json {
                println!("{}", serde_json::json!({ "deleted": removed }));
            } else {
                println!(
                    "  {} Purged {} completed job(s)",
                    style("*").green().bold(),
                    removed
                );
            }
            Ok(())
        }
        JobsCommand::Delete { id } => {
            if !state.store.delete_job(&id).await? {
                bail!("Job {id} not found");
            }
            if json {
                println!("{}", serde_json::json!({ "deleted": id }));
            } else {
                println!("  {} Deleted job {}", style("*").green().bold(), id);
            }
            Ok(())
        }
    }
}

async fn list_jobs(state: &AppState, filter: &JobFilter, json: bool) -> Result<()> {
    let jobs = state.store.list_jobs(filter).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&jobs)?);
        return Ok(());
    }

    if jobs.is_empty() {
        println!();
        println!("  No jobs found.");
        println!(
            "  Enqueue one with: {}",
            style("taskloom enqueue task echo --input '{}'").dim()
        );
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Job ID").fg(Color::Cyan),
            Cell::new("Kind"),
            Cell::new("Queue"),
            Cell::new("Status"),
            Cell::new("Tries"),
            Cell::new("Created"),
        ]);

    for job in &jobs {
        table.add_row(vec![
            Cell::new(job.id.to_string().chars().take(8).collect::<String>()),
            Cell::new(&job.kind),
            Cell::new(&job.queue),
            status_cell(job.status),
            Cell::new(job.total_tried),
            Cell::new(job.created_at.format("%Y-%m-%d %H:%M").to_string()),
        ]);
    }

    println!("{table}");
    Ok(())
}

async fn show_job(state: &AppState, id: &Uuid, json: bool) -> Result<()> {
    let Some(job) = state.store.get_job(id).await? else {
        bail!("Job {id} not found");
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&job)?);
        return Ok(());
    }

    print_job(&job);
    Ok(())
}

fn print_job(job: &Job) {
    println!();
    println!("  {} {}", style("Job:").bold(), style(job.id).cyan());
    println!("  Kind: {}", style(&job.kind).cyan());
    println!("  Queue: {}", job.queue);
    println!("  Status: {}", job.status);
    println!("  Tries: {}", job.total_tried);
    println!("  Created: {}", job.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
    if let Some(at) = job.wait_until {
        println!("  Not before: {}", at.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    if let Some(at) = job.completed_at {
        println!("  Finished: {}", at.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    if let Some(err) = &job.error {
        println!("  Error: {}", style(err).red());
    }

    if !job.task_status.is_empty() {
        println!();
        println!("  {}", style("Checkpoints:").bold());
        let mut table = Table::new();
        table
            .load_preset(presets::UTF8_FULL_CONDENSED)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(vec![
                Cell::new("Task").fg(Color::Cyan),
                Cell::new("Step"),
                Cell::new("Complete"),
                Cell::new("Attempts"),
                Cell::new("Output / Error"),
            ]);
        for (slug, step_id, record) in job.task_status.iter() {
            let detail = match (&record.output, &record.error) {
                (Some(output), _) => output.to_string(),
                (None, Some(err)) => err.to_string(),
                (None, None) => "-".to_string(),
            };
            table.add_row(vec![
                Cell::new(slug),
                Cell::new(step_id),
                Cell::new(if record.complete { "yes" } else { "no" }),
                Cell::new(record.attempts),
                Cell::new(detail),
            ]);
        }
        println!("{table}");
    }

    if !job.log.is_empty() {
        println!();
        println!("  {}", style("Attempts:").bold());
        for entry in &job.log {
            let state = match entry.state {
                JobLogState::Succeeded => style("ok").green(),
                JobLogState::Failed => style("failed").red(),
            };
            let elapsed = (entry.completed_at - entry.executed_at).num_milliseconds();
            print!(
                "  {} {}/{} {} ({elapsed} ms)",
                entry.executed_at.format("%H:%M:%S"),
                entry.task_slug,
                entry.step_id,
                state
            );
            match &entry.error {
                Some(err) => println!(": {}", style(err).red()),
                None => println!(),
            }
        }
    }
    println!();
}

fn status_cell(status: JobStatus) -> Cell {
    let cell = Cell::new(status);
    match status {
        JobStatus::Queued => cell.fg(Color::Yellow),
        JobStatus::Running => cell.fg(Color::Blue),
        JobStatus::Completed => cell.fg(Color::Green),
        JobStatus::Failed => cell.fg(Color::Red),
    }
}

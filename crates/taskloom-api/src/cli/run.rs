//! `taskloom run`: one drain pass, or recurring passes with `--cron`.

use std::sync::Arc;

use anyhow::Result;
use clap::Args;
use comfy_table::{presets, Cell, Color, ContentArrangement, Table};
use console::style;
use taskloom_core::engine::scheduler::{upcoming_fires, RunCallback, RunScheduler};
use taskloom_types::config::RunnerConfig;
use taskloom_types::run::{JobOutcome, RunRequest, RunSummary, StopReason, Trigger};
use tokio_util::sync::CancellationToken;

use crate::state::{AppState, ConcreteRunner};

#[derive(Args)]
pub struct RunArgs {
    /// Queue to drain (defaults to `[runner].default_queue`).
    #[arg(long)]
    pub queue: Option<String>,

    /// Maximum jobs to claim (defaults to `[runner].default_limit`).
    #[arg(long)]
    pub limit: Option<u32>,

    /// Stop claiming after this many seconds.
    #[arg(long)]
    pub time_budget: Option<u64>,

    /// Repeat on a schedule until interrupted ("*/5 * * * *", "every 10 minutes").
    #[arg(long)]
    pub cron: Option<String>,
}

impl RunArgs {
    fn to_request(&self, runner: &RunnerConfig, trigger: Trigger) -> RunRequest {
        let mut request = RunRequest::new(
            self.queue
                .clone()
                .unwrap_or_else(|| runner.default_queue.clone()),
            self.limit.unwrap_or(runner.default_limit),
        )
        .triggered_by(trigger);

        let budget_ms = self
            .time_budget
            .or(runner.time_budget_secs)
            .map(|s| s.saturating_mul(1000));
        if let Some(ms) = budget_ms {
            request = request.with_time_budget_ms(ms);
        }
        request
    }
}

pub async fn handle_run(
    args: RunArgs,
    state: &AppState,
    shutdown: CancellationToken,
    json: bool,
    quiet: bool,
) -> Result<()> {
    match args.cron.clone() {
        None => {
            let request = args.to_request(&state.config.runner, Trigger::Cli);
            let summary = state.runner.run(request).await;
            if !quiet {
                print_summary(&summary, json)?;
            }
            if summary.stop_reason == StopReason::StoreUnavailable {
                anyhow::bail!(
                    "job store unavailable: {}",
                    summary.store_error.as_deref().unwrap_or("unknown error")
                );
            }
            Ok(())
        }
        Some(schedule) => {
            let request = args.to_request(&state.config.runner, Trigger::Cron);
            run_on_schedule(&schedule, request, state, shutdown, json, quiet).await
        }
    }
}

/// Fire `request` on `schedule` until `shutdown` is cancelled.
async fn run_on_schedule(
    schedule: &str,
    request: RunRequest,
    state: &AppState,
    shutdown: CancellationToken,
    json: bool,
    quiet: bool,
) -> Result<()> {
    let scheduler = RunScheduler::new();
    scheduler.start().await?;

    let callback = run_callback(state.runner.clone(), request.clone(), move |summary| {
        if quiet {
            return;
        }
        if let Err(e) = print_summary(summary, json) {
            tracing::warn!(error = %e, "failed to print run summary");
        }
    });
    let entry = scheduler.schedule(&request.queue, schedule, callback).await?;

    if !quiet && !json {
        println!();
        println!(
            "  {} Running queue '{}' on {}",
            style("*").green().bold(),
            style(&request.queue).cyan(),
            style(&entry.cron_expr).cyan()
        );
        let next = upcoming_fires(schedule, chrono::Utc::now(), 1).unwrap_or_default();
        if let Some(at) = next.first() {
            println!("  Next run: {}", at.format("%Y-%m-%d %H:%M:%S UTC"));
        }
        println!("  {}", style("Press Ctrl+C to stop").dim());
        println!();
    }

    shutdown.cancelled().await;
    scheduler.stop().await?;
    Ok(())
}

/// Build a scheduler callback that runs `request` and hands the summary to
/// `report`.
pub fn run_callback<F>(runner: ConcreteRunner, request: RunRequest, report: F) -> RunCallback
where
    F: Fn(&RunSummary) + Send + Sync + 'static,
{
    let report = Arc::new(report);
    Arc::new(move |_fired_at| {
        let runner = runner.clone();
        let request = request.clone();
        let report = report.clone();
        Box::pin(async move {
            let summary = runner.run(request).await;
            report(&summary);
        })
    })
}

fn print_summary(summary: &RunSummary, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
        return Ok(());
    }

    if summary.jobs.is_empty() {
        println!(
            "  No jobs processed on queue '{}' ({}).",
            summary.queue,
            stop_reason_label(summary.stop_reason)
        );
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Job ID").fg(Color::Cyan),
            Cell::new("Kind"),
            Cell::new("Outcome"),
            Cell::new("Error"),
        ]);

    for job in &summary.jobs {
        table.add_row(vec![
            Cell::new(job.job_id.to_string().chars().take(8).collect::<String>()),
            Cell::new(&job.kind),
            outcome_cell(job.outcome),
            Cell::new(job.error.as_deref().unwrap_or("-")),
        ]);
    }

    println!("{table}");
    println!(
        "  {} completed, {} failed, {} requeued in {} ms ({})",
        style(summary.count(JobOutcome::Completed)).green(),
        style(summary.count(JobOutcome::Failed)).red(),
        style(summary.count(JobOutcome::Requeued)).yellow(),
        summary.elapsed_ms,
        stop_reason_label(summary.stop_reason)
    );
    if let Some(err) = &summary.store_error {
        println!("  Store error: {}", style(err).red());
    }
    Ok(())
}

fn outcome_cell(outcome: JobOutcome) -> Cell {
    match outcome {
        JobOutcome::Completed => Cell::new("completed").fg(Color::Green),
        JobOutcome::Failed => Cell::new("failed").fg(Color::Red),
        JobOutcome::Requeued => Cell::new("requeued").fg(Color::Yellow),
        JobOutcome::Abandoned => Cell::new("abandoned").fg(Color::DarkGrey),
    }
}

fn stop_reason_label(reason: StopReason) -> &'static str {
    match reason {
        StopReason::QueueDrained => "queue drained",
        StopReason::LimitReached => "limit reached",
        StopReason::TimeBudgetExhausted => "time budget exhausted",
        StopReason::Cancelled => "cancelled",
        StopReason::StoreUnavailable => "store unavailable",
    }
}

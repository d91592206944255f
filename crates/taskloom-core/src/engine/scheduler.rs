//! Cron scheduler wrapping `tokio-cron-scheduler` for recurring run cycles.
//!
//! Used by `taskloom run --cron` and by `taskloom serve` for `[[auto_run]]`
//! entries. Each fire invokes a callback that normally calls `Runner::run`.
//! Overlapping fires are safe: two runs racing on the same queue never claim
//! the same job.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur during scheduling operations.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// Failed to create or manipulate a cron job.
    #[error("scheduler error: {0}")]
    JobError(String),

    /// Invalid cron expression or schedule string.
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),
}

// ---------------------------------------------------------------------------
// Human-readable schedule normalization
// ---------------------------------------------------------------------------

/// Normalize a schedule string to a 6-field (seconds-first) cron expression.
///
/// Accepts 5-field cron (seconds are prepended as `0`), 6-field cron, and
/// these case-insensitive forms:
/// - "every N seconds" / "every N minutes" / "every N hours"
/// - "every minute", "every hour", "every day"
/// - "every day at HH:MM"
/// - "minutely", "hourly", "daily"
pub fn normalize_schedule(input: &str) -> Result<String, SchedulerError> {
    let trimmed = input.trim();

    let parts: Vec<&str> = trimmed.split_whitespace().collect();
    if parts.len() == 5 {
        return Ok(format!("0 {trimmed}"));
    }
    if parts.len() == 6 {
        return Ok(trimmed.to_string());
    }

    let lower = trimmed.to_lowercase();
    match lower.as_str() {
        "every minute" | "minutely" => return Ok("0 * * * * *".to_string()),
        "every hour" | "hourly" => return Ok("0 0 * * * *".to_string()),
        "every day" | "daily" => return Ok("0 0 0 * * *".to_string()),
        _ => {}
    }

    let invalid = || SchedulerError::InvalidSchedule(input.to_string());

    if let Some(rest) = lower.strip_prefix("every ") {
        if let Some(at) = rest.strip_prefix("day at ") {
            let (hour, minute) = at.split_once(':').ok_or_else(invalid)?;
            let hour: u32 = hour.trim().parse().map_err(|_| invalid())?;
            let minute: u32 = minute.trim().parse().map_err(|_| invalid())?;
            if hour < 24 && minute < 60 {
                return Ok(format!("0 {minute} {hour} * * *"));
            }
            return Err(invalid());
        }

        let words: Vec<&str> = rest.split_whitespace().collect();
        if let [count, unit] = words.as_slice() {
            let n: u32 = count.parse().map_err(|_| invalid())?;
            if n == 0 {
                return Err(SchedulerError::InvalidSchedule(
                    "interval must be > 0".to_string(),
                ));
            }
            return match unit.trim_end_matches('s') {
                "second" => Ok(format!("*/{n} * * * * *")),
                "minute" => Ok(format!("0 */{n} * * * *")),
                "hour" => Ok(format!("0 0 */{n} * * *")),
                _ => Err(invalid()),
            };
        }
    }

    Err(SchedulerError::InvalidSchedule(format!(
        "unrecognized schedule format: '{trimmed}'"
    )))
}

/// The next `count` fire times of `schedule` after `from`.
pub fn upcoming_fires(
    schedule: &str,
    from: DateTime<Utc>,
    count: usize,
) -> Result<Vec<DateTime<Utc>>, SchedulerError> {
    let cron_expr = normalize_schedule(schedule)?;
    let cron = cron_expr
        .parse::<croner::Cron>()
        .map_err(|e| SchedulerError::InvalidSchedule(e.to_string()))?;
    Ok(cron.iter_after(from).take(count).collect())
}

// ---------------------------------------------------------------------------
// RunScheduler
// ---------------------------------------------------------------------------

/// Callback invoked each time a schedule fires.
pub type RunCallback =
    Arc<dyn Fn(DateTime<Utc>) -> futures_util::future::BoxFuture<'static, ()> + Send + Sync>;

/// A registered recurring run.
#[derive(Debug, Clone)]
pub struct ScheduledRun {
    /// The job UUID assigned by tokio-cron-scheduler.
    pub job_id: Uuid,
    /// Human label, usually the queue name.
    pub label: String,
    /// The normalized cron expression.
    pub cron_expr: String,
}

/// Cron scheduler that wraps `tokio-cron-scheduler::JobScheduler`.
pub struct RunScheduler {
    inner: Arc<RwLock<Option<JobScheduler>>>,
    runs: Arc<RwLock<Vec<ScheduledRun>>>,
}

impl RunScheduler {
    /// Create a new scheduler (not yet started).
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(None)),
            runs: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Start the scheduler. Must be called before scheduling runs.
    pub async fn start(&self) -> Result<(), SchedulerError> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| SchedulerError::JobError(e.to_string()))?;

        scheduler
            .start()
            .await
            .map_err(|e| SchedulerError::JobError(e.to_string()))?;

        *self.inner.write().await = Some(scheduler);

        tracing::info!("run scheduler started");
        Ok(())
    }

    /// Stop the scheduler and drop all registered runs.
    pub async fn stop(&self) -> Result<(), SchedulerError> {
        if let Some(mut scheduler) = self.inner.write().await.take() {
            scheduler
                .shutdown()
                .await
                .map_err(|e| SchedulerError::JobError(e.to_string()))?;
            tracing::info!("run scheduler stopped");
        }
        self.runs.write().await.clear();
        Ok(())
    }

    /// Register `callback` to fire on `schedule` (cron or human-readable).
    pub async fn schedule(
        &self,
        label: &str,
        schedule: &str,
        callback: RunCallback,
    ) -> Result<ScheduledRun, SchedulerError> {
        let cron_expr = normalize_schedule(schedule)?;

        let inner = self.inner.read().await;
        let scheduler = inner
            .as_ref()
            .ok_or_else(|| SchedulerError::JobError("scheduler not started".to_string()))?;

        let fire_label = label.to_string();
        let job = Job::new_async(cron_expr.as_str(), move |_uuid, _lock| {
            let cb = callback.clone();
            let label = fire_label.clone();
            Box::pin(async move {
                let now = Utc::now();
                tracing::debug!(label = %label, %now, "scheduled run fired");
                cb(now).await;
            })
        })
        .map_err(|e| SchedulerError::InvalidSchedule(e.to_string()))?;

        let job_id = job.guid();
        scheduler
            .add(job)
            .await
            .map_err(|e| SchedulerError::JobError(e.to_string()))?;

        let entry = ScheduledRun {
            job_id,
            label: label.to_string(),
            cron_expr,
        };
        self.runs.write().await.push(entry.clone());

        tracing::info!(label, cron = %entry.cron_expr, %job_id, "run scheduled");
        Ok(entry)
    }

    /// Currently registered runs.
    pub async fn scheduled(&self) -> Vec<ScheduledRun> {
        self.runs.read().await.clone()
    }
}

impl Default for RunScheduler {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Run-cycle request and summary types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::job::{JobKind, DEFAULT_QUEUE};

/// Which surface started a run. Handlers see it through their request context.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    #[default]
    Programmatic,
    Cli,
    Http,
    Cron,
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Trigger::Programmatic => "programmatic",
            Trigger::Cli => "cli",
            Trigger::Http => "http",
            Trigger::Cron => "cron",
        };
        f.write_str(s)
    }
}

/// Parameters for one `Runner::run` invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    pub queue: String,
    /// Maximum number of jobs this run will claim.
    pub limit: u32,
    /// Stop starting new claims after this many milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_budget_ms: Option<u64>,
    #[serde(default)]
    pub trigger: Trigger,
}

impl RunRequest {
    pub fn new(queue: impl Into<String>, limit: u32) -> Self {
        Self {
            queue: queue.into(),
            limit,
            time_budget_ms: None,
            trigger: Trigger::default(),
        }
    }

    pub fn with_time_budget_ms(mut self, ms: u64) -> Self {
        self.time_budget_ms = Some(ms);
        self
    }

    pub fn triggered_by(mut self, trigger: Trigger) -> Self {
        self.trigger = trigger;
        self
    }
}

impl Default for RunRequest {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE, 10)
    }
}

/// What happened to one claimed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOutcome {
    Completed,
    Failed,
    /// Returned to `queued` for a later pass.
    Requeued,
    /// The claim was lost mid-pass (stale lock); no final write was made.
    Abandoned,
}

/// One processed job within a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedJob {
    pub job_id: Uuid,
    pub kind: JobKind,
    pub outcome: JobOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Why a run stopped claiming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    QueueDrained,
    LimitReached,
    TimeBudgetExhausted,
    /// Shutdown was requested while the run was in progress.
    Cancelled,
    StoreUnavailable,
}

/// Result of one `Runner::run` invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub queue: String,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub stop_reason: StopReason,
    pub jobs: Vec<ProcessedJob>,
    /// Claim-time store failure that ended the run early.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_error: Option<String>,
}

impl RunSummary {
    pub fn claimed(&self) -> usize {
        self.jobs.len()
    }

    pub fn count(&self, outcome: JobOutcome) -> usize {
        self.jobs.iter().filter(|j| j.outcome == outcome).count()
    }
}

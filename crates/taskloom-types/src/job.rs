//! Job domain types for taskloom.
//!
//! A `Job` is one queued or executing instance of a task or workflow. Besides
//! its lifecycle status it carries the checkpoint ledger (`task_status`): a
//! mapping from task slug to step id to `StepRecord`. The ledger is what makes
//! workflow resume possible -- completed records are replayed from cache on
//! every later pass instead of re-running their handlers.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Queue used when a caller does not name one.
pub const DEFAULT_QUEUE: &str = "default";

/// Reserved ledger bucket for tasks supplied as closures at call time.
pub const INLINE_BUCKET: &str = "inline";

// ---------------------------------------------------------------------------
// JobKind
// ---------------------------------------------------------------------------

/// What a job executes: one registered task or one registered workflow.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "slug", rename_all = "snake_case")]
pub enum JobKind {
    Task(String),
    Workflow(String),
}

impl JobKind {
    pub fn task(slug: impl Into<String>) -> Self {
        JobKind::Task(slug.into())
    }

    pub fn workflow(slug: impl Into<String>) -> Self {
        JobKind::Workflow(slug.into())
    }

    /// The referenced definition slug.
    pub fn slug(&self) -> &str {
        match self {
            JobKind::Task(slug) | JobKind::Workflow(slug) => slug,
        }
    }

    /// `"task"` or `"workflow"`, as persisted in the `kind` column.
    pub fn kind_name(&self) -> &'static str {
        match self {
            JobKind::Task(_) => "task",
            JobKind::Workflow(_) => "workflow",
        }
    }

    /// Rebuild a kind from its persisted `(kind, slug)` pair.
    pub fn from_parts(kind: &str, slug: impl Into<String>) -> Option<Self> {
        match kind {
            "task" => Some(JobKind::Task(slug.into())),
            "workflow" => Some(JobKind::Workflow(slug.into())),
            _ => None,
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind_name(), self.slug())
    }
}

// ---------------------------------------------------------------------------
// JobStatus
// ---------------------------------------------------------------------------

/// Lifecycle status of a job.
///
/// Legal transitions: `queued -> running`, `running -> completed | failed`,
/// and `running -> queued` when a recoverable failure still has retries left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("invalid job status: '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// ErrorInfo / StepRecord
// ---------------------------------------------------------------------------

/// A persisted error: message plus optional structured details.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ErrorInfo {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Persisted outcome of one task step within a job.
///
/// Once `complete` is true the record is immutable: later writes for the same
/// `(slug, step_id)` are ignored by every store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub complete: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    /// Total handler invocations so far, including the successful one.
    pub attempts: u32,
}

impl StepRecord {
    pub fn succeeded(output: Value, attempts: u32) -> Self {
        Self {
            complete: true,
            output: Some(output),
            error: None,
            attempts,
        }
    }

    pub fn failed(error: ErrorInfo, attempts: u32) -> Self {
        Self {
            complete: false,
            output: None,
            error: Some(error),
            attempts,
        }
    }
}

// ---------------------------------------------------------------------------
// CheckpointLedger
// ---------------------------------------------------------------------------

/// The `task_status` mapping: task slug -> step id -> record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CheckpointLedger(BTreeMap<String, BTreeMap<String, StepRecord>>);

impl CheckpointLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, slug: &str, step_id: &str) -> Option<&StepRecord> {
        self.0.get(slug).and_then(|steps| steps.get(step_id))
    }

    /// Cached output of a completed step, if any.
    pub fn completed_output(&self, slug: &str, step_id: &str) -> Option<&Value> {
        self.get(slug, step_id)
            .filter(|record| record.complete)
            .and_then(|record| record.output.as_ref())
    }

    /// All step records under one slug bucket.
    pub fn steps(&self, slug: &str) -> Option<&BTreeMap<String, StepRecord>> {
        self.0.get(slug)
    }

    /// Upsert a record, honoring write-once semantics.
    ///
    /// Returns `false` (and leaves the ledger untouched) when the existing
    /// record for `(slug, step_id)` is already complete.
    pub fn apply(&mut self, slug: &str, step_id: &str, record: StepRecord) -> bool {
        let steps = self.0.entry(slug.to_string()).or_default();
        match steps.get(step_id) {
            Some(existing) if existing.complete => false,
            _ => {
                steps.insert(step_id.to_string(), record);
                true
            }
        }
    }

    /// Number of step records across all buckets.
    pub fn len(&self) -> usize {
        self.0.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate `(slug, step_id, record)` triples in slug/step order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &StepRecord)> {
        self.0.iter().flat_map(|(slug, steps)| {
            steps
                .iter()
                .map(move |(step_id, record)| (slug.as_str(), step_id.as_str(), record))
        })
    }
}

// ---------------------------------------------------------------------------
// LockToken
// ---------------------------------------------------------------------------

/// Opaque claim token. Every checkpoint and finalize write must present the
/// token that is currently stored on the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockToken {
    pub token: Uuid,
    pub acquired_at: DateTime<Utc>,
}

impl LockToken {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            token: Uuid::now_v7(),
            acquired_at: now,
        }
    }

    /// Whether a lock acquired at `acquired_at` counts as abandoned at `now`.
    pub fn is_stale(&self, now: DateTime<Utc>, stale_after: Duration) -> bool {
        now - self.acquired_at >= stale_after
    }
}

// ---------------------------------------------------------------------------
// Job log
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobLogState {
    Succeeded,
    Failed,
}

/// One task attempt, appended in the same write as its checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobLogEntry {
    pub task_slug: String,
    pub step_id: String,
    pub state: JobLogState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    pub executed_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// A persisted job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Store-assigned UUIDv7.
    pub id: Uuid,
    pub kind: JobKind,
    pub input: Value,
    pub queue: String,
    pub status: JobStatus,
    /// Checkpoint ledger.
    #[serde(default)]
    pub task_status: CheckpointLedger,
    /// Number of times the job has been claimed.
    pub total_tried: u32,
    pub has_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    #[serde(default)]
    pub log: Vec<JobLogEntry>,
    /// Not claimable before this instant (delayed jobs and retry backoff).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_until: Option<DateTime<Utc>>,
    /// Present while a runner holds the claim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock: Option<LockToken>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Build the initial `queued` record for a new job.
    pub fn queued(id: Uuid, new: NewJob, now: DateTime<Utc>) -> Self {
        Self {
            id,
            kind: new.kind,
            input: new.input,
            queue: new.queue,
            status: JobStatus::Queued,
            task_status: CheckpointLedger::new(),
            total_tried: 0,
            has_error: false,
            error: None,
            log: Vec::new(),
            wait_until: new.wait_until,
            lock: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Whether a queued job may be claimed at `now`.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Queued && self.wait_until.is_none_or(|at| at <= now)
    }
}

/// Enqueue request. Validation against the definition happens before a
/// `NewJob` reaches the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJob {
    pub kind: JobKind,
    #[serde(default)]
    pub input: Value,
    #[serde(default = "default_queue")]
    pub queue: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_until: Option<DateTime<Utc>>,
}

fn default_queue() -> String {
    DEFAULT_QUEUE.to_string()
}

impl NewJob {
    pub fn new(kind: JobKind, input: Value) -> Self {
        Self {
            kind,
            input,
            queue: default_queue(),
            wait_until: None,
        }
    }

    pub fn task(slug: impl Into<String>, input: Value) -> Self {
        Self::new(JobKind::task(slug), input)
    }

    pub fn workflow(slug: impl Into<String>, input: Value) -> Self {
        Self::new(JobKind::workflow(slug), input)
    }

    pub fn queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = queue.into();
        self
    }

    pub fn wait_until(mut self, at: DateTime<Utc>) -> Self {
        self.wait_until = Some(at);
        self
    }
}

/// Caller-facing enqueue request. `queue` falls back to the definition's
/// default queue, then to `"default"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueRequest {
    pub kind: JobKind,
    #[serde(default)]
    pub input: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_until: Option<DateTime<Utc>>,
}

impl EnqueueRequest {
    pub fn new(kind: JobKind, input: Value) -> Self {
        Self {
            kind,
            input,
            queue: None,
            wait_until: None,
        }
    }

    pub fn queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    pub fn wait_until(mut self, at: DateTime<Utc>) -> Self {
        self.wait_until = Some(at);
        self
    }
}

// ---------------------------------------------------------------------------
// Store write payloads
// ---------------------------------------------------------------------------

/// One checkpoint upsert plus the log entry for the attempt that produced it.
#[derive(Debug, Clone)]
pub struct CheckpointWrite {
    pub task_slug: String,
    pub step_id: String,
    pub record: StepRecord,
    pub log: Option<JobLogEntry>,
}

/// How a runner releases its claim.
#[derive(Debug, Clone, PartialEq)]
pub enum Finalization {
    Completed,
    Failed {
        error: ErrorInfo,
    },
    /// Recoverable failure: back to `queued`, optionally not before `wait_until`.
    Requeue {
        error: ErrorInfo,
        wait_until: Option<DateTime<Utc>>,
    },
}

impl Finalization {
    pub fn target_status(&self) -> JobStatus {
        match self {
            Finalization::Completed => JobStatus::Completed,
            Finalization::Failed { .. } => JobStatus::Failed,
            Finalization::Requeue { .. } => JobStatus::Queued,
        }
    }

    pub fn error(&self) -> Option<&ErrorInfo> {
        match self {
            Finalization::Completed => None,
            Finalization::Failed { error } | Finalization::Requeue { error, .. } => Some(error),
        }
    }
}

/// Filter for administrative listing.
#[derive(Debug, Clone)]
pub struct JobFilter {
    pub queue: Option<String>,
    pub status: Option<JobStatus>,
    pub limit: u32,
}

impl Default for JobFilter {
    fn default() -> Self {
        Self {
            queue: None,
            status: None,
            limit: 50,
        }
    }
}

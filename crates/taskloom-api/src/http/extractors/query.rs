//! Query parameter extractors for job endpoints.

use serde::Deserialize;
use taskloom_types::config::RunnerConfig;
use taskloom_types::job::{JobFilter, JobStatus};
use taskloom_types::run::{RunRequest, Trigger};

use crate::http::error::AppError;

/// Largest page `GET /api/v1/jobs` will return.
const MAX_LIST_LIMIT: u32 = 500;

/// Query parameters for the job list endpoint.
#[derive(Debug, Deserialize, Default)]
pub struct JobListQuery {
    pub queue: Option<String>,
    /// One of queued, running, completed, failed.
    pub status: Option<String>,
    pub limit: Option<u32>,
}

impl JobListQuery {
    pub fn into_filter(self) -> Result<JobFilter, AppError> {
        let status = self
            .status
            .as_deref()
            .map(str::parse::<JobStatus>)
            .transpose()
            .map_err(AppError::Validation)?;

        let defaults = JobFilter::default();
        Ok(JobFilter {
            queue: self.queue,
            status,
            limit: self.limit.unwrap_or(defaults.limit).min(MAX_LIST_LIMIT),
        })
    }
}

/// Query parameters for the run trigger.
#[derive(Debug, Deserialize, Default)]
pub struct RunQuery {
    pub queue: Option<String>,
    pub limit: Option<u32>,
    pub time_budget_ms: Option<u64>,
}

impl RunQuery {
    /// Fill gaps from `[runner]` config.
    pub fn into_request(self, runner: &RunnerConfig) -> RunRequest {
        let mut request = RunRequest::new(
            self.queue.unwrap_or_else(|| runner.default_queue.clone()),
            self.limit.unwrap_or(runner.default_limit),
        )
        .triggered_by(Trigger::Http);

        let budget_ms = self
            .time_budget_ms
            .or_else(|| runner.time_budget_secs.map(|s| s.saturating_mul(1000)));
        if let Some(ms) = budget_ms {
            request = request.with_time_budget_ms(ms);
        }
        request
    }
}

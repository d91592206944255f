//! Job endpoints: the run trigger, enqueue, and inspection.

use std::time::Instant;

use axum::extract::{Path, Query, State};
use axum::Json;
use uuid::Uuid;

use taskloom_core::repository::job::JobStore;
use taskloom_types::error::StoreError;
use taskloom_types::job::{EnqueueRequest, Job};
use taskloom_types::run::{RunSummary, StopReason};

use crate::http::error::AppError;
use crate::http::extractors::auth::Authorized;
use crate::http::extractors::query::{JobListQuery, RunQuery};
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// GET|POST /api/v1/jobs/run - Drain up to `limit` jobs from `queue`.
///
/// Responds once the run stops. A run that could not claim anything because
/// the store was down is reported as 503; partial runs return their summary.
pub async fn run_jobs(
    State(state): State<AppState>,
    _auth: Authorized,
    Query(query): Query<RunQuery>,
) -> Result<Json<ApiResponse<RunSummary>>, AppError> {
    let start = Instant::now();
    let request = query.into_request(&state.config.runner);

    let summary = state.runner.run(request).await;

    if summary.stop_reason == StopReason::StoreUnavailable && summary.claimed() == 0 {
        let reason = summary
            .store_error
            .unwrap_or_else(|| "job store unavailable".to_string());
        return Err(AppError::Store(StoreError::Unavailable(reason)));
    }

    let resp = ApiResponse::success(summary, start).with_link("jobs", "/api/v1/jobs");
    Ok(Json(resp))
}

/// POST /api/v1/jobs - Validate and enqueue a job.
pub async fn enqueue_job(
    State(state): State<AppState>,
    _auth: Authorized,
    Json(body): Json<EnqueueRequest>,
) -> Result<Json<ApiResponse<Job>>, AppError> {
    let start = Instant::now();

    let job = state.queue.enqueue(body).await?;

    let href = format!("/api/v1/jobs/{}", job.id);
    Ok(Json(ApiResponse::success(job, start).with_link("self", &href)))
}

/// GET /api/v1/jobs - List jobs, oldest first.
pub async fn list_jobs(
    State(state): State<AppState>,
    _auth: Authorized,
    Query(query): Query<JobListQuery>,
) -> Result<Json<ApiResponse<Vec<Job>>>, AppError> {
    let start = Instant::now();
    let filter = query.into_filter()?;

    let jobs = state.store.list_jobs(&filter).await?;

    Ok(Json(
        ApiResponse::success(jobs, start).with_link("self", "/api/v1/jobs"),
    ))
}

/// GET /api/v1/jobs/{id} - One job with its checkpoint ledger and log.
pub async fn get_job(
    State(state): State<AppState>,
    _auth: Authorized,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Job>>, AppError> {
    let start = Instant::now();

    let job = state
        .store
        .get_job(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Job {id} not found")))?;

    let href = format!("/api/v1/jobs/{id}");
    Ok(Json(ApiResponse::success(job, start).with_link("self", &href)))
}

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use job_orchestrator::{normalize_address, RunOutcome, StatusKind, StatusView};
use tracing::{debug, info};

use crate::types::*;
use crate::{ApiError, AppState};

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(SuccessResponse::new(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
    }))
}

/// Worker pool and job counts
pub async fn worker_health(State(state): State<AppState>) -> impl IntoResponse {
    let health = state.orchestrator.health().await;

    Json(SuccessResponse::new(WorkerHealthResponse {
        status: if health.workers.workers > 0 { "healthy" } else { "unhealthy" }.to_string(),
        pending: health.workers.queued,
        workers: health.workers,
        jobs: health.jobs,
    }))
}

/// Start an analysis, or report the cached result or the run already in flight
pub async fn start_job(
    State(state): State<AppState>,
    Json(request): Json<StartJobRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let raw_address = request
        .address
        .filter(|address| !address.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("Address is required".to_string()))?;
    let address = normalize_address(&raw_address)?;

    info!("Start job request for {} (fid: {:?})", address, request.fid);

    let progress = match state.orchestrator.run_analysis(&address, request.fid).await? {
        RunOutcome::Cached(analysis) => StatusView::complete(analysis),
        RunOutcome::Started(job) => StatusView::from(&job),
        RunOutcome::AlreadyRunning(Some(job)) => StatusView::from(&job),
        RunOutcome::AlreadyRunning(None) => StatusView::fetching(),
    };

    Ok(Json(SuccessResponse::new(JobResponse::new(address, progress))))
}

/// `GET /api/job-status/:job_id`
pub async fn job_status_by_path(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    job_status(&state, &job_id).await
}

/// `GET /api/job-status?jobId=`
pub async fn job_status_by_query(
    State(state): State<AppState>,
    Query(query): Query<JobStatusQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let job_id = query
        .job_id
        .ok_or_else(|| ApiError::BadRequest("Missing jobId parameter".to_string()))?;
    job_status(&state, &job_id).await
}

async fn job_status(
    state: &AppState,
    job_id: &str,
) -> Result<(StatusCode, Json<SuccessResponse<JobResponse>>), ApiError> {
    let address = normalize_address(job_id)?;
    let view = state.orchestrator.get_status(&address).await?;
    debug!("Status for {}: {:?}", address, view.status);

    let code = if view.status == StatusKind::NotFound {
        StatusCode::NOT_FOUND
    } else {
        StatusCode::OK
    };
    Ok((code, Json(SuccessResponse::new(JobResponse::new(address, view)))))
}

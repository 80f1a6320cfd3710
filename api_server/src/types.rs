use chrono::{DateTime, Utc};
use job_orchestrator::{RegistryStats, StatusKind, StatusView, WorkerHealth};
use serde::{Deserialize, Serialize};

/// Standard API error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

/// Standard API success response
#[derive(Debug, Serialize)]
pub struct SuccessResponse<T> {
    pub data: T,
    pub timestamp: DateTime<Utc>,
}

impl<T> SuccessResponse<T> {
    pub fn new(data: T) -> Self {
        Self {
            data,
            timestamp: Utc::now(),
        }
    }
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
}

/// Worker pool health; `pending` counts jobs waiting for a worker
#[derive(Debug, Serialize)]
pub struct WorkerHealthResponse {
    pub status: String,
    pub pending: usize,
    pub workers: WorkerHealth,
    pub jobs: RegistryStats,
}

/// Body of `POST /api/start-job`
#[derive(Debug, Deserialize)]
pub struct StartJobRequest {
    pub address: Option<String>,
    pub fid: Option<u64>,
}

/// Jobs are keyed by address, so the address doubles as the job id
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResponse {
    pub job_id: String,
    pub status: StatusKind,
    pub progress: StatusView,
}

impl JobResponse {
    pub fn new(address: String, progress: StatusView) -> Self {
        Self {
            job_id: address,
            status: progress.status,
            progress,
        }
    }
}

/// Query parameters for `GET /api/job-status`
#[derive(Debug, Deserialize)]
pub struct JobStatusQuery {
    #[serde(rename = "jobId")]
    pub job_id: Option<String>,
}

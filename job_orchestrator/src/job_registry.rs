use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tracing::debug;
use uuid::Uuid;

use crate::analysis::AnalysisReport;

pub const TOTAL_STEPS: u8 = 3;

/// Pipeline stage of an analysis job
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStage {
    Fetching,
    Analyzing,
    Consolidating,
    Complete,
    Failed,
}

impl JobStage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStage::Complete | JobStage::Failed)
    }

    pub fn step(&self) -> u8 {
        match self {
            JobStage::Fetching => 1,
            JobStage::Analyzing => 2,
            JobStage::Consolidating | JobStage::Complete => 3,
            JobStage::Failed => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkProgress {
    pub current: usize,
    pub total: usize,
}

/// One analysis attempt for an address
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: Uuid,
    pub address: String,
    pub fid: Option<u64>,
    pub stage: JobStage,
    pub progress: Option<ChunkProgress>,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub result: Option<AnalysisReport>,
    pub error: Option<String>,
}

impl Job {
    pub fn new(address: String, fid: Option<u64>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            address,
            fid,
            stage: JobStage::Fetching,
            progress: None,
            retry_count: 0,
            created_at: now,
            updated_at: now,
            result: None,
            error: None,
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Move to a non-terminal stage. Returns false once the job is terminal.
    pub fn advance(&mut self, stage: JobStage) -> bool {
        if self.stage.is_terminal() || stage.is_terminal() {
            return false;
        }
        self.stage = stage;
        self.touch();
        true
    }

    pub fn start_chunks(&mut self, total: usize) -> bool {
        if !self.advance(JobStage::Analyzing) {
            return false;
        }
        self.progress = Some(ChunkProgress { current: 0, total });
        true
    }

    /// Count one more finished chunk; never exceeds the total
    pub fn chunk_finished(&mut self, retries: u32) -> bool {
        if self.stage.is_terminal() {
            return false;
        }
        if let Some(progress) = self.progress.as_mut() {
            progress.current = (progress.current + 1).min(progress.total);
        }
        self.retry_count += retries;
        self.touch();
        true
    }

    pub fn complete(&mut self, result: AnalysisReport) -> bool {
        if self.stage.is_terminal() {
            return false;
        }
        self.stage = JobStage::Complete;
        self.result = Some(result);
        self.touch();
        true
    }

    pub fn fail(&mut self, error: impl Into<String>) -> bool {
        if self.stage.is_terminal() {
            return false;
        }
        self.stage = JobStage::Failed;
        self.error = Some(error.into());
        self.touch();
        true
    }
}

/// Status reported to polling clients
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    Fetching,
    Analyzing,
    Consolidating,
    Complete,
    Failed,
    NotFound,
}

impl From<JobStage> for StatusKind {
    fn from(stage: JobStage) -> Self {
        match stage {
            JobStage::Fetching => StatusKind::Fetching,
            JobStage::Analyzing => StatusKind::Analyzing,
            JobStage::Consolidating => StatusKind::Consolidating,
            JobStage::Complete => StatusKind::Complete,
            JobStage::Failed => StatusKind::Failed,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusView {
    pub status: StatusKind,
    pub step: u8,
    pub total_steps: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<ChunkProgress>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<AnalysisReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl StatusView {
    pub fn complete(result: AnalysisReport) -> Self {
        Self {
            status: StatusKind::Complete,
            step: TOTAL_STEPS,
            total_steps: TOTAL_STEPS,
            progress: None,
            result: Some(result),
            error: None,
            job_id: None,
            updated_at: None,
        }
    }

    /// Lock held by a run this process cannot see
    pub fn fetching() -> Self {
        Self {
            status: StatusKind::Fetching,
            step: JobStage::Fetching.step(),
            total_steps: TOTAL_STEPS,
            progress: None,
            result: None,
            error: None,
            job_id: None,
            updated_at: None,
        }
    }

    pub fn not_found() -> Self {
        Self {
            status: StatusKind::NotFound,
            step: 0,
            total_steps: TOTAL_STEPS,
            progress: None,
            result: None,
            error: None,
            job_id: None,
            updated_at: None,
        }
    }
}

impl From<&Job> for StatusView {
    fn from(job: &Job) -> Self {
        Self {
            status: job.stage.into(),
            step: job.stage.step(),
            total_steps: TOTAL_STEPS,
            progress: job.progress,
            result: job.result.clone(),
            error: job.error.clone(),
            job_id: Some(job.id),
            updated_at: Some(job.updated_at),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegistryStats {
    pub active: usize,
    pub failed: usize,
}

/// How long a failed job stays visible when no retention is configured
pub const DEFAULT_FAILED_RETENTION: Duration = Duration::from_secs(3600);

/// Latest job per normalized address. Each entry is a watch channel so
/// callers can wait for a job to change instead of polling.
///
/// Completed jobs leave the registry as soon as they are published; their
/// result is served from the blob cache. Failed jobs stay until
/// `failed_retention` has passed.
pub struct JobRegistry {
    jobs: RwLock<HashMap<String, watch::Sender<Job>>>,
    failed_retention: Duration,
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::with_failed_retention(DEFAULT_FAILED_RETENTION)
    }
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failed_retention(failed_retention: Duration) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            failed_retention,
        }
    }

    /// Store `job` as the address's current job, replacing any previous one.
    /// Existing subscribers see the replacement.
    pub async fn insert(&self, job: Job) {
        let mut jobs = self.jobs.write().await;
        self.prune_expired(&mut jobs);

        match jobs.get(&job.address) {
            Some(sender) => {
                sender.send_replace(job);
            }
            None => {
                let address = job.address.clone();
                let (sender, _) = watch::channel(job);
                jobs.insert(address, sender);
            }
        }
    }

    pub async fn get(&self, address: &str) -> Option<Job> {
        let jobs = self.jobs.read().await;
        jobs.get(address).map(|sender| sender.borrow().clone())
    }

    pub async fn subscribe(&self, address: &str) -> Option<watch::Receiver<Job>> {
        let jobs = self.jobs.read().await;
        jobs.get(address).map(|sender| sender.subscribe())
    }

    /// Apply `mutate` to the address's job if it is still attempt `job_id`.
    /// Returns whether the job changed.
    pub async fn update<F>(&self, address: &str, job_id: Uuid, mutate: F) -> bool
    where
        F: FnOnce(&mut Job) -> bool,
    {
        let jobs = self.jobs.read().await;
        let Some(sender) = jobs.get(address) else {
            return false;
        };

        let changed = sender.send_if_modified(|job| job.id == job_id && mutate(job));
        if !changed {
            debug!("Job {} for {} not updated", job_id, address);
        }
        changed
    }

    /// Publish the terminal transition of attempt `job_id`. Subscribers
    /// already waiting still receive the final job; a completed entry is
    /// then dropped.
    pub async fn finish<F>(&self, address: &str, job_id: Uuid, mutate: F) -> bool
    where
        F: FnOnce(&mut Job) -> bool,
    {
        let mut jobs = self.jobs.write().await;
        let Some(sender) = jobs.get(address) else {
            return false;
        };

        let changed = sender.send_if_modified(|job| job.id == job_id && mutate(job));
        let evict = changed && sender.borrow().stage == JobStage::Complete;
        if evict {
            jobs.remove(address);
            debug!("Job {} for {} complete; dropped from registry", job_id, address);
        }
        changed
    }

    pub async fn stats(&self) -> RegistryStats {
        let jobs = self.jobs.read().await;
        let mut stats = RegistryStats::default();
        for sender in jobs.values() {
            match sender.borrow().stage {
                JobStage::Failed => stats.failed += 1,
                JobStage::Complete => {}
                _ => stats.active += 1,
            }
        }
        stats
    }

    pub async fn tracked(&self) -> usize {
        self.jobs.read().await.len()
    }

    fn prune_expired(&self, jobs: &mut HashMap<String, watch::Sender<Job>>) {
        let retention = chrono::Duration::from_std(self.failed_retention)
            .unwrap_or_else(|_| chrono::Duration::days(365));
        let cutoff = Utc::now() - retention;

        jobs.retain(|address, sender| {
            let job = sender.borrow();
            let expired = job.stage == JobStage::Failed && job.updated_at <= cutoff;
            if expired {
                debug!("Dropping failed job {} for {}", job.id, address);
            }
            !expired
        });
    }
}

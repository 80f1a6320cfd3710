use assistant_client::{AssistantProvider, OpenAiAssistantClient};
use config_manager::{StorageBackend, SystemConfig};
use notification_client::{FrameNotifier, NotificationSink, SubscriberDirectory};
use persistence_layer::{
    read_json, AnalysisLock, BlobCache, CacheKeys, LocalAnalysisLock, LockHandle, MemoryBlobCache,
    PersistenceError, RedisAnalysisLock, RedisBlobCache, RedisClient,
};
use retry_utils::{PollConfig, RetryConfig};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};
use zapper_client::{TransactionSource, ZapperClient};

pub mod address;
pub mod analysis;
pub mod batch_analyzer;
pub mod chunking;
pub mod consolidator;
pub mod job_registry;
pub mod pipeline;
pub mod worker;

pub use address::normalize_address;
pub use analysis::{AnalysisReport, BatchAnalysis, ConsolidatedAnalysis};
pub use job_registry::{
    ChunkProgress, Job, JobRegistry, JobStage, RegistryStats, StatusKind, StatusView,
};
pub use pipeline::{ChunkManifest, PipelineSettings};
pub use worker::WorkerHealth;

use batch_analyzer::BatchAnalyzer;
use consolidator::Consolidator;
use pipeline::Pipeline;
use worker::{WorkItem, WorkerContext, WorkerPool};

#[derive(Error, Debug, Clone)]
pub enum OrchestratorError {
    #[error("Invalid wallet address: {0}")]
    InvalidAddress(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Persistence error: {0}")]
    Persistence(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Transaction provider error: {0}")]
    DataProvider(String),
    #[error("Analysis provider error: {0}")]
    AnalysisProvider(String),
    #[error("Consolidated analysis was malformed: {0}")]
    MalformedConsolidation(String),
    #[error("Transaction fetch exceeded {0}s")]
    FetchTimeout(u64),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Job queue is closed")]
    QueueClosed,
}

impl OrchestratorError {
    /// Caller mistakes that must not be retried
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            OrchestratorError::InvalidAddress(_) | OrchestratorError::InvalidInput(_)
        )
    }
}

impl From<PersistenceError> for OrchestratorError {
    fn from(err: PersistenceError) -> Self {
        OrchestratorError::Persistence(err.to_string())
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(err: serde_json::Error) -> Self {
        OrchestratorError::Serialization(err.to_string())
    }
}

impl From<zapper_client::ZapperError> for OrchestratorError {
    fn from(err: zapper_client::ZapperError) -> Self {
        OrchestratorError::DataProvider(err.to_string())
    }
}

impl From<assistant_client::AssistantError> for OrchestratorError {
    fn from(err: assistant_client::AssistantError) -> Self {
        OrchestratorError::AnalysisProvider(err.to_string())
    }
}

impl From<notification_client::NotificationError> for OrchestratorError {
    fn from(err: notification_client::NotificationError) -> Self {
        OrchestratorError::Config(err.to_string())
    }
}

impl From<config_manager::ConfigurationError> for OrchestratorError {
    fn from(err: config_manager::ConfigurationError) -> Self {
        OrchestratorError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// What a request to analyze an address led to
#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// The final analysis already exists; nothing was started
    Cached(AnalysisReport),
    /// A new job was queued
    Started(Job),
    /// Another run holds the address; its job if this process knows it
    AlreadyRunning(Option<Job>),
}

/// Collaborators the orchestrator is assembled from
pub struct OrchestratorComponents {
    pub cache: Arc<dyn BlobCache>,
    pub keys: CacheKeys,
    pub lock: Arc<dyn AnalysisLock>,
    pub source: Arc<dyn TransactionSource>,
    pub assistant: Arc<dyn AssistantProvider>,
    pub notifier: Option<Arc<dyn NotificationSink>>,
}

/// Tuning the orchestrator is assembled with
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub pipeline: PipelineSettings,
    pub retry: RetryConfig,
    pub poll: PollConfig,
    pub worker_count: usize,
    pub failed_job_retention: Duration,
}

impl OrchestratorSettings {
    pub fn from_config(config: &SystemConfig) -> Self {
        Self {
            pipeline: PipelineSettings {
                chunk_size: config.pipeline.chunk_size,
                max_concurrent_batches: config.pipeline.max_concurrent_batches,
                fetch_timeout: Duration::from_secs(config.zapper.fetch_timeout_seconds),
            },
            retry: RetryConfig {
                max_attempts: config.pipeline.max_attempts,
                base_delay_ms: config.pipeline.base_delay_ms,
                max_delay_ms: config.pipeline.max_delay_ms,
            },
            poll: PollConfig {
                interval: Duration::from_millis(config.openai.poll_interval_ms),
                max_wait: Duration::from_secs(config.openai.max_poll_wait_seconds),
            },
            worker_count: config.pipeline.worker_count,
            failed_job_retention: Duration::from_secs(config.pipeline.failed_job_retention_seconds),
        }
    }
}

/// Worker pool and job counts for health reporting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorHealth {
    pub workers: WorkerHealth,
    pub jobs: RegistryStats,
}

/// Entry point for analysis requests and status polling
pub struct JobOrchestrator {
    cache: Arc<dyn BlobCache>,
    keys: CacheKeys,
    lock: Arc<dyn AnalysisLock>,
    registry: Arc<JobRegistry>,
    workers: WorkerPool,
}

impl JobOrchestrator {
    /// Build the production stack described by `config`
    pub async fn new(config: SystemConfig) -> Result<Self> {
        let needs_redis = config.storage.backend == StorageBackend::Redis
            || config.pipeline.distributed_lock
            || config.notifications.enabled;

        let redis = if needs_redis {
            let client = RedisClient::new(&config.redis.url).await?;
            info!("🔌 Connected to Redis at {}", config.redis.url);
            Some(client)
        } else {
            None
        };

        let cache: Arc<dyn BlobCache> = match (&config.storage.backend, &redis) {
            (StorageBackend::Redis, Some(redis)) => Arc::new(RedisBlobCache::new(redis.clone())),
            _ => {
                warn!("Using in-memory blob cache; analyses will not survive a restart");
                Arc::new(MemoryBlobCache::new())
            }
        };

        let lock: Arc<dyn AnalysisLock> = match (&redis, config.pipeline.distributed_lock) {
            (Some(redis), true) => Arc::new(RedisAnalysisLock::new(
                redis.clone(),
                config.redis.analysis_lock_ttl_seconds,
            )),
            _ => Arc::new(LocalAnalysisLock::new()),
        };

        let notifier: Option<Arc<dyn NotificationSink>> = match (&redis, config.notifications.enabled) {
            (Some(redis), true) => {
                let directory: Arc<dyn SubscriberDirectory> = Arc::new(redis.clone());
                Some(Arc::new(FrameNotifier::new(&config.notifications, directory)?))
            }
            _ => None,
        };

        let settings = OrchestratorSettings::from_config(&config);
        let source = ZapperClient::from_config(&config.zapper, settings.retry.clone())?;
        let assistant = OpenAiAssistantClient::from_config(&config.openai)?;

        let components = OrchestratorComponents {
            cache,
            keys: CacheKeys::new(
                config.storage.raw_transactions_prefix.clone(),
                config.storage.analysis_chunks_prefix.clone(),
                config.storage.final_analysis_prefix.clone(),
            ),
            lock,
            source: Arc::new(source),
            assistant: Arc::new(assistant),
            notifier,
        };

        Ok(Self::with_components(components, settings))
    }

    /// Assemble from explicit collaborators; spawns the worker pool, so it
    /// must be called inside a Tokio runtime.
    pub fn with_components(components: OrchestratorComponents, settings: OrchestratorSettings) -> Self {
        let registry = Arc::new(JobRegistry::with_failed_retention(
            settings.failed_job_retention,
        ));

        let pipeline = Pipeline::new(
            components.cache.clone(),
            components.keys.clone(),
            components.source,
            BatchAnalyzer::new(
                components.assistant.clone(),
                settings.retry.clone(),
                settings.poll.clone(),
            ),
            Consolidator::new(components.assistant, settings.retry, settings.poll),
            registry.clone(),
            settings.pipeline,
        );

        let context = Arc::new(WorkerContext {
            pipeline: Arc::new(pipeline),
            lock: components.lock.clone(),
            registry: registry.clone(),
            notifier: components.notifier,
        });

        Self {
            cache: components.cache,
            keys: components.keys,
            lock: components.lock,
            registry,
            workers: WorkerPool::start(context, settings.worker_count),
        }
    }

    /// Serve the cached analysis, join a running job, or start a new one
    pub async fn run_analysis(&self, raw_address: &str, fid: Option<u64>) -> Result<RunOutcome> {
        let address = normalize_address(raw_address)?;

        if let Some(cached) = self.cached_analysis(&address).await? {
            debug!("Cache hit for {}", address);
            return Ok(RunOutcome::Cached(cached));
        }

        let Some(lock) = self.lock.try_acquire(&address).await? else {
            info!("Analysis already running for {}", address);
            return Ok(RunOutcome::AlreadyRunning(self.registry.get(&address).await));
        };

        // A run may have finished between the cache check and the lock
        match self.cached_analysis(&address).await {
            Ok(Some(cached)) => {
                self.release_quietly(&lock).await;
                return Ok(RunOutcome::Cached(cached));
            }
            Ok(None) => {}
            Err(e) => {
                self.release_quietly(&lock).await;
                return Err(e);
            }
        }

        let job = Job::new(address.clone(), fid);
        self.registry.insert(job.clone()).await;

        let item = WorkItem {
            job_id: job.id,
            address: address.clone(),
            fid,
            lock: lock.clone(),
        };
        if let Err(e) = self.workers.enqueue(item) {
            self.registry
                .finish(&address, job.id, |j| j.fail(e.to_string()))
                .await;
            self.release_quietly(&lock).await;
            return Err(e);
        }

        info!("📝 Queued job {} for {}", job.id, address);
        Ok(RunOutcome::Started(job))
    }

    /// Status for polling clients: cached result first, then a live run,
    /// then a retained terminal job.
    pub async fn get_status(&self, raw_address: &str) -> Result<StatusView> {
        let address = normalize_address(raw_address)?;

        if let Some(cached) = self.cached_analysis(&address).await? {
            return Ok(StatusView::complete(cached));
        }

        let job = self.registry.get(&address).await;

        if self.lock.is_held(&address).await? {
            return Ok(match job {
                Some(job) => StatusView::from(&job),
                None => StatusView::fetching(),
            });
        }

        Ok(match job {
            Some(job) => StatusView::from(&job),
            None => StatusView::not_found(),
        })
    }

    /// Wait until the address's current job is terminal. `None` when this
    /// process has no job for the address, which includes a completed job
    /// that has already been dropped; its result is then in the cache.
    pub async fn wait_for_terminal(&self, raw_address: &str) -> Result<Option<Job>> {
        let address = normalize_address(raw_address)?;
        let Some(mut receiver) = self.registry.subscribe(&address).await else {
            return Ok(None);
        };

        let terminal = receiver
            .wait_for(|job| job.stage.is_terminal())
            .await
            .map(|job| job.clone());

        match terminal {
            Ok(job) => Ok(Some(job)),
            Err(_) => Ok(self.registry.get(&address).await),
        }
    }

    pub async fn health(&self) -> OrchestratorHealth {
        OrchestratorHealth {
            workers: self.workers.health(),
            jobs: self.registry.stats().await,
        }
    }

    async fn cached_analysis(&self, address: &str) -> Result<Option<AnalysisReport>> {
        Ok(read_json(self.cache.as_ref(), &self.keys.final_analysis(address)).await?)
    }

    async fn release_quietly(&self, lock: &LockHandle) {
        if let Err(e) = self.lock.release(lock).await {
            warn!("Failed to release analysis lock {}: {}", lock.key, e);
        }
    }
}


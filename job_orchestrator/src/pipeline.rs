use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use persistence_layer::{read_json, write_json, BlobCache, CacheKeys};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use uuid::Uuid;
use zapper_client::{Transaction, TransactionSource};

use crate::analysis::AnalysisReport;
use crate::batch_analyzer::{BatchAnalyzer, BatchOutcome};
use crate::chunking::split_into_batches;
use crate::consolidator::Consolidator;
use crate::job_registry::{JobRegistry, JobStage};
use crate::{OrchestratorError, Result};

/// Record of a run's fan-in, stored next to the chunk results
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkManifest {
    pub job_id: Uuid,
    pub address: String,
    pub total_chunks: usize,
    pub chunk_keys: Vec<String>,
    pub degraded_chunks: Vec<usize>,
    pub completed_at: DateTime<Utc>,
    pub merged: AnalysisReport,
}

/// Tuning shared by every run
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub chunk_size: usize,
    pub max_concurrent_batches: Option<usize>,
    pub fetch_timeout: Duration,
}

/// Stages 5 to 8 of an analysis: fetch, chunk, fan-out, fan-in, persist
pub struct Pipeline {
    cache: Arc<dyn BlobCache>,
    keys: CacheKeys,
    source: Arc<dyn TransactionSource>,
    analyzer: BatchAnalyzer,
    consolidator: Consolidator,
    registry: Arc<JobRegistry>,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(
        cache: Arc<dyn BlobCache>,
        keys: CacheKeys,
        source: Arc<dyn TransactionSource>,
        analyzer: BatchAnalyzer,
        consolidator: Consolidator,
        registry: Arc<JobRegistry>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            cache,
            keys,
            source,
            analyzer,
            consolidator,
            registry,
            settings,
        }
    }

    /// Produce and persist the final analysis for `address`.
    ///
    /// The final-analysis key is written last, so readers never see a
    /// partial report.
    pub async fn run(&self, job_id: Uuid, address: &str) -> Result<AnalysisReport> {
        let started = Instant::now();
        let transactions = self.load_transactions(address).await?;

        let analysis = if transactions.is_empty() {
            info!("📭 No activity in window for {}", address);
            AnalysisReport::no_activity()
        } else {
            self.analyze(job_id, address, &transactions).await?
        };

        write_json(self.cache.as_ref(), &self.keys.final_analysis(address), &analysis).await?;

        info!(
            "🏁 Analysis for {} stored in {}ms ({} items)",
            address,
            started.elapsed().as_millis(),
            analysis.item_count()
        );
        Ok(analysis)
    }

    async fn load_transactions(&self, address: &str) -> Result<Vec<Transaction>> {
        let key = self.keys.raw_transactions(address);
        if let Some(cached) = read_json::<Vec<Transaction>>(self.cache.as_ref(), &key).await? {
            info!("📦 Using {} cached transactions for {}", cached.len(), address);
            return Ok(cached);
        }

        let fetched = tokio::time::timeout(
            self.settings.fetch_timeout,
            self.source.fetch_transactions(address),
        )
        .await
        .map_err(|_| OrchestratorError::FetchTimeout(self.settings.fetch_timeout.as_secs()))??;

        // An empty history is not cached, so a later request looks again
        if !fetched.is_empty() {
            write_json(self.cache.as_ref(), &key, &fetched).await?;
        }
        Ok(fetched)
    }

    async fn analyze(
        &self,
        job_id: Uuid,
        address: &str,
        transactions: &[Transaction],
    ) -> Result<AnalysisReport> {
        let batches = split_into_batches(transactions, self.settings.chunk_size)?;
        let total = batches.len();

        info!(
            "🔀 Analyzing {} transactions for {} in {} chunks",
            transactions.len(),
            address,
            total
        );
        self.registry
            .update(address, job_id, |job| job.start_chunks(total))
            .await;

        let limiter = self
            .settings
            .max_concurrent_batches
            .map(|cap| Arc::new(Semaphore::new(cap.max(1))));

        let mut in_flight: FuturesUnordered<_> = batches
            .iter()
            .enumerate()
            .map(|(index, batch)| {
                let limiter = limiter.clone();
                async move {
                    let _permit = match &limiter {
                        Some(semaphore) => semaphore.acquire().await.ok(),
                        None => None,
                    };
                    self.analyze_chunk(address, batch, index, total).await
                }
            })
            .collect();

        let mut completed: Vec<AnalysisReport> = Vec::with_capacity(total);
        let mut degraded: Vec<usize> = Vec::new();

        while let Some(outcome) = in_flight.next().await {
            let retries = outcome.attempts.saturating_sub(1);
            self.registry
                .update(address, job_id, |job| job.chunk_finished(retries))
                .await;

            if outcome.is_degraded() {
                degraded.push(outcome.index);
            }
            completed.push(outcome.analysis);
        }
        drop(in_flight);

        if !degraded.is_empty() {
            warn!(
                "⚠️ {} of {} chunks degraded for {}: {:?}",
                degraded.len(),
                total,
                address,
                degraded
            );
        }

        self.registry
            .update(address, job_id, |job| job.advance(JobStage::Consolidating))
            .await;

        let consolidation = self.consolidator.consolidate(completed).await?;

        degraded.sort_unstable();
        let manifest = ChunkManifest {
            job_id,
            address: address.to_string(),
            total_chunks: total,
            chunk_keys: (0..total).map(|i| self.keys.chunk(address, i)).collect(),
            degraded_chunks: degraded,
            completed_at: Utc::now(),
            merged: consolidation.merged,
        };
        write_json(
            self.cache.as_ref(),
            &self.keys.chunk_manifest(address),
            &manifest,
        )
        .await?;

        Ok(consolidation.analysis)
    }

    /// Analyze one chunk, reusing a result cached by an earlier run
    async fn analyze_chunk(
        &self,
        address: &str,
        batch: &[Transaction],
        index: usize,
        total: usize,
    ) -> BatchOutcome {
        let key = self.keys.chunk(address, index);

        match read_json::<AnalysisReport>(self.cache.as_ref(), &key).await {
            Ok(Some(analysis)) => {
                debug!("📦 Reusing cached chunk {}/{} for {}", index + 1, total, address);
                return BatchOutcome {
                    index,
                    analysis,
                    attempts: 0,
                    degraded: None,
                };
            }
            Ok(None) => {}
            Err(e) => warn!("Chunk cache read failed for {}: {}", key, e),
        }

        let outcome = self.analyzer.analyze(batch, index, total).await;

        if !outcome.is_degraded() {
            if let Err(e) = write_json(self.cache.as_ref(), &key, &outcome.analysis).await {
                warn!("Failed to cache chunk {}: {}", key, e);
            }
        }
        outcome
    }
}

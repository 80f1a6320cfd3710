use assistant_client::{run_prompt, AssistantError, AssistantProvider};
use retry_utils::{retry_with_backoff, PollConfig, RetryConfig};
use std::sync::Arc;
use tracing::{error, info};

use crate::analysis::{consolidation_prompt, parse_reply, AnalysisReport};
use crate::{OrchestratorError, Result};

/// Merged batch input and the deduplicated report produced from it
#[derive(Debug, Clone)]
pub struct Consolidation {
    pub merged: AnalysisReport,
    pub analysis: AnalysisReport,
}

/// Final assistant pass over every batch result
#[derive(Clone)]
pub struct Consolidator {
    provider: Arc<dyn AssistantProvider>,
    retry: RetryConfig,
    poll: PollConfig,
}

impl Consolidator {
    pub fn new(provider: Arc<dyn AssistantProvider>, retry: RetryConfig, poll: PollConfig) -> Self {
        Self {
            provider,
            retry,
            poll,
        }
    }

    /// Concatenate `batches` in the order given and ask the assistant for a
    /// deduplicated report. Unlike batch analysis, a reply that does not
    /// parse fails the run.
    pub async fn consolidate(&self, batches: Vec<AnalysisReport>) -> Result<Consolidation> {
        let batch_count = batches.len();
        let merged = AnalysisReport::merge(batches);
        let prompt = consolidation_prompt(&merged)?;

        info!(
            "🧩 Consolidating {} batch results ({} items)",
            batch_count,
            merged.item_count()
        );

        let reply = retry_with_backoff(
            || run_prompt(self.provider.as_ref(), &prompt, &self.poll),
            &self.retry,
            |e: &AssistantError| e.retry_class(),
        )
        .await?;

        let analysis = parse_reply(&reply).map_err(|e| {
            error!("❌ Consolidation reply was not valid analysis JSON: {}", e);
            OrchestratorError::MalformedConsolidation(e.to_string())
        })?;

        info!(
            "✅ Consolidated {} items down to {}",
            merged.item_count(),
            analysis.item_count()
        );

        Ok(Consolidation { merged, analysis })
    }
}

use assistant_client::{run_prompt, AssistantError, AssistantProvider};
use retry_utils::{retry_with_backoff, PollConfig, RetryConfig};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use zapper_client::Transaction;

use crate::analysis::{batch_prompt, parse_reply, AnalysisReport};

/// Result of analyzing one batch. A degraded batch contributes nothing to
/// the merge and is never cached.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub index: usize,
    pub analysis: AnalysisReport,
    /// Provider calls made, including the first
    pub attempts: u32,
    pub degraded: Option<String>,
}

impl BatchOutcome {
    pub fn is_degraded(&self) -> bool {
        self.degraded.is_some()
    }

    fn degraded(index: usize, attempts: u32, reason: String) -> Self {
        Self {
            index,
            analysis: AnalysisReport::default(),
            attempts,
            degraded: Some(reason),
        }
    }
}

/// Runs one assistant session per batch attempt
#[derive(Clone)]
pub struct BatchAnalyzer {
    provider: Arc<dyn AssistantProvider>,
    retry: RetryConfig,
    poll: PollConfig,
}

impl BatchAnalyzer {
    pub fn new(provider: Arc<dyn AssistantProvider>, retry: RetryConfig, poll: PollConfig) -> Self {
        Self {
            provider,
            retry,
            poll,
        }
    }

    /// Analyze one batch. Never fails: exhausted retries and unparseable
    /// replies both yield an empty, degraded outcome.
    pub async fn analyze(&self, batch: &[Transaction], index: usize, total: usize) -> BatchOutcome {
        let prompt = match batch_prompt(batch) {
            Ok(prompt) => prompt,
            Err(e) => return BatchOutcome::degraded(index, 0, format!("prompt encoding: {}", e)),
        };

        debug!(
            "Analyzing chunk {}/{} ({} transactions)",
            index + 1,
            total,
            batch.len()
        );

        let attempts = AtomicU32::new(0);
        let reply = retry_with_backoff(
            || {
                attempts.fetch_add(1, Ordering::SeqCst);
                run_prompt(self.provider.as_ref(), &prompt, &self.poll)
            },
            &self.retry,
            |e: &AssistantError| e.retry_class(),
        )
        .await;
        let attempts = attempts.load(Ordering::SeqCst);

        let reply = match reply {
            Ok(reply) => reply,
            Err(e) => {
                warn!(
                    "⚠️ Chunk {}/{} failed after {} attempts, continuing without it: {}",
                    index + 1,
                    total,
                    attempts,
                    e
                );
                return BatchOutcome::degraded(index, attempts, e.to_string());
            }
        };

        match parse_reply(&reply) {
            Ok(analysis) => {
                info!(
                    "✅ Chunk {}/{} analyzed: {} items",
                    index + 1,
                    total,
                    analysis.item_count()
                );
                BatchOutcome {
                    index,
                    analysis,
                    attempts,
                    degraded: None,
                }
            }
            Err(e) => {
                warn!(
                    "⚠️ Chunk {}/{} reply was not valid analysis JSON: {}",
                    index + 1,
                    total,
                    e
                );
                BatchOutcome::degraded(index, attempts, format!("unparseable reply: {}", e))
            }
        }
    }
}

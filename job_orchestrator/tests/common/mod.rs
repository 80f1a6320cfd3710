#![allow(dead_code)]

use assistant_client::{AssistantError, AssistantProvider, RunObject, RunStatus};
use async_trait::async_trait;
use job_orchestrator::{
    JobOrchestrator, OrchestratorComponents, OrchestratorSettings, PipelineSettings,
};
use notification_client::{NotificationOutcome, NotificationSink};
use persistence_layer::{
    AnalysisLock, CacheKeys, LocalAnalysisLock, LockHandle, MemoryBlobCache, PersistenceError,
};
use retry_utils::{PollConfig, RetryConfig};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use zapper_client::{Transaction, TransactionSource, ZapperError};

pub const ADDRESS: &str = "0x4bfb41d5b3570defd03c39a9a4d8de6bd8b8982e";

const BATCH_PREFIX: &str = "provide insights: ";
const CONSOLIDATION_PREFIX: &str = "Here's all the data: ";

pub fn transactions(count: usize) -> Vec<Transaction> {
    (0..count)
        .map(|i| Transaction {
            hash: format!("0x{:064x}", i),
            timestamp: 1_720_000_000_000 - i as i64 * 60_000,
            description: format!("Swapped {} USDC for DEGEN", i),
            category: "SWAP".to_string(),
            tags: vec!["dex".to_string()],
            from_user: Some("alice.base.eth".to_string()),
            to_user: None,
            value: None,
        })
        .collect()
}

// =====================================
// Transaction source
// =====================================

pub struct MockSource {
    transactions: Vec<Transaction>,
    gate: Option<Arc<Notify>>,
    panic: bool,
    pub calls: AtomicUsize,
}

impl MockSource {
    pub fn new(transactions: Vec<Transaction>) -> Self {
        Self {
            transactions,
            gate: None,
            panic: false,
            calls: AtomicUsize::new(0),
        }
    }

    /// Fetch blocks until the returned handle is notified
    pub fn gated(transactions: Vec<Transaction>) -> (Self, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        let mut source = Self::new(transactions);
        source.gate = Some(gate.clone());
        (source, gate)
    }

    pub fn panicking() -> Self {
        let mut source = Self::new(Vec::new());
        source.panic = true;
        source
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransactionSource for MockSource {
    async fn fetch_transactions(&self, _address: &str) -> Result<Vec<Transaction>, ZapperError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if self.panic {
            panic!("timeline response had an impossible shape");
        }
        Ok(self.transactions.clone())
    }
}

// =====================================
// Assistant
// =====================================

/// How the mock answers a batch, keyed by the batch's first transaction hash
#[derive(Clone)]
pub enum BatchBehavior {
    /// Fail with the given HTTP status this many times, then answer normally
    FailTimes { status: u16, times: usize },
    /// Answer with text that is not analysis JSON
    Garbage,
}

#[derive(Default)]
struct AssistantState {
    threads_created: usize,
    threads_deleted: usize,
    prompts: HashMap<String, String>,
    batch_prompts: Vec<Vec<Transaction>>,
    consolidation_inputs: Vec<Value>,
    failures_served: HashMap<String, usize>,
    in_flight: usize,
    max_in_flight: usize,
}

pub struct MockAssistant {
    state: Mutex<AssistantState>,
    behaviors: HashMap<String, BatchBehavior>,
    consolidation_reply: Option<String>,
    batch_latency: Duration,
}

impl MockAssistant {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(AssistantState::default()),
            behaviors: HashMap::new(),
            consolidation_reply: None,
            batch_latency: Duration::from_millis(50),
        }
    }

    pub fn with_batch_behavior(mut self, first_hash: &str, behavior: BatchBehavior) -> Self {
        self.behaviors.insert(first_hash.to_string(), behavior);
        self
    }

    pub fn with_consolidation_reply(mut self, reply: &str) -> Self {
        self.consolidation_reply = Some(reply.to_string());
        self
    }

    pub fn threads_created(&self) -> usize {
        self.state.lock().unwrap().threads_created
    }

    pub fn threads_deleted(&self) -> usize {
        self.state.lock().unwrap().threads_deleted
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        let mut sizes: Vec<usize> = self
            .state
            .lock()
            .unwrap()
            .batch_prompts
            .iter()
            .map(Vec::len)
            .collect();
        sizes.sort_unstable_by(|a, b| b.cmp(a));
        sizes
    }

    pub fn consolidation_inputs(&self) -> Vec<Value> {
        self.state.lock().unwrap().consolidation_inputs.clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.state.lock().unwrap().max_in_flight
    }

    fn batch_reply(batch: &[Transaction]) -> String {
        let name = batch.first().map(|t| t.hash.clone()).unwrap_or_default();
        json!({
            "popularTokens": [{"name": name, "stat": format!("{} swaps", batch.len())}],
            "popularActions": [],
            "popularUsers": [],
            "otherStories": []
        })
        .to_string()
    }

    /// Echo the merged input back, as a perfect deduplication would for
    /// already-distinct items
    fn echo_consolidation(merged: &Value) -> String {
        format!("```json\n{}\n```", merged)
    }
}

#[async_trait]
impl AssistantProvider for MockAssistant {
    async fn create_thread(&self) -> Result<String, AssistantError> {
        let mut state = self.state.lock().unwrap();
        state.threads_created += 1;
        Ok(format!("thread_{}", state.threads_created))
    }

    async fn add_message(&self, thread_id: &str, content: &str) -> Result<(), AssistantError> {
        let mut state = self.state.lock().unwrap();
        state
            .prompts
            .insert(thread_id.to_string(), content.to_string());
        Ok(())
    }

    async fn create_run(&self, thread_id: &str) -> Result<String, AssistantError> {
        Ok(format!("run_for_{}", thread_id))
    }

    async fn get_run(&self, _thread_id: &str, run_id: &str) -> Result<RunObject, AssistantError> {
        Ok(RunObject {
            id: run_id.to_string(),
            status: RunStatus::Completed,
            last_error: None,
        })
    }

    async fn latest_reply(&self, thread_id: &str) -> Result<Option<String>, AssistantError> {
        let prompt = {
            let state = self.state.lock().unwrap();
            state.prompts.get(thread_id).cloned().unwrap_or_default()
        };

        if let Some((_, data)) = prompt.split_once(CONSOLIDATION_PREFIX) {
            let merged: Value = serde_json::from_str(data).unwrap();
            self.state
                .lock()
                .unwrap()
                .consolidation_inputs
                .push(merged.clone());
            return Ok(Some(
                self.consolidation_reply
                    .clone()
                    .unwrap_or_else(|| Self::echo_consolidation(&merged)),
            ));
        }

        let (_, data) = prompt.split_once(BATCH_PREFIX).unwrap();
        let batch: Vec<Transaction> = serde_json::from_str(data).unwrap();
        let first_hash = batch.first().map(|t| t.hash.clone()).unwrap_or_default();

        {
            let mut state = self.state.lock().unwrap();
            state.in_flight += 1;
            state.max_in_flight = state.max_in_flight.max(state.in_flight);
        }
        tokio::time::sleep(self.batch_latency).await;
        {
            let mut state = self.state.lock().unwrap();
            state.in_flight -= 1;
            state.batch_prompts.push(batch.clone());
        }

        match self.behaviors.get(&first_hash) {
            Some(BatchBehavior::FailTimes { status, times }) => {
                let mut state = self.state.lock().unwrap();
                let served = state.failures_served.entry(first_hash).or_insert(0);
                if *served < *times {
                    *served += 1;
                    return Err(AssistantError::Api {
                        status: *status,
                        message: "scripted failure".to_string(),
                    });
                }
            }
            Some(BatchBehavior::Garbage) => {
                return Ok(Some("I found some great insights for you!".to_string()));
            }
            None => {}
        }

        Ok(Some(Self::batch_reply(&batch)))
    }

    async fn delete_thread(&self, _thread_id: &str) -> Result<(), AssistantError> {
        self.state.lock().unwrap().threads_deleted += 1;
        Ok(())
    }
}

// =====================================
// Locks
// =====================================

/// Hands out expiring handles over a local lock and counts renewals
pub struct ExpiringLock {
    inner: Arc<LocalAnalysisLock>,
    ttl_seconds: u64,
    refreshes: AtomicUsize,
}

impl ExpiringLock {
    pub fn new(inner: Arc<LocalAnalysisLock>, ttl_seconds: u64) -> Self {
        Self {
            inner,
            ttl_seconds,
            refreshes: AtomicUsize::new(0),
        }
    }

    pub fn refreshes(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AnalysisLock for ExpiringLock {
    async fn try_acquire(&self, address: &str) -> Result<Option<LockHandle>, PersistenceError> {
        Ok(self.inner.try_acquire(address).await?.map(|handle| LockHandle {
            ttl_seconds: self.ttl_seconds,
            ..handle
        }))
    }

    async fn release(&self, handle: &LockHandle) -> Result<(), PersistenceError> {
        self.inner.release(handle).await
    }

    async fn refresh(&self, handle: &LockHandle) -> Result<bool, PersistenceError> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        self.inner.refresh(handle).await
    }

    async fn is_held(&self, address: &str) -> Result<bool, PersistenceError> {
        self.inner.is_held(address).await
    }
}

// =====================================
// Notifications
// =====================================

#[derive(Default)]
pub struct RecordingNotifier {
    pub fids: Mutex<Vec<u64>>,
}

impl RecordingNotifier {
    pub fn fids(&self) -> Vec<u64> {
        self.fids.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingNotifier {
    async fn notify_ready(
        &self,
        fid: u64,
    ) -> Result<NotificationOutcome, notification_client::NotificationError> {
        self.fids.lock().unwrap().push(fid);
        Ok(NotificationOutcome::Delivered)
    }
}

// =====================================
// Assembly
// =====================================

pub struct Harness {
    pub orchestrator: JobOrchestrator,
    pub cache: Arc<MemoryBlobCache>,
    pub lock: Arc<LocalAnalysisLock>,
    pub source: Arc<MockSource>,
    pub assistant: Arc<MockAssistant>,
    pub notifier: Arc<RecordingNotifier>,
    pub keys: CacheKeys,
}

pub fn settings(max_concurrent_batches: Option<usize>) -> OrchestratorSettings {
    OrchestratorSettings {
        pipeline: PipelineSettings {
            chunk_size: 200,
            max_concurrent_batches,
            fetch_timeout: Duration::from_secs(300),
        },
        retry: RetryConfig::default(),
        poll: PollConfig {
            interval: Duration::from_millis(10),
            max_wait: Duration::from_secs(5),
        },
        worker_count: 2,
        failed_job_retention: Duration::from_secs(3600),
    }
}

pub struct HarnessBuilder {
    source: MockSource,
    assistant: MockAssistant,
    cache: Arc<MemoryBlobCache>,
    lock: Arc<LocalAnalysisLock>,
    lock_override: Option<Arc<dyn AnalysisLock>>,
    max_concurrent_batches: Option<usize>,
}

impl HarnessBuilder {
    pub fn new(source: MockSource) -> Self {
        Self {
            source,
            assistant: MockAssistant::new(),
            cache: Arc::new(MemoryBlobCache::new()),
            lock: Arc::new(LocalAnalysisLock::new()),
            lock_override: None,
            max_concurrent_batches: None,
        }
    }

    pub fn assistant(mut self, assistant: MockAssistant) -> Self {
        self.assistant = assistant;
        self
    }

    pub fn cache(mut self, cache: Arc<MemoryBlobCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn lock(mut self, lock: Arc<LocalAnalysisLock>) -> Self {
        self.lock = lock;
        self
    }

    /// Route locking through `lock`, which should wrap the harness's local lock
    pub fn lock_override(mut self, lock: Arc<dyn AnalysisLock>) -> Self {
        self.lock_override = Some(lock);
        self
    }

    pub fn max_concurrent_batches(mut self, cap: usize) -> Self {
        self.max_concurrent_batches = Some(cap);
        self
    }

    pub fn build(self) -> Harness {
        let source = Arc::new(self.source);
        let assistant = Arc::new(self.assistant);
        let notifier = Arc::new(RecordingNotifier::default());
        let keys = CacheKeys::default();

        let lock: Arc<dyn AnalysisLock> = match self.lock_override {
            Some(lock) => lock,
            None => self.lock.clone(),
        };
        let components = OrchestratorComponents {
            cache: self.cache.clone(),
            keys: keys.clone(),
            lock,
            source: source.clone(),
            assistant: assistant.clone(),
            notifier: Some(notifier.clone()),
        };

        Harness {
            orchestrator: JobOrchestrator::with_components(
                components,
                settings(self.max_concurrent_batches),
            ),
            cache: self.cache,
            lock: self.lock,
            source,
            assistant,
            notifier,
            keys,
        }
    }
}

/// Poll `condition` on the paused clock until it holds
pub async fn eventually<F: Fn() -> bool>(condition: F) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

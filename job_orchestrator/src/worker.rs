use notification_client::NotificationSink;
use persistence_layer::{AnalysisLock, LockHandle};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::analysis::AnalysisReport;
use crate::job_registry::JobRegistry;
use crate::pipeline::Pipeline;
use crate::{OrchestratorError, Result};

/// One queued analysis; the lock travels with it and is released by the
/// worker that finishes it.
#[derive(Debug)]
pub struct WorkItem {
    pub job_id: Uuid,
    pub address: String,
    pub fid: Option<u64>,
    pub lock: LockHandle,
}

#[derive(Debug, Default)]
struct WorkerCounters {
    queued: AtomicUsize,
    active: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
}

/// Snapshot of the worker pool for health reporting
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkerHealth {
    pub workers: usize,
    pub queued: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Everything a worker needs to finish a run
pub struct WorkerContext {
    pub pipeline: Arc<Pipeline>,
    pub lock: Arc<dyn AnalysisLock>,
    pub registry: Arc<JobRegistry>,
    pub notifier: Option<Arc<dyn NotificationSink>>,
}

/// Fixed set of workers draining a shared job queue
pub struct WorkerPool {
    sender: mpsc::UnboundedSender<WorkItem>,
    counters: Arc<WorkerCounters>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn start(context: Arc<WorkerContext>, worker_count: usize) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let receiver = Arc::new(Mutex::new(receiver));
        let counters = Arc::new(WorkerCounters::default());

        let handles = (0..worker_count.max(1))
            .map(|worker_id| {
                tokio::spawn(worker_loop(
                    worker_id,
                    receiver.clone(),
                    context.clone(),
                    counters.clone(),
                ))
            })
            .collect();

        info!("👷 Started {} analysis workers", worker_count.max(1));
        Self {
            sender,
            counters,
            handles,
        }
    }

    pub fn enqueue(&self, item: WorkItem) -> Result<()> {
        self.counters.queued.fetch_add(1, Ordering::SeqCst);
        self.sender.send(item).map_err(|rejected| {
            self.counters.queued.fetch_sub(1, Ordering::SeqCst);
            warn!("Job queue closed; dropping {}", rejected.0.address);
            OrchestratorError::QueueClosed
        })
    }

    pub fn health(&self) -> WorkerHealth {
        WorkerHealth {
            workers: self.handles.iter().filter(|h| !h.is_finished()).count(),
            queued: self.counters.queued.load(Ordering::SeqCst),
            active: self.counters.active.load(Ordering::SeqCst),
            completed: self.counters.completed.load(Ordering::SeqCst),
            failed: self.counters.failed.load(Ordering::SeqCst),
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    receiver: Arc<Mutex<mpsc::UnboundedReceiver<WorkItem>>>,
    context: Arc<WorkerContext>,
    counters: Arc<WorkerCounters>,
) {
    loop {
        let item = {
            let mut receiver = receiver.lock().await;
            receiver.recv().await
        };
        let Some(item) = item else {
            info!("Worker {} stopping: queue closed", worker_id);
            break;
        };

        counters.queued.fetch_sub(1, Ordering::SeqCst);
        counters.active.fetch_add(1, Ordering::SeqCst);

        let succeeded = process(&context, item).await;

        counters.active.fetch_sub(1, Ordering::SeqCst);
        if succeeded {
            counters.completed.fetch_add(1, Ordering::SeqCst);
        } else {
            counters.failed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Run one item under supervision. The run gets its own task so a panic
/// inside it is observed here as a join error instead of killing the worker.
async fn process(context: &Arc<WorkerContext>, item: WorkItem) -> bool {
    info!("▶️ Job {} started for {}", item.job_id, item.address);

    let heartbeat = spawn_lock_heartbeat(context.lock.clone(), item.lock.clone());

    let run = {
        let pipeline = context.pipeline.clone();
        let address = item.address.clone();
        let job_id = item.job_id;
        tokio::spawn(async move { pipeline.run(job_id, &address).await })
    };

    let outcome: std::result::Result<AnalysisReport, String> = match run.await {
        Ok(Ok(analysis)) => Ok(analysis),
        Ok(Err(e)) => Err(e.to_string()),
        Err(join_error) if join_error.is_panic() => {
            Err(format!("analysis task panicked: {}", panic_message(join_error)))
        }
        Err(join_error) => Err(format!("analysis task was cancelled: {}", join_error)),
    };

    if let Some(heartbeat) = heartbeat {
        heartbeat.abort();
    }

    settle(
        context.lock.as_ref(),
        &context.registry,
        context.notifier.clone(),
        item,
        outcome,
    )
    .await
}

/// Publish the terminal job state, then release the lock, then hand the
/// notification to its own task.
async fn settle(
    lock: &dyn AnalysisLock,
    registry: &JobRegistry,
    notifier: Option<Arc<dyn NotificationSink>>,
    item: WorkItem,
    outcome: std::result::Result<AnalysisReport, String>,
) -> bool {
    let WorkItem {
        job_id,
        address,
        fid,
        lock: handle,
    } = item;

    let succeeded = match outcome {
        Ok(analysis) => {
            registry
                .finish(&address, job_id, |job| job.complete(analysis))
                .await;
            info!("✅ Job {} complete for {}", job_id, address);
            true
        }
        Err(reason) => {
            error!("❌ Job {} failed for {}: {}", job_id, address, reason);
            registry
                .finish(&address, job_id, |job| job.fail(reason))
                .await;
            false
        }
    };

    if let Err(e) = lock.release(&handle).await {
        warn!("Failed to release analysis lock for {}: {}", address, e);
    }

    if let (true, Some(fid), Some(notifier)) = (succeeded, fid, notifier) {
        tokio::spawn(async move {
            match notifier.notify_ready(fid).await {
                Ok(outcome) => info!("Notification for fid {}: {:?}", fid, outcome),
                Err(e) => warn!("Notification for fid {} failed: {}", fid, e),
            }
        });
    }

    succeeded
}

/// Keep an expiring lock alive for as long as its run lasts. Locks without
/// a TTL need no renewal.
fn spawn_lock_heartbeat(
    lock: Arc<dyn AnalysisLock>,
    handle: LockHandle,
) -> Option<JoinHandle<()>> {
    if handle.ttl_seconds == 0 {
        return None;
    }
    let period = Duration::from_secs((handle.ttl_seconds / 3).max(1));

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            match lock.refresh(&handle).await {
                Ok(true) => debug!("Renewed analysis lock {}", handle.key),
                Ok(false) => {
                    error!(
                        "Analysis lock {} expired mid-run; another run may start",
                        handle.key
                    );
                    break;
                }
                Err(e) => warn!("Failed to renew analysis lock {}: {}", handle.key, e),
            }
        }
    }))
}

fn panic_message(join_error: tokio::task::JoinError) -> String {
    let payload = join_error.into_panic();
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

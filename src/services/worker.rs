use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::db::{queries, JobStoreError};
use crate::services::processor::JobProcessor;
use crate::services::queue::JobQueue;

/// Jobs re-enqueued per sweep pass.
const SWEEP_BATCH: i64 = 500;

/// Fixed-size pool of tasks draining the job queue.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn spawn(
        processor: Arc<JobProcessor>,
        receiver: mpsc::Receiver<String>,
        worker_count: usize,
    ) -> Self {
        let receiver = Arc::new(Mutex::new(receiver));

        let handles = (0..worker_count)
            .map(|worker_id| {
                let processor = Arc::clone(&processor);
                let receiver = Arc::clone(&receiver);
                tokio::spawn(async move {
                    tracing::debug!(worker_id, "Worker started");
                    loop {
                        let next = receiver.lock().await.recv().await;
                        let Some(reference_id) = next else { break };

                        if let Err(e) = processor.process(&reference_id).await {
                            tracing::error!(
                                worker_id,
                                reference_id = %reference_id,
                                error = %e,
                                "Job processing aborted"
                            );
                        }
                    }
                    tracing::debug!(worker_id, "Worker stopped, queue closed");
                })
            })
            .collect();

        Self { handles }
    }

    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Wait for all workers to exit; they do once every queue sender is dropped.
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Worker task panicked");
            }
        }
    }
}

/// Re-enqueue jobs that have sat in `pending` since before `min_age` ago.
///
/// Returns how many ids were handed to the queue. Nothing is sent while the
/// queue still holds ids, and never more than it can take, so a sweep does
/// not crowd out new submissions. Sending an id that is already queued is
/// harmless: only one worker can claim it.
pub async fn requeue_pending(
    db: &SqlitePool,
    queue: &JobQueue,
    min_age: Duration,
) -> Result<usize, JobStoreError> {
    let depth = queue.queue_depth();
    if depth > 0 {
        tracing::debug!(depth, "Queue backlog present, sweep skipped");
        return Ok(0);
    }

    let cutoff = Utc::now() - chrono::Duration::from_std(min_age).unwrap_or_default();
    let limit = SWEEP_BATCH.min(queue.capacity() as i64);
    let pending = queries::get_pending_jobs(db, cutoff, limit).await?;

    let mut enqueued = 0;
    for job in &pending {
        match queue.enqueue(&job.reference_id) {
            Ok(()) => enqueued += 1,
            Err(e) => {
                tracing::warn!(error = %e, "Sweep stopped early");
                break;
            }
        }
    }

    if enqueued > 0 {
        tracing::info!(enqueued, "Re-enqueued pending jobs");
    }
    Ok(enqueued)
}

/// Periodically run [`requeue_pending`] for jobs older than one interval.
pub fn spawn_pending_sweep(
    db: SqlitePool,
    queue: Arc<JobQueue>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately; startup recovery already ran.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if !queue.is_open() {
                break;
            }
            if let Err(e) = requeue_pending(&db, &queue, interval).await {
                tracing::error!(error = %e, "Pending sweep failed");
            }
        }
    })
}

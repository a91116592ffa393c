use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Bounded in-process work channel carrying job reference ids.
///
/// Enqueueing never waits: a full or closed queue is reported to the caller,
/// and the job simply stays pending until the sweep re-enqueues it.
pub struct JobQueue {
    sender: mpsc::Sender<String>,
    capacity: usize,
}

impl JobQueue {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self { sender, capacity }, receiver)
    }

    /// Hand a job to the worker pool.
    pub fn enqueue(&self, reference_id: &str) -> Result<(), QueueError> {
        match self.sender.try_send(reference_id.to_string()) {
            Ok(()) => {
                metrics::gauge!("face_swap_queue_depth").set(self.queue_depth() as f64);
                Ok(())
            }
            Err(TrySendError::Full(id)) => Err(QueueError::Full(id)),
            Err(TrySendError::Closed(id)) => Err(QueueError::Closed(id)),
        }
    }

    /// Get the current queue depth (ids waiting for a worker).
    pub fn queue_depth(&self) -> usize {
        self.capacity - self.sender.capacity()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether the worker side is still consuming (for health checks).
    pub fn is_open(&self) -> bool {
        !self.sender.is_closed()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Job queue is full, {0} left pending")]
    Full(String),

    #[error("Job queue is closed, {0} left pending")]
    Closed(String),
}

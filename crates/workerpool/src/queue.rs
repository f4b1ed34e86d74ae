//! Bounded multi-producer, multi-consumer task queue
//!
//! A `tokio::sync::mpsc` channel whose single receiver is shared by all
//! workers behind an async mutex. Producers wait while the channel is full;
//! consumers wait while it is empty.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::error::PoolError;

/// Fixed-capacity FIFO of tasks
pub struct TaskQueue<T> {
    sender: mpsc::Sender<T>,
    receiver: Arc<Mutex<mpsc::Receiver<T>>>,
    capacity: usize,
}

impl<T> Clone for TaskQueue<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            receiver: Arc::clone(&self.receiver),
            capacity: self.capacity,
        }
    }
}

impl<T: Send + 'static> TaskQueue<T> {
    /// Create a queue holding at most `capacity` tasks.
    ///
    /// `capacity` must be positive; [`WorkerPoolConfig::validate`](crate::WorkerPoolConfig::validate)
    /// guarantees this for pool-owned queues.
    pub(crate) fn new(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity);
        Self {
            sender,
            receiver: Arc::new(Mutex::new(receiver)),
            capacity,
        }
    }

    /// Maximum number of queued tasks
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of queued tasks. Advisory: may be stale as soon as it is read.
    pub fn len(&self) -> usize {
        self.capacity.saturating_sub(self.sender.capacity())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Enqueue, waiting for space while the queue is full
    pub async fn push(&self, task: T) -> Result<(), PoolError> {
        self.sender
            .send(task)
            .await
            .map_err(|_| PoolError::QueueClosed)
    }

    /// Enqueue without waiting
    pub fn try_push(&self, task: T) -> Result<(), PoolError> {
        self.sender.try_send(task).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => PoolError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => PoolError::QueueClosed,
        })
    }

    /// Enqueue unless `cancel` fires first. A cancelled task is dropped.
    pub async fn push_until_cancelled(
        &self,
        task: T,
        cancel: &CancellationToken,
    ) -> Result<(), PoolError> {
        if cancel.is_cancelled() {
            return Err(PoolError::Cancelled);
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PoolError::Cancelled),
            sent = self.sender.send(task) => sent.map_err(|_| PoolError::QueueClosed),
        }
    }

    /// Dequeue the next task, or `None` once `cancel` fires or the queue is
    /// closed and drained. Cancellation wins when both are ready.
    pub(crate) async fn pop(&self, cancel: &CancellationToken) -> Option<T> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            task = async { self.receiver.lock().await.recv().await } => task,
        }
    }

    /// Refuse further pushes. Already queued tasks are dropped with the queue.
    pub(crate) async fn close(&self) {
        self.receiver.lock().await.close();
    }
}

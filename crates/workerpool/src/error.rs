//! Worker pool errors

/// Errors reported by [`WorkerPool`](crate::WorkerPool) and
/// [`TimedPool`](crate::TimedPool)
///
/// Dispatcher failures are not represented here: they are handed to the
/// [`ErrorHook`](crate::ErrorHook) and never escape the dispatch loop.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    /// Invalid configuration
    #[error("invalid worker pool configuration: {0}")]
    InvalidConfig(String),

    /// `start` was called on a pool that is not in the `Created` state
    #[error("worker pool has already been started")]
    AlreadyStarted,

    /// The queue is at capacity (non-blocking submission only)
    #[error("task queue is full")]
    QueueFull,

    /// The queue was released by `close`
    #[error("task queue is closed")]
    QueueClosed,

    /// Cancellation fired before the task could be enqueued
    #[error("task submission cancelled")]
    Cancelled,
}

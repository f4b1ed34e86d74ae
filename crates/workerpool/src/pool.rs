//! Worker pool for task execution
//!
//! A fixed number of workers pull tasks from a bounded queue and run the
//! worker function on each, until the pool's cancellation scope fires.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, info_span, instrument, Instrument};

use crate::config::WorkerPoolConfig;
use crate::error::PoolError;
use crate::handler::Worker;
use crate::queue::TaskQueue;

/// Worker pool status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolStatus {
    /// Constructed, not yet started
    Created,
    /// Workers (and dispatcher, if any) are running
    Running,
    /// Cancellation observed; loops are finishing their current iteration
    Draining,
    /// `close` has returned
    Stopped,
}

struct PoolState {
    status: PoolStatus,
    scope: Option<CancellationToken>,
}

/// Bounded worker pool
///
/// Queue capacity equals the worker count, so at most one task per worker
/// waits in the backlog.
///
/// # Caller obligations
///
/// - `start` is called from within a tokio runtime.
/// - A worker function that calls `add_task` on its own pool can deadlock
///   once every worker is blocked on a full queue.
///
/// # Example
///
/// ```
/// use everruns_workerpool::{WorkerPool, WorkerPoolConfig};
/// use tokio_util::sync::CancellationToken;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let pool = WorkerPool::new(WorkerPoolConfig::new(3))?
///     .with_worker(|_cancel: CancellationToken, n: u32| async move {
///         println!("task {n}");
///     });
///
/// let cancel = CancellationToken::new();
/// pool.start(&cancel)?;
/// pool.add_task(1).await?;
///
/// cancel.cancel();
/// pool.close().await;
/// # Ok(())
/// # }
/// ```
pub struct WorkerPool<T: Send + 'static> {
    config: WorkerPoolConfig,
    worker: Option<Arc<dyn Worker<T>>>,
    queue: TaskQueue<T>,
    tracker: TaskTracker,
    state: Mutex<PoolState>,
}

impl<T: Send + 'static> WorkerPool<T> {
    /// Create a pool without a worker function. Until [`with_worker`] is
    /// called, `start` spawns nothing.
    ///
    /// [`with_worker`]: WorkerPool::with_worker
    pub fn new(config: WorkerPoolConfig) -> Result<Self, PoolError> {
        config.validate()?;
        Ok(Self {
            queue: TaskQueue::new(config.workers),
            config,
            worker: None,
            tracker: TaskTracker::new(),
            state: Mutex::new(PoolState {
                status: PoolStatus::Created,
                scope: None,
            }),
        })
    }

    /// Set the worker function
    pub fn with_worker<W: Worker<T>>(mut self, worker: W) -> Self {
        self.worker = Some(Arc::new(worker));
        self
    }

    /// Configured worker count; constant for the pool's lifetime
    pub fn workers_count(&self) -> usize {
        self.config.workers
    }

    /// Pool configuration
    pub fn config(&self) -> &WorkerPoolConfig {
        &self.config
    }

    /// Enqueue a task, waiting while the queue is full.
    ///
    /// Fails with [`PoolError::QueueClosed`] once the pool is closed.
    pub async fn add_task(&self, task: T) -> Result<(), PoolError> {
        self.queue.push(task).await
    }

    /// Enqueue a task without waiting
    pub fn try_add_task(&self, task: T) -> Result<(), PoolError> {
        self.queue.try_push(task)
    }

    /// Approximate number of queued tasks
    pub fn queue_size(&self) -> usize {
        self.queue.len()
    }

    /// Current lifecycle state; `Draining` once the scope is cancelled
    pub fn status(&self) -> PoolStatus {
        let state = self.state.lock();
        match (&state.status, &state.scope) {
            (PoolStatus::Running, Some(scope)) if scope.is_cancelled() => PoolStatus::Draining,
            (status, _) => *status,
        }
    }

    /// Spawn `workers_count()` worker loops bound to `cancel`.
    ///
    /// Returns [`PoolError::AlreadyStarted`] unless the pool is freshly
    /// created. Without a worker function this only marks the pool running.
    ///
    /// Once `cancel` fires, workers stop taking tasks: anything still queued
    /// but not yet picked up is dropped, never executed.
    pub fn start(&self, cancel: &CancellationToken) -> Result<(), PoolError> {
        self.launch(cancel).map(|_| ())
    }

    /// Start the pool and hand back the scope its loops observe
    #[instrument(skip_all, fields(workers = self.config.workers))]
    pub(crate) fn launch(
        &self,
        cancel: &CancellationToken,
    ) -> Result<CancellationToken, PoolError> {
        let scope = {
            let mut state = self.state.lock();
            if state.status != PoolStatus::Created {
                return Err(PoolError::AlreadyStarted);
            }
            let scope = cancel.child_token();
            state.status = PoolStatus::Running;
            state.scope = Some(scope.clone());
            scope
        };

        let Some(worker) = &self.worker else {
            debug!("No worker function configured, pool is idle");
            return Ok(scope);
        };

        info!(workers = self.config.workers, "Starting worker pool");
        for id in 0..self.config.workers {
            self.tracker.spawn(
                run_worker(Arc::clone(worker), self.queue.clone(), scope.clone())
                    .instrument(info_span!("worker", id)),
            );
        }

        Ok(scope)
    }

    /// Wait for every spawned loop to exit, then release the queue.
    ///
    /// Cancels the pool's own scope first, so this returns even when the
    /// caller's token was never cancelled; the caller's token is not touched.
    /// In-flight worker calls always run to completion. Tasks still sitting
    /// in the queue at cancellation are dropped along with the queue.
    #[instrument(skip_all, fields(workers = self.config.workers))]
    pub async fn close(&self) {
        let scope = {
            let mut state = self.state.lock();
            if state.status == PoolStatus::Stopped {
                return;
            }
            state.status = PoolStatus::Draining;
            state.scope.clone()
        };

        if let Some(scope) = scope {
            scope.cancel();
        }

        self.tracker.close();
        self.tracker.wait().await;
        self.queue.close().await;

        self.state.lock().status = PoolStatus::Stopped;
        info!("Worker pool stopped");
    }

    pub(crate) fn queue(&self) -> &TaskQueue<T> {
        &self.queue
    }

    pub(crate) fn tracker(&self) -> &TaskTracker {
        &self.tracker
    }
}

async fn run_worker<T: Send + 'static>(
    worker: Arc<dyn Worker<T>>,
    queue: TaskQueue<T>,
    cancel: CancellationToken,
) {
    debug!("Worker started");

    while let Some(task) = queue.pop(&cancel).await {
        let invocation = AssertUnwindSafe(worker.work(cancel.clone(), task)).catch_unwind();
        if let Err(panic) = invocation.await {
            error!(panic = %panic_message(panic.as_ref()), "Worker function panicked");
        }
    }

    debug!("Worker exited");
}

/// Best-effort text of a caught panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

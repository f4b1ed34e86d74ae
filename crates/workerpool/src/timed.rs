//! Worker pool fed by a timed dispatcher
//!
//! A single dispatch loop calls the [`Dispatcher`] on a rearmable timer and
//! pushes the returned batch into the pool's queue. The timer interval adapts:
//! empty ticks back off by [`BACKOFF_FACTOR`], ticks that yield work reset it
//! to the base interval, failed ticks leave it alone.
//!
//! ```text
//!   start ──► tick ──┬─ Err(e) ─────► error hook ─────────────┐
//!              ▲     ├─ Ok([]) ─────► interval *= 10 ─────────┤
//!              │     └─ Ok([t..]) ──► push each (cancellable) │
//!              │                      interval = base ────────┤
//!              └──────────── timer fires ◄── rearm ◄──────────┘
//! ```
//!
//! [`BACKOFF_FACTOR`]: crate::backoff::BACKOFF_FACTOR

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, instrument, trace, warn, Instrument};

use crate::backoff::PollBackoff;
use crate::config::WorkerPoolConfig;
use crate::error::PoolError;
use crate::handler::{Dispatcher, ErrorHook, Worker};
use crate::pool::{panic_message, PoolStatus, WorkerPool};
use crate::queue::TaskQueue;

/// Deadline used when `now + interval` does not fit in an `Instant`
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Worker pool that receives tasks by polling a dispatcher
///
/// # Example
///
/// ```
/// use everruns_workerpool::{PollerConfig, TimedPool, WorkerPoolConfig};
/// use tokio_util::sync::CancellationToken;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = WorkerPoolConfig::new(2)
///     .with_poller(PollerConfig::new().with_base_interval_ms(500));
///
/// let pool = TimedPool::new(config)?
///     .with_dispatcher(|_cancel: CancellationToken| async move {
///         Ok::<_, anyhow::Error>(vec!["job-a", "job-b"])
///     })
///     .with_worker(|_cancel: CancellationToken, job: &'static str| async move {
///         println!("running {job}");
///     })
///     .with_error_hook(|_cancel: CancellationToken, err: anyhow::Error| async move {
///         eprintln!("dispatch failed: {err:#}");
///     });
///
/// let cancel = CancellationToken::new();
/// pool.start(&cancel)?;
///
/// cancel.cancel();
/// pool.close().await;
/// # Ok(())
/// # }
/// ```
pub struct TimedPool<T: Send + 'static> {
    pool: WorkerPool<T>,
    dispatcher: Option<Arc<dyn Dispatcher<T>>>,
    error_hook: Option<Arc<dyn ErrorHook>>,
    current_interval_ms: Arc<AtomicU64>,
}

impl<T: Send + 'static> TimedPool<T> {
    /// Create a timed pool with neither dispatcher nor worker.
    ///
    /// Without a dispatcher, `start` does nothing at all.
    pub fn new(config: WorkerPoolConfig) -> Result<Self, PoolError> {
        let base = config.poller.base_interval;
        let pool = WorkerPool::new(config)?;
        Ok(Self {
            pool,
            dispatcher: None,
            error_hook: None,
            current_interval_ms: Arc::new(AtomicU64::new(as_millis(base))),
        })
    }

    /// Set the function polled for new tasks
    pub fn with_dispatcher<D: Dispatcher<T>>(mut self, dispatcher: D) -> Self {
        self.dispatcher = Some(Arc::new(dispatcher));
        self
    }

    /// Set the worker function
    pub fn with_worker<W: Worker<T>>(mut self, worker: W) -> Self {
        self.pool = self.pool.with_worker(worker);
        self
    }

    /// Set the hook receiving dispatcher errors
    pub fn with_error_hook<H: ErrorHook>(mut self, hook: H) -> Self {
        self.error_hook = Some(Arc::new(hook));
        self
    }

    /// The underlying worker pool
    pub fn pool(&self) -> &WorkerPool<T> {
        &self.pool
    }

    /// Configured worker count
    pub fn workers_count(&self) -> usize {
        self.pool.workers_count()
    }

    /// Enqueue a task directly, bypassing the dispatcher
    pub async fn add_task(&self, task: T) -> Result<(), PoolError> {
        self.pool.add_task(task).await
    }

    /// Enqueue a task directly without waiting
    pub fn try_add_task(&self, task: T) -> Result<(), PoolError> {
        self.pool.try_add_task(task)
    }

    /// Approximate number of queued tasks
    pub fn queue_size(&self) -> usize {
        self.pool.queue_size()
    }

    /// Lifecycle state of the underlying pool
    pub fn status(&self) -> PoolStatus {
        self.pool.status()
    }

    /// Interval the dispatch loop last armed its timer with. Advisory.
    pub fn current_interval(&self) -> Duration {
        Duration::from_millis(self.current_interval_ms.load(Ordering::Relaxed))
    }

    /// Start workers and the dispatch loop. No-op without a dispatcher.
    ///
    /// After `cancel` fires, batch submission stops and queued tasks that no
    /// worker has picked up yet are dropped.
    #[instrument(skip_all)]
    pub fn start(&self, cancel: &CancellationToken) -> Result<(), PoolError> {
        let Some(dispatcher) = &self.dispatcher else {
            debug!("No dispatcher configured, timed pool is idle");
            return Ok(());
        };

        let scope = self.pool.launch(cancel)?;

        let dispatch = DispatchLoop {
            dispatcher: Arc::clone(dispatcher),
            error_hook: self.error_hook.clone(),
            queue: self.pool.queue().clone(),
            backoff: PollBackoff::new(&self.pool.config().poller),
            current_interval_ms: Arc::clone(&self.current_interval_ms),
        };
        self.pool
            .tracker()
            .spawn(dispatch.run(scope).instrument(info_span!("dispatcher")));

        Ok(())
    }

    /// Wait for the dispatch loop and all workers to exit.
    ///
    /// Same contract as [`WorkerPool::close`].
    pub async fn close(&self) {
        self.pool.close().await
    }
}

/// Result of one dispatcher tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tick {
    /// Dispatcher returned an error
    Failed,
    /// Dispatcher returned no tasks
    Empty,
    /// Whole batch was enqueued
    Submitted(usize),
    /// Submission stopped by cancellation or a closed queue
    Interrupted,
}

struct DispatchLoop<T: Send + 'static> {
    dispatcher: Arc<dyn Dispatcher<T>>,
    error_hook: Option<Arc<dyn ErrorHook>>,
    queue: TaskQueue<T>,
    backoff: PollBackoff,
    current_interval_ms: Arc<AtomicU64>,
}

impl<T: Send + 'static> DispatchLoop<T> {
    async fn run(mut self, cancel: CancellationToken) {
        info!(
            base_interval_ms = as_millis(self.backoff.base()),
            "Dispatch loop started"
        );

        let timer = tokio::time::sleep_until(deadline_after(self.backoff.current()));
        tokio::pin!(timer);

        // First tick fires immediately
        loop {
            match self.tick(&cancel).await {
                Tick::Interrupted => break,
                Tick::Failed => {}
                Tick::Empty => {
                    let interval = self.backoff.back_off();
                    trace!(
                        interval_ms = as_millis(interval),
                        "No tasks found, backing off"
                    );
                }
                Tick::Submitted(count) => {
                    self.backoff.reset();
                    debug!(count, "Dispatched tasks");
                }
            }

            let interval = self.backoff.current();
            self.current_interval_ms
                .store(as_millis(interval), Ordering::Relaxed);
            timer.as_mut().reset(deadline_after(interval));

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = &mut timer => {}
            }
        }

        debug!("Dispatch loop exited");
    }

    async fn tick(&self, cancel: &CancellationToken) -> Tick {
        let dispatched = AssertUnwindSafe(self.dispatcher.dispatch(cancel.clone()))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(anyhow::anyhow!(
                    "dispatcher panicked: {}",
                    panic_message(panic.as_ref())
                ))
            });

        let tasks = match dispatched {
            Ok(tasks) => tasks,
            Err(err) => {
                self.report(cancel, err).await;
                return Tick::Failed;
            }
        };

        if tasks.is_empty() {
            return Tick::Empty;
        }

        let count = tasks.len();
        for (index, task) in tasks.into_iter().enumerate() {
            if let Err(e) = self.queue.push_until_cancelled(task, cancel).await {
                debug!(
                    submitted = index,
                    dropped = count - index,
                    reason = %e,
                    "Stopped submitting batch"
                );
                return Tick::Interrupted;
            }
        }

        Tick::Submitted(count)
    }

    async fn report(&self, cancel: &CancellationToken, err: anyhow::Error) {
        let Some(hook) = &self.error_hook else {
            warn!(error = %err, "Dispatcher failed");
            return;
        };

        let handled = AssertUnwindSafe(hook.on_error(cancel.clone(), err))
            .catch_unwind()
            .await;
        if let Err(panic) = handled {
            error!(panic = %panic_message(panic.as_ref()), "Error hook panicked");
        }
    }
}

fn deadline_after(interval: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(interval).unwrap_or_else(|| now + FAR_FUTURE)
}

fn as_millis(interval: Duration) -> u64 {
    u64::try_from(interval.as_millis()).unwrap_or(u64::MAX)
}

//! Callbacks driven by the pool
//!
//! Each trait has a blanket implementation for async closures, so most
//! callers never implement them by hand:
//!
//! ```
//! use everruns_workerpool::{Dispatcher, Worker};
//! use tokio_util::sync::CancellationToken;
//!
//! fn assert_worker<W: Worker<u64>>(_: W) {}
//! fn assert_dispatcher<D: Dispatcher<u64>>(_: D) {}
//!
//! assert_worker(|_cancel: CancellationToken, job: u64| async move {
//!     println!("processing {job}");
//! });
//! assert_dispatcher(|_cancel: CancellationToken| async move {
//!     Ok::<_, anyhow::Error>(vec![1u64, 2, 3])
//! });
//! ```

use std::future::Future;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Executes one task. Invoked once per dequeued task, for effect only.
///
/// The call always runs to completion; cancellation is passed in so long
/// running work can choose to wind down early.
#[async_trait]
pub trait Worker<T: Send + 'static>: Send + Sync + 'static {
    async fn work(&self, cancel: CancellationToken, task: T);
}

#[async_trait]
impl<T, F, Fut> Worker<T> for F
where
    T: Send + 'static,
    F: Fn(CancellationToken, T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn work(&self, cancel: CancellationToken, task: T) {
        (self)(cancel, task).await
    }
}

/// Produces a batch of tasks. Invoked once per dispatcher tick.
///
/// Returning an empty batch backs the polling interval off; returning an
/// error leaves the interval untouched and reports it to the [`ErrorHook`].
#[async_trait]
pub trait Dispatcher<T: Send + 'static>: Send + Sync + 'static {
    async fn dispatch(&self, cancel: CancellationToken) -> anyhow::Result<Vec<T>>;
}

#[async_trait]
impl<T, F, Fut> Dispatcher<T> for F
where
    T: Send + 'static,
    F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Vec<T>>> + Send + 'static,
{
    async fn dispatch(&self, cancel: CancellationToken) -> anyhow::Result<Vec<T>> {
        (self)(cancel).await
    }
}

/// Observes dispatcher failures
#[async_trait]
pub trait ErrorHook: Send + Sync + 'static {
    async fn on_error(&self, cancel: CancellationToken, error: anyhow::Error);
}

#[async_trait]
impl<F, Fut> ErrorHook for F
where
    F: Fn(CancellationToken, anyhow::Error) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn on_error(&self, cancel: CancellationToken, error: anyhow::Error) {
        (self)(cancel, error).await
    }
}

//! # Bounded Worker Pool
//!
//! A tokio-based engine for recurring background processing: a fixed set of
//! workers drains a bounded queue, optionally fed by a timed dispatcher that
//! polls an external task source.
//!
//! ## Features
//!
//! - **Bounded backlog**: queue capacity equals the worker count; producers wait when it is full
//! - **Adaptive polling**: the dispatcher backs off x10 on empty polls and resets once work appears
//! - **Cooperative cancellation**: one [`CancellationToken`] stops every loop at its next suspension point
//! - **Panic isolation**: a panicking worker call is logged and the worker moves on
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        TimedPool                             │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │  DispatchLoop (rearmable timer, 100ms -> 1s -> ...)  │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! │         │                                                    │
//! │         ▼                                                    │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │           TaskQueue (capacity = workers)             │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! │         │                                                    │
//! │         ▼                                                    │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │  WorkerPool: [worker 0] [worker 1] ... [worker N-1]  │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every loop is spawned on one `TaskTracker`; `close` waits on it.
//!
//! [`CancellationToken`]: tokio_util::sync::CancellationToken

pub mod backoff;
pub mod config;
pub mod error;
pub mod handler;
pub mod pool;
pub mod queue;
pub mod timed;

/// Prelude for common imports
pub mod prelude {
    pub use crate::config::{PollerConfig, WorkerPoolConfig};
    pub use crate::error::PoolError;
    pub use crate::handler::{Dispatcher, ErrorHook, Worker};
    pub use crate::pool::{PoolStatus, WorkerPool};
    pub use crate::timed::TimedPool;
    pub use tokio_util::sync::CancellationToken;
}

// Re-export key types at crate root
pub use backoff::{PollBackoff, BACKOFF_FACTOR};
pub use config::{PollerConfig, WorkerPoolConfig};
pub use error::PoolError;
pub use handler::{Dispatcher, ErrorHook, Worker};
pub use pool::{PoolStatus, WorkerPool};
pub use timed::TimedPool;

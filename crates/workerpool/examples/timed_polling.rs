// Timed polling demo
//
// A producer drops jobs into an in-memory inbox in bursts; a TimedPool polls
// the inbox and fans the jobs out to workers. Watch the poll interval back
// off between bursts and snap back when jobs arrive.
//
// Run with: RUST_LOG=everruns_workerpool=trace,timed_polling=info cargo run -p everruns-workerpool --example timed_polling
//
// Configure via environment variables (or a .env file):
// - WORKERPOOL_WORKERS: worker count (default: 10)
// - WORKERPOOL_POLL_INTERVAL_MS: base poll interval (default: 100)
// - WORKERPOOL_MAX_POLL_INTERVAL_MS: backoff ceiling (default: none)

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use everruns_workerpool::prelude::*;
use parking_lot::Mutex;
use tracing_subscriber::EnvFilter;

#[derive(Debug)]
struct Job {
    id: u64,
    payload: String,
}

/// Jobs taken per poll
const BATCH_SIZE: usize = 8;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("everruns_workerpool=debug,timed_polling=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = WorkerPoolConfig::from_env();
    tracing::info!(
        workers = config.workers,
        base_interval_ms = config.poller.base_interval.as_millis() as u64,
        "Starting timed polling demo"
    );

    let inbox: Arc<Mutex<VecDeque<Job>>> = Arc::new(Mutex::new(VecDeque::new()));

    let source = Arc::clone(&inbox);
    let pool = TimedPool::new(config)
        .context("invalid worker pool configuration")?
        .with_dispatcher(move |_cancel: CancellationToken| {
            let source = Arc::clone(&source);
            async move {
                let mut inbox = source.lock();
                let take = inbox.len().min(BATCH_SIZE);
                Ok::<_, anyhow::Error>(inbox.drain(..take).collect::<Vec<Job>>())
            }
        })
        .with_worker(|cancel: CancellationToken, job: Job| async move {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(50)) => {
                    tracing::info!(job_id = job.id, payload = %job.payload, "Processed job");
                }
                _ = cancel.cancelled() => {
                    tracing::info!(job_id = job.id, "Job abandoned during shutdown");
                }
            }
        })
        .with_error_hook(|_cancel: CancellationToken, err: anyhow::Error| async move {
            tracing::error!(error = %err, "Failed to poll inbox");
        });

    let cancel = CancellationToken::new();
    pool.start(&cancel).context("failed to start worker pool")?;

    // Bursts of jobs separated by quiet periods
    let producer = {
        let inbox = Arc::clone(&inbox);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let mut next_id = 0u64;
            loop {
                {
                    let mut inbox = inbox.lock();
                    for _ in 0..20 {
                        inbox.push_back(Job {
                            id: next_id,
                            payload: format!("job-{next_id}"),
                        });
                        next_id += 1;
                    }
                }
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(15)) => {}
                    _ = cancel.cancelled() => break,
                }
            }
        })
    };

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("Received shutdown signal");

    cancel.cancel();
    pool.close().await;
    producer.await.context("producer task failed")?;

    tracing::info!("Shutdown complete");
    Ok(())
}

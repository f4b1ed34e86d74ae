//! Integration tests for WorkerPool
//!
//! Run with: cargo test -p everruns-workerpool --test pool_test

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;

use everruns_workerpool::{PoolError, PoolStatus, WorkerPool, WorkerPoolConfig};

/// Worker that records each task and reports it on `done`
fn recording_pool(
    workers: usize,
) -> (
    WorkerPool<u32>,
    Arc<Mutex<Vec<u32>>>,
    mpsc::UnboundedReceiver<u32>,
) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let (done_tx, done_rx) = mpsc::unbounded_channel();

    let log = Arc::clone(&seen);
    let pool = WorkerPool::new(WorkerPoolConfig::new(workers))
        .unwrap()
        .with_worker(move |_cancel: CancellationToken, task: u32| {
            let log = Arc::clone(&log);
            let done_tx = done_tx.clone();
            async move {
                log.lock().push(task);
                let _ = done_tx.send(task);
            }
        });

    (pool, seen, done_rx)
}

/// Worker that reports its task on `started`, then waits for a gate permit
fn gated_pool(
    workers: usize,
) -> (
    WorkerPool<u32>,
    Arc<Semaphore>,
    Arc<Mutex<Vec<u32>>>,
    mpsc::UnboundedReceiver<u32>,
) {
    let gate = Arc::new(Semaphore::new(0));
    let started = Arc::new(Mutex::new(Vec::new()));
    let (started_tx, started_rx) = mpsc::unbounded_channel();

    let worker_gate = Arc::clone(&gate);
    let log = Arc::clone(&started);
    let pool = WorkerPool::new(WorkerPoolConfig::new(workers))
        .unwrap()
        .with_worker(move |_cancel: CancellationToken, task: u32| {
            let gate = Arc::clone(&worker_gate);
            let log = Arc::clone(&log);
            let started_tx = started_tx.clone();
            async move {
                log.lock().push(task);
                let _ = started_tx.send(task);
                if let Ok(permit) = gate.acquire().await {
                    permit.forget();
                }
            }
        });

    (pool, gate, started, started_rx)
}

// ============================================
// Delivery
// ============================================

#[test_log::test(tokio::test)]
async fn test_every_task_runs_exactly_once() {
    let (pool, seen, mut done) = recording_pool(3);
    let cancel = CancellationToken::new();
    pool.start(&cancel).unwrap();

    for task in 0..10 {
        pool.add_task(task).await.unwrap();
    }
    for _ in 0..10 {
        done.recv().await.unwrap();
    }

    cancel.cancel();
    pool.close().await;

    let mut seen = seen.lock().clone();
    seen.sort_unstable();
    assert_eq!(seen, (0..10).collect::<Vec<_>>());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_producers_lose_nothing() {
    let (pool, seen, mut done) = recording_pool(4);
    let pool = Arc::new(pool);
    let cancel = CancellationToken::new();
    pool.start(&cancel).unwrap();

    let producers: Vec<_> = (0..4u32)
        .map(|p| {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move {
                for i in 0..25 {
                    pool.add_task(p * 100 + i).await.unwrap();
                }
            })
        })
        .collect();
    for producer in producers {
        producer.await.unwrap();
    }
    for _ in 0..100 {
        done.recv().await.unwrap();
    }

    cancel.cancel();
    pool.close().await;

    let seen = seen.lock().clone();
    assert_eq!(seen.len(), 100);
    let unique: HashSet<_> = seen.iter().copied().collect();
    assert_eq!(unique.len(), 100);
}

// ============================================
// Backpressure
// ============================================

#[tokio::test]
async fn test_queue_never_exceeds_worker_count() {
    let (pool, gate, _started, mut started_rx) = gated_pool(2);
    let cancel = CancellationToken::new();
    pool.start(&cancel).unwrap();

    // Occupy both workers, then fill the queue
    pool.add_task(1).await.unwrap();
    pool.add_task(2).await.unwrap();
    started_rx.recv().await.unwrap();
    started_rx.recv().await.unwrap();
    pool.add_task(3).await.unwrap();
    pool.add_task(4).await.unwrap();

    assert_eq!(pool.queue_size(), 2);
    assert_eq!(pool.try_add_task(5), Err(PoolError::QueueFull));
    assert!(pool.queue_size() <= pool.workers_count());

    // A blocking producer resumes once a worker frees a slot
    let blocked = tokio::time::timeout(Duration::from_millis(50), pool.add_task(5)).await;
    assert!(blocked.is_err(), "add_task should wait while the queue is full");

    gate.add_permits(1);
    tokio::time::timeout(Duration::from_secs(5), pool.add_task(5))
        .await
        .expect("add_task should resume")
        .unwrap();
    assert!(pool.queue_size() <= pool.workers_count());

    gate.add_permits(100);
    cancel.cancel();
    pool.close().await;
}

// ============================================
// Shutdown
// ============================================

#[tokio::test]
async fn test_no_new_invocations_after_cancel() {
    let (pool, gate, started, mut started_rx) = gated_pool(2);
    let cancel = CancellationToken::new();
    pool.start(&cancel).unwrap();

    pool.add_task(1).await.unwrap();
    pool.add_task(2).await.unwrap();
    started_rx.recv().await.unwrap();
    started_rx.recv().await.unwrap();
    pool.add_task(3).await.unwrap();
    pool.add_task(4).await.unwrap();

    cancel.cancel();
    assert_eq!(pool.status(), PoolStatus::Draining);

    // In-flight calls finish; queued tasks are never picked up
    gate.add_permits(100);
    tokio::time::timeout(Duration::from_secs(5), pool.close())
        .await
        .expect("close should return after cancellation");

    let mut started = started.lock().clone();
    started.sort_unstable();
    assert_eq!(started, vec![1, 2]);
    assert_eq!(pool.status(), PoolStatus::Stopped);
}

#[tokio::test]
async fn test_close_waits_for_in_flight_call() {
    let (pool, gate, _started, mut started_rx) = gated_pool(1);
    let pool = Arc::new(pool);
    let cancel = CancellationToken::new();
    pool.start(&cancel).unwrap();

    pool.add_task(1).await.unwrap();
    started_rx.recv().await.unwrap();
    cancel.cancel();

    let closing = {
        let pool = Arc::clone(&pool);
        tokio::spawn(async move { pool.close().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!closing.is_finished(), "close returned while a call was running");

    gate.add_permits(1);
    tokio::time::timeout(Duration::from_secs(5), closing)
        .await
        .expect("close should finish")
        .unwrap();
}

#[tokio::test]
async fn test_add_task_after_close_fails() {
    let (pool, _seen, _done) = recording_pool(2);
    let cancel = CancellationToken::new();
    pool.start(&cancel).unwrap();

    cancel.cancel();
    pool.close().await;

    assert_eq!(pool.add_task(1).await, Err(PoolError::QueueClosed));
    assert_eq!(pool.try_add_task(2), Err(PoolError::QueueClosed));
}

// ============================================
// Failure isolation
// ============================================

#[test_log::test(tokio::test)]
async fn test_worker_panic_does_not_kill_worker() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let (done_tx, mut done_rx) = mpsc::unbounded_channel();

    let log = Arc::clone(&seen);
    let pool = WorkerPool::new(WorkerPoolConfig::new(1))
        .unwrap()
        .with_worker(move |_cancel: CancellationToken, task: u32| {
            let log = Arc::clone(&log);
            let done_tx = done_tx.clone();
            async move {
                if task == 0 {
                    panic!("task 0 is poisoned");
                }
                log.lock().push(task);
                let _ = done_tx.send(task);
            }
        });

    let cancel = CancellationToken::new();
    pool.start(&cancel).unwrap();

    for task in 0..3 {
        pool.add_task(task).await.unwrap();
    }
    done_rx.recv().await.unwrap();
    done_rx.recv().await.unwrap();

    cancel.cancel();
    pool.close().await;

    assert_eq!(*seen.lock(), vec![1, 2]);
}

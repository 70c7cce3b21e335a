//! Worker pool capacity and shutdown behavior.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::wait_until;
use framewire::{PoolHandler, Priority, Shutdown, WorkerPool, WorkerPoolConfig};

#[derive(Clone, Default)]
struct CountingHandler {
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    done: Arc<AtomicUsize>,
}

impl PoolHandler<u32> for CountingHandler {
    async fn handle(&self, _task: u32) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.done.fetch_add(1, Ordering::SeqCst);
    }
}

fn pool_with_cap(
    handler: CountingHandler,
    max_workers: usize,
) -> WorkerPool<u32, CountingHandler> {
    let config = WorkerPoolConfig {
        max_workers,
        wait_time: Some(Duration::from_secs(2)),
    };
    WorkerPool::new(handler, config, Shutdown::new())
}

#[tokio::test]
async fn concurrency_never_exceeds_the_worker_cap() {
    let handler = CountingHandler::default();
    let pool = pool_with_cap(handler.clone(), 2);

    for task in 0..10 {
        pool.submit(task, Priority::Normal).unwrap();
        // let running workers pick work up, so the pool sees them busy and
        // grows toward the cap instead of queueing behind one worker
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    assert!(wait_until(|| handler.done.load(Ordering::SeqCst) == 10).await);
    assert!(handler.peak.load(Ordering::SeqCst) <= 2);
    assert!(pool.worker_count() <= 2);

    pool.shutdown().await;
}

#[tokio::test]
async fn workers_are_recycled_between_jobs() {
    let handler = CountingHandler::default();
    let pool = pool_with_cap(handler.clone(), 1);

    pool.submit(1, Priority::Normal).unwrap();
    assert!(wait_until(|| handler.done.load(Ordering::SeqCst) == 1).await);
    let workers_after_first = pool.worker_count();

    pool.submit(2, Priority::Normal).unwrap();
    assert!(wait_until(|| handler.done.load(Ordering::SeqCst) == 2).await);

    assert_eq!(workers_after_first, 1, "the worker must survive its first job");
    assert_eq!(pool.worker_count(), 1, "the same worker runs follow-up jobs");

    pool.shutdown().await;
}

#[tokio::test]
async fn high_priority_jobs_run_before_queued_normal_ones() {
    let order: Arc<std::sync::Mutex<Vec<u32>>> = Arc::default();

    #[derive(Clone)]
    struct OrderHandler {
        order: Arc<std::sync::Mutex<Vec<u32>>>,
    }
    impl PoolHandler<u32> for OrderHandler {
        async fn handle(&self, task: u32) {
            self.order.lock().unwrap().push(task);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    let pool = WorkerPool::new(
        OrderHandler {
            order: order.clone(),
        },
        WorkerPoolConfig {
            max_workers: 1,
            wait_time: Some(Duration::from_secs(2)),
        },
        Shutdown::new(),
    );

    // one worker: jobs queued before it first runs come off strictly by tier
    pool.submit(1, Priority::Low).unwrap();
    pool.submit(2, Priority::Normal).unwrap();
    pool.submit(3, Priority::High).unwrap();
    pool.submit(4, Priority::Normal).unwrap();

    assert!(wait_until(|| order.lock().unwrap().len() == 4).await);
    assert_eq!(*order.lock().unwrap(), vec![3, 2, 4, 1]);

    pool.shutdown().await;
}

#[tokio::test]
async fn shutdown_rejects_new_work() {
    let handler = CountingHandler::default();
    let pool = pool_with_cap(handler.clone(), 2);

    pool.submit(1, Priority::Normal).unwrap();
    assert!(wait_until(|| handler.done.load(Ordering::SeqCst) == 1).await);
    pool.shutdown().await;

    assert!(pool.submit(2, Priority::Normal).is_err());
    assert_eq!(handler.done.load(Ordering::SeqCst), 1);
}

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error};

use crate::dispatch::{Priority, PriorityQueue};
use crate::service::{EngineResult, Shutdown};
use crate::utils::maybe_timeout;

/// Handler executed by pool workers for each job.
pub trait PoolHandler<T>: Clone + Send + Sync + 'static {
    fn handle(&self, task: T) -> impl Future<Output = ()> + Send;
}

#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// maximum live workers, 0 = unbounded
    pub max_workers: usize,
    /// shutdown join budget; `None` waits forever
    pub wait_time: Option<Duration>,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        WorkerPoolConfig {
            max_workers: num_cpus::get(),
            wait_time: Some(Duration::from_secs(3)),
        }
    }
}

/// A bounded set of recycled workers pulling jobs off a tiered priority
/// queue.
///
/// Workers are spawned on demand, up to the configured cap, and return to
/// the queue after each job instead of exiting. Once the cap is reached new
/// work queues rather than spawning. Shutdown is cooperative: the stop
/// signal interrupts the queue wait, each worker finishes its current job,
/// and only workers that outlive the wait budget are aborted.
#[derive(Debug)]
pub struct WorkerPool<T, H> {
    queue: Arc<PriorityQueue<T>>,
    handler: H,
    config: WorkerPoolConfig,
    shutdown: Shutdown,
    workers: parking_lot::Mutex<Vec<JoinHandle<()>>>,
    busy: Arc<AtomicUsize>,
    next_worker_id: AtomicUsize,
}

impl<T, H> WorkerPool<T, H>
where
    T: Send + 'static,
    H: PoolHandler<T>,
{
    pub fn new(handler: H, config: WorkerPoolConfig, shutdown: Shutdown) -> WorkerPool<T, H> {
        WorkerPool {
            queue: Arc::new(PriorityQueue::new()),
            handler,
            config,
            shutdown,
            workers: parking_lot::Mutex::new(Vec::new()),
            busy: Arc::new(AtomicUsize::new(0)),
            next_worker_id: AtomicUsize::new(0),
        }
    }

    /// Queues a job at the given priority. A worker is spawned only when
    /// every live worker is busy and the cap leaves room; otherwise the job
    /// waits for a recycled worker.
    pub fn submit(&self, task: T, priority: Priority) -> EngineResult<()> {
        self.queue.push(task, priority)?;
        self.maybe_spawn_worker();
        Ok(())
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn worker_count(&self) -> usize {
        let mut workers = self.workers.lock();
        workers.retain(|handle| !handle.is_finished());
        workers.len()
    }

    fn maybe_spawn_worker(&self) {
        let mut workers = self.workers.lock();
        workers.retain(|handle| !handle.is_finished());
        let live = workers.len();
        let all_busy = self.busy.load(Ordering::Acquire) >= live;
        let below_cap = self.config.max_workers == 0 || live < self.config.max_workers;
        if all_busy && below_cap {
            let id = self.next_worker_id.fetch_add(1, Ordering::Relaxed);
            workers.push(self.spawn_worker(id));
        }
    }

    fn spawn_worker(&self, id: usize) -> JoinHandle<()> {
        let queue = self.queue.clone();
        let handler = self.handler.clone();
        let busy = self.busy.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            debug!("worker {id} started");
            loop {
                let task = tokio::select! {
                    task = queue.pop() => task,
                    _ = shutdown.wait() => {
                        debug!("worker {id} received shutdown signal");
                        break;
                    }
                };
                let Some(task) = task else { break };
                busy.fetch_add(1, Ordering::AcqRel);
                handler.handle(task).await;
                busy.fetch_sub(1, Ordering::AcqRel);
            }
            debug!("worker {id} exited");
        })
    }

    /// Cooperative shutdown: latch the stop signal, close the queue, and
    /// join every worker within the wait budget. Workers still running past
    /// the budget are aborted as a last resort.
    pub async fn shutdown(&self) {
        self.shutdown.trigger();
        self.queue.close();

        let handles: Vec<_> = self.workers.lock().drain(..).collect();
        let deadline = self.config.wait_time.map(|wait| Instant::now() + wait);
        for mut handle in handles {
            let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
            match maybe_timeout(remaining, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(join_error)) => {
                    if join_error.is_panic() {
                        log_worker_panic(join_error);
                    }
                }
                Err(_) => {
                    error!("worker did not stop within the wait budget, aborting");
                    handle.abort();
                }
            }
        }
        debug!("worker pool shut down");
    }
}

fn log_worker_panic(join_error: tokio::task::JoinError) {
    let payload = join_error.into_panic();
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        error!("worker panicked with message: {message}");
    } else if let Some(message) = payload.downcast_ref::<String>() {
        error!("worker panicked with message: {message}");
    } else {
        error!("worker panicked with a non-string payload");
    }
}

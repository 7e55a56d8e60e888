//! In-memory priority worker pool.
//!
//! A [`WorkerPool`] owns `N` long-lived tokio tasks that pull from a shared,
//! `Mutex`-guarded [`std::collections::BinaryHeap`] of [`ScheduledJob`]s
//! ordered by `(priority desc, submission order asc)`. There is no external
//! queue backend — submission, scheduling and execution all happen in this
//! process.
//!
//! # Example
//!
//! ```rust,ignore
//! use mev_core::scheduler::{WorkerPool, WorkerPoolConfig};
//!
//! let pool = WorkerPool::new(WorkerPoolConfig::default());
//! pool.start();
//! pool.submit(Box::new(my_job))?;
//! let stats = pool.stats();
//! pool.stop().await?;
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::PoolError;
use crate::metrics::MetricsCollector;

use super::job::{Job, ScheduledJob};

/// Configuration for a [`WorkerPool`].
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of long-lived worker tasks to spawn.
    pub pool_size: usize,
    /// Maximum number of pending (not yet dispatched) jobs the queue holds.
    pub queue_size: usize,
    /// Upper bound on a job's own advertised timeout; the pool derives the
    /// effective deadline as `min(job.timeout(), max_job_timeout)`.
    pub max_job_timeout: Duration,
    /// Grace period `stop` waits for in-flight jobs to drain before forcing
    /// cancellation and returning `ShutdownTimeout`.
    pub shutdown_timeout: Duration,
    /// Whether this pool should publish Prometheus metrics.
    pub metrics_enabled: bool,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            pool_size: 10,
            queue_size: 100,
            max_job_timeout: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(30),
            metrics_enabled: true,
        }
    }
}

impl WorkerPoolConfig {
    /// Creates a new configuration with the given pool size.
    pub fn new(pool_size: usize) -> Self {
        Self {
            pool_size,
            ..Default::default()
        }
    }

    pub fn with_queue_size(mut self, size: usize) -> Self {
        self.queue_size = size;
        self
    }

    pub fn with_max_job_timeout(mut self, timeout: Duration) -> Self {
        self.max_job_timeout = timeout;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn with_metrics_enabled(mut self, enabled: bool) -> Self {
        self.metrics_enabled = enabled;
        self
    }
}

/// A point-in-time snapshot of pool health.
#[derive(Debug, Clone, Copy, Default)]
pub struct PoolStats {
    pub pool_size: usize,
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub in_flight: usize,
    pub queue_depth: usize,
    /// `in_flight / pool_size`, in `[0.0, 1.0]`.
    pub utilization: f64,
    pub mean_wait_time: Duration,
    pub mean_exec_time: Duration,
}

/// Shared, lock-free counters backing [`PoolStats`]. Mirrors the teacher's
/// `SharedPoolStats` pattern but tracks wait time separately from execution
/// time, since the spec reports both.
struct SharedStats {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    in_flight: AtomicUsize,
    queue_depth: AtomicUsize,
    total_wait_ms: AtomicU64,
    total_exec_ms: AtomicU64,
}

impl SharedStats {
    fn new() -> Self {
        Self {
            submitted: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
            queue_depth: AtomicUsize::new(0),
            total_wait_ms: AtomicU64::new(0),
            total_exec_ms: AtomicU64::new(0),
        }
    }

    fn snapshot(&self, pool_size: usize) -> PoolStats {
        let completed = self.completed.load(Ordering::SeqCst);
        let failed = self.failed.load(Ordering::SeqCst);
        let total = completed + failed;
        let in_flight = self.in_flight.load(Ordering::SeqCst);

        let mean_wait_time = if total > 0 {
            Duration::from_millis(self.total_wait_ms.load(Ordering::SeqCst) / total)
        } else {
            Duration::ZERO
        };
        let mean_exec_time = if total > 0 {
            Duration::from_millis(self.total_exec_ms.load(Ordering::SeqCst) / total)
        } else {
            Duration::ZERO
        };

        PoolStats {
            pool_size,
            submitted: self.submitted.load(Ordering::SeqCst),
            completed,
            failed,
            in_flight,
            queue_depth: self.queue_depth.load(Ordering::SeqCst),
            utilization: if pool_size > 0 {
                in_flight as f64 / pool_size as f64
            } else {
                0.0
            },
            mean_wait_time,
            mean_exec_time,
        }
    }
}

/// The priority queue shared between `submit` and the worker loops.
struct SharedQueue {
    heap: Mutex<std::collections::BinaryHeap<ScheduledJob>>,
    notify: Notify,
    next_seq: AtomicU64,
}

impl SharedQueue {
    fn new() -> Self {
        Self {
            heap: Mutex::new(std::collections::BinaryHeap::new()),
            notify: Notify::new(),
            next_seq: AtomicU64::new(0),
        }
    }
}

/// A pool of workers dispatching [`Job`]s in priority order.
pub struct WorkerPool {
    name: Arc<str>,
    config: WorkerPoolConfig,
    queue: Arc<SharedQueue>,
    stats: Arc<SharedStats>,
    shutdown: CancellationToken,
    draining: Arc<AtomicBool>,
    running: AtomicBool,
    worker_handles: Mutex<Vec<JoinHandle<()>>>,
    metrics: MetricsCollector,
}

impl WorkerPool {
    /// Creates a new, not-yet-started pool labeled `"pool"` in metrics.
    pub fn new(config: WorkerPoolConfig) -> Self {
        Self::with_name("pool", config)
    }

    /// Creates a new, not-yet-started pool, tagging its Prometheus series
    /// with `name` (e.g. `"simulation"`, `"strategy"`).
    pub fn with_name(name: impl Into<String>, config: WorkerPoolConfig) -> Self {
        Self {
            name: Arc::from(name.into()),
            config,
            queue: Arc::new(SharedQueue::new()),
            stats: Arc::new(SharedStats::new()),
            shutdown: CancellationToken::new(),
            draining: Arc::new(AtomicBool::new(false)),
            running: AtomicBool::new(false),
            worker_handles: Mutex::new(Vec::new()),
            metrics: MetricsCollector::new(),
        }
    }

    /// Submits a job for execution. Rejected with [`PoolError::NotRunning`]
    /// once the pool is stopped or draining, and with
    /// [`PoolError::QueueFull`] once the pending queue is at capacity.
    pub async fn submit(&self, job: Box<dyn Job>) -> Result<(), PoolError> {
        if !self.running.load(Ordering::SeqCst) || self.draining.load(Ordering::SeqCst) {
            return Err(PoolError::NotRunning);
        }

        let mut heap = self.queue.heap.lock().await;
        if heap.len() >= self.config.queue_size {
            return Err(PoolError::QueueFull(self.config.queue_size));
        }

        let seq = self.queue.next_seq.fetch_add(1, Ordering::SeqCst);
        heap.push(ScheduledJob::new(job, seq));
        let depth = heap.len();
        drop(heap);

        self.stats.submitted.fetch_add(1, Ordering::SeqCst);
        self.stats.queue_depth.fetch_add(1, Ordering::SeqCst);
        if self.config.metrics_enabled {
            self.metrics.record_job_submitted(&self.name);
            self.metrics.update_queue_depth(&self.name, depth);
        }
        self.queue.notify.notify_one();
        Ok(())
    }

    /// Spawns `pool_size` worker tasks. Idempotent calls fail with
    /// [`PoolError::AlreadyRunning`]. Takes `&self` (internally
    /// `Mutex`-guarded) so a pool can be shared via `Arc` with the jobs it
    /// dispatches, rather than requiring exclusive ownership to start it.
    pub async fn start(&self) -> Result<(), PoolError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(PoolError::AlreadyRunning);
        }

        self.draining.store(false, Ordering::SeqCst);

        let mut handles = self.worker_handles.lock().await;
        for i in 0..self.config.pool_size {
            let worker = WorkerLoop {
                id: format!("worker-{i}"),
                pool_name: Arc::clone(&self.name),
                queue: Arc::clone(&self.queue),
                stats: Arc::clone(&self.stats),
                shutdown: self.shutdown.clone(),
                max_job_timeout: self.config.max_job_timeout,
                metrics: self.metrics,
                metrics_enabled: self.config.metrics_enabled,
            };
            handles.push(tokio::spawn(worker.run()));
        }

        info!(pool_size = self.config.pool_size, "worker pool started");
        Ok(())
    }

    /// Stops accepting new jobs, waits up to `shutdown_timeout` for in-flight
    /// and queued jobs to drain, then cancels stragglers and joins all
    /// worker tasks.
    pub async fn stop(&self) -> Result<(), PoolError> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(PoolError::NotRunning);
        }

        info!("worker pool stop requested");
        self.draining.store(true, Ordering::SeqCst);

        let drain = async {
            loop {
                let queue_empty = self.queue.heap.lock().await.is_empty();
                let idle = self.stats.in_flight.load(Ordering::SeqCst) == 0;
                if queue_empty && idle {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        };

        let drained = tokio::time::timeout(self.config.shutdown_timeout, drain)
            .await
            .is_ok();

        self.shutdown.cancel();
        let mut handles = self.worker_handles.lock().await;
        for handle in handles.drain(..) {
            if let Err(e) = handle.await {
                error!(error = %e, "worker task panicked during shutdown");
            }
        }
        self.running.store(false, Ordering::SeqCst);

        if drained {
            info!("worker pool stopped");
            Ok(())
        } else {
            warn!("worker pool stopped with jobs still in flight");
            Err(PoolError::ShutdownTimeout(self.config.shutdown_timeout))
        }
    }

    /// Returns a snapshot of current pool statistics.
    pub fn stats(&self) -> PoolStats {
        self.stats.snapshot(self.config.pool_size)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn pool_size(&self) -> usize {
        self.config.pool_size
    }
}

/// Per-worker-task state. Cloning the `Arc`-backed fields is cheap; each
/// worker owns its own copy rather than borrowing back from `WorkerPool`.
struct WorkerLoop {
    id: String,
    pool_name: Arc<str>,
    queue: Arc<SharedQueue>,
    stats: Arc<SharedStats>,
    shutdown: CancellationToken,
    max_job_timeout: Duration,
    metrics: MetricsCollector,
    metrics_enabled: bool,
}

impl WorkerLoop {
    async fn run(self) {
        debug!(worker_id = %self.id, "worker started");

        loop {
            let scheduled = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => None,
                job = self.next_job() => job,
            };

            let Some(scheduled) = scheduled else {
                break;
            };

            self.stats.queue_depth.fetch_sub(1, Ordering::SeqCst);
            self.process(scheduled).await;
        }

        debug!(worker_id = %self.id, "worker stopped");
    }

    /// Waits for and pops the highest-priority job, or returns `None` once
    /// the shutdown token fires while waiting.
    async fn next_job(&self) -> Option<ScheduledJob> {
        loop {
            {
                let mut heap = self.queue.heap.lock().await;
                if let Some(job) = heap.pop() {
                    return Some(job);
                }
            }

            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return None,
                _ = self.queue.notify.notified() => {}
            }
        }
    }

    async fn process(&self, scheduled: ScheduledJob) {
        let wait_time = scheduled.submitted_at.elapsed();
        let job_id = scheduled.job.id().to_string();
        let deadline = scheduled.job.timeout().min(self.max_job_timeout);
        let cancel = self.shutdown.child_token();

        let in_flight = self.stats.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        if self.metrics_enabled {
            self.metrics.update_active_workers(&self.pool_name, in_flight);
        }
        let started = tokio::time::Instant::now();

        let body = std::panic::AssertUnwindSafe(scheduled.job.execute(cancel.clone())).catch_unwind();
        let outcome = tokio::time::timeout(deadline, body).await;

        let exec_time = started.elapsed();
        let in_flight = self.stats.in_flight.fetch_sub(1, Ordering::SeqCst) - 1;
        if self.metrics_enabled {
            self.metrics.update_active_workers(&self.pool_name, in_flight);
        }
        self.stats
            .total_wait_ms
            .fetch_add(wait_time.as_millis() as u64, Ordering::SeqCst);
        self.stats
            .total_exec_ms
            .fetch_add(exec_time.as_millis() as u64, Ordering::SeqCst);

        let wait_secs = wait_time.as_secs_f64();
        let exec_secs = exec_time.as_secs_f64();

        let outcome_label = match outcome {
            Ok(Ok(Ok(_output))) => {
                self.stats.completed.fetch_add(1, Ordering::SeqCst);
                debug!(worker_id = %self.id, job_id = %job_id, duration_ms = exec_time.as_millis(), "job completed");
                "completed"
            }
            Ok(Ok(Err(job_err))) => {
                self.stats.failed.fetch_add(1, Ordering::SeqCst);
                warn!(worker_id = %self.id, job_id = %job_id, error = %job_err, "job failed");
                "failed"
            }
            Ok(Err(panic_payload)) => {
                self.stats.failed.fetch_add(1, Ordering::SeqCst);
                let msg = panic_message(&panic_payload);
                error!(worker_id = %self.id, job_id = %job_id, panic = %msg, "job panicked");
                "panicked"
            }
            Err(_elapsed) => {
                cancel.cancel();
                self.stats.failed.fetch_add(1, Ordering::SeqCst);
                warn!(worker_id = %self.id, job_id = %job_id, deadline_ms = deadline.as_millis(), "job timed out");
                "timeout"
            }
        };

        if self.metrics_enabled {
            self.metrics
                .record_job_finished(&self.pool_name, outcome_label, wait_secs, exec_secs);
        }
    }
}

fn panic_message(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

//! Top-level transaction processing pipeline.
//!
//! [`TransactionProcessor`] wires together the two worker pools (simulation,
//! strategy), the fork load balancer, and the latency monitor into the
//! single entry point callers submit transactions through.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::collaborators::{ForkManager, StrategyEngine};
use crate::config::EngineConfig;
use crate::domain::{ProcessingResult, Transaction};
use crate::error::{JobError, ProcessorError};
use crate::fork_balancer::ForkLoadBalancer;
use crate::jobs::{BatchProcessingJob, TransactionSimulationJob};
use crate::scheduler::{LatencyMonitor, WorkerPool};

/// The outcome of a [`TransactionProcessor::process_batch`] call: one
/// `Result` per transaction, in submission order, plus the count that were
/// originally requested (results can fall short of this if the overall
/// deadline elapsed before every sub-batch finished).
#[derive(Debug)]
pub struct BatchOutcome {
    pub results: Vec<Result<ProcessingResult, JobError>>,
    pub expected_total: usize,
}

impl BatchOutcome {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.expected_total - self.succeeded()
    }

    /// `Some` when at least one transaction failed or went missing, naming
    /// how many out of the expected total.
    pub fn composite_error(&self) -> Option<ProcessorError> {
        let failed = self.failed();
        if failed == 0 {
            None
        } else {
            Some(ProcessorError::PartialBatchFailure {
                failed,
                total: self.expected_total,
            })
        }
    }
}

/// Aggregate processor statistics, reported by [`TransactionProcessor::stats`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessorStats {
    pub total_processed: u64,
    pub total_succeeded: u64,
    pub total_failed: u64,
    pub mean_latency: Duration,
    pub simulation_load: f64,
    pub strategy_load: f64,
    pub simulation_queue_depth: usize,
    pub strategy_queue_depth: usize,
}

struct Counters {
    total_processed: AtomicU64,
    total_succeeded: AtomicU64,
    total_failed: AtomicU64,
}

/// Owns both worker pools, the fork balancer, and the latency monitor; the
/// single entry point for submitting transactions into the pipeline.
pub struct TransactionProcessor {
    simulation_pool: Arc<WorkerPool>,
    strategy_pool: Arc<WorkerPool>,
    balancer: Arc<ForkLoadBalancer>,
    latency: Arc<LatencyMonitor>,
    strategy_engine: Arc<dyn StrategyEngine>,
    config: EngineConfig,
    counters: Arc<Counters>,
}

impl TransactionProcessor {
    pub fn new(
        config: EngineConfig,
        fork_manager: Arc<dyn ForkManager>,
        strategy_engine: Arc<dyn StrategyEngine>,
    ) -> Result<Self, crate::error::ConfigError> {
        config.validate()?;

        Ok(Self {
            simulation_pool: Arc::new(WorkerPool::with_name("simulation", config.simulation_pool.clone())),
            strategy_pool: Arc::new(WorkerPool::with_name("strategy", config.strategy_pool.clone())),
            balancer: Arc::new(ForkLoadBalancer::new(fork_manager, config.fork_balancer.clone())),
            latency: Arc::new(
                LatencyMonitor::new(config.latency_monitor.clone())
                    .expect("validated by EngineConfig::validate"),
            ),
            strategy_engine,
            config,
            counters: Arc::new(Counters {
                total_processed: AtomicU64::new(0),
                total_succeeded: AtomicU64::new(0),
                total_failed: AtomicU64::new(0),
            }),
        })
    }

    /// Starts both worker pools and the background latency-cleanup,
    /// fork-health-monitor, and metrics-collection tasks. Returns a token
    /// callers can cancel for a coordinated shutdown of the background
    /// monitors (the pools themselves are stopped separately via `stop`).
    pub async fn start(&self) -> Result<CancellationToken, crate::error::PoolError> {
        self.simulation_pool.start().await?;
        self.strategy_pool.start().await?;

        let shutdown = CancellationToken::new();
        self.latency.spawn_cleanup_task(shutdown.child_token());
        self.balancer.spawn_health_monitor(shutdown.child_token());
        self.spawn_metrics_collection_task(shutdown.child_token());
        Ok(shutdown)
    }

    /// Periodically overwrites `total_processed` with `succeeded + failed`.
    /// This deliberately races with the per-transaction `fetch_add` in
    /// `process_transaction`/`process_batch` — a reader may transiently
    /// observe a total slightly behind the per-outcome counters. Preserved
    /// as an intentionally tolerated race rather than coordinated away.
    fn spawn_metrics_collection_task(
        &self,
        shutdown: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let counters = Arc::clone(&self.counters);
        let interval = self.config.processor.metrics_interval;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {
                        let succeeded = counters.total_succeeded.load(Ordering::SeqCst);
                        let failed = counters.total_failed.load(Ordering::SeqCst);
                        counters.total_processed.store(succeeded + failed, Ordering::SeqCst);
                    }
                }
            }
        })
    }

    /// Stops both worker pools, draining in-flight jobs per their configured
    /// shutdown grace periods.
    pub async fn stop(&self) -> Result<(), crate::error::PoolError> {
        self.simulation_pool.stop().await?;
        self.strategy_pool.stop().await?;
        Ok(())
    }

    pub fn simulation_pool(&self) -> &Arc<WorkerPool> {
        &self.simulation_pool
    }

    pub fn strategy_pool(&self) -> &Arc<WorkerPool> {
        &self.strategy_pool
    }

    pub fn latency_monitor(&self) -> &Arc<LatencyMonitor> {
        &self.latency
    }

    pub fn fork_balancer(&self) -> &Arc<ForkLoadBalancer> {
        &self.balancer
    }

    /// Submits one transaction through simulation and strategy detection,
    /// and waits on its result channel until the job succeeds, the job
    /// itself errors, `cancel` fires, or `processor.processing_timeout`
    /// elapses — whichever comes first.
    pub async fn process_transaction(
        &self,
        cancel: CancellationToken,
        transaction: Transaction,
    ) -> Result<ProcessingResult, ProcessorError> {
        let started = tokio::time::Instant::now();
        let timeout = self.config.processor.processing_timeout;

        let (result_tx, result_rx) = oneshot::channel();
        // A child of the caller's own `cancel`, not the worker pool's
        // shutdown token `execute` receives — stored on the job so the
        // caller's cancellation cascades into fork acquisition and
        // simulation already running on the pool, not just this wait.
        let job = TransactionSimulationJob {
            id: format!("sim-{}", transaction.hash),
            transaction,
            balancer: Arc::clone(&self.balancer),
            latency: Arc::clone(&self.latency),
            strategy_pool: Arc::clone(&self.strategy_pool),
            strategy_engine: Arc::clone(&self.strategy_engine),
            timeout,
            result_tx: StdMutex::new(Some(result_tx)),
            cancel_ctx: cancel.child_token(),
        };

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ProcessorError::Cancelled),
            outcome = async {
                self.simulation_pool.submit(Box::new(job)).await?;
                Ok::<_, crate::error::PoolError>(())
            } => {
                match outcome {
                    Ok(()) => match tokio::time::timeout(timeout, result_rx).await {
                        Ok(Ok(Ok(processing_result))) => Ok(processing_result),
                        Ok(Ok(Err(job_err))) => Err(ProcessorError::from(job_err)),
                        Ok(Err(_)) => Err(ProcessorError::SimulationFailed(
                            "simulation job dropped its result sender".into(),
                        )),
                        Err(_) => Err(ProcessorError::Timeout(timeout)),
                    },
                    Err(e) => Err(ProcessorError::Pool(e)),
                }
            }
        };

        self.counters.total_processed.fetch_add(1, Ordering::SeqCst);
        self.latency
            .record_latency("process_transaction", started.elapsed())
            .await;

        if result.is_ok() {
            self.counters.total_succeeded.fetch_add(1, Ordering::SeqCst);
        } else {
            self.counters.total_failed.fetch_add(1, Ordering::SeqCst);
        }
        result
    }

    /// Submits a batch of transactions, using twice the single-transaction
    /// timeout as its overall deadline, and waits for the
    /// [`BatchOutcome`] carrying every transaction's individual result. When
    /// the deadline elapses (or `cancel` fires) before the batch job
    /// finishes, cancels the job's own cancellation context and gives it a
    /// short grace period to flush whatever it had already collected,
    /// returning that genuine subset rather than failing the whole call —
    /// callers can still see the shortfall via `BatchOutcome::failed`/
    /// `composite_error`.
    pub async fn process_batch(
        &self,
        cancel: CancellationToken,
        transactions: Vec<Transaction>,
    ) -> Result<BatchOutcome, ProcessorError> {
        let total = transactions.len();
        if total == 0 {
            return Ok(BatchOutcome {
                results: Vec::new(),
                expected_total: 0,
            });
        }

        let timeout = self.config.processor.processing_timeout * 2;
        let (result_tx, mut result_rx) = oneshot::channel();
        // A child of the caller's `cancel`, handed down to the job (and, from
        // there, to every per-transaction job it dispatches) so a deadline or
        // an external cancellation can stop in-flight work rather than just
        // this wait. Cancelling it explicitly below lets the job flush
        // whatever partial results it already collected instead of the
        // result channel just being dropped out from under it.
        let cancel_ctx = cancel.child_token();
        let job = BatchProcessingJob {
            id: format!("batch-{}", uuid::Uuid::new_v4()),
            transactions,
            batch_size: self.config.processor.batch_size,
            balancer: Arc::clone(&self.balancer),
            latency: Arc::clone(&self.latency),
            simulation_pool: Arc::clone(&self.simulation_pool),
            strategy_pool: Arc::clone(&self.strategy_pool),
            strategy_engine: Arc::clone(&self.strategy_engine),
            per_job_timeout: self.config.processor.processing_timeout,
            result_tx: StdMutex::new(Some(result_tx)),
            cancel_ctx: cancel_ctx.clone(),
        };

        let outcome = if cancel.is_cancelled() {
            Err(ProcessorError::Cancelled)
        } else {
            match self.simulation_pool.submit(Box::new(job)).await {
                Err(e) => Err(ProcessorError::Pool(e)),
                Ok(()) => {
                    let recv = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => None,
                        _ = tokio::time::sleep(timeout) => None,
                        res = &mut result_rx => Some(res),
                    };

                    match recv {
                        Some(Ok(results)) => Ok(BatchOutcome { results, expected_total: total }),
                        Some(Err(_)) => Err(ProcessorError::SimulationFailed(
                            "batch job dropped its result sender".into(),
                        )),
                        None => {
                            // Either the caller cancelled or the deadline
                            // elapsed. Cancel the job's own context so it
                            // stops dispatching new sub-batches and flushes
                            // whatever it has already collected, then give
                            // it a short grace period to actually do so
                            // before giving up on recovering anything.
                            warn!(
                                total,
                                "batch deadline elapsed or caller cancelled, recovering partial results"
                            );
                            cancel_ctx.cancel();
                            let grace = self
                                .config
                                .processor
                                .processing_timeout
                                .max(Duration::from_millis(200));
                            match tokio::time::timeout(grace, &mut result_rx).await {
                                Ok(Ok(results)) => Ok(BatchOutcome { results, expected_total: total }),
                                _ => Ok(BatchOutcome { results: Vec::new(), expected_total: total }),
                            }
                        }
                    }
                }
            }
        };

        // Per-transaction success/failure updates the same aggregate
        // counters `process_transaction` does, so `stats()` reflects batch
        // activity too.
        if let Ok(batch) = &outcome {
            self.counters
                .total_processed
                .fetch_add(batch.results.len() as u64, Ordering::SeqCst);
            let succeeded = batch.succeeded() as u64;
            self.counters.total_succeeded.fetch_add(succeeded, Ordering::SeqCst);
            self.counters
                .total_failed
                .fetch_add(batch.results.len() as u64 - succeeded, Ordering::SeqCst);
        }

        outcome
    }

    /// Returns a snapshot combining both pools' stats. `total_processed` is
    /// incremented per-transaction and periodically overwritten by the
    /// background metrics-collection task (see `spawn_metrics_collection_task`),
    /// so it may be very slightly stale relative to `total_succeeded` +
    /// `total_failed` under concurrent load. This is a deliberately tolerated
    /// race rather than a bug.
    pub async fn stats(&self) -> ProcessorStats {
        let sim_stats = self.simulation_pool.stats();
        let strat_stats = self.strategy_pool.stats();

        let total = self.counters.total_processed.load(Ordering::SeqCst);
        let mean_latency = self
            .latency
            .get_average_latency("process_transaction")
            .await;

        ProcessorStats {
            total_processed: total,
            total_succeeded: self.counters.total_succeeded.load(Ordering::SeqCst),
            total_failed: self.counters.total_failed.load(Ordering::SeqCst),
            mean_latency,
            simulation_load: sim_stats.utilization,
            strategy_load: strat_stats.utilization,
            simulation_queue_depth: sim_stats.queue_depth,
            strategy_queue_depth: strat_stats.queue_depth,
        }
    }
}

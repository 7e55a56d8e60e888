//! Concrete [`crate::scheduler::Job`] implementations.
//!
//! Each job carries only the narrow `Arc` handles it needs (a fork balancer,
//! a strategy engine, a latency monitor) rather than a back-reference to the
//! owning processor — this keeps job lifetimes decoupled from the
//! processor's and avoids an ownership cycle between them.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::collaborators::{Detectors, StrategyEngine};
use crate::domain::{MEVOpportunity, ProcessingResult, SimulationResult, Transaction};
use crate::error::JobError;
use crate::fork_balancer::ForkLoadBalancer;
use crate::scheduler::job::JobOutput;
use crate::scheduler::{Job, LatencyMonitor, WorkerPool};

/// Delivers `value` through `slot`'s sender if the job hasn't already sent a
/// result (or the caller hasn't dropped its receiver). Each job type holds
/// its own narrow result channel rather than a back-reference to its owning
/// processor, per the cyclic-reference redesign note.
fn send_result<T>(slot: &StdMutex<Option<oneshot::Sender<T>>>, value: T) {
    if let Some(tx) = slot.lock().expect("result slot mutex poisoned").take() {
        let _ = tx.send(value);
    }
}

/// Simulates a single transaction against a fork, then submits a
/// [`StrategyDetectionJob`] for the result and waits up to half the
/// remaining timeout for its opportunities. Delivers the combined
/// [`ProcessingResult`] to `result_tx`, the narrow channel its submitter
/// waits on, rather than calling back into the processor directly.
pub struct TransactionSimulationJob {
    pub id: String,
    pub transaction: Transaction,
    pub balancer: Arc<ForkLoadBalancer>,
    pub latency: Arc<LatencyMonitor>,
    pub strategy_pool: Arc<WorkerPool>,
    pub strategy_engine: Arc<dyn StrategyEngine>,
    pub timeout: Duration,
    pub result_tx: StdMutex<Option<oneshot::Sender<Result<ProcessingResult, JobError>>>>,
    /// A child of the cancellation context the submitting caller passed into
    /// `TransactionProcessor::process_transaction`/`process_batch`, distinct
    /// from the `cancel` the worker pool itself passes to `execute` (which
    /// only ever reflects the pool's own shutdown). Checked at each await
    /// point so a caller's cancellation reaches fork acquisition and
    /// simulation already running on the pool, not just the processor's wait
    /// on this job's result.
    pub cancel_ctx: CancellationToken,
}

impl TransactionSimulationJob {
    async fn detect_opportunities(
        &self,
        cancel: CancellationToken,
        sim_result: &SimulationResult,
        elapsed_so_far: Duration,
    ) -> Vec<MEVOpportunity> {
        if self.cancel_ctx.is_cancelled() {
            return Vec::new();
        }

        let remaining = self.timeout.saturating_sub(elapsed_so_far);
        let detection_timeout = (remaining / 2).max(Duration::from_millis(1));

        let (detect_tx, detect_rx) = oneshot::channel();
        let detection_job = StrategyDetectionJob {
            id: format!("{}-detect", self.id),
            transaction: self.transaction.clone(),
            sim_result: sim_result.clone(),
            strategy_engine: Arc::clone(&self.strategy_engine),
            timeout: detection_timeout,
            result_tx: StdMutex::new(Some(detect_tx)),
        };

        if let Err(e) = self.strategy_pool.submit(Box::new(detection_job)).await {
            warn!(error = %e, "strategy pool rejected detection job");
            return Vec::new();
        }

        match tokio::time::timeout(detection_timeout, detect_rx).await {
            Ok(Ok(Ok(opportunities))) => opportunities,
            Ok(Ok(Err(e))) => {
                warn!(error = %e, "strategy detection job failed");
                Vec::new()
            }
            Ok(Err(_)) => Vec::new(),
            Err(_) => {
                warn!(
                    timeout_ms = detection_timeout.as_millis(),
                    "timed out waiting for strategy detection result"
                );
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl Job for TransactionSimulationJob {
    fn id(&self) -> &str {
        &self.id
    }

    fn priority(&self) -> i64 {
        self.transaction.priority_score()
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn execute(&self, cancel: CancellationToken) -> Result<JobOutput, JobError> {
        let started = tokio::time::Instant::now();

        if self.cancel_ctx.is_cancelled() {
            send_result(&self.result_tx, Err(JobError::Cancelled));
            return Err(JobError::Cancelled);
        }

        let fork = tokio::select! {
            biased;
            _ = self.cancel_ctx.cancelled() => {
                send_result(&self.result_tx, Err(JobError::Cancelled));
                return Err(JobError::Cancelled);
            }
            outcome = self.balancer.get_fork(cancel.clone()) => match outcome {
                Ok(fork) => fork,
                Err(e) => {
                    let msg = e.to_string();
                    send_result(&self.result_tx, Err(JobError::Downstream(msg.clone())));
                    return Err(JobError::Downstream(msg));
                }
            },
        };

        // Cloned so the execution future owns its own handle: the
        // cancellation branch below needs to move `fork` into `release_fork`
        // without fighting a borrow still held by the other branch.
        let fork_for_exec = Arc::clone(&fork);
        let sim_outcome = tokio::select! {
            biased;
            _ = self.cancel_ctx.cancelled() => {
                let _ = self.balancer.release_fork(fork, started.elapsed()).await;
                send_result(&self.result_tx, Err(JobError::Cancelled));
                return Err(JobError::Cancelled);
            }
            outcome = fork_for_exec.execute_transaction(cancel.clone(), &self.transaction) => outcome,
        };

        self.latency
            .record_latency("simulate_transaction", started.elapsed())
            .await;

        let sim_result = match sim_outcome {
            Ok(r) => r,
            Err(e) => {
                let _ = self.balancer.release_fork(fork, started.elapsed()).await;
                let msg = e.to_string();
                send_result(&self.result_tx, Err(JobError::Downstream(msg.clone())));
                return Err(JobError::Downstream(msg));
            }
        };

        if let Err(e) = self.balancer.release_fork(fork, started.elapsed()).await {
            warn!(error = %e, "failed to release fork after simulation");
        }

        // Simulation success with no opportunities is not a failure: a
        // detection-stage error or timeout just yields an empty set.
        let opportunities = if sim_result.success {
            self.detect_opportunities(cancel, &sim_result, started.elapsed())
                .await
        } else {
            Vec::new()
        };

        send_result(
            &self.result_tx,
            Ok(ProcessingResult {
                simulation: sim_result.clone(),
                opportunities,
            }),
        );
        Ok(Box::new(sim_result))
    }
}

/// Runs the strategy engine over a single transaction/simulation-result pair
/// and filters the resulting opportunities down to profitable ones.
pub struct StrategyDetectionJob {
    pub id: String,
    pub transaction: Transaction,
    pub sim_result: SimulationResult,
    pub strategy_engine: Arc<dyn StrategyEngine>,
    pub timeout: Duration,
    pub result_tx: StdMutex<Option<oneshot::Sender<Result<Vec<MEVOpportunity>, JobError>>>>,
}

#[async_trait]
impl Job for StrategyDetectionJob {
    fn id(&self) -> &str {
        &self.id
    }

    fn priority(&self) -> i64 {
        self.transaction.priority_score()
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn execute(&self, cancel: CancellationToken) -> Result<JobOutput, JobError> {
        let started = tokio::time::Instant::now();
        let outcome = self
            .strategy_engine
            .analyze_transaction(cancel, &self.transaction, &self.sim_result)
            .await;

        match outcome {
            Ok(opportunities) => {
                let profitable: Vec<MEVOpportunity> = opportunities
                    .into_iter()
                    .filter(|o| o.is_profitable())
                    .collect();
                send_result(&self.result_tx, Ok(profitable.clone()));
                let _ = started; // latency for this op is recorded by the caller, which owns the monitor
                Ok(Box::new(profitable))
            }
            Err(e) => {
                let msg = e.to_string();
                send_result(&self.result_tx, Err(JobError::Downstream(msg.clone())));
                Err(JobError::Downstream(msg))
            }
        }
    }
}

/// Splits a batch of transactions into sub-batches of `batch_size` and
/// dispatches a [`TransactionSimulationJob`] per transaction, collecting
/// each one's outcome into a single `Vec` delivered through `result_tx`.
/// A sub-batch is dispatched and awaited before the next begins; a failing
/// transaction is recorded as an `Err` entry and does not abort its
/// siblings.
pub struct BatchProcessingJob {
    pub id: String,
    pub transactions: Vec<Transaction>,
    pub batch_size: usize,
    pub balancer: Arc<ForkLoadBalancer>,
    pub latency: Arc<LatencyMonitor>,
    pub simulation_pool: Arc<WorkerPool>,
    pub strategy_pool: Arc<WorkerPool>,
    pub strategy_engine: Arc<dyn StrategyEngine>,
    pub per_job_timeout: Duration,
    pub result_tx: StdMutex<Option<oneshot::Sender<Vec<Result<ProcessingResult, JobError>>>>>,
    /// A child of the submitting caller's cancellation context, checked
    /// alongside the pool-supplied `cancel` at each sub-batch boundary and
    /// handed down (as a further child) to every per-transaction
    /// `TransactionSimulationJob` this job dispatches.
    pub cancel_ctx: CancellationToken,
}

#[async_trait]
impl Job for BatchProcessingJob {
    fn id(&self) -> &str {
        &self.id
    }

    fn priority(&self) -> i64 {
        self.transactions
            .iter()
            .map(|t| t.priority_score())
            .max()
            .unwrap_or(0)
    }

    fn timeout(&self) -> Duration {
        self.per_job_timeout * (self.transactions.len() as u32).max(1)
    }

    async fn execute(&self, cancel: CancellationToken) -> Result<JobOutput, JobError> {
        let mut results: Vec<Result<ProcessingResult, JobError>> =
            Vec::with_capacity(self.transactions.len());

        for chunk in self.transactions.chunks(self.batch_size) {
            if cancel.is_cancelled() || self.cancel_ctx.is_cancelled() {
                send_result(&self.result_tx, std::mem::take(&mut results));
                return Err(JobError::Cancelled);
            }

            // Divide the per-job timeout proportionally across this
            // sub-batch's size, so a full-size sub-batch sees the same
            // deadline for the chunk as a whole that a single transaction
            // would see on its own.
            let sub_timeout = self.per_job_timeout / (chunk.len() as u32);

            let mut receivers = Vec::with_capacity(chunk.len());
            for (i, tx) in chunk.iter().enumerate() {
                let (tx_result, rx_result) = oneshot::channel();
                let job = TransactionSimulationJob {
                    id: format!("{}-tx-{}-{}", self.id, results.len(), i),
                    transaction: tx.clone(),
                    balancer: Arc::clone(&self.balancer),
                    latency: Arc::clone(&self.latency),
                    strategy_pool: Arc::clone(&self.strategy_pool),
                    strategy_engine: Arc::clone(&self.strategy_engine),
                    timeout: sub_timeout,
                    result_tx: StdMutex::new(Some(tx_result)),
                    cancel_ctx: self.cancel_ctx.child_token(),
                };

                match self.simulation_pool.submit(Box::new(job)).await {
                    Ok(()) => receivers.push(Some(rx_result)),
                    Err(e) => {
                        receivers.push(None);
                        warn!(error = %e, "simulation pool rejected a batched transaction");
                    }
                }
            }

            for recv in receivers {
                match recv {
                    Some(rx) => match tokio::time::timeout(sub_timeout, rx).await {
                        Ok(Ok(outcome)) => results.push(outcome),
                        Ok(Err(_)) => {
                            results.push(Err(JobError::Downstream(
                                "simulation job dropped its result sender".into(),
                            )));
                        }
                        Err(_) => results.push(Err(JobError::Timeout(sub_timeout))),
                    },
                    None => results.push(Err(JobError::Downstream(
                        "simulation pool rejected job".into(),
                    ))),
                }
            }
        }

        let submitted = results.len();
        send_result(&self.result_tx, results);
        Ok(Box::new(submitted))
    }
}

/// Fans a single transaction out across every enabled strategy detector
/// concurrently. Carries its own clone of the enabled [`Detectors`] rather
/// than a handle back to the dispatching
/// [`crate::strategy::ConcurrentStrategyProcessor`], which would form a
/// reference cycle (processor owns the pool this job runs on).
pub struct ConcurrentStrategyJob {
    pub id: String,
    pub priority: i64,
    pub transaction: Transaction,
    pub sim_result: SimulationResult,
    pub detectors: Detectors,
    pub timeout: Duration,
    pub result_tx: StdMutex<Option<oneshot::Sender<Result<Vec<MEVOpportunity>, crate::error::StrategyError>>>>,
}

#[async_trait]
impl Job for ConcurrentStrategyJob {
    fn id(&self) -> &str {
        &self.id
    }

    fn priority(&self) -> i64 {
        self.priority
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn execute(&self, cancel: CancellationToken) -> Result<JobOutput, JobError> {
        let outcome = crate::strategy::fan_out_detectors(
            &self.detectors,
            cancel,
            &self.transaction,
            &self.sim_result,
        )
        .await;

        match outcome {
            Ok(opportunities) => {
                send_result(&self.result_tx, Ok(opportunities.clone()));
                Ok(Box::new(opportunities))
            }
            Err(e) => {
                let msg = e.to_string();
                send_result(&self.result_tx, Err(e));
                Err(JobError::Downstream(msg))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{Fork, ForkManager, ForkPoolStats};
    use crate::domain::MEVOpportunity;
    use alloy_primitives::{Address, B256, U256};

    fn tx() -> Transaction {
        Transaction {
            hash: B256::ZERO,
            from: Address::ZERO,
            to: None,
            value: U256::from(3u64) * U256::from(1_000_000_000_000_000_000u128),
            gas_price: U256::from(20u64) * U256::from(1_000_000_000u128),
            gas_limit: 21_000,
            nonce: 0,
            data: Vec::new(),
        }
    }

    struct EmptyForkManager;

    #[async_trait]
    impl ForkManager for EmptyForkManager {
        async fn get_available_fork(
            &self,
            _cancel: CancellationToken,
        ) -> anyhow::Result<Arc<dyn Fork>> {
            anyhow::bail!("no forks in this stub")
        }
        async fn release_fork(&self, _fork: Arc<dyn Fork>) -> anyhow::Result<()> {
            Ok(())
        }
        async fn get_fork_pool_stats(&self) -> ForkPoolStats {
            ForkPoolStats { total: 0, failed: 0 }
        }
        async fn cleanup_forks(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct EmptyStrategyEngine;

    #[async_trait]
    impl StrategyEngine for EmptyStrategyEngine {
        async fn analyze_transaction(
            &self,
            _cancel: CancellationToken,
            _tx: &Transaction,
            _sim_result: &SimulationResult,
        ) -> anyhow::Result<Vec<MEVOpportunity>> {
            Ok(Vec::new())
        }
        fn enable_strategy(&self, _strategy: crate::domain::StrategyKind) {}
        fn disable_strategy(&self, _strategy: crate::domain::StrategyKind) {}
    }

    #[test]
    fn batch_job_priority_is_the_max_of_its_transactions() {
        let low = tx();
        let mut high = tx();
        high.value = U256::from(50u64) * U256::from(1_000_000_000_000_000_000u128);

        let job = BatchProcessingJob {
            id: "batch".into(),
            transactions: vec![low.clone(), high.clone()],
            batch_size: 10,
            balancer: Arc::new(ForkLoadBalancer::new(
                Arc::new(EmptyForkManager),
                crate::fork_balancer::ForkBalancerConfig::default(),
            )),
            latency: Arc::new(
                LatencyMonitor::new(crate::scheduler::LatencyMonitorConfig::default()).unwrap(),
            ),
            simulation_pool: Arc::new(WorkerPool::new(Default::default())),
            strategy_pool: Arc::new(WorkerPool::new(Default::default())),
            strategy_engine: Arc::new(EmptyStrategyEngine),
            per_job_timeout: Duration::from_secs(1),
            result_tx: StdMutex::new(None),
            cancel_ctx: CancellationToken::new(),
        };

        assert_eq!(job.priority(), high.priority_score());
        assert!(job.priority() > low.priority_score());
    }

    #[tokio::test]
    async fn transaction_simulation_job_without_a_fork_sends_an_error_on_its_channel() {
        let (result_tx, result_rx) = oneshot::channel();
        let job = TransactionSimulationJob {
            id: "tx-1".into(),
            transaction: tx(),
            balancer: Arc::new(ForkLoadBalancer::new(
                Arc::new(EmptyForkManager),
                crate::fork_balancer::ForkBalancerConfig {
                    max_retries: 0,
                    ..Default::default()
                },
            )),
            latency: Arc::new(
                LatencyMonitor::new(crate::scheduler::LatencyMonitorConfig::default()).unwrap(),
            ),
            strategy_pool: Arc::new(WorkerPool::new(Default::default())),
            strategy_engine: Arc::new(EmptyStrategyEngine),
            timeout: Duration::from_millis(50),
            result_tx: StdMutex::new(Some(result_tx)),
            cancel_ctx: CancellationToken::new(),
        };

        let outcome = job.execute(CancellationToken::new()).await;
        assert!(outcome.is_err());

        let delivered = result_rx.await.unwrap();
        assert!(delivered.is_err());
    }

    #[tokio::test]
    async fn cancel_ctx_short_circuits_a_running_simulation_job() {
        let (result_tx, result_rx) = oneshot::channel();
        let cancel_ctx = CancellationToken::new();
        cancel_ctx.cancel();
        let job = TransactionSimulationJob {
            id: "tx-1".into(),
            transaction: tx(),
            balancer: Arc::new(ForkLoadBalancer::new(
                Arc::new(EmptyForkManager),
                crate::fork_balancer::ForkBalancerConfig::default(),
            )),
            latency: Arc::new(
                LatencyMonitor::new(crate::scheduler::LatencyMonitorConfig::default()).unwrap(),
            ),
            strategy_pool: Arc::new(WorkerPool::new(Default::default())),
            strategy_engine: Arc::new(EmptyStrategyEngine),
            timeout: Duration::from_millis(50),
            result_tx: StdMutex::new(Some(result_tx)),
            cancel_ctx,
        };

        // The pool's own cancel token is untouched; only the caller-derived
        // cancel_ctx is cancelled, proving the cascade is independent of it.
        let outcome = job.execute(CancellationToken::new()).await;
        assert!(matches!(outcome, Err(JobError::Cancelled)));

        let delivered = result_rx.await.unwrap();
        assert!(matches!(delivered, Err(JobError::Cancelled)));
    }
}

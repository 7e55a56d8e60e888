//! End-to-end scenarios exercising the concurrent execution substrate as a
//! whole: priority scheduling, latency alerting, fork load balancing,
//! strategy fan-out, and batch processing through `TransactionProcessor`.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use alloy_primitives::{Address, B256, U256};
use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use mev_core::collaborators::{Detectors, Fork, ForkManager, ForkPoolStats, StrategyDetector, StrategyEngine};
use mev_core::config::EngineConfig;
use mev_core::domain::{MEVOpportunity, OpportunityStatus, SimulationResult, StrategyKind, StrategyOpportunity, Transaction};
use mev_core::error::JobError;
use mev_core::fork_balancer::{ForkBalancerConfig, ForkLoadBalancer};
use mev_core::processor::TransactionProcessor;
use mev_core::scheduler::{Job, JobOutput, LatencyMonitor, Severity, WorkerPool, WorkerPoolConfig};
use mev_core::strategy::ConcurrentStrategyProcessor;

fn tx_with(nonce: u64, value_eth: u128) -> Transaction {
    Transaction {
        hash: B256::repeat_byte(nonce as u8),
        from: Address::ZERO,
        to: None,
        value: U256::from(value_eth) * U256::from(1_000_000_000_000_000_000u128),
        gas_price: U256::from(1u64) * U256::from(1_000_000_000u128),
        gas_limit: 21_000,
        nonce,
        data: Vec::new(),
    }
}

struct SleepJob {
    id: String,
    priority: i64,
    sleep: Duration,
}

#[async_trait]
impl Job for SleepJob {
    fn id(&self) -> &str {
        &self.id
    }
    fn priority(&self) -> i64 {
        self.priority
    }
    fn timeout(&self) -> Duration {
        Duration::from_secs(5)
    }
    async fn execute(&self, _cancel: CancellationToken) -> Result<JobOutput, JobError> {
        tokio::time::sleep(self.sleep).await;
        Ok(Box::new(()))
    }
}

/// S1: pool size 20, queue 1000, 1000 jobs sleeping 10ms each, priority
/// cycling 0..10. All jobs must complete, throughput must clear 800 tx/s,
/// and utilization must have been observed above zero at some point.
#[tokio::test]
async fn throughput_smoke_completes_every_job() {
    let pool = WorkerPool::new(WorkerPoolConfig::new(20).with_queue_size(1000));
    pool.start().await.unwrap();

    let started = tokio::time::Instant::now();
    for i in 0..1000 {
        let job = SleepJob {
            id: format!("job-{i}"),
            priority: (i % 10) as i64,
            sleep: Duration::from_millis(10),
        };
        pool.submit(Box::new(job)).await.unwrap();
    }

    let mut max_utilization = 0.0f64;
    loop {
        let stats = pool.stats();
        max_utilization = max_utilization.max(stats.utilization);
        if stats.completed + stats.failed >= 1000 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let elapsed = started.elapsed();

    let stats = pool.stats();
    pool.stop().await.unwrap();

    assert_eq!(stats.completed, 1000);
    assert_eq!(stats.failed, 0);
    let tps = 1000.0 / elapsed.as_secs_f64();
    assert!(tps >= 800.0, "throughput too low: {tps} tx/s");
    assert!(max_utilization > 0.0, "expected utilization to be observed above zero");
}

/// S2: pool size 1, a blocking seed job holds the only worker while five
/// jobs of distinct priorities queue up; once the seed completes, they must
/// dispatch in descending-priority order.
#[tokio::test]
async fn priority_ordering_dispatches_highest_first() {
    let pool = WorkerPool::new(WorkerPoolConfig::new(1));
    pool.start().await.unwrap();

    struct SeedJob {
        gate: StdMutex<Option<oneshot::Receiver<()>>>,
    }
    #[async_trait]
    impl Job for SeedJob {
        fn id(&self) -> &str {
            "seed"
        }
        fn priority(&self) -> i64 {
            100
        }
        fn timeout(&self) -> Duration {
            Duration::from_secs(5)
        }
        async fn execute(&self, _cancel: CancellationToken) -> Result<JobOutput, JobError> {
            let gate = self.gate.lock().unwrap().take().expect("taken once");
            let _ = gate.await;
            Ok(Box::new(()))
        }
    }

    struct RecordingJob {
        priority: i64,
        order: Arc<StdMutex<Vec<i64>>>,
    }
    #[async_trait]
    impl Job for RecordingJob {
        fn id(&self) -> &str {
            "recording"
        }
        fn priority(&self) -> i64 {
            self.priority
        }
        fn timeout(&self) -> Duration {
            Duration::from_secs(5)
        }
        async fn execute(&self, _cancel: CancellationToken) -> Result<JobOutput, JobError> {
            self.order.lock().unwrap().push(self.priority);
            Ok(Box::new(()))
        }
    }

    let (gate_tx, gate_rx) = oneshot::channel();
    pool.submit(Box::new(SeedJob {
        gate: StdMutex::new(Some(gate_rx)),
    }))
    .await
    .unwrap();

    // Give the single worker a moment to pick up the seed job and block on
    // its gate before the priority-ordered jobs are submitted behind it.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let order = Arc::new(StdMutex::new(Vec::new()));
    for priority in [1, 5, 3, 9, 2] {
        pool.submit(Box::new(RecordingJob {
            priority,
            order: Arc::clone(&order),
        }))
        .await
        .unwrap();
    }

    gate_tx.send(()).unwrap();

    loop {
        if order.lock().unwrap().len() == 5 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    pool.stop().await.unwrap();

    assert_eq!(*order.lock().unwrap(), vec![9, 5, 3, 2, 1]);
}

/// S3: a run of simulated-latency samples plus one over-threshold
/// `process_transaction` sample must raise at least one `average_latency`
/// alert at `warning` severity.
#[tokio::test]
async fn latency_thresholds_raise_a_warning_alert() {
    let monitor = LatencyMonitor::new(Default::default()).unwrap();
    for ms in [30, 45, 60, 40, 35] {
        monitor
            .record_latency("simulate_transaction", Duration::from_millis(ms))
            .await;
    }
    monitor
        .record_latency("process_transaction", Duration::from_millis(150))
        .await;

    let alerts = monitor.check_thresholds().await;
    let hit = alerts
        .iter()
        .find(|a| a.operation == "process_transaction" && a.metric == "average_latency")
        .expect("expected an average_latency alert for process_transaction");

    assert_eq!(hit.threshold, Duration::from_millis(100));
    assert_eq!(hit.observed, Duration::from_millis(150));
    assert_eq!(hit.severity, Severity::Warning);
}

struct OneForkManager {
    fork: Arc<dyn Fork>,
}

#[async_trait]
impl ForkManager for OneForkManager {
    async fn get_available_fork(&self, _cancel: CancellationToken) -> anyhow::Result<Arc<dyn Fork>> {
        Ok(Arc::clone(&self.fork))
    }
    async fn release_fork(&self, _fork: Arc<dyn Fork>) -> anyhow::Result<()> {
        Ok(())
    }
    async fn get_fork_pool_stats(&self) -> ForkPoolStats {
        ForkPoolStats { total: 1, failed: 0 }
    }
    async fn cleanup_forks(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

struct InstantFork;

#[async_trait]
impl Fork for InstantFork {
    fn id(&self) -> &str {
        "fork-0"
    }
    async fn execute_transaction(
        &self,
        _cancel: CancellationToken,
        _tx: &Transaction,
    ) -> anyhow::Result<SimulationResult> {
        Ok(SimulationResult::failed("unused in this scenario"))
    }
    fn block_number(&self) -> u64 {
        0
    }
    async fn balance(&self, _address: Address) -> anyhow::Result<U256> {
        Ok(U256::ZERO)
    }
    async fn reset(&self) -> anyhow::Result<()> {
        Ok(())
    }
    async fn close(&self) -> anyhow::Result<()> {
        Ok(())
    }
    fn is_healthy(&self) -> bool {
        true
    }
}

/// S4: 50 GetFork/ReleaseFork cycles against a manager that always hands
/// back the same fork. Expect no failovers and a sub-millisecond mean
/// acquisition latency.
#[tokio::test]
async fn fork_balancer_handles_fifty_acquire_release_cycles() {
    let manager = Arc::new(OneForkManager {
        fork: Arc::new(InstantFork),
    });
    let balancer = ForkLoadBalancer::new(manager, ForkBalancerConfig::default());

    for _ in 0..50 {
        let fork = balancer.get_fork(CancellationToken::new()).await.unwrap();
        balancer
            .release_fork(fork, Duration::from_micros(50))
            .await
            .unwrap();
    }

    let stats = balancer.stats().await;
    assert!(stats.total_forks >= 1);
    assert!(stats.healthy_forks >= 1);
    assert_eq!(stats.failover_count, 0);
    assert!(stats.average_latency < Duration::from_millis(1));
}

struct HitDetector(&'static str);

#[async_trait]
impl StrategyDetector for HitDetector {
    fn strategy_name(&self) -> &'static str {
        self.0
    }
    async fn detect_opportunity(
        &self,
        _cancel: CancellationToken,
        tx: &Transaction,
        _sim_result: &SimulationResult,
    ) -> anyhow::Result<Option<StrategyOpportunity>> {
        Ok(Some(StrategyOpportunity {
            expected_profit: tx.value,
            net_profit: tx.value,
            gas_cost: None,
            payload: serde_json::json!({ "strategy": self.0 }),
        }))
    }
}

/// S5: one transaction, three detectors that all hit. Fan-out must return
/// exactly three opportunities covering {sandwich, backrun, frontrun}, each
/// at the default confidence and `detected` status.
#[tokio::test]
async fn strategy_fan_out_returns_one_opportunity_per_detector() {
    let processor = ConcurrentStrategyProcessor::new(Detectors {
        sandwich: Arc::new(HitDetector("sandwich")),
        backrun: Arc::new(HitDetector("backrun")),
        frontrun: Arc::new(HitDetector("frontrun")),
    });

    let tx = tx_with(0, 1);
    let opportunities = processor
        .detect_strategies_concurrently(CancellationToken::new(), &tx, &SimulationResult::failed("x"))
        .await
        .unwrap();

    assert_eq!(opportunities.len(), 3);
    let strategies: std::collections::HashSet<StrategyKind> =
        opportunities.iter().map(|o| o.strategy).collect();
    assert_eq!(
        strategies,
        std::collections::HashSet::from([
            StrategyKind::Sandwich,
            StrategyKind::Backrun,
            StrategyKind::Frontrun
        ])
    );
    for o in &opportunities {
        assert_eq!(o.confidence, 0.8);
        assert_eq!(o.status, OpportunityStatus::Detected);
    }
}

/// A fork shared by every job in a batch; fails simulation exactly for the
/// transaction whose nonce matches `fail_nonce`, keyed by transaction
/// identity rather than call order so concurrent sub-batch scheduling can't
/// make the test flaky.
struct FailingOnNonceFork {
    fail_nonce: u64,
}

#[async_trait]
impl Fork for FailingOnNonceFork {
    fn id(&self) -> &str {
        "fork-0"
    }
    async fn execute_transaction(
        &self,
        _cancel: CancellationToken,
        tx: &Transaction,
    ) -> anyhow::Result<SimulationResult> {
        if tx.nonce == self.fail_nonce {
            anyhow::bail!("simulated revert for transaction {}", tx.nonce);
        }
        Ok(SimulationResult {
            success: true,
            gas_used: 21_000,
            gas_price: tx.gas_price,
            execution_time: Duration::from_micros(100),
            state_changes: Vec::new(),
            error: None,
        })
    }
    fn block_number(&self) -> u64 {
        0
    }
    async fn balance(&self, _address: Address) -> anyhow::Result<U256> {
        Ok(U256::ZERO)
    }
    async fn reset(&self) -> anyhow::Result<()> {
        Ok(())
    }
    async fn close(&self) -> anyhow::Result<()> {
        Ok(())
    }
    fn is_healthy(&self) -> bool {
        true
    }
}

struct NoOpStrategyEngine;

#[async_trait]
impl StrategyEngine for NoOpStrategyEngine {
    async fn analyze_transaction(
        &self,
        _cancel: CancellationToken,
        _tx: &Transaction,
        _sim_result: &SimulationResult,
    ) -> anyhow::Result<Vec<MEVOpportunity>> {
        Ok(Vec::new())
    }
    fn enable_strategy(&self, _strategy: StrategyKind) {}
    fn disable_strategy(&self, _strategy: StrategyKind) {}
}

/// S6: 100 transactions, one (nonce 46) fails simulation. `process_batch`
/// must still return `Ok`, with 99 successes and 1 failure in its per-tx
/// results, a non-empty `composite_error`, and the processor's aggregate
/// `stats()` reflecting total=100, success=99, failed=1.
#[tokio::test]
async fn batch_partial_failure_is_reported_and_counted() {
    let fork_manager = Arc::new(OneForkManager {
        fork: Arc::new(FailingOnNonceFork { fail_nonce: 46 }),
    });
    let config = EngineConfig::default();

    let processor = Arc::new(
        TransactionProcessor::new(config, fork_manager, Arc::new(NoOpStrategyEngine)).unwrap(),
    );
    processor.start().await.unwrap();

    let txs: Vec<Transaction> = (0..100).map(|i| tx_with(i, 1)).collect();
    let outcome = processor
        .process_batch(CancellationToken::new(), txs)
        .await
        .unwrap();

    assert_eq!(outcome.expected_total, 100);
    assert_eq!(outcome.succeeded(), 99);
    assert_eq!(outcome.failed(), 1);
    assert!(matches!(
        outcome.composite_error(),
        Some(mev_core::error::ProcessorError::PartialBatchFailure {
            failed: 1,
            total: 100
        })
    ));

    let stats = processor.stats().await;
    assert_eq!(stats.total_processed, 100);
    assert_eq!(stats.total_succeeded, 99);
    assert_eq!(stats.total_failed, 1);

    processor.stop().await.unwrap();
}

//! Demo harness for the MEV execution core.
//!
//! Wires toy in-memory collaborators (fork manager, strategy engine) into a
//! [`mev_core::processor::TransactionProcessor`], feeds it a handful of
//! synthetic transactions, and prints the resulting opportunities and a
//! latency snapshot. Not a production node integration — just enough to
//! exercise the pipeline end to end.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, B256, U256};
use async_trait::async_trait;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use mev_core::collaborators::{
    Fork, ForkManager, ForkPoolStats, StrategyDetector, StrategyEngine,
};
use mev_core::config::EngineConfig;
use mev_core::domain::{
    MEVOpportunity, SimulationResult, StrategyKind, StrategyOpportunity, Transaction,
};
use mev_core::processor::TransactionProcessor;

#[derive(Parser, Debug)]
#[command(name = "mev-core-demo", about = "Runs a handful of synthetic transactions through the pipeline")]
struct Cli {
    /// Log level passed to `tracing_subscriber::EnvFilter` when `RUST_LOG` is unset.
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Number of synthetic transactions to feed through the pipeline.
    #[arg(long, default_value_t = 20)]
    transactions: usize,
}

/// A fork that "executes" transactions by pretending roughly half succeed.
struct ToyFork {
    id: String,
    block: AtomicU64,
}

#[async_trait]
impl Fork for ToyFork {
    fn id(&self) -> &str {
        &self.id
    }

    async fn execute_transaction(
        &self,
        _cancel: CancellationToken,
        tx: &Transaction,
    ) -> anyhow::Result<SimulationResult> {
        tokio::time::sleep(Duration::from_millis(2)).await;
        self.block.fetch_add(1, Ordering::SeqCst);

        let success = tx.value % U256::from(2u64) == U256::ZERO;
        Ok(SimulationResult {
            success,
            gas_used: 21_000,
            gas_price: tx.gas_price,
            execution_time: Duration::from_millis(2),
            state_changes: Vec::new(),
            error: if success { None } else { Some("reverted".to_string()) },
        })
    }

    fn block_number(&self) -> u64 {
        self.block.load(Ordering::SeqCst)
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

/// A fixed pool of [`ToyFork`]s handed out round-robin.
struct ToyForkManager {
    forks: Vec<Arc<ToyFork>>,
    cursor: AtomicU64,
}

impl ToyForkManager {
    fn new(count: usize) -> Self {
        Self {
            forks: (0..count)
                .map(|i| {
                    Arc::new(ToyFork {
                        id: format!("toy-fork-{i}"),
                        block: AtomicU64::new(0),
                    })
                })
                .collect(),
            cursor: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl ForkManager for ToyForkManager {
    async fn get_available_fork(&self, _cancel: CancellationToken) -> anyhow::Result<Arc<dyn Fork>> {
        let idx = self.cursor.fetch_add(1, Ordering::SeqCst) as usize % self.forks.len();
        Ok(self.forks[idx].clone())
    }

    async fn release_fork(&self, _fork: Arc<dyn Fork>) -> anyhow::Result<()> {
        Ok(())
    }

    async fn get_fork_pool_stats(&self) -> ForkPoolStats {
        ForkPoolStats {
            total: self.forks.len(),
            failed: 0,
        }
    }

    async fn cleanup_forks(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// A detector that calls every successful, high-value simulation a sandwich
/// opportunity. Purely illustrative.
struct ToySandwichDetector;

#[async_trait]
impl StrategyDetector for ToySandwichDetector {
    fn strategy_name(&self) -> &'static str {
        "sandwich"
    }

    async fn detect_opportunity(
        &self,
        _cancel: CancellationToken,
        tx: &Transaction,
        sim_result: &SimulationResult,
    ) -> anyhow::Result<Option<StrategyOpportunity>> {
        if !sim_result.success || tx.value < U256::from(1_000_000_000_000_000_000u128) {
            return Ok(None);
        }

        Ok(Some(StrategyOpportunity {
            expected_profit: tx.value / U256::from(100u64),
            net_profit: tx.value / U256::from(100u64),
            gas_cost: None,
            payload: serde_json::json!({ "target": tx.hash.to_string() }),
        }))
    }
}

struct ToyNoOpDetector(&'static str);

#[async_trait]
impl StrategyDetector for ToyNoOpDetector {
    fn strategy_name(&self) -> &'static str {
        self.0
    }

    async fn detect_opportunity(
        &self,
        _cancel: CancellationToken,
        _tx: &Transaction,
        _sim_result: &SimulationResult,
    ) -> anyhow::Result<Option<StrategyOpportunity>> {
        Ok(None)
    }
}

/// Wraps a [`mev_core::strategy::ConcurrentStrategyProcessor`] behind the
/// [`StrategyEngine`] interface the processor expects.
struct ToyStrategyEngine {
    inner: mev_core::strategy::ConcurrentStrategyProcessor,
}

#[async_trait]
impl StrategyEngine for ToyStrategyEngine {
    async fn analyze_transaction(
        &self,
        cancel: CancellationToken,
        tx: &Transaction,
        sim_result: &SimulationResult,
    ) -> anyhow::Result<Vec<MEVOpportunity>> {
        Ok(self
            .inner
            .detect_strategies_concurrently(cancel, tx, sim_result)
            .await?)
    }

    fn enable_strategy(&self, _strategy: StrategyKind) {}
    fn disable_strategy(&self, _strategy: StrategyKind) {}
}

fn synthetic_transaction(rng: &mut impl rand::Rng, i: usize) -> Transaction {
    let eth: u128 = rng.gen_range(0..5);
    let gwei: u64 = rng.gen_range(1..200);

    Transaction {
        hash: B256::from_slice(&[i as u8; 32]),
        from: Address::repeat_byte(1),
        to: Some(Address::repeat_byte(2)),
        value: U256::from(eth * 1_000_000_000_000_000_000),
        gas_price: U256::from(gwei * 1_000_000_000),
        gas_limit: 21_000,
        nonce: i as u64,
        data: Vec::new(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| cli.log_level.clone());
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_filter)))
        .init();

    let _ = mev_core::metrics::init_metrics();

    let fork_manager = Arc::new(ToyForkManager::new(4));
    let strategy_engine = Arc::new(ToyStrategyEngine {
        inner: mev_core::strategy::ConcurrentStrategyProcessor::new(
            mev_core::collaborators::Detectors {
                sandwich: Arc::new(ToySandwichDetector),
                backrun: Arc::new(ToyNoOpDetector("backrun")),
                frontrun: Arc::new(ToyNoOpDetector("frontrun")),
            },
        ),
    });

    let config = EngineConfig::default();
    let processor = Arc::new(TransactionProcessor::new(config, fork_manager, strategy_engine)?);
    let monitor_shutdown = processor.start().await?;

    let mut rng = rand::thread_rng();

    info!(count = cli.transactions, "submitting synthetic transactions");
    for i in 0..cli.transactions {
        match processor
            .process_transaction(CancellationToken::new(), synthetic_transaction(&mut rng, i))
            .await
        {
            Ok(result) if !result.opportunities.is_empty() => {
                info!(
                    index = i,
                    opportunities = result.opportunities.len(),
                    "found MEV opportunities"
                );
            }
            Ok(_) => {}
            Err(e) => info!(index = i, error = %e, "transaction processing failed"),
        }
    }

    tokio::time::sleep(Duration::from_millis(500)).await;

    let stats = processor.stats().await;
    info!(
        total_processed = stats.total_processed,
        total_succeeded = stats.total_succeeded,
        total_failed = stats.total_failed,
        mean_latency_ms = stats.mean_latency.as_millis() as u64,
        simulation_load = stats.simulation_load,
        strategy_load = stats.strategy_load,
        "pipeline run complete"
    );

    monitor_shutdown.cancel();
    processor.stop().await?;

    Ok(())
}

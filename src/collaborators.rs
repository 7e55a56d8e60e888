//! External collaborator traits.
//!
//! The core never implements a blockchain VM, a strategy analyzer, or a
//! profit calculator — it only depends on narrow, object-safe traits for
//! them, supplied by the caller at construction (dependency injection, not
//! inheritance). Everything in this module is an interface; concrete
//! implementations live outside this crate (the demo harness in `main.rs`
//! supplies toy ones for illustration).

use alloy_primitives::{Address, U256};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::domain::{SimulationResult, StrategyOpportunity, Transaction};

/// An isolated, resettable snapshot of blockchain state.
#[async_trait]
pub trait Fork: Send + Sync {
    fn id(&self) -> &str;

    async fn execute_transaction(
        &self,
        cancel: CancellationToken,
        tx: &Transaction,
    ) -> anyhow::Result<SimulationResult>;

    fn block_number(&self) -> u64;

    async fn balance(&self, address: Address) -> anyhow::Result<U256>;

    async fn reset(&self) -> anyhow::Result<()>;

    async fn close(&self) -> anyhow::Result<()>;

    fn is_healthy(&self) -> bool;
}

/// Aggregate statistics the fork manager reports about its own pool.
#[derive(Debug, Clone, Copy, Default)]
pub struct ForkPoolStats {
    pub total: usize,
    pub failed: usize,
}

/// Supplies and reclaims [`Fork`] instances. Owned and operated externally;
/// the [`crate::fork_balancer::ForkLoadBalancer`] only ever borrows from it.
#[async_trait]
pub trait ForkManager: Send + Sync {
    async fn get_available_fork(
        &self,
        cancel: CancellationToken,
    ) -> anyhow::Result<std::sync::Arc<dyn Fork>>;

    async fn release_fork(&self, fork: std::sync::Arc<dyn Fork>) -> anyhow::Result<()>;

    async fn get_fork_pool_stats(&self) -> ForkPoolStats;

    async fn cleanup_forks(&self) -> anyhow::Result<()>;

    /// Optional: not every manager supports on-demand fork creation.
    async fn create_fork(&self, _cancel: CancellationToken, _id: &str) -> anyhow::Result<()> {
        Ok(())
    }

    /// Optional: acquires a specific fork by id, for managers that can hand
    /// out a named instance rather than just "the next available one". The
    /// default errs unconditionally so a [`crate::fork_balancer::ForkLoadBalancer`]
    /// driven by a selection strategy can try this first and fall back to
    /// [`ForkManager::get_available_fork`] when the manager doesn't support it.
    async fn get_fork_by_id(
        &self,
        _id: &str,
        _cancel: CancellationToken,
    ) -> anyhow::Result<std::sync::Arc<dyn Fork>> {
        anyhow::bail!("fork manager does not support acquisition by id")
    }
}

/// A single-strategy opportunity detector (sandwich, backrun, frontrun).
#[async_trait]
pub trait StrategyDetector: Send + Sync {
    fn strategy_name(&self) -> &'static str;

    async fn detect_opportunity(
        &self,
        cancel: CancellationToken,
        tx: &Transaction,
        sim_result: &SimulationResult,
    ) -> anyhow::Result<Option<StrategyOpportunity>>;
}

/// The time-bandit detector operates over a batch of transactions rather than
/// a single one, hence the distinct signature.
#[async_trait]
pub trait TimeBanditDetector: Send + Sync {
    async fn detect_opportunity(
        &self,
        cancel: CancellationToken,
        txs: &[Transaction],
        sim_results: &[SimulationResult],
    ) -> anyhow::Result<Option<StrategyOpportunity>>;
}

/// Coordinates the set of enabled per-transaction strategy detectors.
#[async_trait]
pub trait StrategyEngine: Send + Sync {
    async fn analyze_transaction(
        &self,
        cancel: CancellationToken,
        tx: &Transaction,
        sim_result: &SimulationResult,
    ) -> anyhow::Result<Vec<crate::domain::MEVOpportunity>>;

    fn enable_strategy(&self, strategy: crate::domain::StrategyKind);

    fn disable_strategy(&self, strategy: crate::domain::StrategyKind);
}

/// Computes profit, gas cost and slippage for a candidate opportunity.
///
/// Per the open question preserved from the original spec (§9): gas cost of
/// generated opportunities is zero unless this calculator supplies a value.
pub trait ProfitCalculator: Send + Sync {
    fn calculate_profit(&self, expected: U256, actual_state: &[u8]) -> U256;

    fn calculate_gas_costs(&self, gas_used: u64, gas_price: U256) -> U256;

    fn calculate_slippage(&self, expected: U256, actual: U256) -> f64;

    fn validate_profitability(&self, expected_profit: U256, gas_cost: U256) -> bool {
        expected_profit > gas_cost
    }
}

/// A no-op profit calculator: gas cost is always zero, matching the
/// "zero unless calculator supplies a value" note in the spec's open
/// questions. Useful as a default and in tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct ZeroGasProfitCalculator;

impl ProfitCalculator for ZeroGasProfitCalculator {
    fn calculate_profit(&self, expected: U256, _actual_state: &[u8]) -> U256 {
        expected
    }

    fn calculate_gas_costs(&self, _gas_used: u64, _gas_price: U256) -> U256 {
        U256::ZERO
    }

    fn calculate_slippage(&self, expected: U256, actual: U256) -> f64 {
        if expected.is_zero() {
            return 0.0;
        }
        let diff = expected.abs_diff(actual);
        let expected_f = expected.to_string().parse::<f64>().unwrap_or(f64::MAX);
        let diff_f = diff.to_string().parse::<f64>().unwrap_or(0.0);
        diff_f / expected_f
    }
}

/// Convenience container bundling the per-strategy detectors used by
/// [`crate::strategy::ConcurrentStrategyProcessor`].
///
/// Cheap to clone (each field is an `Arc`), so a [`crate::jobs::ConcurrentStrategyJob`]
/// can carry its own copy of the enabled detectors instead of a back-reference
/// to the processor that dispatched it.
#[derive(Clone)]
pub struct Detectors {
    pub sandwich: std::sync::Arc<dyn StrategyDetector>,
    pub backrun: std::sync::Arc<dyn StrategyDetector>,
    pub frontrun: std::sync::Arc<dyn StrategyDetector>,
}

impl Detectors {
    /// Returns the enabled detectors keyed by strategy name, in a stable
    /// iteration order (sandwich, backrun, frontrun) — callers fan out over
    /// this but must not depend on completion order.
    pub fn enabled(&self) -> Vec<(crate::domain::StrategyKind, std::sync::Arc<dyn StrategyDetector>)> {
        vec![
            (crate::domain::StrategyKind::Sandwich, self.sandwich.clone()),
            (crate::domain::StrategyKind::Backrun, self.backrun.clone()),
            (crate::domain::StrategyKind::Frontrun, self.frontrun.clone()),
        ]
    }
}

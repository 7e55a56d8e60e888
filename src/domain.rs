//! Domain types the core consumes and produces.
//!
//! These shapes are defined only to the extent the concurrent execution
//! substrate needs them — the actual simulator, strategy detectors, and
//! profit calculator are external collaborators (see [`crate::collaborators`]).

use std::collections::HashMap;

use alloy_primitives::{Address, B256, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A candidate transaction entering the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub hash: B256,
    pub from: Address,
    pub to: Option<Address>,
    pub value: U256,
    pub gas_price: U256,
    pub gas_limit: u64,
    pub nonce: u64,
    pub data: Vec<u8>,
}

impl Transaction {
    /// Priority score per §4.5: `floor(value / 1e18) + floor(gas_price / 1e9)`,
    /// clamped to `[0, 1000]`.
    pub fn priority_score(&self) -> i64 {
        let eth = self.value / U256::from(1_000_000_000_000_000_000u128);
        let gwei = self.gas_price / U256::from(1_000_000_000u128);

        let score = eth.saturating_add(gwei);
        let score: u64 = score.try_into().unwrap_or(u64::MAX);
        score.min(1000) as i64
    }
}

/// A single state mutation observed during simulation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateChange {
    pub address: Address,
    pub slot: B256,
    pub before: B256,
    pub after: B256,
}

/// The outcome of simulating a [`Transaction`] against a fork.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationResult {
    pub success: bool,
    pub gas_used: u64,
    pub gas_price: U256,
    pub execution_time: std::time::Duration,
    pub state_changes: Vec<StateChange>,
    pub error: Option<String>,
}

impl SimulationResult {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            gas_used: 0,
            gas_price: U256::ZERO,
            execution_time: std::time::Duration::ZERO,
            state_changes: Vec::new(),
            error: Some(error.into()),
        }
    }
}

/// The MEV strategy that produced (or is capable of producing) an opportunity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Sandwich,
    Backrun,
    Frontrun,
    TimeBandit,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Sandwich => "sandwich",
            StrategyKind::Backrun => "backrun",
            StrategyKind::Frontrun => "frontrun",
            StrategyKind::TimeBandit => "time_bandit",
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle status of a detected [`MEVOpportunity`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpportunityStatus {
    Detected,
    Validated,
    Executed,
    Failed,
}

/// A hypothesised profitable action identified by a strategy detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MEVOpportunity {
    pub id: String,
    pub strategy: StrategyKind,
    pub target_tx_hash: B256,
    pub expected_profit: U256,
    pub net_profit: U256,
    pub gas_cost: U256,
    pub confidence: f64,
    pub status: OpportunityStatus,
    pub created_at: DateTime<Utc>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl MEVOpportunity {
    /// Passes the filter applied by the strategy-detection job (§4.5):
    /// expected profit > 0, net profit > 0, confidence >= 0.5.
    pub fn is_profitable(&self) -> bool {
        self.expected_profit > U256::ZERO && self.net_profit > U256::ZERO && self.confidence >= 0.5
    }
}

/// The raw result a per-strategy detector hands back before normalization
/// into an [`MEVOpportunity`] by [`crate::strategy::ConcurrentStrategyProcessor`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyOpportunity {
    pub expected_profit: U256,
    pub net_profit: U256,
    pub gas_cost: Option<U256>,
    pub payload: serde_json::Value,
}

/// The combined outcome [`crate::jobs::TransactionSimulationJob`] delivers to
/// a waiting [`crate::processor::TransactionProcessor::process_transaction`]
/// call: the simulation itself, plus whatever profitable opportunities
/// strategy detection found on top of it.
#[derive(Debug, Clone)]
pub struct ProcessingResult {
    pub simulation: SimulationResult,
    pub opportunities: Vec<MEVOpportunity>,
}

//! Concurrent strategy fan-out and fan-in.
//!
//! [`ConcurrentStrategyProcessor`] runs every enabled per-transaction
//! detector concurrently against a transaction/simulation-result pair and
//! normalizes their raw [`crate::domain::StrategyOpportunity`] outputs into
//! [`crate::domain::MEVOpportunity`] records.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::collaborators::Detectors;
use crate::domain::{MEVOpportunity, OpportunityStatus, SimulationResult, Transaction};
use crate::error::{PoolError, StrategyError};
use crate::metrics::MetricsCollector;
use crate::scheduler::{WorkerPool, WorkerPoolConfig};

/// The overall hard cap on [`ConcurrentStrategyProcessor::process_opportunities`],
/// regardless of how many transactions are in the batch.
const PROCESS_OPPORTUNITIES_TIMEOUT: Duration = Duration::from_secs(10);

/// Default confidence assigned to a normalized opportunity when the
/// originating detector didn't supply one explicitly.
const DEFAULT_CONFIDENCE: f64 = 0.8;

/// Fans `tx`/`sim_result` out across every enabled detector in `detectors`
/// concurrently, normalizing each hit into an [`MEVOpportunity`]. This is the
/// shared fan-out primitive behind both
/// [`ConcurrentStrategyProcessor::detect_strategies_concurrently`] (called
/// directly by a [`crate::jobs::StrategyDetectionJob`]) and
/// [`crate::jobs::ConcurrentStrategyJob`] (submitted onto
/// [`ConcurrentStrategyProcessor`]'s own pool by `process_opportunities`).
/// Sibling detector failures do not block one another; they are collected and
/// surfaced as a [`StrategyError::DetectorFailed`] only if every detector
/// fails.
pub(crate) async fn fan_out_detectors(
    detectors: &Detectors,
    cancel: CancellationToken,
    tx: &Transaction,
    sim_result: &SimulationResult,
) -> Result<Vec<MEVOpportunity>, StrategyError> {
    let enabled = detectors.enabled();
    let futures = enabled.into_iter().map(|(kind, detector)| {
        let cancel = cancel.clone();
        async move {
            let result = detector.detect_opportunity(cancel, tx, sim_result).await;
            (kind, result)
        }
    });

    let results = futures::future::join_all(futures).await;

    let mut opportunities = Vec::new();
    let mut failures = Vec::new();

    let metrics = MetricsCollector::new();
    for (kind, result) in results {
        match result {
            Ok(Some(raw)) => {
                let opportunity = normalize(kind, tx, raw);
                metrics.record_opportunity_detected(kind.as_str(), opportunity.confidence);
                opportunities.push(opportunity);
            }
            Ok(None) => {}
            Err(e) => {
                warn!(strategy = %kind, error = %e, "strategy detector failed");
                failures.push((kind, e.to_string()));
            }
        }
    }

    if opportunities.is_empty() && !failures.is_empty() {
        let (kind, source) = failures.into_iter().next().expect("non-empty");
        return Err(StrategyError::DetectorFailed {
            strategy: kind.to_string(),
            source,
        });
    }

    Ok(opportunities)
}

/// Runs detectors concurrently and normalizes their results.
///
/// Owns a small internal [`WorkerPool`] used only by `process_opportunities`
/// to dispatch one [`crate::jobs::ConcurrentStrategyJob`] per transaction;
/// `detect_strategies_concurrently` bypasses that pool entirely since it is
/// itself called from within a job already running on a pool.
pub struct ConcurrentStrategyProcessor {
    detectors: Detectors,
    pool: Arc<WorkerPool>,
}

impl ConcurrentStrategyProcessor {
    pub fn new(detectors: Detectors) -> Self {
        Self::with_pool_config(detectors, WorkerPoolConfig::default())
    }

    pub fn with_pool_config(detectors: Detectors, pool_config: WorkerPoolConfig) -> Self {
        Self {
            detectors,
            pool: Arc::new(WorkerPool::with_name("concurrent_strategy", pool_config)),
        }
    }

    /// Starts the internal fan-out pool. Must be called before
    /// `process_opportunities`.
    pub async fn start(&self) -> Result<(), PoolError> {
        self.pool.start().await
    }

    /// Stops the internal fan-out pool, draining in-flight fan-out jobs.
    pub async fn stop(&self) -> Result<(), PoolError> {
        self.pool.stop().await
    }

    /// Fans a single transaction out across every enabled detector
    /// concurrently, normalizing each hit into an [`MEVOpportunity`].
    pub async fn detect_strategies_concurrently(
        &self,
        cancel: CancellationToken,
        tx: &Transaction,
        sim_result: &SimulationResult,
    ) -> Result<Vec<MEVOpportunity>, StrategyError> {
        fan_out_detectors(&self.detectors, cancel, tx, sim_result).await
    }

    /// Processes parallel `transactions`/`sim_results` slices (index-aligned)
    /// under a hard 10-second cap. Submits one
    /// [`crate::jobs::ConcurrentStrategyJob`] per pair onto the internal
    /// pool and collects their results; a transaction whose fan-out errors
    /// contributes no opportunities but does not abort the others. Returns
    /// whatever opportunities were found before the deadline even if not
    /// every transaction finished.
    pub async fn process_opportunities(
        &self,
        cancel: CancellationToken,
        transactions: &[Transaction],
        sim_results: &[SimulationResult],
    ) -> Result<Vec<MEVOpportunity>, StrategyError> {
        if transactions.len() != sim_results.len() {
            return Err(StrategyError::LengthMismatch {
                transactions: transactions.len(),
                sim_results: sim_results.len(),
            });
        }

        let mut receivers = Vec::with_capacity(transactions.len());
        for (i, (tx, sim)) in transactions.iter().zip(sim_results.iter()).enumerate() {
            if cancel.is_cancelled() {
                return Err(StrategyError::Cancelled);
            }

            let (result_tx, result_rx) = oneshot::channel();
            let job = crate::jobs::ConcurrentStrategyJob {
                id: format!("concurrent-strategy-{i}"),
                priority: tx.priority_score(),
                transaction: tx.clone(),
                sim_result: sim.clone(),
                detectors: self.detectors.clone(),
                timeout: PROCESS_OPPORTUNITIES_TIMEOUT,
                result_tx: std::sync::Mutex::new(Some(result_tx)),
            };

            match self.pool.submit(Box::new(job)).await {
                Ok(()) => receivers.push(Some(result_rx)),
                Err(e) => {
                    warn!(error = %e, tx_hash = %tx.hash, "fan-out pool rejected concurrent strategy job");
                    receivers.push(None);
                }
            }
        }

        let collect = async {
            let mut all = Vec::new();
            for recv in receivers {
                match recv {
                    Some(rx) => match rx.await {
                        Ok(Ok(mut found)) => all.append(&mut found),
                        Ok(Err(e)) => {
                            warn!(error = %e, "strategy fan-out job failed for one transaction")
                        }
                        Err(_) => warn!("strategy fan-out job dropped its result sender"),
                    },
                    None => {}
                }
            }
            all
        };

        match tokio::time::timeout(PROCESS_OPPORTUNITIES_TIMEOUT, collect).await {
            Ok(all) => Ok(all),
            Err(_) => Err(StrategyError::Timeout(PROCESS_OPPORTUNITIES_TIMEOUT)),
        }
    }
}

fn normalize(
    kind: crate::domain::StrategyKind,
    tx: &Transaction,
    raw: crate::domain::StrategyOpportunity,
) -> MEVOpportunity {
    let gas_cost = raw.gas_cost.unwrap_or(alloy_primitives::U256::ZERO);
    let net_profit = raw.net_profit;

    MEVOpportunity {
        id: format!("{}_{}_{}", kind, tx.hash, Utc::now().timestamp_nanos_opt().unwrap_or_default()),
        strategy: kind,
        target_tx_hash: tx.hash,
        expected_profit: raw.expected_profit,
        net_profit,
        gas_cost,
        confidence: DEFAULT_CONFIDENCE,
        status: OpportunityStatus::Detected,
        created_at: Utc::now(),
        metadata: HashMap::from([("payload".to_string(), raw.payload)]),
    }
}

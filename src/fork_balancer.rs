//! Fork load balancing across a [`crate::collaborators::ForkManager`].
//!
//! [`ForkLoadBalancer`] sits between the scheduler and an externally owned
//! pool of [`crate::collaborators::Fork`] instances: it tracks per-fork load
//! and a moving-average latency, retries transient acquisition failures, and
//! exposes a selection strategy for picking among currently held forks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::collaborators::ForkManager;
use crate::error::BalancerError;
use crate::metrics::MetricsCollector;

/// Strategy used by [`ForkLoadBalancer::get_best_fork`] to pick among
/// currently tracked forks. Passed explicitly per call (rather than fixed at
/// construction) so two callers can select differently without racing each
/// other over shared mutable state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionStrategy {
    RoundRobin,
    LeastLoaded,
    Fastest,
}

impl SelectionStrategy {
    /// Unrecognized strategy names fall back to `LeastLoaded`.
    pub fn parse(name: &str) -> Self {
        match name {
            "round_robin" => SelectionStrategy::RoundRobin,
            "fastest" => SelectionStrategy::Fastest,
            "least_loaded" => SelectionStrategy::LeastLoaded,
            _ => SelectionStrategy::LeastLoaded,
        }
    }
}

/// Configuration for a [`ForkLoadBalancer`].
#[derive(Debug, Clone)]
pub struct ForkBalancerConfig {
    pub max_retries: u32,
    pub retry_delay: Duration,
    /// How often the background health monitor sweeps tracked forks.
    pub health_check_interval: Duration,
    /// Strategy `get_fork` uses to pick among already-tracked forks before
    /// falling back to the manager's own `get_available_fork`.
    pub default_strategy: SelectionStrategy,
}

impl Default for ForkBalancerConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_millis(100),
            health_check_interval: Duration::from_secs(30),
            default_strategy: SelectionStrategy::LeastLoaded,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct ForkTracking {
    load: usize,
    avg_latency_ms: f64,
}

/// Aggregate statistics the balancer reports about its tracked forks.
#[derive(Debug, Clone, Default)]
pub struct BalancerStats {
    pub total_forks: usize,
    pub healthy_forks: usize,
    pub total_acquisitions: u64,
    /// Incremented once per call to `get_fork` that exhausts every retry
    /// without acquiring a fork — not once per failed attempt.
    pub failover_count: u64,
    pub load_distribution: HashMap<String, usize>,
    pub average_latency: Duration,
}

struct Inner {
    manager: Arc<dyn ForkManager>,
    config: ForkBalancerConfig,
    tracking: RwLock<HashMap<String, ForkTracking>>,
    round_robin_cursor: AtomicUsize,
    total_acquisitions: AtomicU64,
    failover_count: AtomicU64,
    metrics: MetricsCollector,
}

/// Balances simulation load across a pool of externally managed forks.
///
/// Cheap to clone: `Arc`-backed internally, so it can be shared with a
/// background health-monitor task without the task holding a back-reference
/// into a processor.
#[derive(Clone)]
pub struct ForkLoadBalancer {
    inner: Arc<Inner>,
}

impl ForkLoadBalancer {
    pub fn new(manager: Arc<dyn ForkManager>, config: ForkBalancerConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                manager,
                config,
                tracking: RwLock::new(HashMap::new()),
                round_robin_cursor: AtomicUsize::new(0),
                total_acquisitions: AtomicU64::new(0),
                failover_count: AtomicU64::new(0),
                metrics: MetricsCollector::new(),
            }),
        }
    }

    /// Acquires a fork from the underlying manager, retrying transient
    /// failures up to `max_retries` times with `retry_delay` between
    /// attempts. Bails out early if `cancel` fires.
    ///
    /// Uses the balancer's `default_strategy`. Use [`ForkLoadBalancer::get_fork_with_strategy`]
    /// to pick a different one for a single call.
    pub async fn get_fork(
        &self,
        cancel: CancellationToken,
    ) -> Result<Arc<dyn crate::collaborators::Fork>, BalancerError> {
        self.get_fork_with_strategy(cancel, self.inner.config.default_strategy)
            .await
    }

    /// Acquires a fork, first trying the tracked fork `strategy` ranks best
    /// (via [`ForkLoadBalancer::get_best_fork`] and the manager's optional
    /// `get_fork_by_id`), then falling back to the manager's own
    /// `get_available_fork` retried up to `max_retries` times if that doesn't
    /// pan out — either because no fork is tracked yet or the manager doesn't
    /// support id-based acquisition. Bails out early if `cancel` fires.
    pub async fn get_fork_with_strategy(
        &self,
        cancel: CancellationToken,
        strategy: SelectionStrategy,
    ) -> Result<Arc<dyn crate::collaborators::Fork>, BalancerError> {
        let pool_stats = self
            .inner
            .manager
            .get_fork_pool_stats()
            .await;
        if pool_stats.total == 0 {
            return Err(BalancerError::NoForksAvailable);
        }

        if let Some(preferred_id) = self.get_best_fork(strategy).await {
            if !cancel.is_cancelled() {
                match self
                    .inner
                    .manager
                    .get_fork_by_id(&preferred_id, cancel.clone())
                    .await
                {
                    Ok(fork) => {
                        self.inner.total_acquisitions.fetch_add(1, Ordering::SeqCst);
                        self.track_acquire(fork.id()).await;
                        return Ok(fork);
                    }
                    Err(e) => {
                        debug!(
                            fork_id = %preferred_id,
                            error = %e,
                            "strategy-preferred fork unavailable, falling back to manager"
                        );
                    }
                }
            }
        }

        let mut last_error = String::new();
        for attempt in 1..=self.inner.config.max_retries {
            if cancel.is_cancelled() {
                return Err(BalancerError::Cancelled);
            }

            let started = tokio::time::Instant::now();
            match self.inner.manager.get_available_fork(cancel.clone()).await {
                Ok(fork) => {
                    self.inner.total_acquisitions.fetch_add(1, Ordering::SeqCst);
                    self.inner
                        .metrics
                        .record_fork_acquisition(started.elapsed().as_secs_f64());
                    self.track_acquire(fork.id()).await;
                    return Ok(fork);
                }
                Err(e) => {
                    last_error = e.to_string();
                    warn!(attempt, error = %last_error, "fork acquisition attempt failed");

                    if attempt < self.inner.config.max_retries {
                        tokio::select! {
                            _ = cancel.cancelled() => return Err(BalancerError::Cancelled),
                            _ = tokio::time::sleep(self.inner.config.retry_delay) => {}
                        }
                    }
                }
            }
        }

        self.inner.failover_count.fetch_add(1, Ordering::SeqCst);
        self.inner.metrics.record_fork_acquisition_failure();
        Err(BalancerError::Exhausted {
            attempts: self.inner.config.max_retries,
            source: last_error,
        })
    }

    /// Releases a previously acquired fork back to the manager and records
    /// its observed latency for this use.
    pub async fn release_fork(
        &self,
        fork: Arc<dyn crate::collaborators::Fork>,
        observed_latency: Duration,
    ) -> Result<(), BalancerError> {
        let id = fork.id().to_string();
        self.track_release(&id, observed_latency).await;
        self.inner
            .manager
            .release_fork(fork)
            .await
            .map_err(|e| BalancerError::ManagerError(e.to_string()))
    }

    /// Selects the "best" currently tracked fork by `strategy`. The strategy
    /// is a parameter on each call rather than fixed on the balancer, so two
    /// concurrent callers using different strategies never race over shared
    /// selection state.
    pub async fn get_best_fork(&self, strategy: SelectionStrategy) -> Option<String> {
        let tracking = self.inner.tracking.read().await;
        if tracking.is_empty() {
            return None;
        }

        match strategy {
            SelectionStrategy::RoundRobin => {
                let ids: Vec<&String> = tracking.keys().collect();
                let idx = self.inner.round_robin_cursor.fetch_add(1, Ordering::SeqCst) % ids.len();
                Some(ids[idx].clone())
            }
            SelectionStrategy::LeastLoaded => tracking
                .iter()
                .min_by_key(|(_, t)| t.load)
                .map(|(id, _)| id.clone()),
            SelectionStrategy::Fastest => tracking
                .iter()
                .min_by(|(_, a), (_, b)| {
                    a.avg_latency_ms
                        .partial_cmp(&b.avg_latency_ms)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .map(|(id, _)| id.clone()),
        }
    }

    pub async fn stats(&self) -> BalancerStats {
        let tracking = self.inner.tracking.read().await;
        let pool_stats = self.inner.manager.get_fork_pool_stats().await;

        let load_distribution: HashMap<String, usize> = tracking
            .iter()
            .map(|(id, t)| (id.clone(), t.load))
            .collect();

        let average_latency = if tracking.is_empty() {
            Duration::ZERO
        } else {
            let total_ms: f64 = tracking.values().map(|t| t.avg_latency_ms).sum();
            Duration::from_secs_f64((total_ms / tracking.len() as f64) / 1000.0)
        };

        BalancerStats {
            total_forks: pool_stats.total,
            healthy_forks: pool_stats.total.saturating_sub(pool_stats.failed),
            total_acquisitions: self.inner.total_acquisitions.load(Ordering::SeqCst),
            failover_count: self.inner.failover_count.load(Ordering::SeqCst),
            load_distribution,
            average_latency,
        }
    }

    async fn track_acquire(&self, fork_id: &str) {
        let mut tracking = self.inner.tracking.write().await;
        tracking.entry(fork_id.to_string()).or_default().load += 1;
    }

    async fn track_release(&self, fork_id: &str, latency: Duration) {
        let mut tracking = self.inner.tracking.write().await;
        let entry = tracking.entry(fork_id.to_string()).or_default();
        entry.load = entry.load.saturating_sub(1);

        let observed_ms = latency.as_secs_f64() * 1000.0;
        entry.avg_latency_ms = if entry.avg_latency_ms == 0.0 {
            observed_ms
        } else {
            (entry.avg_latency_ms + observed_ms) / 2.0
        };
    }

    /// Spawns a background task that periodically reconciles tracked fork
    /// state against the manager, clearing all tracking if the manager
    /// reports zero forks (e.g. after a full pool recycle).
    pub fn spawn_health_monitor(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        let balancer = self.clone();
        let interval = self.inner.config.health_check_interval;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {
                        let pool_stats = balancer.inner.manager.get_fork_pool_stats().await;
                        if pool_stats.total == 0 {
                            debug!("fork manager reports zero forks, clearing load tracking");
                            balancer.inner.tracking.write().await.clear();
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{Fork, ForkPoolStats};
    use crate::domain::{SimulationResult, Transaction};
    use alloy_primitives::{Address, U256};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;

    struct StubFork {
        id: String,
    }

    #[async_trait]
    impl Fork for StubFork {
        fn id(&self) -> &str {
            &self.id
        }
        async fn execute_transaction(
            &self,
            _cancel: CancellationToken,
            _tx: &Transaction,
        ) -> anyhow::Result<SimulationResult> {
            Ok(SimulationResult::failed("stub"))
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

    struct FlakyManager {
        fail_times: AtomicU32,
        total: usize,
    }

    #[async_trait]
    impl ForkManager for FlakyManager {
        async fn get_available_fork(
            &self,
            _cancel: CancellationToken,
        ) -> anyhow::Result<Arc<dyn Fork>> {
            if self.fail_times.load(Ordering::SeqCst) > 0 {
                self.fail_times.fetch_sub(1, Ordering::SeqCst);
                anyhow::bail!("no fork ready yet");
            }
            Ok(Arc::new(StubFork { id: "fork-0".to_string() }))
        }
        async fn release_fork(&self, _fork: Arc<dyn Fork>) -> anyhow::Result<()> {
            Ok(())
        }
        async fn get_fork_pool_stats(&self) -> ForkPoolStats {
            ForkPoolStats {
                total: self.total,
                failed: 0,
            }
        }
        async fn cleanup_forks(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn no_forks_available_fails_fast() {
        let manager = Arc::new(FlakyManager {
            fail_times: AtomicU32::new(0),
            total: 0,
        });
        let balancer = ForkLoadBalancer::new(manager, ForkBalancerConfig::default());
        let err = balancer.get_fork(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, BalancerError::NoForksAvailable));
    }

    #[tokio::test]
    async fn retries_transient_failures_then_succeeds() {
        let manager = Arc::new(FlakyManager {
            fail_times: AtomicU32::new(2),
            total: 1,
        });
        let config = ForkBalancerConfig {
            retry_delay: Duration::from_millis(1),
            ..Default::default()
        };
        let balancer = ForkLoadBalancer::new(manager, config);
        let fork = balancer.get_fork(CancellationToken::new()).await.unwrap();
        assert_eq!(fork.id(), "fork-0");
    }

    #[tokio::test]
    async fn exhausts_retries_and_reports_failure_count() {
        let manager = Arc::new(FlakyManager {
            fail_times: AtomicU32::new(10),
            total: 1,
        });
        let config = ForkBalancerConfig {
            max_retries: 2,
            retry_delay: Duration::from_millis(1),
            ..Default::default()
        };
        let balancer = ForkLoadBalancer::new(manager, config);
        let err = balancer.get_fork(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, BalancerError::Exhausted { attempts: 2, .. }));
        assert_eq!(balancer.stats().await.failover_count, 1);
    }

    #[tokio::test]
    async fn least_loaded_and_fastest_selection() {
        let manager = Arc::new(FlakyManager {
            fail_times: AtomicU32::new(0),
            total: 1,
        });
        let balancer = ForkLoadBalancer::new(manager, ForkBalancerConfig::default());

        let fork = balancer.get_fork(CancellationToken::new()).await.unwrap();
        balancer
            .release_fork(fork, Duration::from_millis(10))
            .await
            .unwrap();

        let best = balancer.get_best_fork(SelectionStrategy::LeastLoaded).await;
        assert_eq!(best.as_deref(), Some("fork-0"));

        let fastest = balancer.get_best_fork(SelectionStrategy::Fastest).await;
        assert_eq!(fastest.as_deref(), Some("fork-0"));
    }

    /// A manager with two forks that supports id-based acquisition, so tests
    /// can tell whether the balancer actually consulted the selection
    /// strategy rather than just taking whatever `get_available_fork` hands
    /// back.
    struct NamedForkManager {
        by_id_calls: AtomicU32,
        by_available_calls: AtomicU32,
    }

    #[async_trait]
    impl ForkManager for NamedForkManager {
        async fn get_available_fork(
            &self,
            _cancel: CancellationToken,
        ) -> anyhow::Result<Arc<dyn Fork>> {
            self.by_available_calls.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(StubFork { id: "fork-a".to_string() }))
        }
        async fn release_fork(&self, _fork: Arc<dyn Fork>) -> anyhow::Result<()> {
            Ok(())
        }
        async fn get_fork_pool_stats(&self) -> ForkPoolStats {
            ForkPoolStats { total: 2, failed: 0 }
        }
        async fn cleanup_forks(&self) -> anyhow::Result<()> {
            Ok(())
        }
        async fn get_fork_by_id(
            &self,
            id: &str,
            _cancel: CancellationToken,
        ) -> anyhow::Result<Arc<dyn Fork>> {
            self.by_id_calls.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(StubFork { id: id.to_string() }))
        }
    }

    #[tokio::test]
    async fn get_fork_prefers_strategy_selection_over_the_manager_default() {
        let manager = Arc::new(NamedForkManager {
            by_id_calls: AtomicU32::new(0),
            by_available_calls: AtomicU32::new(0),
        });
        let balancer = ForkLoadBalancer::new(manager.clone(), ForkBalancerConfig::default());

        // First acquisition: nothing tracked yet, so get_best_fork has
        // nothing to rank and the manager's own fallback is used.
        let first = balancer.get_fork(CancellationToken::new()).await.unwrap();
        assert_eq!(manager.by_available_calls.load(Ordering::SeqCst), 1);
        assert_eq!(manager.by_id_calls.load(Ordering::SeqCst), 0);
        balancer
            .release_fork(first, Duration::from_millis(5))
            .await
            .unwrap();

        // Second acquisition: "fork-a" is now tracked, so LeastLoaded picks
        // it and the balancer must go through get_fork_by_id, not
        // get_available_fork.
        let second = balancer
            .get_fork_with_strategy(CancellationToken::new(), SelectionStrategy::LeastLoaded)
            .await
            .unwrap();
        assert_eq!(second.id(), "fork-a");
        assert_eq!(manager.by_id_calls.load(Ordering::SeqCst), 1);
        assert_eq!(manager.by_available_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn default_strategy_is_least_loaded() {
        assert_eq!(
            ForkBalancerConfig::default().default_strategy,
            SelectionStrategy::LeastLoaded
        );
    }

    #[test]
    fn unknown_strategy_name_falls_back_to_least_loaded() {
        assert_eq!(SelectionStrategy::parse("bogus"), SelectionStrategy::LeastLoaded);
        assert_eq!(SelectionStrategy::parse("round_robin"), SelectionStrategy::RoundRobin);
    }
}

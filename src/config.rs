//! Aggregate engine configuration.
//!
//! [`EngineConfig`] bundles the configuration of every concurrency
//! subsystem (both worker pools, the latency monitor, the fork balancer, and
//! the processor itself) behind one validated, env-overridable struct.

use std::time::Duration;

use crate::error::ConfigError;
use crate::fork_balancer::ForkBalancerConfig;
use crate::scheduler::{LatencyMonitorConfig, WorkerPoolConfig};

/// Configuration for [`crate::processor::TransactionProcessor`] itself, as
/// opposed to the pools/balancer/monitor it owns.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Hard cap on a single `ProcessTransaction` call.
    pub processing_timeout: Duration,
    /// Number of transactions grouped per sub-batch inside `ProcessBatch`
    /// and `BatchProcessingJob`.
    pub batch_size: usize,
    /// How often the background metrics-collection task runs.
    pub metrics_interval: Duration,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            processing_timeout: Duration::from_secs(5),
            batch_size: 10,
            metrics_interval: Duration::from_secs(10),
        }
    }
}

/// Aggregate configuration for the whole concurrent execution substrate.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub simulation_pool: WorkerPoolConfig,
    pub strategy_pool: WorkerPoolConfig,
    pub latency_monitor: LatencyMonitorConfig,
    pub fork_balancer: ForkBalancerConfig,
    pub processor: ProcessorConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            // `BatchProcessingJob` declares a timeout proportional to its
            // transaction count (per_job_timeout * len), so the simulation
            // pool's own per-job cap must be raised well above a single
            // transaction's timeout or large batches get truncated by the
            // pool before the batch job's own deadline logic ever applies.
            simulation_pool: WorkerPoolConfig::default()
                .with_max_job_timeout(Duration::from_secs(300)),
            strategy_pool: WorkerPoolConfig::default(),
            latency_monitor: LatencyMonitorConfig::default(),
            fork_balancer: ForkBalancerConfig::default(),
            processor: ProcessorConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Validates every nested configuration, collecting the first failure
    /// from each subsystem rather than stopping at the first overall.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.simulation_pool.pool_size == 0 {
            return Err(ConfigError::InvalidPool {
                field: "simulation_pool.pool_size".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.simulation_pool.queue_size == 0 {
            return Err(ConfigError::InvalidPool {
                field: "simulation_pool.queue_size".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.strategy_pool.pool_size == 0 {
            return Err(ConfigError::InvalidPool {
                field: "strategy_pool.pool_size".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.strategy_pool.queue_size == 0 {
            return Err(ConfigError::InvalidPool {
                field: "strategy_pool.queue_size".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        self.latency_monitor
            .validate()
            .map_err(|e| ConfigError::InvalidMonitor(e.to_string()))?;

        if self.processor.batch_size == 0 {
            return Err(ConfigError::InvalidPool {
                field: "processor.batch_size".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        Ok(())
    }

    /// Applies a handful of environment-variable overrides on top of
    /// [`EngineConfig::default`]. Unset variables are left at their default;
    /// malformed ones produce a [`ConfigError::InvalidEnvVar`].
    ///
    /// Recognized variables:
    /// - `MEV_SIMULATION_POOL_SIZE`
    /// - `MEV_STRATEGY_POOL_SIZE`
    /// - `MEV_PROCESSING_TIMEOUT_MS`
    /// - `MEV_BATCH_SIZE`
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(raw) = std::env::var("MEV_SIMULATION_POOL_SIZE") {
            config.simulation_pool.pool_size = parse_env("MEV_SIMULATION_POOL_SIZE", &raw)?;
        }
        if let Ok(raw) = std::env::var("MEV_STRATEGY_POOL_SIZE") {
            config.strategy_pool.pool_size = parse_env("MEV_STRATEGY_POOL_SIZE", &raw)?;
        }
        if let Ok(raw) = std::env::var("MEV_PROCESSING_TIMEOUT_MS") {
            let ms: u64 = parse_env("MEV_PROCESSING_TIMEOUT_MS", &raw)?;
            config.processor.processing_timeout = Duration::from_millis(ms);
        }
        if let Ok(raw) = std::env::var("MEV_BATCH_SIZE") {
            config.processor.batch_size = parse_env("MEV_BATCH_SIZE", &raw)?;
        }

        config.validate()?;
        Ok(config)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ConfigError> {
    raw.parse().map_err(|_| ConfigError::InvalidEnvVar {
        key: key.to_string(),
        message: format!("could not parse '{raw}'"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_zero_sized_simulation_pool() {
        let mut config = EngineConfig::default();
        config.simulation_pool.pool_size = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidPool { .. })
        ));
    }

    #[test]
    fn rejects_zero_batch_size() {
        let mut config = EngineConfig::default();
        config.processor.batch_size = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidPool { .. })
        ));
    }

    #[test]
    fn propagates_invalid_monitor_config() {
        let mut config = EngineConfig::default();
        config.latency_monitor.window_size = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidMonitor(_))
        ));
    }
}

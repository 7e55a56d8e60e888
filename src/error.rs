//! Error types for the MEV execution core.
//!
//! Each subsystem gets its own `thiserror` enum so callers can discriminate
//! failure kinds programmatically without string matching:
//!
//! - [`JobError`]: errors a [`crate::scheduler::job::Job::execute`] body may return
//! - [`PoolError`]: worker pool lifecycle and scheduling errors
//! - [`MonitorError`]: latency monitor errors (currently only malformed config)
//! - [`BalancerError`]: fork load balancer acquisition/release errors
//! - [`ProcessorError`]: transaction processor pipeline errors
//! - [`StrategyError`]: concurrent strategy fan-out/fan-in errors
//! - [`ConfigError`]: configuration validation errors

use std::time::Duration;

use thiserror::Error;

/// Errors a job body can report from [`crate::scheduler::job::Job::execute`].
#[derive(Debug, Error)]
pub enum JobError {
    /// The job's cancellation token fired before it could finish.
    #[error("job cancelled")]
    Cancelled,

    /// The job's deadline elapsed.
    #[error("job timed out after {0:?}")]
    Timeout(Duration),

    /// A downstream collaborator (fork, detector, analyzer) failed.
    #[error("downstream error: {0}")]
    Downstream(String),

    /// The job body panicked; caught at the worker boundary.
    #[error("job panicked: {0}")]
    Panicked(String),
}

/// Errors raised by [`crate::scheduler::worker_pool::WorkerPool`].
#[derive(Debug, Error)]
pub enum PoolError {
    /// `Start` called on a pool that is already running.
    #[error("pool is already running")]
    AlreadyRunning,

    /// `Submit` or `Stop` called on a pool that has not been started.
    #[error("pool is not running")]
    NotRunning,

    /// `Submit` called while the pending queue is at capacity.
    #[error("queue is full (capacity {0})")]
    QueueFull(usize),

    /// `Stop` did not finish draining in-flight jobs within its grace period.
    #[error("shutdown timed out after {0:?} with jobs still in flight")]
    ShutdownTimeout(Duration),
}

/// Errors raised by [`crate::scheduler::latency::LatencyMonitor`].
#[derive(Debug, Error)]
pub enum MonitorError {
    /// The monitor was constructed with an invalid configuration.
    #[error("invalid latency monitor configuration: {0}")]
    InvalidConfig(String),
}

/// Errors raised by [`crate::fork_balancer::ForkLoadBalancer`].
#[derive(Debug, Error)]
pub enum BalancerError {
    /// The caller's cancellation token fired while retrying.
    #[error("fork acquisition cancelled")]
    Cancelled,

    /// All retry attempts were exhausted without acquiring a fork.
    #[error("failed to acquire a fork after {attempts} attempts: {source}")]
    Exhausted { attempts: u32, source: String },

    /// The underlying `ForkManager` reported an error.
    #[error("fork manager error: {0}")]
    ManagerError(String),

    /// No forks are registered with the manager.
    #[error("no forks available")]
    NoForksAvailable,
}

/// Errors raised by [`crate::processor::TransactionProcessor`].
#[derive(Debug, Error)]
pub enum ProcessorError {
    /// The simulation or strategy pool rejected the job.
    #[error("pool error: {0}")]
    Pool(#[from] PoolError),

    /// Fork acquisition failed.
    #[error("fork balancer error: {0}")]
    Balancer(#[from] BalancerError),

    /// The fork's simulation of the transaction failed.
    #[error("simulation failed: {0}")]
    SimulationFailed(String),

    /// `ProcessingTimeout` (or `2x` for batches) elapsed before completion.
    #[error("processing timed out after {0:?}")]
    Timeout(Duration),

    /// The caller's cancellation token fired.
    #[error("processing cancelled")]
    Cancelled,

    /// `ProcessBatch` completed with one or more per-transaction failures.
    #[error("{failed} of {total} transactions failed")]
    PartialBatchFailure { failed: usize, total: usize },
}

/// A job's own failure is surfaced to its waiting caller through this
/// conversion rather than a pointer back into the processor.
impl From<JobError> for ProcessorError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::Cancelled => ProcessorError::Cancelled,
            JobError::Timeout(d) => ProcessorError::Timeout(d),
            JobError::Downstream(msg) => ProcessorError::SimulationFailed(msg),
            JobError::Panicked(msg) => ProcessorError::SimulationFailed(msg),
        }
    }
}

/// Errors raised by [`crate::strategy::ConcurrentStrategyProcessor`].
#[derive(Debug, Error)]
pub enum StrategyError {
    /// `transactions.len() != sim_results.len()`.
    #[error("length mismatch: {transactions} transactions vs {sim_results} simulation results")]
    LengthMismatch {
        transactions: usize,
        sim_results: usize,
    },

    /// A detector returned an error. Sibling detectors are unaffected;
    /// these are collected and surfaced in aggregate.
    #[error("detector '{strategy}' failed: {source}")]
    DetectorFailed { strategy: String, source: String },

    /// The overall 10s hard cap on `ProcessOpportunities` elapsed.
    #[error("strategy processing timed out after {0:?}")]
    Timeout(Duration),

    /// The caller's cancellation token fired.
    #[error("strategy processing cancelled")]
    Cancelled,
}

/// Errors raised while constructing or validating [`crate::config::EngineConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A pool was configured with zero workers or zero queue capacity.
    #[error("invalid pool configuration '{field}': {reason}")]
    InvalidPool { field: String, reason: String },

    /// The latency monitor was configured with a zero-length window or an
    /// empty threshold map.
    #[error("invalid latency monitor configuration: {0}")]
    InvalidMonitor(String),

    /// An environment variable override could not be parsed.
    #[error("invalid value for environment variable {key}: {message}")]
    InvalidEnvVar { key: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_error_display() {
        assert!(PoolError::AlreadyRunning.to_string().contains("already running"));
        assert!(PoolError::NotRunning.to_string().contains("not running"));
        assert!(PoolError::QueueFull(100).to_string().contains("100"));
        assert!(PoolError::ShutdownTimeout(Duration::from_secs(30))
            .to_string()
            .contains("30"));
    }

    #[test]
    fn processor_error_wraps_pool_and_balancer_errors() {
        let err: ProcessorError = PoolError::QueueFull(10).into();
        assert!(matches!(err, ProcessorError::Pool(_)));

        let err: ProcessorError = BalancerError::NoForksAvailable.into();
        assert!(matches!(err, ProcessorError::Balancer(_)));
    }

    #[test]
    fn job_error_converts_into_processor_error() {
        assert!(matches!(
            ProcessorError::from(JobError::Cancelled),
            ProcessorError::Cancelled
        ));
        assert!(matches!(
            ProcessorError::from(JobError::Downstream("boom".into())),
            ProcessorError::SimulationFailed(_)
        ));
    }

    #[test]
    fn strategy_error_length_mismatch_message() {
        let err = StrategyError::LengthMismatch {
            transactions: 3,
            sim_results: 2,
        };
        let msg = err.to_string();
        assert!(msg.contains('3'));
        assert!(msg.contains('2'));
    }
}

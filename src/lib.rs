//! Concurrent execution substrate for an L2 MEV strategy engine.
//!
//! This crate provides the scheduling, load-balancing, and fan-out
//! machinery a strategy engine runs on top of — it does not itself
//! implement a blockchain simulator, a strategy detector, or a profit
//! calculator. Those are supplied by the caller through the traits in
//! [`collaborators`].
//!
//! - [`scheduler`]: priority worker pools and latency monitoring
//! - [`fork_balancer`]: load balancing across a pool of externally managed forks
//! - [`jobs`]: concrete job types submitted onto the scheduler
//! - [`processor`]: the top-level per-transaction and per-batch entry point
//! - [`strategy`]: concurrent strategy detector fan-out and fan-in
//! - [`domain`]: the transaction, simulation, and opportunity types
//! - [`collaborators`]: external interfaces the engine depends on
//! - [`config`]: aggregate, validated configuration
//! - [`metrics`]: Prometheus metrics collection and export

pub mod collaborators;
pub mod config;
pub mod domain;
pub mod error;
pub mod fork_balancer;
pub mod jobs;
pub mod metrics;
pub mod processor;
pub mod scheduler;
pub mod strategy;

pub use error::{
    BalancerError, ConfigError, JobError, MonitorError, PoolError, ProcessorError, StrategyError,
};

//! In-memory priority scheduling for MEV pipeline jobs.
//!
//! This module provides the concurrency substrate the rest of the crate is
//! built on:
//!
//! - **Job**: the polymorphic unit of work a pool dispatches
//! - **WorkerPool**: a fixed-size pool of tokio tasks draining a shared
//!   priority queue
//! - **LatencyMonitor**: rolling-window latency tracking with threshold
//!   alerting
//!
//! # Example
//!
//! ```rust,ignore
//! use mev_core::scheduler::{WorkerPool, WorkerPoolConfig};
//!
//! let mut pool = WorkerPool::new(WorkerPoolConfig::default());
//! pool.start()?;
//! pool.submit(Box::new(my_job)).await?;
//! pool.stop().await?;
//! ```

pub mod job;
pub mod latency;
pub mod worker_pool;

pub use job::{Job, JobOutput};
pub use latency::{Alert, LatencyMonitor, LatencyMonitorConfig, OperationMetrics, Severity};
pub use worker_pool::{PoolStats, WorkerPool, WorkerPoolConfig};

//! Prometheus-based monitoring for the execution core.
//!
//! # Example
//!
//! ```ignore
//! use mev_core::metrics::{init_metrics, export_metrics, MetricsCollector};
//!
//! init_metrics().expect("failed to initialize metrics");
//!
//! let collector = MetricsCollector::new();
//! collector.record_job_submitted("simulation");
//!
//! let text = export_metrics();
//! ```

pub mod collectors;
pub mod prometheus;

pub use collectors::MetricsCollector;
pub use prometheus::{export_metrics, init_metrics, metrics_handler};

pub use prometheus::{
    ACTIVE_WORKERS, FORK_ACQUISITION_FAILURES_TOTAL, FORK_ACQUISITION_LATENCY,
    JOBS_FINISHED_TOTAL, JOBS_SUBMITTED_TOTAL, JOB_DURATION, JOB_WAIT_DURATION,
    LATENCY_ALERTS_TOTAL, OPPORTUNITIES_DETECTED_TOTAL, OPPORTUNITY_CONFIDENCE, QUEUE_DEPTH,
    REGISTRY,
};

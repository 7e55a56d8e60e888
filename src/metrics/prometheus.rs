//! Prometheus metrics registration and export.
//!
//! This module defines all Prometheus metrics used by the execution core and
//! provides functions for initializing, registering, and exporting them.

use prometheus::{
    Counter, CounterVec, Encoder, Gauge, GaugeVec, Histogram, HistogramVec, Opts, Registry,
    TextEncoder,
};
use std::sync::OnceLock;

/// Global Prometheus registry for all mev-core metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Total jobs submitted, labeled by pool name.
pub static JOBS_SUBMITTED_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Total jobs completed, labeled by pool name and outcome (`completed`,
/// `failed`, `timeout`, `panicked`).
pub static JOBS_FINISHED_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Job execution duration in seconds, labeled by pool name.
pub static JOB_DURATION: OnceLock<HistogramVec> = OnceLock::new();

/// Job queue wait time in seconds, labeled by pool name.
pub static JOB_WAIT_DURATION: OnceLock<HistogramVec> = OnceLock::new();

/// Pending jobs per pool.
pub static QUEUE_DEPTH: OnceLock<GaugeVec> = OnceLock::new();

/// In-flight jobs per pool.
pub static ACTIVE_WORKERS: OnceLock<GaugeVec> = OnceLock::new();

/// Fork acquisition latency in seconds.
pub static FORK_ACQUISITION_LATENCY: OnceLock<Histogram> = OnceLock::new();

/// Total fork acquisition failures.
pub static FORK_ACQUISITION_FAILURES_TOTAL: OnceLock<Counter> = OnceLock::new();

/// Total MEV opportunities detected, labeled by strategy.
pub static OPPORTUNITIES_DETECTED_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Distribution of detected-opportunity confidence scores.
pub static OPPORTUNITY_CONFIDENCE: OnceLock<Histogram> = OnceLock::new();

/// Total latency threshold breaches raised by the latency monitor, labeled
/// by operation and severity.
pub static LATENCY_ALERTS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Initializes all metrics and registers them with the global registry.
/// Idempotent: a second call after a successful first is a no-op.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric registration fails, typically due
/// to duplicate metric names or invalid metric configurations.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let registry = Registry::new();

    let jobs_submitted_total = CounterVec::new(
        Opts::new("mev_core_jobs_submitted_total", "Total jobs submitted"),
        &["pool"],
    )?;

    let jobs_finished_total = CounterVec::new(
        Opts::new("mev_core_jobs_finished_total", "Total jobs finished, by outcome"),
        &["pool", "outcome"],
    )?;

    let job_duration = HistogramVec::new(
        prometheus::HistogramOpts::new(
            "mev_core_job_duration_seconds",
            "Job execution duration in seconds",
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0]),
        &["pool"],
    )?;

    let job_wait_duration = HistogramVec::new(
        prometheus::HistogramOpts::new(
            "mev_core_job_wait_duration_seconds",
            "Job queue wait time in seconds",
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]),
        &["pool"],
    )?;

    let queue_depth = GaugeVec::new(
        Opts::new("mev_core_queue_depth", "Pending jobs per pool"),
        &["pool"],
    )?;

    let active_workers = GaugeVec::new(
        Opts::new("mev_core_active_workers", "In-flight jobs per pool"),
        &["pool"],
    )?;

    let fork_acquisition_latency = Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "mev_core_fork_acquisition_latency_seconds",
            "Fork acquisition latency in seconds",
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5]),
    )?;

    let fork_acquisition_failures_total = Counter::new(
        "mev_core_fork_acquisition_failures_total",
        "Total fork acquisition failures",
    )?;

    let opportunities_detected_total = CounterVec::new(
        Opts::new(
            "mev_core_opportunities_detected_total",
            "Total MEV opportunities detected",
        ),
        &["strategy"],
    )?;

    let opportunity_confidence = Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "mev_core_opportunity_confidence",
            "Distribution of detected-opportunity confidence scores",
        )
        .buckets(vec![0.5, 0.6, 0.7, 0.8, 0.9, 1.0]),
    )?;

    let latency_alerts_total = CounterVec::new(
        Opts::new(
            "mev_core_latency_alerts_total",
            "Total latency threshold breaches",
        ),
        &["operation", "severity"],
    )?;

    registry.register(Box::new(jobs_submitted_total.clone()))?;
    registry.register(Box::new(jobs_finished_total.clone()))?;
    registry.register(Box::new(job_duration.clone()))?;
    registry.register(Box::new(job_wait_duration.clone()))?;
    registry.register(Box::new(queue_depth.clone()))?;
    registry.register(Box::new(active_workers.clone()))?;
    registry.register(Box::new(fork_acquisition_latency.clone()))?;
    registry.register(Box::new(fork_acquisition_failures_total.clone()))?;
    registry.register(Box::new(opportunities_detected_total.clone()))?;
    registry.register(Box::new(opportunity_confidence.clone()))?;
    registry.register(Box::new(latency_alerts_total.clone()))?;

    // If any `set` below fails, metrics were already initialized by a
    // concurrent caller — idempotent by design.
    let _ = REGISTRY.set(registry);
    let _ = JOBS_SUBMITTED_TOTAL.set(jobs_submitted_total);
    let _ = JOBS_FINISHED_TOTAL.set(jobs_finished_total);
    let _ = JOB_DURATION.set(job_duration);
    let _ = JOB_WAIT_DURATION.set(job_wait_duration);
    let _ = QUEUE_DEPTH.set(queue_depth);
    let _ = ACTIVE_WORKERS.set(active_workers);
    let _ = FORK_ACQUISITION_LATENCY.set(fork_acquisition_latency);
    let _ = FORK_ACQUISITION_FAILURES_TOTAL.set(fork_acquisition_failures_total);
    let _ = OPPORTUNITIES_DETECTED_TOTAL.set(opportunities_detected_total);
    let _ = OPPORTUNITY_CONFIDENCE.set(opportunity_confidence);
    let _ = LATENCY_ALERTS_TOTAL.set(latency_alerts_total);

    tracing::info!("prometheus metrics initialized");

    Ok(())
}

/// Exports all registered metrics in Prometheus text format.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}

/// HTTP-framework-agnostic handler for a `/metrics` endpoint.
pub async fn metrics_handler() -> String {
    export_metrics()
}

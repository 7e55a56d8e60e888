//! High-level recording interface over the raw Prometheus metrics.
//!
//! `MetricsCollector` wraps the statics defined in [`super::prometheus`] so
//! the rest of the crate records metrics by name and label rather than
//! touching `OnceLock`s directly. Every method is a no-op (besides a trace
//! log) if `init_metrics` hasn't run yet, so recording is safe to call from
//! code paths that may run before or without metrics enabled.

use super::prometheus::{
    ACTIVE_WORKERS, FORK_ACQUISITION_FAILURES_TOTAL, FORK_ACQUISITION_LATENCY,
    JOBS_FINISHED_TOTAL, JOBS_SUBMITTED_TOTAL, JOB_DURATION, JOB_WAIT_DURATION,
    LATENCY_ALERTS_TOTAL, OPPORTUNITIES_DETECTED_TOTAL, OPPORTUNITY_CONFIDENCE, QUEUE_DEPTH,
};

/// Convenience facade for recording mev-core metrics.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    /// Metrics must be initialized with `init_metrics()` before calling any
    /// recording method; otherwise these become no-ops.
    pub fn new() -> Self {
        Self
    }

    /// Records a job submission to `pool`.
    pub fn record_job_submitted(&self, pool: &str) {
        if let Some(m) = JOBS_SUBMITTED_TOTAL.get() {
            m.with_label_values(&[pool]).inc();
        }
    }

    /// Records a job's outcome (`completed`, `failed`, `timeout`,
    /// `panicked`) along with its wait and execution durations.
    pub fn record_job_finished(
        &self,
        pool: &str,
        outcome: &str,
        wait_secs: f64,
        exec_secs: f64,
    ) {
        if let Some(m) = JOBS_FINISHED_TOTAL.get() {
            m.with_label_values(&[pool, outcome]).inc();
        }
        if let Some(m) = JOB_WAIT_DURATION.get() {
            m.with_label_values(&[pool]).observe(wait_secs);
        }
        if let Some(m) = JOB_DURATION.get() {
            m.with_label_values(&[pool]).observe(exec_secs);
        }

        tracing::trace!(pool, outcome, wait_secs, exec_secs, "recorded job metric");
    }

    /// Updates the pending-queue depth gauge for `pool`.
    pub fn update_queue_depth(&self, pool: &str, depth: usize) {
        if let Some(m) = QUEUE_DEPTH.get() {
            m.with_label_values(&[pool]).set(depth as f64);
        }
    }

    /// Updates the in-flight (active worker) gauge for `pool`.
    pub fn update_active_workers(&self, pool: &str, count: usize) {
        if let Some(m) = ACTIVE_WORKERS.get() {
            m.with_label_values(&[pool]).set(count as f64);
        }
    }

    /// Records a successful fork acquisition's latency.
    pub fn record_fork_acquisition(&self, latency_secs: f64) {
        if let Some(m) = FORK_ACQUISITION_LATENCY.get() {
            m.observe(latency_secs);
        }
    }

    /// Increments the fork acquisition failure counter.
    pub fn record_fork_acquisition_failure(&self) {
        if let Some(m) = FORK_ACQUISITION_FAILURES_TOTAL.get() {
            m.inc();
        }
    }

    /// Records a detected opportunity for `strategy`, with its confidence.
    pub fn record_opportunity_detected(&self, strategy: &str, confidence: f64) {
        if let Some(m) = OPPORTUNITIES_DETECTED_TOTAL.get() {
            m.with_label_values(&[strategy]).inc();
        }
        if let Some(m) = OPPORTUNITY_CONFIDENCE.get() {
            m.observe(confidence);
        }
    }

    /// Records a latency-threshold alert for `operation` at `severity`.
    pub fn record_latency_alert(&self, operation: &str, severity: &str) {
        if let Some(m) = LATENCY_ALERTS_TOTAL.get() {
            m.with_label_values(&[operation, severity]).inc();
        }
    }
}

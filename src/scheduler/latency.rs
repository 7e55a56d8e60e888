//! Latency monitoring and threshold alerting.
//!
//! [`LatencyMonitor`] tracks a rolling window of samples per named operation
//! and raises [`Alert`]s when the observed mean crosses configured
//! thresholds. Modeled on the teacher's `SharedPoolStats` atomics-plus-lock
//! pattern, but keyed per-operation rather than pool-wide.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::MonitorError;
use crate::metrics::MetricsCollector;

/// Maximum number of alerts retained in the monitor's internal ring,
/// independent of `retention`'s time-based eviction.
const ALERT_RING_CAPACITY: usize = 1000;

/// A single recorded latency observation.
#[derive(Debug, Clone, Copy)]
pub struct LatencySample {
    pub duration: Duration,
    pub recorded_at: DateTime<Utc>,
}

/// Severity of a threshold breach, scaled by how far the observed value
/// exceeds the configured threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    /// `ratio` is `observed / threshold`.
    fn from_ratio(ratio: f64) -> Self {
        if ratio >= 3.0 {
            Severity::Critical
        } else if ratio >= 2.0 {
            Severity::Error
        } else if ratio >= 1.5 {
            Severity::Warning
        } else {
            Severity::Info
        }
    }

    /// Lower-case label used for the Prometheus `severity` dimension.
    fn as_label(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        }
    }
}

/// Raised by [`LatencyMonitor::check_thresholds`] when an operation's mean
/// latency crosses its configured threshold.
#[derive(Debug, Clone)]
pub struct Alert {
    pub operation: String,
    pub metric: &'static str,
    pub threshold: Duration,
    pub observed: Duration,
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
}

/// Metrics derived from a sample window — either one operation's, via
/// [`LatencyMonitor::get_operation_metrics`], or the aggregate across every
/// tracked operation, via [`LatencyMonitor::get_metrics`].
#[derive(Debug, Clone, Copy, Default)]
pub struct OperationMetrics {
    pub count: usize,
    pub average: Duration,
    pub median: Duration,
    pub p95: Duration,
    pub p99: Duration,
    pub min: Duration,
    pub max: Duration,
    pub window_size: usize,
    pub last_updated: Option<DateTime<Utc>>,
}

/// Configuration for a [`LatencyMonitor`].
#[derive(Debug, Clone)]
pub struct LatencyMonitorConfig {
    /// Maximum number of samples retained per operation.
    pub window_size: usize,
    /// Samples older than this are dropped by `cleanup_expired_data`.
    pub retention: Duration,
    /// Default per-operation thresholds, checked by `check_thresholds`.
    pub thresholds: std::collections::HashMap<String, Duration>,
    /// How often the background cleanup task runs.
    pub cleanup_interval: Duration,
}

impl Default for LatencyMonitorConfig {
    fn default() -> Self {
        let mut thresholds = std::collections::HashMap::new();
        thresholds.insert("process_transaction".to_string(), Duration::from_millis(100));
        thresholds.insert("simulate_transaction".to_string(), Duration::from_millis(50));
        thresholds.insert("detect_opportunities".to_string(), Duration::from_millis(25));

        Self {
            window_size: 1000,
            retention: Duration::from_secs(3600),
            thresholds,
            cleanup_interval: Duration::from_secs(300),
        }
    }
}

impl LatencyMonitorConfig {
    pub fn validate(&self) -> Result<(), MonitorError> {
        if self.window_size == 0 {
            return Err(MonitorError::InvalidConfig(
                "window_size must be greater than zero".to_string(),
            ));
        }
        if self.thresholds.is_empty() {
            return Err(MonitorError::InvalidConfig(
                "at least one threshold must be configured".to_string(),
            ));
        }
        Ok(())
    }
}

struct OperationTracker {
    samples: VecDeque<LatencySample>,
}

impl OperationTracker {
    fn new() -> Self {
        Self {
            samples: VecDeque::new(),
        }
    }

    fn push(&mut self, sample: LatencySample, window_size: usize) {
        self.samples.push_back(sample);
        while self.samples.len() > window_size {
            self.samples.pop_front();
        }
    }

    fn retain_since(&mut self, cutoff: DateTime<Utc>) {
        self.samples.retain(|s| s.recorded_at >= cutoff);
    }

    fn average(&self) -> Duration {
        if self.samples.is_empty() {
            return Duration::ZERO;
        }
        let total: Duration = self.samples.iter().map(|s| s.duration).sum();
        total / self.samples.len() as u32
    }

    fn percentile(&self, p: f64) -> Duration {
        if self.samples.is_empty() {
            return Duration::ZERO;
        }
        let mut sorted: Vec<Duration> = self.samples.iter().map(|s| s.duration).collect();
        sorted.sort();
        let idx = ((sorted.len() as f64 - 1.0) * p).round() as usize;
        sorted[idx.min(sorted.len() - 1)]
    }

    fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.samples.back().map(|s| s.recorded_at)
    }

    fn metrics(&self) -> OperationMetrics {
        let mut sorted: Vec<Duration> = self.samples.iter().map(|s| s.duration).collect();
        sorted.sort();
        OperationMetrics {
            count: self.samples.len(),
            average: self.average(),
            median: self.percentile(0.5),
            p95: self.percentile(0.95),
            p99: self.percentile(0.99),
            min: sorted.first().copied().unwrap_or(Duration::ZERO),
            max: sorted.last().copied().unwrap_or(Duration::ZERO),
            window_size: self.samples.len(),
            last_updated: self.last_updated(),
        }
    }
}

/// Combines every tracked operation's samples into one aggregate view, used
/// by [`LatencyMonitor::get_metrics`] to report a system-wide figure
/// distinct from any single operation's own [`OperationMetrics`].
fn aggregate_metrics<'a>(trackers: impl Iterator<Item = &'a OperationTracker>) -> OperationMetrics {
    let mut all: Vec<LatencySample> = Vec::new();
    for tracker in trackers {
        all.extend(tracker.samples.iter().copied());
    }

    if all.is_empty() {
        return OperationMetrics::default();
    }

    let mut sorted: Vec<Duration> = all.iter().map(|s| s.duration).collect();
    sorted.sort();
    let percentile = |p: f64| -> Duration {
        let idx = ((sorted.len() as f64 - 1.0) * p).round() as usize;
        sorted[idx.min(sorted.len() - 1)]
    };
    let total: Duration = sorted.iter().copied().sum();
    let last_updated = all.iter().map(|s| s.recorded_at).max();

    OperationMetrics {
        count: all.len(),
        average: total / all.len() as u32,
        median: percentile(0.5),
        p95: percentile(0.95),
        p99: percentile(0.99),
        min: *sorted.first().expect("non-empty"),
        max: *sorted.last().expect("non-empty"),
        window_size: all.len(),
        last_updated,
    }
}

struct Inner {
    config: LatencyMonitorConfig,
    trackers: RwLock<std::collections::HashMap<String, OperationTracker>>,
    alerts: RwLock<VecDeque<Alert>>,
    metrics: MetricsCollector,
}

/// Tracks per-operation latency samples and raises threshold alerts.
///
/// Cheap to clone: internally `Arc`-backed, so the background cleanup task
/// and callers share the same state without back-references.
#[derive(Clone)]
pub struct LatencyMonitor {
    inner: Arc<Inner>,
}

impl LatencyMonitor {
    pub fn new(config: LatencyMonitorConfig) -> Result<Self, MonitorError> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                trackers: RwLock::new(std::collections::HashMap::new()),
                alerts: RwLock::new(VecDeque::new()),
                metrics: MetricsCollector::new(),
            }),
        })
    }

    /// Records a latency sample for `operation`.
    pub async fn record_latency(&self, operation: &str, duration: Duration) {
        let mut trackers = self.inner.trackers.write().await;
        let tracker = trackers
            .entry(operation.to_string())
            .or_insert_with(OperationTracker::new);
        tracker.push(
            LatencySample {
                duration,
                recorded_at: Utc::now(),
            },
            self.inner.config.window_size,
        );
    }

    pub async fn get_average_latency(&self, operation: &str) -> Duration {
        self.inner
            .trackers
            .read()
            .await
            .get(operation)
            .map(|t| t.average())
            .unwrap_or(Duration::ZERO)
    }

    pub async fn get_p95_latency(&self, operation: &str) -> Duration {
        self.inner
            .trackers
            .read()
            .await
            .get(operation)
            .map(|t| t.percentile(0.95))
            .unwrap_or(Duration::ZERO)
    }

    pub async fn get_p99_latency(&self, operation: &str) -> Duration {
        self.inner
            .trackers
            .read()
            .await
            .get(operation)
            .map(|t| t.percentile(0.99))
            .unwrap_or(Duration::ZERO)
    }

    /// Returns one aggregate [`OperationMetrics`] combining every tracked
    /// operation's samples. Use [`LatencyMonitor::get_operation_metrics`] for
    /// a single operation's own figures.
    pub async fn get_metrics(&self) -> OperationMetrics {
        let trackers = self.inner.trackers.read().await;
        aggregate_metrics(trackers.values())
    }

    pub async fn get_operation_metrics(&self, operation: &str) -> Option<OperationMetrics> {
        self.inner
            .trackers
            .read()
            .await
            .get(operation)
            .map(|t| t.metrics())
    }

    /// Compares each tracked operation's current average (and, when it
    /// breaches, its p95) against its configured threshold and returns the
    /// resulting alerts. Every alert raised is also appended to the
    /// monitor's internal ring, evicting the oldest entry once
    /// [`ALERT_RING_CAPACITY`] is exceeded.
    pub async fn check_thresholds(&self) -> Vec<Alert> {
        let trackers = self.inner.trackers.read().await;
        let mut alerts = Vec::new();

        for (operation, tracker) in trackers.iter() {
            let Some(threshold) = self.inner.config.thresholds.get(operation) else {
                continue;
            };
            if threshold.is_zero() {
                continue;
            }

            let average = tracker.average();
            if average > *threshold {
                let ratio = average.as_secs_f64() / threshold.as_secs_f64();
                alerts.push(Alert {
                    operation: operation.clone(),
                    metric: "average_latency",
                    threshold: *threshold,
                    observed: average,
                    timestamp: Utc::now(),
                    severity: Severity::from_ratio(ratio),
                });
            }

            let p95 = tracker.percentile(0.95);
            let p95_threshold = threshold.mul_f64(1.5);
            if p95 > p95_threshold {
                let ratio = p95.as_secs_f64() / threshold.as_secs_f64();
                alerts.push(Alert {
                    operation: operation.clone(),
                    metric: "p95_latency",
                    threshold: p95_threshold,
                    observed: p95,
                    timestamp: Utc::now(),
                    severity: Severity::from_ratio(ratio),
                });
            }
        }
        drop(trackers);

        for alert in &alerts {
            warn!(
                operation = %alert.operation,
                metric = alert.metric,
                threshold_ms = alert.threshold.as_millis(),
                observed_ms = alert.observed.as_millis(),
                severity = ?alert.severity,
                "latency threshold breached"
            );
            self.inner
                .metrics
                .record_latency_alert(&alert.operation, alert.severity.as_label());
        }

        if !alerts.is_empty() {
            let mut ring = self.inner.alerts.write().await;
            for alert in &alerts {
                ring.push_back(alert.clone());
            }
            while ring.len() > ALERT_RING_CAPACITY {
                ring.pop_front();
            }
        }

        alerts
    }

    /// Returns the most recent alerts still held in the internal ring,
    /// newest last.
    pub async fn recent_alerts(&self) -> Vec<Alert> {
        self.inner.alerts.read().await.iter().cloned().collect()
    }

    /// Drops samples (and ring alerts) older than the configured retention
    /// window.
    pub async fn cleanup_expired_data(&self) {
        let cutoff = Utc::now() - chrono::Duration::from_std(self.inner.config.retention)
            .unwrap_or(chrono::Duration::zero());

        let mut trackers = self.inner.trackers.write().await;
        for tracker in trackers.values_mut() {
            tracker.retain_since(cutoff);
        }
        trackers.retain(|_, t| !t.samples.is_empty());
        drop(trackers);

        let mut alerts = self.inner.alerts.write().await;
        alerts.retain(|a| a.timestamp >= cutoff);
    }

    /// Spawns a background task that calls `cleanup_expired_data` on the
    /// configured interval until `shutdown` fires.
    pub fn spawn_cleanup_task(&self, shutdown: tokio_util::sync::CancellationToken) -> JoinHandle<()> {
        let monitor = self.clone();
        let interval = self.inner.config.cleanup_interval;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {
                        debug!("running latency monitor cleanup");
                        monitor.cleanup_expired_data().await;
                    }
                }
            }
        })
    }
}

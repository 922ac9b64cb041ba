//! Metrics collection for admission observability.
//!
//! Metrics go through the pluggable [`MetricsBackend`] trait. [`LocalMetrics`]
//! keeps everything in memory; plug in a Prometheus or OpenTelemetry backend
//! for production exports. Names are labelled by category, never by key, so
//! cardinality stays bounded no matter how many callers there are.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A pluggable metrics backend
#[async_trait]
pub trait MetricsBackend: Send + Sync {
    async fn increment_counter(&self, name: &str, value: u64);

    async fn set_gauge(&self, name: &str, value: f64);

    /// Record a histogram observation (latencies are in milliseconds)
    async fn record_histogram(&self, name: &str, value: f64);

    async fn get_counter(&self, name: &str) -> Option<u64>;

    async fn get_gauge(&self, name: &str) -> Option<f64>;

    async fn get_histogram_stats(&self, name: &str) -> Option<HistogramStats>;

    async fn reset(&self);

    async fn snapshot(&self) -> MetricsSnapshot;
}

/// Summary of a histogram
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HistogramStats {
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub p50: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
}

impl HistogramStats {
    fn from_samples(samples: &[f64]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        let mut sorted = samples.to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let count = sorted.len();
        let sum: f64 = sorted.iter().sum();
        let at = |p: f64| sorted[((count as f64 * p) as usize).min(count - 1)];

        Self {
            count: count as u64,
            sum,
            min: sorted[0],
            max: sorted[count - 1],
            mean: sum / count as f64,
            p50: at(0.50),
            p90: at(0.90),
            p95: at(0.95),
            p99: at(0.99),
        }
    }
}

/// Snapshot of all metrics at a point in time
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    pub counters: HashMap<String, u64>,
    pub gauges: HashMap<String, f64>,
    pub histograms: HashMap<String, HistogramStats>,
}

/// In-memory metrics backend.
///
/// Histograms keep raw samples; fine for tests and single-node dashboards.
#[derive(Default)]
pub struct LocalMetrics {
    counters: RwLock<HashMap<String, u64>>,
    gauges: RwLock<HashMap<String, f64>>,
    histograms: RwLock<HashMap<String, Vec<f64>>>,
}

impl LocalMetrics {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetricsBackend for LocalMetrics {
    async fn increment_counter(&self, name: &str, value: u64) {
        let mut counters = self.counters.write().await;
        *counters.entry(name.to_string()).or_insert(0) += value;
    }

    async fn set_gauge(&self, name: &str, value: f64) {
        self.gauges.write().await.insert(name.to_string(), value);
    }

    async fn record_histogram(&self, name: &str, value: f64) {
        self.histograms
            .write()
            .await
            .entry(name.to_string())
            .or_default()
            .push(value);
    }

    async fn get_counter(&self, name: &str) -> Option<u64> {
        self.counters.read().await.get(name).copied()
    }

    async fn get_gauge(&self, name: &str) -> Option<f64> {
        self.gauges.read().await.get(name).copied()
    }

    async fn get_histogram_stats(&self, name: &str) -> Option<HistogramStats> {
        self.histograms
            .read()
            .await
            .get(name)
            .map(|samples| HistogramStats::from_samples(samples))
    }

    async fn reset(&self) {
        self.counters.write().await.clear();
        self.gauges.write().await.clear();
        self.histograms.write().await.clear();
    }

    async fn snapshot(&self) -> MetricsSnapshot {
        let counters = self.counters.read().await.clone();
        let gauges = self.gauges.read().await.clone();
        let histograms = self
            .histograms
            .read()
            .await
            .iter()
            .map(|(name, samples)| (name.clone(), HistogramStats::from_samples(samples)))
            .collect();

        MetricsSnapshot {
            counters,
            gauges,
            histograms,
        }
    }
}

/// Metric names
pub mod metric_names {
    /// Counter: operations submitted
    pub const OPERATIONS_SUBMITTED: &str = "admission.operations.submitted";
    /// Counter: operations that waited in a queue
    pub const OPERATIONS_QUEUED: &str = "admission.operations.queued";
    /// Counter: operations completed successfully
    pub const OPERATIONS_COMPLETED: &str = "admission.operations.completed";
    /// Counter: operations that returned an error or panicked
    pub const OPERATIONS_FAILED: &str = "admission.operations.failed";
    /// Counter: operations that hit the execution timeout
    pub const OPERATIONS_EXECUTION_TIMEOUT: &str = "admission.operations.execution_timeout";
    /// Counter: queued operations that hit the queue timeout
    pub const OPERATIONS_QUEUE_TIMEOUT: &str = "admission.operations.queue_timeout";
    /// Counter: submissions rejected for backpressure
    pub const OPERATIONS_REJECTED: &str = "admission.operations.rejected";
    /// Counter: queued operations cancelled
    pub const OPERATIONS_CANCELLED: &str = "admission.operations.cancelled";
    /// Counter: per-key states evicted by the janitor
    pub const KEYS_EVICTED: &str = "admission.keys.evicted";

    /// Gauge: keys currently holding state
    pub const KEYS_TRACKED: &str = "admission.keys.tracked";

    /// Histogram: execution latency (ms)
    pub const OPERATION_LATENCY: &str = "admission.operation.latency_ms";
    /// Histogram: time spent queued before start (ms)
    pub const OPERATION_WAIT_TIME: &str = "admission.operation.wait_time_ms";
}

/// Admission metrics recorder wrapping a [`MetricsBackend`].
///
/// Each counter is recorded twice: once in total and once suffixed with the
/// operation category.
#[derive(Clone)]
pub struct AdmissionMetrics {
    backend: Arc<dyn MetricsBackend>,
}

impl AdmissionMetrics {
    pub fn new(backend: Arc<dyn MetricsBackend>) -> Self {
        Self { backend }
    }

    /// Recorder backed by [`LocalMetrics`]
    pub fn local() -> Self {
        Self::new(Arc::new(LocalMetrics::new()))
    }

    pub fn backend(&self) -> &Arc<dyn MetricsBackend> {
        &self.backend
    }

    async fn count(&self, name: &str, category: &str) {
        self.backend.increment_counter(name, 1).await;
        self.backend
            .increment_counter(&format!("{}.{}", name, category), 1)
            .await;
    }

    async fn observe(&self, name: &str, category: &str, value: f64) {
        self.backend.record_histogram(name, value).await;
        self.backend
            .record_histogram(&format!("{}.{}", name, category), value)
            .await;
    }

    pub async fn record_submit(&self, category: &str) {
        self.count(metric_names::OPERATIONS_SUBMITTED, category).await;
    }

    pub async fn record_queued(&self, category: &str) {
        self.count(metric_names::OPERATIONS_QUEUED, category).await;
    }

    pub async fn record_complete(&self, category: &str, latency_ms: f64) {
        self.count(metric_names::OPERATIONS_COMPLETED, category).await;
        self.observe(metric_names::OPERATION_LATENCY, category, latency_ms)
            .await;
    }

    pub async fn record_failure(&self, category: &str) {
        self.count(metric_names::OPERATIONS_FAILED, category).await;
    }

    pub async fn record_execution_timeout(&self, category: &str) {
        self.count(metric_names::OPERATIONS_EXECUTION_TIMEOUT, category)
            .await;
    }

    pub async fn record_queue_timeout(&self, category: &str) {
        self.count(metric_names::OPERATIONS_QUEUE_TIMEOUT, category)
            .await;
    }

    pub async fn record_rejected(&self, category: &str) {
        self.count(metric_names::OPERATIONS_REJECTED, category).await;
    }

    pub async fn record_cancelled(&self, category: &str, count: u64) {
        self.backend
            .increment_counter(metric_names::OPERATIONS_CANCELLED, count)
            .await;
        self.backend
            .increment_counter(
                &format!("{}.{}", metric_names::OPERATIONS_CANCELLED, category),
                count,
            )
            .await;
    }

    pub async fn record_wait_time(&self, category: &str, wait_ms: f64) {
        self.observe(metric_names::OPERATION_WAIT_TIME, category, wait_ms)
            .await;
    }

    pub async fn record_evictions(&self, evicted: usize, tracked: usize) {
        if evicted > 0 {
            self.backend
                .increment_counter(metric_names::KEYS_EVICTED, evicted as u64)
                .await;
        }
        self.backend
            .set_gauge(metric_names::KEYS_TRACKED, tracked as f64)
            .await;
    }

    pub async fn snapshot(&self) -> MetricsSnapshot {
        self.backend.snapshot().await
    }

    pub async fn reset(&self) {
        self.backend.reset().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_histogram_stats_empty() {
        let stats = HistogramStats::from_samples(&[]);
        assert_eq!(stats.count, 0);
        assert_eq!(stats.mean, 0.0);
    }

    #[test]
    fn test_histogram_stats_percentiles() {
        let samples: Vec<f64> = (1..=100).map(|v| v as f64).collect();
        let stats = HistogramStats::from_samples(&samples);

        assert_eq!(stats.count, 100);
        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.max, 100.0);
        assert_eq!(stats.mean, 50.5);
        assert_eq!(stats.p50, 51.0);
        assert_eq!(stats.p90, 91.0);
        assert_eq!(stats.p99, 100.0);
    }

    #[tokio::test]
    async fn test_local_metrics_counters_and_gauges() {
        let metrics = LocalMetrics::new();
        metrics.increment_counter("c", 2).await;
        metrics.increment_counter("c", 3).await;
        metrics.set_gauge("g", 1.5).await;

        assert_eq!(metrics.get_counter("c").await, Some(5));
        assert_eq!(metrics.get_gauge("g").await, Some(1.5));
        assert_eq!(metrics.get_counter("missing").await, None);
    }

    #[tokio::test]
    async fn test_local_metrics_reset() {
        let metrics = LocalMetrics::new();
        metrics.increment_counter("c", 1).await;
        metrics.record_histogram("h", 10.0).await;
        metrics.reset().await;

        let snapshot = metrics.snapshot().await;
        assert!(snapshot.counters.is_empty());
        assert!(snapshot.histograms.is_empty());
    }

    #[tokio::test]
    async fn test_admission_metrics_labels_by_category() {
        let metrics = AdmissionMetrics::local();
        metrics.record_submit("fetch").await;
        metrics.record_submit("fetch").await;
        metrics.record_submit("refresh").await;
        metrics.record_rejected("refresh").await;

        let backend = metrics.backend();
        assert_eq!(
            backend.get_counter(metric_names::OPERATIONS_SUBMITTED).await,
            Some(3)
        );
        assert_eq!(
            backend
                .get_counter("admission.operations.submitted.fetch")
                .await,
            Some(2)
        );
        assert_eq!(
            backend
                .get_counter("admission.operations.rejected.refresh")
                .await,
            Some(1)
        );
    }

    #[tokio::test]
    async fn test_admission_metrics_latency_histogram() {
        let metrics = AdmissionMetrics::local();
        metrics.record_complete("fetch", 10.0).await;
        metrics.record_complete("fetch", 30.0).await;

        let stats = metrics
            .backend()
            .get_histogram_stats(metric_names::OPERATION_LATENCY)
            .await
            .unwrap();
        assert_eq!(stats.count, 2);
        assert_eq!(stats.mean, 20.0);
    }

    #[tokio::test]
    async fn test_admission_metrics_evictions() {
        let metrics = AdmissionMetrics::local();
        metrics.record_evictions(0, 4).await;
        metrics.record_evictions(3, 1).await;

        let backend = metrics.backend();
        assert_eq!(backend.get_counter(metric_names::KEYS_EVICTED).await, Some(3));
        assert_eq!(backend.get_gauge(metric_names::KEYS_TRACKED).await, Some(1.0));
    }

    #[tokio::test]
    async fn test_admission_metrics_cancelled_count() {
        let metrics = AdmissionMetrics::local();
        metrics.record_cancelled("fetch", 2).await;
        assert_eq!(
            metrics
                .backend()
                .get_counter(metric_names::OPERATIONS_CANCELLED)
                .await,
            Some(2)
        );
    }
}

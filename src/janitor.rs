//! Idle-key eviction
//!
//! A key's state only exists while it is useful. The janitor periodically
//! drops keys that have nothing running, nothing queued, and no submission
//! within the retention window, so memory tracks the working set of keys
//! rather than every key ever seen.

use crate::config::{deadline_after, AdmissionConfig, FAR_FUTURE};
use crate::event::{events, AdmissionEvent, EventEmitter};
#[cfg(feature = "metrics")]
use crate::metrics::AdmissionMetrics;
use crate::state::KeyStateStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn, Instrument};

/// Evicts idle keys from a [`KeyStateStore`]
#[derive(Clone)]
pub struct Janitor {
    store: Arc<KeyStateStore>,
    interval: Duration,
    retention: Duration,
    event_emitter: EventEmitter,
    #[cfg(feature = "metrics")]
    metrics: Option<AdmissionMetrics>,
}

impl Janitor {
    pub fn new(
        store: Arc<KeyStateStore>,
        config: &AdmissionConfig,
        event_emitter: EventEmitter,
    ) -> Self {
        Self {
            store,
            interval: config.janitor_interval,
            retention: config.retention,
            event_emitter,
            #[cfg(feature = "metrics")]
            metrics: None,
        }
    }

    #[cfg(feature = "metrics")]
    pub fn with_metrics(mut self, metrics: AdmissionMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Evict every idle key past retention. Returns the number evicted.
    ///
    /// Keys that are locked at the moment of the sweep are in use and are
    /// left for the next one.
    pub async fn sweep(&self) -> usize {
        let evicted = self.store.evict_idle(Instant::now(), self.retention);
        let remaining = self.store.len();

        for key in &evicted {
            self.event_emitter
                .emit(AdmissionEvent::for_key(events::KEY_EVICTED, key));
        }

        if evicted.is_empty() {
            debug!(remaining, "a3s.bulkhead.janitor: nothing to evict");
        } else {
            info!(
                evicted = evicted.len(),
                remaining, "a3s.bulkhead.janitor: evicted idle keys"
            );
        }

        #[cfg(feature = "metrics")]
        if let Some(metrics) = &self.metrics {
            metrics.record_evictions(evicted.len(), remaining).await;
        }

        evicted.len()
    }

    /// Sweep every `janitor_interval` until the returned handle is stopped
    /// or dropped. The first sweep runs one interval after start.
    pub fn start(self) -> JanitorHandle {
        // Interval advances its deadline by `period` on every tick
        let period = self.interval.min(FAR_FUTURE);

        let handle = tokio::spawn(async move {
            let start = deadline_after(Instant::now(), period);
            let mut ticker = tokio::time::interval_at(start, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let janitor = self.clone();
                let span = tracing::debug_span!("a3s.bulkhead.sweep");
                // A failed sweep must not stop future sweeps
                let sweep = tokio::spawn(async move { janitor.sweep().await }.instrument(span));
                if let Err(err) = sweep.await {
                    warn!(error = %err, "a3s.bulkhead.janitor: sweep failed");
                }
            }
        });

        JanitorHandle { handle }
    }
}

/// Running janitor; aborts the background loop when dropped
pub struct JanitorHandle {
    handle: JoinHandle<()>,
}

impl JanitorHandle {
    pub fn stop(&self) {
        self.handle.abort();
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for JanitorHandle {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn janitor(store: &Arc<KeyStateStore>, retention: Duration) -> Janitor {
        let config = AdmissionConfig::default()
            .with_retention(retention)
            .with_janitor_interval(Duration::from_secs(1));
        Janitor::new(Arc::clone(store), &config, EventEmitter::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_evicts_only_expired_keys() {
        let store = Arc::new(KeyStateStore::new());
        store.get_or_create("old");
        tokio::time::advance(Duration::from_secs(20)).await;
        store.get_or_create("fresh");
        tokio::time::advance(Duration::from_secs(15)).await;

        let janitor = janitor(&store, Duration::from_secs(30));
        assert_eq!(janitor.sweep().await, 1);
        assert!(!store.contains_key("old"));
        assert!(store.contains_key("fresh"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_emits_eviction_events() {
        let store = Arc::new(KeyStateStore::new());
        store.get_or_create("a");
        let janitor = janitor(&store, Duration::from_secs(1));
        let mut stream = janitor.event_emitter.subscribe_stream();

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(janitor.sweep().await, 1);

        let event = stream.recv().await.unwrap();
        assert_eq!(event.key, events::KEY_EVICTED);
        assert_eq!(event.field("key"), Some(&serde_json::json!("a")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_skips_locked_key() {
        let store = Arc::new(KeyStateStore::new());
        let slot = store.get_or_create("held");
        tokio::time::advance(Duration::from_secs(10)).await;

        let janitor = janitor(&store, Duration::from_secs(1));
        let guard = slot.lock().await;
        assert_eq!(janitor.sweep().await, 0);
        drop(guard);
        assert_eq!(janitor.sweep().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_started_janitor_sweeps_periodically() {
        let store = Arc::new(KeyStateStore::new());
        store.get_or_create("k");
        let handle = janitor(&store, Duration::from_secs(3)).start();
        assert!(handle.is_running());

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert!(store.contains_key("k"));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!store.contains_key("k"));

        handle.stop();
        for _ in 0..10 {
            if !handle.is_running() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(!handle.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_interval_keeps_janitor_alive() {
        let store = Arc::new(KeyStateStore::new());
        store.get_or_create("k");
        let config = AdmissionConfig::default()
            .with_retention(Duration::from_secs(1))
            .with_janitor_interval(Duration::MAX);
        let janitor = Janitor::new(Arc::clone(&store), &config, EventEmitter::default());
        let handle = janitor.clone().start();

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert!(handle.is_running());
        assert!(store.contains_key("k"));

        assert_eq!(janitor.sweep().await, 1);
        handle.stop();
    }

    #[cfg(feature = "metrics")]
    #[tokio::test(start_paused = true)]
    async fn test_panicking_sweep_does_not_stop_janitor() {
        use crate::metrics::{
            metric_names, HistogramStats, LocalMetrics, MetricsBackend, MetricsSnapshot,
        };
        use std::sync::atomic::{AtomicBool, Ordering};

        /// Panics on the first gauge update, then behaves like `LocalMetrics`
        struct FailOnceBackend {
            failed: AtomicBool,
            local: LocalMetrics,
        }

        #[async_trait::async_trait]
        impl MetricsBackend for FailOnceBackend {
            async fn increment_counter(&self, name: &str, value: u64) {
                self.local.increment_counter(name, value).await
            }
            async fn set_gauge(&self, name: &str, value: f64) {
                if !self.failed.swap(true, Ordering::SeqCst) {
                    panic!("gauge backend unavailable");
                }
                self.local.set_gauge(name, value).await
            }
            async fn record_histogram(&self, name: &str, value: f64) {
                self.local.record_histogram(name, value).await
            }
            async fn get_counter(&self, name: &str) -> Option<u64> {
                self.local.get_counter(name).await
            }
            async fn get_gauge(&self, name: &str) -> Option<f64> {
                self.local.get_gauge(name).await
            }
            async fn get_histogram_stats(&self, name: &str) -> Option<HistogramStats> {
                self.local.get_histogram_stats(name).await
            }
            async fn reset(&self) {
                self.local.reset().await
            }
            async fn snapshot(&self) -> MetricsSnapshot {
                self.local.snapshot().await
            }
        }

        let store = Arc::new(KeyStateStore::new());
        store.get_or_create("a");
        let backend = Arc::new(FailOnceBackend {
            failed: AtomicBool::new(false),
            local: LocalMetrics::new(),
        });
        let metrics = AdmissionMetrics::new(backend.clone());
        let handle = janitor(&store, Duration::from_secs(1))
            .with_metrics(metrics)
            .start();

        // First tick evicts "a", then the gauge update panics
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!store.contains_key("a"));
        assert!(backend.failed.load(Ordering::SeqCst));
        assert!(handle.is_running());

        store.get_or_create("b");
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!store.contains_key("b"));
        assert!(handle.is_running());
        assert_eq!(backend.get_counter(metric_names::KEYS_EVICTED).await, Some(2));
        assert_eq!(backend.get_gauge(metric_names::KEYS_TRACKED).await, Some(0.0));

        handle.stop();
    }

    #[cfg(feature = "metrics")]
    #[tokio::test(start_paused = true)]
    async fn test_sweep_records_metrics() {
        use crate::metrics::metric_names;

        let store = Arc::new(KeyStateStore::new());
        store.get_or_create("a");
        store.get_or_create("b");
        let metrics = AdmissionMetrics::local();
        let janitor = janitor(&store, Duration::from_secs(1)).with_metrics(metrics.clone());

        tokio::time::advance(Duration::from_secs(5)).await;
        store.get_or_create("c");
        assert_eq!(janitor.sweep().await, 2);

        let snapshot = metrics.snapshot().await;
        assert_eq!(snapshot.counters.get(metric_names::KEYS_EVICTED), Some(&2));
        assert_eq!(snapshot.gauges.get(metric_names::KEYS_TRACKED), Some(&1.0));
    }
}

//! Per-key admission controller
//!
//! Every submission names a key. At most `max_concurrent_per_key` operations
//! run per key; the next `max_queue_size` wait in a priority-ordered queue;
//! anything beyond that is rejected immediately. Keys never share slots,
//! queues or locks.

use crate::builder::AdmissionControllerBuilder;
use crate::config::{deadline_after, AdmissionConfig};
use crate::error::{AdmissionError, Result, SubmitError};
use crate::event::{events, AdmissionEvent, EventEmitter, EventStream};
use crate::janitor::{Janitor, JanitorHandle};
#[cfg(feature = "metrics")]
use crate::metrics::AdmissionMetrics;
use crate::operation::{Job, Outcome, PendingOperation};
use crate::request::{Category, OperationRequest, Priority};
use crate::state::{KeySlot, KeyState, KeyStateStore, KeyStats, QueuedEntry};
#[cfg(feature = "telemetry")]
use crate::telemetry;
use crate::SystemStats;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn, Instrument};

/// Bounds concurrent work per key
///
/// Cheap to clone; clones share the same per-key state.
#[derive(Clone)]
pub struct AdmissionController {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    config: AdmissionConfig,
    store: Arc<KeyStateStore>,
    event_emitter: EventEmitter,
    #[cfg(feature = "metrics")]
    metrics: Option<AdmissionMetrics>,
}

impl AdmissionController {
    /// Create a controller with the given configuration
    pub fn new(config: AdmissionConfig) -> Result<Self> {
        AdmissionControllerBuilder::new().with_config(config).build()
    }

    pub fn builder() -> AdmissionControllerBuilder {
        AdmissionControllerBuilder::new()
    }

    pub(crate) fn from_parts(
        config: AdmissionConfig,
        event_emitter: EventEmitter,
        #[cfg(feature = "metrics")] metrics: Option<AdmissionMetrics>,
    ) -> Self {
        Self {
            inner: Arc::new(ControllerInner {
                config,
                store: Arc::new(KeyStateStore::new()),
                event_emitter,
                #[cfg(feature = "metrics")]
                metrics,
            }),
        }
    }

    pub fn config(&self) -> &AdmissionConfig {
        &self.inner.config
    }

    pub fn event_emitter(&self) -> &EventEmitter {
        &self.inner.event_emitter
    }

    #[cfg(feature = "metrics")]
    pub fn metrics(&self) -> Option<&AdmissionMetrics> {
        self.inner.metrics.as_ref()
    }

    /// Number of keys currently holding state
    pub fn tracked_keys(&self) -> usize {
        self.inner.store.len()
    }

    /// Submit an operation at [`Priority::Medium`]
    pub async fn submit<F, Fut, T, E>(
        &self,
        key: &str,
        category: impl Into<Category>,
        operation: F,
    ) -> std::result::Result<T, SubmitError<E>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        self.submit_with_priority(key, category, Priority::Medium, operation)
            .await
    }

    /// Submit an operation for `key` and wait for its result.
    ///
    /// Runs immediately if the key has a free slot, otherwise waits in the
    /// key's queue. Fails fast with `BackpressureRejected` when the queue is
    /// full. The operation's own error is returned unchanged as
    /// [`SubmitError::Operation`].
    pub async fn submit_with_priority<F, Fut, T, E>(
        &self,
        key: &str,
        category: impl Into<Category>,
        priority: Priority,
        operation: F,
    ) -> std::result::Result<T, SubmitError<E>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        let request = OperationRequest::new(key, category, priority);
        let (result_tx, result_rx) = oneshot::channel();
        let job = Box::new(PendingOperation::new(operation, result_tx));

        self.inner.admit(request, job).await?;

        match result_rx.await {
            Ok(result) => result,
            // The envelope was dropped without resolving; only happens if the
            // runtime is shutting down underneath us.
            Err(_) => Err(AdmissionError::Cancelled {
                key: key.to_string(),
            }
            .into()),
        }
    }

    /// Statistics for one key, or `None` if it holds no state
    pub async fn stats_for(&self, key: &str) -> Option<KeyStats> {
        let slot = self.inner.store.get(key)?;
        let state = slot.lock().await;
        if state.is_evicted() {
            return None;
        }
        Some(state.snapshot(key))
    }

    /// Aggregate statistics across every tracked key.
    ///
    /// Keys are visited one at a time, so under load the totals are a
    /// close approximation rather than a single instant.
    pub async fn system_stats(&self) -> SystemStats {
        let mut stats = SystemStats::default();

        for (_, slot) in self.inner.store.slots() {
            let state = slot.lock().await;
            if state.is_evicted() {
                continue;
            }
            let active = state.active_count();
            stats.tracked_keys += 1;
            stats.total_active += active;
            stats.total_queued += state.queued_count();
            if active > 0 {
                stats.active_keys += 1;
            }
        }

        stats.average_active_per_key = if stats.active_keys == 0 {
            0.0
        } else {
            stats.total_active as f64 / stats.active_keys as f64
        };
        stats
    }

    /// True if `key` is saturated or its queue is at least half full.
    /// Unknown keys are never overloaded.
    ///
    /// With `max_queue_size == 0` only saturation counts: such a queue never
    /// holds entries, so the half-full check never fires.
    pub async fn is_overloaded(&self, key: &str) -> bool {
        let Some(slot) = self.inner.store.get(key) else {
            return false;
        };
        let state = slot.lock().await;
        if state.is_evicted() {
            return false;
        }
        !state.has_capacity(self.inner.config.max_concurrent_per_key)
            || self.inner.config.overload_queue_threshold(state.queued_count())
    }

    /// Reject every queued request for `key` with `Cancelled`.
    ///
    /// Running operations are not interrupted. If nothing is running the
    /// key's state is dropped as well. Returns the number of requests
    /// cancelled.
    pub async fn cancel_all(&self, key: &str) -> usize {
        let Some(slot) = self.inner.store.get(key) else {
            return 0;
        };

        let cancelled = {
            let mut state = slot.lock().await;
            if state.is_evicted() {
                return 0;
            }
            let drained = state.drain_queue();
            if state.is_idle() {
                state.mark_evicted();
                self.inner.store.remove_slot(key, &slot);
            }
            drained
        };

        let count = cancelled.len();
        for mut entry in cancelled {
            entry.cancel_expiry();
            self.inner.event_emitter.emit(AdmissionEvent::for_request(
                events::OPERATION_CANCELLED,
                &entry.request,
            ));
            #[cfg(feature = "metrics")]
            if let Some(metrics) = &self.inner.metrics {
                metrics.record_cancelled(&entry.request.category, 1).await;
            }
            entry.job.reject(AdmissionError::Cancelled {
                key: key.to_string(),
            });
        }

        if count > 0 {
            info!(key, cancelled = count, "a3s.bulkhead.cancel_all: cleared queued requests");
        }
        count
    }

    /// Zero the completed/errored counters and latency average for `key`.
    /// Returns false if the key holds no state.
    pub async fn reset_stats(&self, key: &str) -> bool {
        let Some(slot) = self.inner.store.get(key) else {
            return false;
        };
        let mut state = slot.lock().await;
        if state.is_evicted() {
            return false;
        }
        state.reset_counters();
        true
    }

    /// A janitor sharing this controller's store and configuration
    pub fn janitor(&self) -> Janitor {
        let janitor = Janitor::new(
            Arc::clone(&self.inner.store),
            &self.inner.config,
            self.inner.event_emitter.clone(),
        );
        #[cfg(feature = "metrics")]
        let janitor = match &self.inner.metrics {
            Some(metrics) => janitor.with_metrics(metrics.clone()),
            None => janitor,
        };
        janitor
    }

    /// Start periodic idle-key eviction; stops when the handle is dropped
    pub fn start_janitor(&self) -> JanitorHandle {
        info!(
            interval_ms = self.inner.config.janitor_interval.as_millis() as u64,
            retention_ms = self.inner.config.retention.as_millis() as u64,
            "a3s.bulkhead.janitor: starting"
        );
        self.janitor().start()
    }

    /// Run one eviction sweep now; returns the number of keys evicted
    pub async fn sweep_idle(&self) -> usize {
        self.janitor().sweep().await
    }

    pub fn subscribe_stream(&self) -> EventStream {
        self.inner.event_emitter.subscribe_stream()
    }

    pub fn subscribe_filtered(
        &self,
        filter: impl Fn(&AdmissionEvent) -> bool + Send + Sync + 'static,
    ) -> EventStream {
        self.inner.event_emitter.subscribe_filtered(filter)
    }
}

impl ControllerInner {
    /// Lock the live state for `key`, creating it if needed
    async fn lock_key(&self, key: &str) -> (KeySlot, OwnedMutexGuard<KeyState>) {
        loop {
            let slot = self.store.get_or_create(key);
            let state = Arc::clone(&slot).lock_owned().await;
            // Evicted between lookup and lock; the store already dropped it,
            // so the next lookup creates a fresh state.
            if !state.is_evicted() {
                return (slot, state);
            }
        }
    }

    /// Run now, queue, or reject
    async fn admit(self: &Arc<Self>, request: OperationRequest, job: Box<dyn Job>) -> Result<()> {
        let submitted = Instant::now();
        self.on_submitted(&request).await;

        let (slot, mut state) = self.lock_key(&request.key).await;
        state.touch(submitted);

        if state.has_capacity(self.config.max_concurrent_per_key) {
            state.activate(request.clone());
            let active = state.active_count();
            drop(state);

            debug!(
                key = %request.key,
                operation_id = %request.id,
                active,
                "a3s.bulkhead.admit: running immediately"
            );
            self.spawn_execution(slot, request, job, submitted);
            return Ok(());
        }

        let queued = state.queued_count();
        if queued >= self.config.max_queue_size {
            drop(state);
            drop(job);
            self.on_rejected(&request, queued).await;
            return Err(AdmissionError::BackpressureRejected {
                key: request.key,
                queued,
            });
        }

        let expiry = self.spawn_queue_expiry(Arc::clone(&slot), request.id.clone(), submitted);
        let event = AdmissionEvent::for_request(events::OPERATION_QUEUED, &request);
        let category = request.category.clone();
        debug!(
            key = %request.key,
            operation_id = %request.id,
            priority = %request.priority,
            queued = queued + 1,
            "a3s.bulkhead.admit: queued"
        );
        state.enqueue(QueuedEntry {
            request,
            job,
            enqueued_at: submitted,
            expiry: Some(expiry),
        });
        drop(state);

        self.event_emitter.emit(event);
        #[cfg(feature = "metrics")]
        if let Some(metrics) = &self.metrics {
            metrics.record_queued(&category).await;
        }
        #[cfg(not(feature = "metrics"))]
        let _ = category;
        Ok(())
    }

    /// Reject a queued request once its queue deadline passes, unless it
    /// left the queue first
    fn spawn_queue_expiry(
        self: &Arc<Self>,
        slot: KeySlot,
        id: String,
        submitted: Instant,
    ) -> JoinHandle<()> {
        let inner = Arc::clone(self);
        let deadline = deadline_after(submitted, self.config.queue_timeout);

        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let expired = slot.lock().await.remove_queued(&id);
            if let Some(entry) = expired {
                inner.on_queue_timeout(entry).await;
            }
        })
    }

    fn spawn_execution(
        self: &Arc<Self>,
        slot: KeySlot,
        request: OperationRequest,
        job: Box<dyn Job>,
        enqueued_at: Instant,
    ) {
        let inner = Arc::clone(self);
        let span = tracing::debug_span!(
            "a3s.bulkhead.execute",
            key = %request.key,
            operation_id = %request.id,
            category = %request.category
        );
        tokio::spawn(
            async move { inner.execute(slot, request, job, enqueued_at).await }.instrument(span),
        );
    }

    async fn execute(
        self: Arc<Self>,
        slot: KeySlot,
        request: OperationRequest,
        job: Box<dyn Job>,
        enqueued_at: Instant,
    ) {
        self.on_started(&request, enqueued_at.elapsed()).await;

        let started = Instant::now();
        let settled = job
            .execute(request.key.clone(), self.config.execution_timeout)
            .await;
        let latency = started.elapsed();

        // Free the slot and pick successors before the caller sees the
        // result, so a caller that immediately resubmits finds the slot free.
        let next = {
            let mut state = slot.lock().await;
            state.finish(&request.id, settled.outcome, latency);
            self.reconcile(&mut state)
        };

        self.on_finished(&request, settled.outcome, latency).await;
        settled.deliver();

        for entry in next {
            self.spawn_execution(Arc::clone(&slot), entry.request, entry.job, entry.enqueued_at);
        }
    }

    /// Move queued entries into free slots, highest priority first.
    ///
    /// Entries whose caller has gone away are dropped instead of run.
    fn reconcile(&self, state: &mut KeyState) -> Vec<QueuedEntry> {
        let mut promoted = Vec::new();
        while state.has_capacity(self.config.max_concurrent_per_key) {
            let Some(mut entry) = state.dequeue() else {
                break;
            };
            entry.cancel_expiry();
            if entry.job.is_abandoned() {
                debug!(
                    key = %entry.request.key,
                    operation_id = %entry.request.id,
                    "a3s.bulkhead.reconcile: caller gone, skipping"
                );
                continue;
            }
            state.activate(entry.request.clone());
            promoted.push(entry);
        }
        promoted
    }

    async fn on_submitted(&self, request: &OperationRequest) {
        self.event_emitter.emit(AdmissionEvent::for_request(
            events::OPERATION_SUBMITTED,
            request,
        ));
        #[cfg(feature = "metrics")]
        if let Some(metrics) = &self.metrics {
            metrics.record_submit(&request.category).await;
        }
        #[cfg(feature = "telemetry")]
        telemetry::record_submit(&request.category, request.priority.as_str());
    }

    async fn on_rejected(&self, request: &OperationRequest, queued: usize) {
        warn!(
            key = %request.key,
            operation_id = %request.id,
            queued,
            "a3s.bulkhead.backpressure: queue full, rejecting"
        );
        self.event_emitter.emit(AdmissionEvent::for_request(
            events::OPERATION_REJECTED,
            request,
        ));
        #[cfg(feature = "metrics")]
        if let Some(metrics) = &self.metrics {
            metrics.record_rejected(&request.category).await;
        }
        #[cfg(feature = "telemetry")]
        telemetry::record_rejected(&request.category);
    }

    async fn on_queue_timeout(&self, entry: QueuedEntry) {
        let QueuedEntry { request, job, .. } = entry;
        warn!(
            key = %request.key,
            operation_id = %request.id,
            timeout_ms = self.config.queue_timeout.as_millis() as u64,
            "a3s.bulkhead.queue_timeout: no slot freed in time"
        );
        self.event_emitter.emit(AdmissionEvent::for_request(
            events::OPERATION_QUEUE_TIMEOUT,
            &request,
        ));
        #[cfg(feature = "metrics")]
        if let Some(metrics) = &self.metrics {
            metrics.record_queue_timeout(&request.category).await;
        }
        job.reject(AdmissionError::QueueTimeout {
            key: request.key,
            timeout: self.config.queue_timeout,
        });
    }

    async fn on_started(&self, request: &OperationRequest, waited: Duration) {
        self.event_emitter.emit(AdmissionEvent::for_request(
            events::OPERATION_STARTED,
            request,
        ));
        #[cfg(feature = "metrics")]
        if let Some(metrics) = &self.metrics {
            metrics
                .record_wait_time(&request.category, waited.as_secs_f64() * 1000.0)
                .await;
        }
        #[cfg(not(feature = "metrics"))]
        let _ = waited;
    }

    async fn on_finished(&self, request: &OperationRequest, outcome: Outcome, latency: Duration) {
        let latency_ms = latency.as_secs_f64() * 1000.0;
        let event_key = match outcome {
            Outcome::Completed => {
                debug!(latency_ms, "a3s.bulkhead.complete: operation completed");
                events::OPERATION_COMPLETED
            }
            Outcome::Failed => {
                debug!(latency_ms, "a3s.bulkhead.complete: operation failed");
                events::OPERATION_FAILED
            }
            Outcome::Panicked => {
                warn!(latency_ms, "a3s.bulkhead.complete: operation panicked");
                events::OPERATION_FAILED
            }
            Outcome::TimedOut => {
                warn!(
                    timeout_ms = self.config.execution_timeout.as_millis() as u64,
                    "a3s.bulkhead.complete: execution timed out"
                );
                events::OPERATION_EXECUTION_TIMEOUT
            }
        };
        self.event_emitter
            .emit(AdmissionEvent::for_request(event_key, request));

        #[cfg(feature = "metrics")]
        if let Some(metrics) = &self.metrics {
            match outcome {
                Outcome::Completed => metrics.record_complete(&request.category, latency_ms).await,
                Outcome::TimedOut => metrics.record_execution_timeout(&request.category).await,
                Outcome::Failed | Outcome::Panicked => {
                    metrics.record_failure(&request.category).await
                }
            }
        }
        #[cfg(feature = "telemetry")]
        telemetry::record_finished(&request.category, outcome.as_str(), latency.as_secs_f64());
    }
}

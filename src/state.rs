//! Per-key state and the store that owns it
//!
//! Every key gets its own [`KeyState`] behind its own `tokio::sync::Mutex`.
//! The key -> state map is a sharded [`DashMap`] whose shard locks are only
//! held for lookup and insertion, never across an `.await`, so admission for
//! one key never waits on another key's lock.

use crate::operation::{Job, Outcome};
use crate::request::{OperationId, OperationRequest};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Shared handle to one key's state
pub(crate) type KeySlot = Arc<Mutex<KeyState>>;

/// A request waiting for a slot, carrying its own runnable operation
pub(crate) struct QueuedEntry {
    pub(crate) request: OperationRequest,
    pub(crate) job: Box<dyn Job>,
    pub(crate) enqueued_at: Instant,
    /// Queue-timeout timer; aborted when the entry leaves the queue early
    pub(crate) expiry: Option<JoinHandle<()>>,
}

impl QueuedEntry {
    pub(crate) fn cancel_expiry(&mut self) {
        if let Some(expiry) = self.expiry.take() {
            expiry.abort();
        }
    }
}

/// Accumulated per-key counters
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct Counters {
    pub(crate) completed: u64,
    pub(crate) errored: u64,
    pub(crate) average_latency_ms: f64,
}

impl Counters {
    pub(crate) fn record(&mut self, outcome: Outcome, latency: Duration) {
        if outcome.is_success() {
            self.completed += 1;
            let sample = latency.as_secs_f64() * 1000.0;
            self.average_latency_ms += (sample - self.average_latency_ms) / self.completed as f64;
        } else {
            self.errored += 1;
        }
    }
}

/// Point-in-time statistics for one key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyStats {
    pub key: String,
    pub active: usize,
    pub queued: usize,
    pub completed: u64,
    pub errored: u64,
    pub average_latency_ms: f64,
}

/// Concurrency, queue and statistics for a single key
pub(crate) struct KeyState {
    active: HashMap<OperationId, OperationRequest>,
    queue: VecDeque<QueuedEntry>,
    counters: Counters,
    last_submitted: Instant,
    /// Set under the lock right before the janitor drops this state from
    /// the store; holders of a stale `KeySlot` must look the key up again.
    evicted: bool,
}

impl KeyState {
    pub(crate) fn new() -> Self {
        Self {
            active: HashMap::new(),
            queue: VecDeque::new(),
            counters: Counters::default(),
            last_submitted: Instant::now(),
            evicted: false,
        }
    }

    pub(crate) fn is_evicted(&self) -> bool {
        self.evicted
    }

    pub(crate) fn mark_evicted(&mut self) {
        self.evicted = true;
    }

    pub(crate) fn touch(&mut self, now: Instant) {
        self.last_submitted = now;
    }

    pub(crate) fn active_count(&self) -> usize {
        self.active.len()
    }

    pub(crate) fn queued_count(&self) -> usize {
        self.queue.len()
    }

    pub(crate) fn has_capacity(&self, max_concurrent: usize) -> bool {
        self.active.len() < max_concurrent
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.active.is_empty() && self.queue.is_empty()
    }

    /// Idle and not submitted to within `retention` of `now`
    pub(crate) fn is_evictable(&self, now: Instant, retention: Duration) -> bool {
        self.is_idle() && now.saturating_duration_since(self.last_submitted) >= retention
    }

    pub(crate) fn activate(&mut self, request: OperationRequest) {
        self.active.insert(request.id.clone(), request);
    }

    /// Remove a finished operation from the active set and fold its outcome
    /// into the counters. Returns false if the id was not active.
    pub(crate) fn finish(&mut self, id: &str, outcome: Outcome, latency: Duration) -> bool {
        if self.active.remove(id).is_none() {
            return false;
        }
        self.counters.record(outcome, latency);
        true
    }

    /// Insert behind every entry of equal or higher priority
    pub(crate) fn enqueue(&mut self, entry: QueuedEntry) {
        let priority = entry.request.priority;
        let position = self
            .queue
            .iter()
            .position(|queued| queued.request.priority > priority)
            .unwrap_or(self.queue.len());
        self.queue.insert(position, entry);
    }

    pub(crate) fn dequeue(&mut self) -> Option<QueuedEntry> {
        self.queue.pop_front()
    }

    pub(crate) fn remove_queued(&mut self, id: &str) -> Option<QueuedEntry> {
        let position = self.queue.iter().position(|queued| queued.request.id == id)?;
        self.queue.remove(position)
    }

    pub(crate) fn drain_queue(&mut self) -> Vec<QueuedEntry> {
        self.queue.drain(..).collect()
    }

    pub(crate) fn reset_counters(&mut self) {
        self.counters = Counters::default();
    }

    pub(crate) fn snapshot(&self, key: &str) -> KeyStats {
        KeyStats {
            key: key.to_string(),
            active: self.active.len(),
            queued: self.queue.len(),
            completed: self.counters.completed,
            errored: self.counters.errored,
            average_latency_ms: self.counters.average_latency_ms,
        }
    }

    #[cfg(test)]
    pub(crate) fn queued_ids(&self) -> Vec<OperationId> {
        self.queue.iter().map(|e| e.request.id.clone()).collect()
    }
}

/// Registry of per-key state
///
/// Owned by one controller (and shared with its janitor); there is no
/// process-wide instance.
#[derive(Default)]
pub struct KeyStateStore {
    entries: DashMap<String, KeySlot>,
}

impl KeyStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently holding state
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub(crate) fn get(&self, key: &str) -> Option<KeySlot> {
        self.entries.get(key).map(|slot| Arc::clone(slot.value()))
    }

    pub(crate) fn get_or_create(&self, key: &str) -> KeySlot {
        if let Some(slot) = self.get(key) {
            return slot;
        }
        let slot = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(KeyState::new())));
        Arc::clone(slot.value())
    }

    /// Remove `key` only if it still maps to `slot`
    pub(crate) fn remove_slot(&self, key: &str, slot: &KeySlot) -> bool {
        self.entries
            .remove_if(key, |_, current| Arc::ptr_eq(current, slot))
            .is_some()
    }

    /// Snapshot of all (key, slot) pairs, taken without holding any key lock
    pub(crate) fn slots(&self) -> Vec<(String, KeySlot)> {
        self.entries
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect()
    }

    /// Evict every idle key whose last submission is older than `retention`.
    ///
    /// Keys whose lock is currently held are busy by definition and are
    /// left for the next sweep. Returns the evicted keys.
    pub(crate) fn evict_idle(&self, now: Instant, retention: Duration) -> Vec<String> {
        let mut evicted = Vec::new();
        for (key, slot) in self.slots() {
            let Ok(mut state) = slot.try_lock() else {
                continue;
            };
            if state.is_evicted() || !state.is_evictable(now, retention) {
                continue;
            }
            state.mark_evicted();
            if self.remove_slot(&key, &slot) {
                evicted.push(key);
            }
        }
        evicted
    }
}

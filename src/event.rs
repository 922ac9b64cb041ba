//! Admission lifecycle events
//!
//! Every admission decision, start, completion and eviction is broadcast to
//! subscribers. Emission never blocks and never fails: with no subscribers
//! the event is simply dropped.

use crate::request::OperationRequest;
use futures_core::Stream;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::broadcast;

/// Event key type
pub type EventKey = String;

/// Admission event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionEvent {
    /// Event key, one of [`events`]
    pub key: EventKey,

    /// Identifying fields (`key`, `operation_id`, `category`, `priority`)
    pub fields: HashMap<String, serde_json::Value>,

    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl AdmissionEvent {
    pub fn new(key: impl Into<String>, fields: HashMap<String, serde_json::Value>) -> Self {
        Self {
            key: key.into(),
            fields,
            timestamp: chrono::Utc::now(),
        }
    }

    /// Event describing one operation request
    pub fn for_request(event_key: impl Into<String>, request: &OperationRequest) -> Self {
        Self::new(
            event_key,
            HashMap::from([
                ("key".to_string(), serde_json::json!(request.key)),
                ("operation_id".to_string(), serde_json::json!(request.id)),
                ("category".to_string(), serde_json::json!(request.category)),
                ("priority".to_string(), serde_json::json!(request.priority)),
            ]),
        )
    }

    /// Event concerning a whole key rather than one request
    pub fn for_key(event_key: impl Into<String>, key: &str) -> Self {
        Self::new(
            event_key,
            HashMap::from([("key".to_string(), serde_json::json!(key))]),
        )
    }

    pub fn field(&self, name: &str) -> Option<&serde_json::Value> {
        self.fields.get(name)
    }
}

/// Event emitter
#[derive(Clone)]
pub struct EventEmitter {
    sender: Arc<broadcast::Sender<AdmissionEvent>>,
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventEmitter {
    /// Create an emitter buffering up to `capacity` events per lagging subscriber
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn emit(&self, event: AdmissionEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AdmissionEvent> {
        self.sender.subscribe()
    }

    /// Subscribe to the events matching `filter` as an [`EventStream`]
    pub fn subscribe_filtered(
        &self,
        filter: impl Fn(&AdmissionEvent) -> bool + Send + Sync + 'static,
    ) -> EventStream {
        use tokio_stream::wrappers::BroadcastStream;
        use tokio_stream::StreamExt as TokioStreamExt;
        let stream = BroadcastStream::new(self.sender.subscribe())
            .filter_map(|r: Result<AdmissionEvent, _>| r.ok())
            .filter(move |e| filter(e));
        EventStream {
            inner: Box::pin(stream),
        }
    }

    pub fn subscribe_stream(&self) -> EventStream {
        self.subscribe_filtered(|_| true)
    }
}

/// Stream of admission events; lagged events are skipped.
pub struct EventStream {
    inner: Pin<Box<dyn Stream<Item = AdmissionEvent> + Send>>,
}

impl Stream for EventStream {
    type Item = AdmissionEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl EventStream {
    /// Receive the next matching event
    pub async fn recv(&mut self) -> Option<AdmissionEvent> {
        use tokio_stream::StreamExt;
        self.next().await
    }
}

/// Event catalog
pub mod events {
    pub const OPERATION_SUBMITTED: &str = "admission.operation.submitted";
    pub const OPERATION_QUEUED: &str = "admission.operation.queued";
    pub const OPERATION_STARTED: &str = "admission.operation.started";
    pub const OPERATION_COMPLETED: &str = "admission.operation.completed";
    pub const OPERATION_FAILED: &str = "admission.operation.failed";
    pub const OPERATION_EXECUTION_TIMEOUT: &str = "admission.operation.execution_timeout";
    pub const OPERATION_QUEUE_TIMEOUT: &str = "admission.operation.queue_timeout";
    pub const OPERATION_REJECTED: &str = "admission.operation.rejected";
    pub const OPERATION_CANCELLED: &str = "admission.operation.cancelled";
    pub const KEY_EVICTED: &str = "admission.key.evicted";
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{categories, Priority};

    #[test]
    fn test_event_for_request() {
        let request = OperationRequest::new("dealer-9", categories::CACHE_UPDATE, Priority::High);
        let event = AdmissionEvent::for_request(events::OPERATION_QUEUED, &request);

        assert_eq!(event.key, events::OPERATION_QUEUED);
        assert_eq!(event.field("key"), Some(&serde_json::json!("dealer-9")));
        assert_eq!(event.field("operation_id"), Some(&serde_json::json!(request.id)));
        assert_eq!(event.field("category"), Some(&serde_json::json!("cache_update")));
        assert_eq!(event.field("priority"), Some(&serde_json::json!("high")));
    }

    #[test]
    fn test_event_for_key() {
        let event = AdmissionEvent::for_key(events::KEY_EVICTED, "dealer-9");
        assert_eq!(event.field("key"), Some(&serde_json::json!("dealer-9")));
        assert!(event.field("operation_id").is_none());
    }

    #[test]
    fn test_event_without_fields() {
        let event = AdmissionEvent::new("admission.test", HashMap::new());
        assert!(event.fields.is_empty());
        assert!(event.field("key").is_none());
    }

    #[tokio::test]
    async fn test_emitter_broadcasts_to_all_subscribers() {
        let emitter = EventEmitter::new(16);
        let mut first = emitter.subscribe();
        let mut second = emitter.subscribe();

        emitter.emit(AdmissionEvent::for_key(events::KEY_EVICTED, "k"));

        assert_eq!(first.recv().await.unwrap().key, events::KEY_EVICTED);
        assert_eq!(second.recv().await.unwrap().key, events::KEY_EVICTED);
    }

    #[test]
    fn test_emit_without_subscribers_is_silent() {
        let emitter = EventEmitter::default();
        emitter.emit(AdmissionEvent::for_key(events::KEY_EVICTED, "nobody.listening"));
    }

    #[tokio::test]
    async fn test_filtered_stream() {
        let emitter = EventEmitter::new(16);
        let mut stream =
            emitter.subscribe_filtered(|e| e.key == events::OPERATION_REJECTED);

        emitter.emit(AdmissionEvent::for_key(events::OPERATION_STARTED, "a"));
        emitter.emit(AdmissionEvent::for_key(events::OPERATION_REJECTED, "b"));

        let event = tokio::time::timeout(std::time::Duration::from_millis(200), stream.recv())
            .await
            .expect("Timeout waiting for filtered event")
            .expect("Stream ended");
        assert_eq!(event.field("key"), Some(&serde_json::json!("b")));
    }

    #[test]
    fn test_event_serialization() {
        let event = AdmissionEvent::for_key(events::OPERATION_CANCELLED, "k");
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("admission.operation.cancelled"));
        assert!(json.contains("timestamp"));

        let parsed: AdmissionEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.key, events::OPERATION_CANCELLED);
    }

    #[test]
    fn test_event_catalog_prefixes() {
        for key in [
            events::OPERATION_SUBMITTED,
            events::OPERATION_QUEUED,
            events::OPERATION_STARTED,
            events::OPERATION_COMPLETED,
            events::OPERATION_FAILED,
            events::OPERATION_EXECUTION_TIMEOUT,
            events::OPERATION_QUEUE_TIMEOUT,
            events::OPERATION_REJECTED,
            events::OPERATION_CANCELLED,
            events::KEY_EVICTED,
        ] {
            assert!(key.starts_with("admission."), "{key}");
        }
    }
}

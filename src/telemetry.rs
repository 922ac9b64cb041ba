//! OpenTelemetry instruments for the admission controller.
//!
//! Instruments are created once from the global meter provider by
//! [`init_admission_metrics`]. Until then every `record_*` call is a no-op,
//! so the controller can call them unconditionally.

use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram};
use opentelemetry::KeyValue;
use std::sync::OnceLock;

pub const ATTR_CATEGORY: &str = "a3s.bulkhead.category";
pub const ATTR_PRIORITY: &str = "a3s.bulkhead.priority";
pub const ATTR_OUTCOME: &str = "a3s.bulkhead.outcome";

static METRICS: OnceLock<AdmissionMetricsRecorder> = OnceLock::new();

/// OpenTelemetry instruments for admission decisions
pub struct AdmissionMetricsRecorder {
    pub operations_submitted_total: Counter<u64>,
    pub operations_rejected_total: Counter<u64>,
    /// Finished operations, labelled with [`ATTR_OUTCOME`]
    pub operations_finished_total: Counter<u64>,
    pub operation_duration_seconds: Histogram<f64>,
}

/// The global recorder, if initialized
pub fn metrics() -> Option<&'static AdmissionMetricsRecorder> {
    METRICS.get()
}

/// Initialize instruments from the global meter provider.
///
/// Only the first call takes effect.
pub fn init_admission_metrics() {
    let meter = global::meter("a3s-bulkhead");

    let recorder = AdmissionMetricsRecorder {
        operations_submitted_total: meter
            .u64_counter("a3s_bulkhead_operations_submitted_total")
            .with_description("Operations submitted to the admission controller")
            .init(),
        operations_rejected_total: meter
            .u64_counter("a3s_bulkhead_operations_rejected_total")
            .with_description("Operations rejected for backpressure")
            .init(),
        operations_finished_total: meter
            .u64_counter("a3s_bulkhead_operations_finished_total")
            .with_description("Operations that finished executing, by outcome")
            .init(),
        operation_duration_seconds: meter
            .f64_histogram("a3s_bulkhead_operation_duration_seconds")
            .with_description("Operation execution duration in seconds")
            .init(),
    };

    let _ = METRICS.set(recorder);
}

pub fn record_submit(category: &str, priority: &'static str) {
    if let Some(m) = metrics() {
        m.operations_submitted_total.add(
            1,
            &[
                KeyValue::new(ATTR_CATEGORY, category.to_string()),
                KeyValue::new(ATTR_PRIORITY, priority),
            ],
        );
    }
}

pub fn record_rejected(category: &str) {
    if let Some(m) = metrics() {
        m.operations_rejected_total
            .add(1, &[KeyValue::new(ATTR_CATEGORY, category.to_string())]);
    }
}

pub fn record_finished(category: &str, outcome: &'static str, duration_secs: f64) {
    if let Some(m) = metrics() {
        let attrs = [
            KeyValue::new(ATTR_CATEGORY, category.to_string()),
            KeyValue::new(ATTR_OUTCOME, outcome),
        ];
        m.operations_finished_total.add(1, &attrs);
        m.operation_duration_seconds.record(duration_secs, &attrs);
    }
}

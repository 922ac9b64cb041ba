//! # A3S Bulkhead
//!
//! A per-key admission controller for async operations.
//!
//! ## Core (always compiled)
//!
//! - Per-key concurrency limit with a bounded, priority-ordered wait queue
//! - Immediate backpressure rejection once a key's queue is full
//! - Queue and execution timeouts
//! - Per-key and system-wide statistics, overload detection
//! - Queue cancellation and idle-key eviction
//! - Event system for admission lifecycle notifications
//!
//! ## Feature Flags
//!
//! | Feature | Default | Dependencies | Description |
//! |---------|---------|-------------|-------------|
//! | `metrics` | ✅ | — | `MetricsBackend` trait, `LocalMetrics`, latency histograms |
//! | `telemetry` | ✅ | `opentelemetry` | OpenTelemetry counters and duration histogram |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use a3s_bulkhead::{categories, AdmissionConfig, AdmissionController, Priority};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let controller = AdmissionController::new(AdmissionConfig::new(3, 10))?;
//!     let _janitor = controller.start_janitor();
//!
//!     let profile = controller
//!         .submit_with_priority("user:42", categories::FETCH, Priority::High, || async {
//!             Ok::<_, std::io::Error>("profile")
//!         })
//!         .await?;
//!     println!("{profile}");
//!
//!     if let Some(stats) = controller.stats_for("user:42").await {
//!         println!("completed={} avg={:.1}ms", stats.completed, stats.average_latency_ms);
//!     }
//!     Ok(())
//! }
//! ```

// Core modules (always compiled)
pub mod builder;
pub mod config;
pub mod controller;
pub mod error;
pub mod event;
pub mod janitor;
mod operation;
pub mod request;
pub mod state;

// Feature-gated modules
#[cfg(feature = "metrics")]
pub mod metrics;
#[cfg(feature = "telemetry")]
pub mod telemetry;

// Core re-exports
pub use builder::AdmissionControllerBuilder;
pub use config::AdmissionConfig;
pub use controller::AdmissionController;
pub use error::{AdmissionError, Result, SubmitError};
pub use event::{events, AdmissionEvent, EventEmitter, EventStream};
pub use janitor::{Janitor, JanitorHandle};
pub use request::{categories, Category, OperationId, OperationRequest, Priority};
pub use state::{KeyStateStore, KeyStats};

// Feature-gated re-exports
#[cfg(feature = "metrics")]
pub use metrics::{
    metric_names, AdmissionMetrics, HistogramStats, LocalMetrics, MetricsBackend,
    MetricsSnapshot,
};
#[cfg(feature = "telemetry")]
pub use telemetry::init_admission_metrics;

use serde::{Deserialize, Serialize};

/// System-wide statistics snapshot
///
/// Aggregated over every key that currently holds state.
///
/// # Fields
///
/// * `total_active` - Operations currently executing across all keys
/// * `total_queued` - Operations waiting for a slot across all keys
/// * `tracked_keys` - Keys currently holding state
/// * `active_keys` - Keys with at least one operation executing
/// * `average_active_per_key` - `total_active / active_keys`, or 0 when nothing runs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemStats {
    pub total_active: usize,
    pub total_queued: usize,
    pub tracked_keys: usize,
    pub active_keys: usize,
    pub average_active_per_key: f64,
}

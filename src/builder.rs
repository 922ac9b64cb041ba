//! Builder for [`AdmissionController`]

use crate::config::AdmissionConfig;
use crate::controller::AdmissionController;
use crate::error::Result;
use crate::event::EventEmitter;
#[cfg(feature = "metrics")]
use crate::metrics::AdmissionMetrics;
use std::time::Duration;

/// Builder for creating an admission controller
#[derive(Default)]
pub struct AdmissionControllerBuilder {
    config: AdmissionConfig,
    event_emitter: Option<EventEmitter>,
    #[cfg(feature = "metrics")]
    metrics: Option<AdmissionMetrics>,
}

impl AdmissionControllerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole configuration
    pub fn with_config(mut self, config: AdmissionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_max_concurrent_per_key(mut self, max: usize) -> Self {
        self.config.max_concurrent_per_key = max;
        self
    }

    pub fn with_max_queue_size(mut self, max: usize) -> Self {
        self.config.max_queue_size = max;
        self
    }

    pub fn with_execution_timeout(mut self, timeout: Duration) -> Self {
        self.config.execution_timeout = timeout;
        self
    }

    pub fn with_queue_timeout(mut self, timeout: Duration) -> Self {
        self.config.queue_timeout = timeout;
        self
    }

    /// Share an existing emitter, e.g. one already subscribed to elsewhere
    pub fn with_event_emitter(mut self, event_emitter: EventEmitter) -> Self {
        self.event_emitter = Some(event_emitter);
        self
    }

    #[cfg(feature = "metrics")]
    pub fn with_metrics(mut self, metrics: AdmissionMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Validate the configuration and build the controller
    pub fn build(self) -> Result<AdmissionController> {
        self.config.validate()?;

        Ok(AdmissionController::from_parts(
            self.config,
            self.event_emitter.unwrap_or_default(),
            #[cfg(feature = "metrics")]
            self.metrics,
        ))
    }
}

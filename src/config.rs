//! Admission controller configuration

use crate::error::{AdmissionError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

/// Stand-in for deadlines that do not fit in an `Instant` (about 30 years)
pub(crate) const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// `start + after`, clamped to [`FAR_FUTURE`] when the sum overflows
pub(crate) fn deadline_after(start: Instant, after: Duration) -> Instant {
    start
        .checked_add(after)
        .unwrap_or_else(|| start + FAR_FUTURE)
}

/// Admission controller configuration
///
/// Fixed at construction. Every field has a default, so
/// `AdmissionConfig::default()` is a valid zero-config setup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AdmissionConfig {
    /// Maximum operations running at once for a single key
    pub max_concurrent_per_key: usize,
    /// Maximum operations waiting for a slot for a single key
    pub max_queue_size: usize,
    /// Execution time limit, measured from slot grant
    #[serde(rename = "execution_timeout_ms", with = "duration_millis")]
    pub execution_timeout: Duration,
    /// Queue wait limit, measured from submission
    #[serde(rename = "queue_timeout_ms", with = "duration_millis")]
    pub queue_timeout: Duration,
    /// Interval between janitor sweeps
    #[serde(rename = "janitor_interval_ms", with = "duration_millis")]
    pub janitor_interval: Duration,
    /// How long an idle key keeps its state after its last submission
    #[serde(rename = "retention_ms", with = "duration_millis")]
    pub retention: Duration,
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_concurrent_per_key: 3,
            max_queue_size: 10,
            execution_timeout: Duration::from_secs(30),
            queue_timeout: Duration::from_secs(30),
            janitor_interval: Duration::from_secs(5 * 60),
            retention: Duration::from_secs(60 * 60),
        }
    }
}

impl AdmissionConfig {
    /// Create a configuration with the given per-key limits and default timings
    pub fn new(max_concurrent_per_key: usize, max_queue_size: usize) -> Self {
        Self {
            max_concurrent_per_key,
            max_queue_size,
            ..Self::default()
        }
    }

    /// Set execution timeout (builder pattern)
    pub fn with_execution_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout = timeout;
        self
    }

    /// Set queue timeout (builder pattern)
    pub fn with_queue_timeout(mut self, timeout: Duration) -> Self {
        self.queue_timeout = timeout;
        self
    }

    /// Set janitor interval (builder pattern)
    pub fn with_janitor_interval(mut self, interval: Duration) -> Self {
        self.janitor_interval = interval;
        self
    }

    /// Set idle-key retention (builder pattern)
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Queue length at which a key starts reporting itself as overloaded
    pub(crate) fn overload_queue_threshold(&self, queued: usize) -> bool {
        // queued >= max_queue_size / 2 without integer truncation; a
        // zero-size queue never holds entries and never counts
        self.max_queue_size > 0 && queued * 2 >= self.max_queue_size
    }

    /// Check the configuration for values the controller cannot run with.
    ///
    /// `max_queue_size` may be zero, which disables queueing: a saturated key
    /// rejects immediately.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_per_key == 0 {
            return Err(AdmissionError::ConfigError(
                "max_concurrent_per_key must be greater than zero".to_string(),
            ));
        }
        if self.execution_timeout.is_zero() {
            return Err(AdmissionError::ConfigError(
                "execution_timeout must be greater than zero".to_string(),
            ));
        }
        if self.queue_timeout.is_zero() {
            return Err(AdmissionError::ConfigError(
                "queue_timeout must be greater than zero".to_string(),
            ));
        }
        if self.janitor_interval.is_zero() {
            return Err(AdmissionError::ConfigError(
                "janitor_interval must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

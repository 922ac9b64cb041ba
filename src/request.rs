//! Operation requests, priorities and categories

use crate::error::AdmissionError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Operation identifier
pub type OperationId = String;

/// Operation category (free-form, see [`categories`] for the well-known ones)
pub type Category = String;

/// Well-known operation categories
pub mod categories {
    pub const FETCH: &str = "fetch";
    pub const REFRESH: &str = "refresh";
    pub const CACHE_UPDATE: &str = "cache_update";
}

/// Queue priority
///
/// Ordering follows urgency: `High < Medium < Low`, so sorting ascending
/// puts the most urgent request first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = AdmissionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" => Ok(Priority::High),
            "medium" => Ok(Priority::Medium),
            "low" => Ok(Priority::Low),
            _ => Err(AdmissionError::InvalidPriority(s.to_string())),
        }
    }
}

/// A single submission, as tracked by the controller.
///
/// The runnable operation itself is held alongside the request in the
/// queue entry; this struct is the immutable bookkeeping part.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationRequest {
    pub id: OperationId,
    pub key: String,
    pub category: Category,
    pub priority: Priority,
    pub submitted_at: DateTime<Utc>,
}

impl OperationRequest {
    /// Create a request with a fresh id, stamped now
    pub fn new(key: impl Into<String>, category: impl Into<Category>, priority: Priority) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            key: key.into(),
            category: category.into(),
            priority,
            submitted_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        assert_eq!(categories::FETCH, "fetch");
        assert_eq!(categories::REFRESH, "refresh");
        assert_eq!(categories::CACHE_UPDATE, "cache_update");
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::High < Priority::Medium);
        assert!(Priority::Medium < Priority::Low);

        let mut priorities = vec![Priority::Low, Priority::High, Priority::Medium];
        priorities.sort();
        assert_eq!(priorities, vec![Priority::High, Priority::Medium, Priority::Low]);
    }

    #[test]
    fn test_priority_default_is_medium() {
        assert_eq!(Priority::default(), Priority::Medium);
    }

    #[test]
    fn test_priority_from_str() {
        assert_eq!("high".parse::<Priority>().unwrap(), Priority::High);
        assert_eq!(" Medium ".parse::<Priority>().unwrap(), Priority::Medium);
        assert_eq!("LOW".parse::<Priority>().unwrap(), Priority::Low);

        let err = "urgent".parse::<Priority>().unwrap_err();
        assert_eq!(err, AdmissionError::InvalidPriority("urgent".to_string()));
    }

    #[test]
    fn test_priority_serialization() {
        assert_eq!(serde_json::to_string(&Priority::High).unwrap(), "\"high\"");
        let parsed: Priority = serde_json::from_str("\"low\"").unwrap();
        assert_eq!(parsed, Priority::Low);
        assert_eq!(Priority::Medium.to_string(), "medium");
    }

    #[test]
    fn test_operation_request_new() {
        let before = Utc::now();
        let request = OperationRequest::new("dealer-7", categories::REFRESH, Priority::High);
        let after = Utc::now();

        assert_eq!(request.key, "dealer-7");
        assert_eq!(request.category, "refresh");
        assert_eq!(request.priority, Priority::High);
        assert!(request.submitted_at >= before && request.submitted_at <= after);
        assert!(Uuid::parse_str(&request.id).is_ok());
    }

    #[test]
    fn test_operation_request_ids_are_unique() {
        let a = OperationRequest::new("k", categories::FETCH, Priority::Low);
        let b = OperationRequest::new("k", categories::FETCH, Priority::Low);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_custom_category() {
        let request = OperationRequest::new("k", "inventory_sync", Priority::Medium);
        assert_eq!(request.category, "inventory_sync");
    }
}

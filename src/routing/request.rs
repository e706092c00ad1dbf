//! Routing requests

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::id::generate_request_id;

/// Request priority. Carried through to the decision; it does not affect scoring.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// A caller's request for a capability
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoutingRequest {
    pub request_id: String,
    pub capability: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl RoutingRequest {
    /// New request with a generated id and normal priority
    pub fn new(capability: impl Into<String>) -> Self {
        Self {
            request_id: generate_request_id(),
            capability: capability.into(),
            priority: Priority::default(),
            timeout: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_metadata(mut self, metadata: BTreeMap<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_request() {
        let request = RoutingRequest::new("ocr");
        assert!(request.request_id.starts_with("req-"));
        assert_eq!(request.priority, Priority::Normal);
        assert!(request.timeout.is_none());
    }

    #[test]
    fn test_request_builder() {
        let request = RoutingRequest::new("ocr")
            .with_priority(Priority::High)
            .with_timeout(Duration::from_secs(5));
        assert_eq!(request.priority, Priority::High);
        assert_eq!(request.timeout, Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Critical > Priority::High);
        assert!(Priority::Low < Priority::Normal);
        assert_eq!(Priority::High.to_string(), "high");
    }
}

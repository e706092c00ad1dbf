//! Tool endpoint records

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::telemetry::{HealthState, LoadMetrics};

fn default_weight() -> f64 {
    1.0
}

fn default_max_concurrent() -> u32 {
    10
}

/// How an endpoint entered the registry
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EndpointOrigin {
    /// Self-registered through the adapter
    #[default]
    Manual,
    /// Found by a discovery scan
    Discovered,
}

/// Static description of an endpoint, as found in manifests or registration calls
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EndpointSpec {
    pub id: String,
    pub capabilities: BTreeSet<String>,
    /// Transport address (URL, socket path, ...)
    pub address: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: u32,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl EndpointSpec {
    /// Create a spec with default weight and concurrency
    pub fn new(id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            capabilities: BTreeSet::new(),
            address: address.into(),
            weight: default_weight(),
            max_concurrent: default_max_concurrent(),
            metadata: BTreeMap::new(),
        }
    }

    /// Add an advertised capability
    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capabilities.insert(capability.into());
        self
    }

    /// Set maximum concurrent requests
    pub fn with_max_concurrent(mut self, max: u32) -> Self {
        self.max_concurrent = max;
        self
    }

    /// Set weight
    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    /// Attach a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// A registered capability provider together with its live telemetry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolEndpoint {
    pub id: String,
    pub capabilities: BTreeSet<String>,
    pub address: String,
    pub weight: f64,
    pub max_concurrent: u32,
    pub current_concurrent: u32,
    pub health: HealthState,
    pub load: LoadMetrics,
    pub metadata: BTreeMap<String, Value>,
    pub last_updated: DateTime<Utc>,
    pub origin: EndpointOrigin,
    /// Consecutive discovery scans that did not see this endpoint
    pub missed_scans: u32,
    /// Set when current_concurrent exceeds max_concurrent
    pub over_capacity: bool,
}

impl ToolEndpoint {
    /// Build a fresh, idle, healthy endpoint from a spec
    pub fn from_spec(spec: EndpointSpec, origin: EndpointOrigin) -> Self {
        let now = Utc::now();
        Self {
            id: spec.id,
            capabilities: spec.capabilities,
            address: spec.address,
            weight: spec.weight,
            max_concurrent: spec.max_concurrent,
            current_concurrent: 0,
            health: HealthState::Healthy,
            load: LoadMetrics {
                last_updated: now,
                ..LoadMetrics::default()
            },
            metadata: spec.metadata,
            last_updated: now,
            origin,
            missed_scans: 0,
            over_capacity: false,
        }
    }

    /// Replace the static attributes, keeping telemetry
    pub fn apply_spec(&mut self, spec: EndpointSpec) {
        self.capabilities = spec.capabilities;
        self.address = spec.address;
        self.weight = spec.weight;
        self.max_concurrent = spec.max_concurrent;
        self.metadata = spec.metadata;
        self.over_capacity = self.current_concurrent > self.max_concurrent;
    }

    /// Static attributes as a spec
    pub fn spec(&self) -> EndpointSpec {
        EndpointSpec {
            id: self.id.clone(),
            capabilities: self.capabilities.clone(),
            address: self.address.clone(),
            weight: self.weight,
            max_concurrent: self.max_concurrent,
            metadata: self.metadata.clone(),
        }
    }

    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.contains(capability)
    }

    /// Whether another request fits under the concurrency bound
    pub fn has_capacity(&self) -> bool {
        self.current_concurrent < self.max_concurrent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_spec_builder() {
        let spec = EndpointSpec::new("ocr-1", "http://127.0.0.1:9001")
            .with_capability("ocr")
            .with_capability("layout")
            .with_max_concurrent(4)
            .with_weight(2.0)
            .with_metadata("version", json!("1.2"));
        assert_eq!(spec.capabilities.len(), 2);
        assert_eq!(spec.max_concurrent, 4);
        assert_eq!(spec.weight, 2.0);
        assert_eq!(spec.metadata["version"], json!("1.2"));
    }

    #[test]
    fn test_spec_defaults_from_yaml() {
        let spec: EndpointSpec = serde_yaml::from_str(
            r#"
id: sum-1
capabilities: [summarize]
address: unix:///run/sum.sock
"#,
        )
        .unwrap();
        assert_eq!(spec.weight, 1.0);
        assert_eq!(spec.max_concurrent, 10);
        assert!(spec.metadata.is_empty());
    }

    #[test]
    fn test_from_spec_is_idle_and_healthy() {
        let endpoint = ToolEndpoint::from_spec(
            EndpointSpec::new("ocr-1", "addr").with_capability("ocr"),
            EndpointOrigin::Manual,
        );
        assert_eq!(endpoint.health, HealthState::Healthy);
        assert_eq!(endpoint.current_concurrent, 0);
        assert!(endpoint.has_capability("ocr"));
        assert!(!endpoint.has_capability("summarize"));
        assert!(endpoint.has_capacity());
    }

    #[test]
    fn test_apply_spec_keeps_telemetry() {
        let mut endpoint = ToolEndpoint::from_spec(EndpointSpec::new("a", "old"), EndpointOrigin::Manual);
        endpoint.current_concurrent = 3;
        endpoint.health = HealthState::Warning;
        endpoint.apply_spec(EndpointSpec::new("a", "new").with_max_concurrent(2));
        assert_eq!(endpoint.address, "new");
        assert_eq!(endpoint.health, HealthState::Warning);
        assert_eq!(endpoint.current_concurrent, 3);
        assert!(endpoint.over_capacity);
    }

    #[test]
    fn test_spec_round_trip_through_endpoint() {
        let spec = EndpointSpec::new("a", "addr").with_capability("ocr");
        let endpoint = ToolEndpoint::from_spec(spec.clone(), EndpointOrigin::Discovered);
        assert_eq!(endpoint.spec(), spec);
    }
}

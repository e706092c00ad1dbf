//! Aggregate agent health for operators

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::heartbeat::{ConnectionState, ConnectionStats};
use crate::telemetry::HealthState;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OverallStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl OverallStatus {
    /// Combine the link state with the endpoint health tiers
    pub fn derive(connection: ConnectionState, endpoints: &BTreeMap<HealthState, usize>) -> Self {
        let healthy = endpoints.get(&HealthState::Healthy).copied().unwrap_or(0);
        match connection {
            ConnectionState::Error | ConnectionState::Disconnected => Self::Unhealthy,
            ConnectionState::Connected if healthy > 0 => Self::Healthy,
            _ => Self::Degraded,
        }
    }
}

impl std::fmt::Display for OverallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
        };
        f.write_str(s)
    }
}

/// Everything an operator needs to diagnose the agent without reading logs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AggregateHealth {
    pub status: OverallStatus,
    pub adapter_id: String,
    pub connection: ConnectionState,
    pub stats: ConnectionStats,
    pub endpoints_by_health: BTreeMap<HealthState, usize>,
    pub open_circuits: Vec<String>,
    pub routing_failures: u64,
    pub outcome_failures: u64,
    pub pending_outcomes: usize,
    pub configuration_version: String,
}

impl AggregateHealth {
    pub fn total_endpoints(&self) -> usize {
        self.endpoints_by_health.values().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(healthy: usize, warning: usize) -> BTreeMap<HealthState, usize> {
        let mut counts = BTreeMap::new();
        counts.insert(HealthState::Healthy, healthy);
        counts.insert(HealthState::Warning, warning);
        counts
    }

    #[test]
    fn test_connected_with_healthy_endpoint() {
        assert_eq!(
            OverallStatus::derive(ConnectionState::Connected, &counts(1, 0)),
            OverallStatus::Healthy
        );
    }

    #[test]
    fn test_connected_without_healthy_endpoint_is_degraded() {
        assert_eq!(
            OverallStatus::derive(ConnectionState::Connected, &counts(0, 2)),
            OverallStatus::Degraded
        );
    }

    #[test]
    fn test_reconnecting_is_degraded() {
        assert_eq!(
            OverallStatus::derive(ConnectionState::Reconnecting, &counts(3, 0)),
            OverallStatus::Degraded
        );
    }

    #[test]
    fn test_error_and_disconnected_are_unhealthy() {
        assert_eq!(
            OverallStatus::derive(ConnectionState::Error, &counts(3, 0)),
            OverallStatus::Unhealthy
        );
        assert_eq!(
            OverallStatus::derive(ConnectionState::Disconnected, &counts(3, 0)),
            OverallStatus::Unhealthy
        );
    }

    #[test]
    fn test_health_serializes_tier_keys() {
        let health = AggregateHealth {
            status: OverallStatus::Degraded,
            adapter_id: "edge-1".into(),
            connection: ConnectionState::Connecting,
            stats: ConnectionStats::default(),
            endpoints_by_health: counts(1, 2),
            open_circuits: vec![],
            routing_failures: 0,
            outcome_failures: 0,
            pending_outcomes: 0,
            configuration_version: "abc".into(),
        };
        assert_eq!(health.total_endpoints(), 3);
        let json = serde_json::to_value(&health).unwrap();
        assert_eq!(json["endpoints_by_health"]["warning"], 2);
        assert_eq!(json["status"], "degraded");
    }
}

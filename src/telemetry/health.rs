//! Health tiers and the rules that derive them from load telemetry

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::load::LoadMetrics;

/// Health tier of a tool endpoint
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    #[default]
    Healthy,
    Warning,
    Critical,
    Unavailable,
}

impl HealthState {
    /// All tiers in severity order
    pub const ALL: [HealthState; 4] = [
        HealthState::Healthy,
        HealthState::Warning,
        HealthState::Critical,
        HealthState::Unavailable,
    ];

    /// Parse from string representation
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "healthy" | "ok" => Some(Self::Healthy),
            "warning" | "degraded" => Some(Self::Warning),
            "critical" => Some(Self::Critical),
            "unavailable" | "down" => Some(Self::Unavailable),
            _ => None,
        }
    }

    /// Health sub-score used by routing
    pub fn score(&self) -> f64 {
        match self {
            Self::Healthy => 1.0,
            Self::Warning => 0.6,
            Self::Critical => 0.2,
            Self::Unavailable => 0.0,
        }
    }

    /// Whether the endpoint may be considered for routing at all
    pub fn is_routable(&self) -> bool {
        !matches!(self, Self::Unavailable)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Warning => "warning",
            Self::Critical => "critical",
            Self::Unavailable => "unavailable",
        }
    }
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Thresholds used to derive a health tier when a tool does not report one
#[derive(Debug, Clone, PartialEq)]
pub struct HealthThresholds {
    /// CPU or memory usage fraction at which an endpoint is WARNING
    pub load_threshold: f64,
    /// Average latency (ms) at which an endpoint is WARNING
    pub latency_threshold_ms: f64,
    /// Error rate fraction at which an endpoint is CRITICAL
    pub error_rate_threshold: f64,
    /// Telemetry older than this is treated as UNAVAILABLE
    pub stale_after: Duration,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            load_threshold: 0.8,
            latency_threshold_ms: 1000.0,
            error_rate_threshold: 0.1,
            stale_after: Duration::from_secs(90),
        }
    }
}

impl HealthThresholds {
    /// Check whether a timestamp is past the staleness horizon
    pub fn is_stale(&self, last_updated: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        let horizon = chrono::Duration::from_std(self.stale_after).unwrap_or(chrono::Duration::MAX);
        now.signed_duration_since(last_updated) > horizon
    }

    /// Derive a health tier from load metrics
    pub fn derive(&self, load: &LoadMetrics, now: DateTime<Utc>) -> HealthState {
        if self.is_stale(load.last_updated, now) {
            return HealthState::Unavailable;
        }
        if load.error_rate >= self.error_rate_threshold {
            return HealthState::Critical;
        }
        if load.cpu_usage >= self.load_threshold
            || load.memory_usage >= self.load_threshold
            || load.avg_response_time >= self.latency_threshold_ms
        {
            return HealthState::Warning;
        }
        HealthState::Healthy
    }
}

//! Connection state and counters for the heartbeat channel

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Liveness of the link to the controller
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Error,
    Maintenance,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Error => "error",
            Self::Maintenance => "maintenance",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counters kept across heartbeats
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ConnectionStats {
    pub started_at: Option<DateTime<Utc>>,
    pub total_heartbeats: u64,
    pub successful_heartbeats: u64,
    pub failed_heartbeats: u64,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    /// Running mean of round-trip latency over successful sends
    pub avg_latency_ms: f64,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_server_timestamp: Option<String>,
    pub current_interval_secs: f64,
}

impl ConnectionStats {
    /// Seconds since the channel was started
    pub fn uptime_secs(&self) -> u64 {
        self.started_at
            .map(|t| Utc::now().signed_duration_since(t).num_seconds().max(0) as u64)
            .unwrap_or(0)
    }

    pub fn record_success(&mut self, latency_ms: f64, server_timestamp: Option<String>) {
        self.total_heartbeats += 1;
        self.successful_heartbeats += 1;
        self.consecutive_failures = 0;
        let n = self.successful_heartbeats as f64;
        self.avg_latency_ms += (latency_ms - self.avg_latency_ms) / n;
        self.last_success_at = Some(Utc::now());
        if server_timestamp.is_some() {
            self.last_server_timestamp = server_timestamp;
        }
    }

    pub fn record_failure(&mut self, error: String) {
        self.total_heartbeats += 1;
        self.failed_heartbeats += 1;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_error = Some(error);
    }

    pub fn reset_failures(&mut self) {
        self.consecutive_failures = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state_is_disconnected() {
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
        assert_eq!(ConnectionState::Reconnecting.to_string(), "reconnecting");
    }

    #[test]
    fn test_running_average_latency() {
        let mut stats = ConnectionStats::default();
        stats.record_success(100.0, None);
        stats.record_success(200.0, Some("2026-01-01T00:00:00Z".into()));
        stats.record_success(300.0, None);
        assert!((stats.avg_latency_ms - 200.0).abs() < 1e-9);
        assert_eq!(stats.successful_heartbeats, 3);
        assert_eq!(stats.last_server_timestamp.as_deref(), Some("2026-01-01T00:00:00Z"));
    }

    #[test]
    fn test_failure_counters() {
        let mut stats = ConnectionStats::default();
        stats.record_failure("refused".into());
        stats.record_failure("refused".into());
        assert_eq!(stats.consecutive_failures, 2);
        assert_eq!(stats.failed_heartbeats, 2);
        assert_eq!(stats.total_heartbeats, 2);

        stats.record_success(10.0, None);
        assert_eq!(stats.consecutive_failures, 0);
        assert_eq!(stats.last_error.as_deref(), Some("refused"));
        // Failures do not drag the latency average
        assert_eq!(stats.avg_latency_ms, 10.0);
    }

    #[test]
    fn test_uptime_without_start() {
        assert_eq!(ConnectionStats::default().uptime_secs(), 0);
    }
}

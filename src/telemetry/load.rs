//! Load metrics reported by tool endpoints

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Point-in-time load report for one endpoint.
///
/// Always replaced wholesale on update, never patched field by field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoadMetrics {
    /// CPU usage as a fraction (0.0 - 1.0)
    pub cpu_usage: f64,
    /// Memory usage as a fraction (0.0 - 1.0)
    pub memory_usage: f64,
    /// Requests currently in flight
    pub active_requests: u32,
    /// Requests waiting to be served
    pub queue_length: u32,
    /// Average response time in milliseconds
    pub avg_response_time: f64,
    /// 95th percentile response time in milliseconds
    pub p95_response_time: f64,
    /// Fraction of failed requests (0.0 - 1.0)
    pub error_rate: f64,
    /// Requests per second
    pub throughput: f64,
    pub last_updated: DateTime<Utc>,
}

impl Default for LoadMetrics {
    fn default() -> Self {
        Self {
            cpu_usage: 0.0,
            memory_usage: 0.0,
            active_requests: 0,
            queue_length: 0,
            avg_response_time: 0.0,
            p95_response_time: 0.0,
            error_rate: 0.0,
            throughput: 0.0,
            last_updated: Utc::now(),
        }
    }
}

impl LoadMetrics {
    /// Create an idle report stamped now
    pub fn idle() -> Self {
        Self::default()
    }

    /// Set active requests
    pub fn with_active_requests(mut self, active: u32) -> Self {
        self.active_requests = active;
        self
    }

    /// Set average response time (ms)
    pub fn with_avg_response_time(mut self, ms: f64) -> Self {
        self.avg_response_time = ms;
        self
    }

    /// Set error rate
    pub fn with_error_rate(mut self, rate: f64) -> Self {
        self.error_rate = rate;
        self
    }

    /// Reliability sub-score: 1 - error_rate, clamped to [0, 1]
    pub fn reliability(&self) -> f64 {
        (1.0 - self.error_rate).clamp(0.0, 1.0)
    }
}

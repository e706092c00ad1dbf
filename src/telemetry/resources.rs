//! Local host resource sampling for heartbeat envelopes

use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Host resource usage at the time an envelope is built
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ResourceSnapshot {
    /// 1-minute load average
    pub load_average: f64,
    /// Memory used as a fraction of total (0.0 - 1.0)
    pub memory_used: f64,
    /// Logical CPUs available to this process
    pub cpu_count: usize,
    /// Seconds since the agent process started sampling
    pub uptime_secs: u64,
}

impl ResourceSnapshot {
    /// Sample host resources. Missing sources (non-Linux) yield zeros.
    pub async fn sample(started: Instant) -> Self {
        let load_average = match tokio::fs::read_to_string("/proc/loadavg").await {
            Ok(content) => parse_loadavg(&content).unwrap_or(0.0),
            Err(_) => 0.0,
        };
        let memory_used = match tokio::fs::read_to_string("/proc/meminfo").await {
            Ok(content) => parse_meminfo(&content).unwrap_or(0.0),
            Err(_) => 0.0,
        };
        let cpu_count = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);

        Self {
            load_average,
            memory_used,
            cpu_count,
            uptime_secs: started.elapsed().as_secs(),
        }
    }
}

/// Parse the first field of /proc/loadavg
pub(crate) fn parse_loadavg(content: &str) -> Option<f64> {
    content.split_whitespace().next()?.parse().ok()
}

/// Compute used-memory fraction from /proc/meminfo
pub(crate) fn parse_meminfo(content: &str) -> Option<f64> {
    let mut total = None;
    let mut available = None;
    for line in content.lines() {
        let mut parts = line.split_whitespace();
        match parts.next() {
            Some("MemTotal:") => total = parts.next().and_then(|v| v.parse::<f64>().ok()),
            Some("MemAvailable:") => available = parts.next().and_then(|v| v.parse::<f64>().ok()),
            _ => {}
        }
    }
    let (total, available) = (total?, available?);
    if total <= 0.0 {
        return None;
    }
    Some(((total - available) / total).clamp(0.0, 1.0))
}

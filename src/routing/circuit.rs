//! Per-endpoint circuit breakers.
//!
//! A breaker opens after `threshold` consecutive failed outcomes and stays open
//! for `timeout`. Once the timeout passes the endpoint is half-open: one success
//! closes the circuit, one failure reopens it.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Observable breaker state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CircuitSettings {
    /// Consecutive failures that open the circuit
    pub threshold: u32,
    /// How long an opened circuit excludes the endpoint
    pub timeout: Duration,
}

impl Default for CircuitSettings {
    fn default() -> Self {
        Self {
            threshold: 5,
            timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Breaker {
    consecutive_failures: u32,
    /// Set while open or half-open
    open_until: Option<Instant>,
}

impl Breaker {
    fn state_at(&self, now: Instant) -> CircuitState {
        match self.open_until {
            None => CircuitState::Closed,
            Some(until) if now < until => CircuitState::Open,
            Some(_) => CircuitState::HalfOpen,
        }
    }
}

/// Breaker bookkeeping for every endpoint that has reported an outcome
#[derive(Debug, Default)]
pub struct CircuitBreakers {
    breakers: HashMap<String, Breaker>,
}

impl CircuitBreakers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state_at(&self, id: &str, now: Instant) -> CircuitState {
        self.breakers
            .get(id)
            .map(|b| b.state_at(now))
            .unwrap_or(CircuitState::Closed)
    }

    pub fn consecutive_failures(&self, id: &str) -> u32 {
        self.breakers.get(id).map(|b| b.consecutive_failures).unwrap_or(0)
    }

    /// Record a call outcome and return the resulting state
    pub fn record_at(&mut self, id: &str, success: bool, settings: &CircuitSettings, now: Instant) -> CircuitState {
        let breaker = self.breakers.entry(id.to_string()).or_default();
        let before = breaker.state_at(now);

        if success {
            breaker.consecutive_failures = 0;
            breaker.open_until = None;
            if before != CircuitState::Closed {
                tracing::info!(endpoint = id, "Circuit closed");
            }
            return CircuitState::Closed;
        }

        breaker.consecutive_failures = breaker.consecutive_failures.saturating_add(1);
        let reopen = before == CircuitState::HalfOpen;
        if reopen || (before == CircuitState::Closed && breaker.consecutive_failures >= settings.threshold) {
            breaker.open_until = Some(now + settings.timeout);
            tracing::warn!(
                endpoint = id,
                consecutive_failures = breaker.consecutive_failures,
                open_secs = settings.timeout.as_secs(),
                half_open_probe_failed = reopen,
                "Circuit opened"
            );
        }
        breaker.state_at(now)
    }

    /// Drop state for an endpoint that no longer exists
    pub fn forget(&mut self, id: &str) {
        self.breakers.remove(id);
    }

    /// Ids whose circuit is currently open, sorted
    pub fn open_at(&self, now: Instant) -> Vec<String> {
        let mut ids: Vec<String> = self
            .breakers
            .iter()
            .filter(|(_, b)| b.state_at(now) == CircuitState::Open)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }
}

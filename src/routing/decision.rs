//! Routing decisions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::request::Priority;
use super::scoring::ScoreBreakdown;

/// Alternatives carried alongside the chosen endpoint
pub const MAX_ALTERNATIVES: usize = 4;

/// One scored candidate
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoredCandidate {
    pub endpoint_id: String,
    pub score: f64,
    pub breakdown: ScoreBreakdown,
    pub current_concurrent: u32,
}

/// Outcome of a successful `route()` call. Never mutated after return.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoutingDecision {
    pub request_id: String,
    pub capability: String,
    pub priority: Priority,
    pub endpoint_id: String,
    pub score: f64,
    pub reasoning: String,
    /// Next best candidates, best first
    pub alternatives: Vec<ScoredCandidate>,
    /// Chosen with the concurrency bound relaxed
    pub degraded: bool,
    pub timestamp: DateTime<Utc>,
}

impl RoutingDecision {
    /// Ids of the chosen endpoint followed by the alternatives
    pub fn ranked_ids(&self) -> Vec<&str> {
        std::iter::once(self.endpoint_id.as_str())
            .chain(self.alternatives.iter().map(|c| c.endpoint_id.as_str()))
            .collect()
    }
}

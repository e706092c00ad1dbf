//! Composite endpoint scoring

use serde::{Deserialize, Serialize};

use crate::error::{AgentError, Result};
use crate::registry::ToolEndpoint;

const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

/// Relative importance of each sub-score. Must sum to 1.0.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RoutingWeights {
    pub health: f64,
    pub capacity: f64,
    pub latency: f64,
    pub reliability: f64,
}

impl Default for RoutingWeights {
    fn default() -> Self {
        Self {
            health: 0.35,
            capacity: 0.25,
            latency: 0.20,
            reliability: 0.20,
        }
    }
}

impl RoutingWeights {
    pub fn sum(&self) -> f64 {
        self.health + self.capacity + self.latency + self.reliability
    }

    /// Each weight must be non-negative and the total must be 1.0
    pub fn validate(&self) -> Result<()> {
        let all = [self.health, self.capacity, self.latency, self.reliability];
        if all.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(AgentError::Config(format!(
                "routing weights must be non-negative, got {:?}",
                self
            )));
        }
        let sum = self.sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(AgentError::Config(format!("routing weights must sum to 1.0, got {}", sum)));
        }
        Ok(())
    }
}

/// The factor contributing most to a score
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ScoreFactor {
    Health,
    Capacity,
    Latency,
    Reliability,
}

impl std::fmt::Display for ScoreFactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Health => "health",
            Self::Capacity => "capacity",
            Self::Latency => "latency",
            Self::Reliability => "reliability",
        };
        f.write_str(s)
    }
}

/// Normalized sub-scores, each in [0, 1]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ScoreBreakdown {
    pub health: f64,
    pub capacity: f64,
    pub latency: f64,
    pub reliability: f64,
}

impl ScoreBreakdown {
    pub fn for_endpoint(endpoint: &ToolEndpoint, latency_threshold_ms: f64) -> Self {
        let capacity = if endpoint.max_concurrent == 0 {
            0.0
        } else {
            (1.0 - endpoint.current_concurrent as f64 / endpoint.max_concurrent as f64).max(0.0)
        };
        let latency = if latency_threshold_ms > 0.0 {
            (1.0 - endpoint.load.avg_response_time / latency_threshold_ms).clamp(0.0, 1.0)
        } else {
            0.0
        };

        Self {
            health: endpoint.health.score(),
            capacity,
            latency,
            reliability: endpoint.load.reliability(),
        }
    }

    fn weighted(&self, weights: &RoutingWeights) -> [(ScoreFactor, f64); 4] {
        [
            (ScoreFactor::Health, self.health * weights.health),
            (ScoreFactor::Capacity, self.capacity * weights.capacity),
            (ScoreFactor::Latency, self.latency * weights.latency),
            (ScoreFactor::Reliability, self.reliability * weights.reliability),
        ]
    }

    /// Weighted sum of the sub-scores
    pub fn total(&self, weights: &RoutingWeights) -> f64 {
        self.weighted(weights).iter().map(|(_, v)| v).sum()
    }

    /// Largest weighted contribution; ties go to the earlier factor
    pub fn dominant(&self, weights: &RoutingWeights) -> ScoreFactor {
        let mut best = (ScoreFactor::Health, f64::NEG_INFINITY);
        for (factor, value) in self.weighted(weights) {
            if value > best.1 {
                best = (factor, value);
            }
        }
        best.0
    }
}

//! Router: candidate filtering, scoring and ranking over a registry snapshot

use std::cmp::Ordering;
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use chrono::Utc;
use log::debug;
use tokio::time::Instant;

use crate::config::AgentConfig;
use crate::error::{AgentError, Result};
use crate::registry::ToolEndpoint;

use super::circuit::{CircuitBreakers, CircuitSettings, CircuitState};
use super::decision::{MAX_ALTERNATIVES, RoutingDecision, ScoredCandidate};
use super::request::RoutingRequest;
use super::scoring::{RoutingWeights, ScoreBreakdown};

/// Tunables the router reads on every call
#[derive(Debug, Clone, PartialEq)]
pub struct RouterSettings {
    pub weights: RoutingWeights,
    pub latency_threshold_ms: f64,
    pub failover_enabled: bool,
    pub circuit: CircuitSettings,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            weights: RoutingWeights::default(),
            latency_threshold_ms: 1000.0,
            failover_enabled: true,
            circuit: CircuitSettings::default(),
        }
    }
}

impl RouterSettings {
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            weights: config.routing_weights,
            latency_threshold_ms: config.latency_threshold,
            failover_enabled: config.failover_enabled,
            circuit: CircuitSettings {
                threshold: config.circuit_breaker_threshold,
                timeout: Duration::from_secs(config.circuit_breaker_timeout),
            },
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.weights.validate()?;
        if !(self.latency_threshold_ms > 0.0) {
            return Err(AgentError::Config(format!(
                "latency_threshold must be > 0, got {}",
                self.latency_threshold_ms
            )));
        }
        if self.circuit.threshold == 0 {
            return Err(AgentError::Config("circuit_breaker_threshold must be >= 1".into()));
        }
        Ok(())
    }
}

/// Selects the best endpoint for a capability. Holds no endpoint state beyond
/// circuit breakers.
pub struct Router {
    settings: RwLock<RouterSettings>,
    breakers: Mutex<CircuitBreakers>,
}

impl Router {
    pub fn new(settings: RouterSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            settings: RwLock::new(settings),
            breakers: Mutex::new(CircuitBreakers::new()),
        })
    }

    pub fn settings(&self) -> RouterSettings {
        self.settings.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn breakers(&self) -> MutexGuard<'_, CircuitBreakers> {
        self.breakers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pick an endpoint for `request` from `snapshot`
    pub fn route(&self, request: &RoutingRequest, snapshot: &[ToolEndpoint]) -> Result<RoutingDecision> {
        self.route_at(request, snapshot, Instant::now())
    }

    pub fn route_at(&self, request: &RoutingRequest, snapshot: &[ToolEndpoint], now: Instant) -> Result<RoutingDecision> {
        let settings = self.settings();

        let eligible: Vec<&ToolEndpoint> = {
            let breakers = self.breakers();
            snapshot
                .iter()
                .filter(|e| e.has_capability(&request.capability))
                .filter(|e| e.health.is_routable())
                .filter(|e| breakers.state_at(&e.id, now) != CircuitState::Open)
                .collect()
        };

        let strict: Vec<&ToolEndpoint> = eligible.iter().copied().filter(|e| e.has_capacity()).collect();
        let (candidates, degraded) = if !strict.is_empty() {
            (strict, false)
        } else if settings.failover_enabled && !eligible.is_empty() {
            (eligible, true)
        } else {
            debug!(
                "No endpoint for {} ({} eligible ignoring capacity)",
                request.capability,
                eligible.len()
            );
            return Err(AgentError::NoAvailableEndpoint {
                capability: request.capability.clone(),
            });
        };

        let mut ranked: Vec<ScoredCandidate> = candidates
            .into_iter()
            .map(|e| {
                let breakdown = ScoreBreakdown::for_endpoint(e, settings.latency_threshold_ms);
                ScoredCandidate {
                    endpoint_id: e.id.clone(),
                    score: breakdown.total(&settings.weights),
                    breakdown,
                    current_concurrent: e.current_concurrent,
                }
            })
            .collect();
        ranked.sort_by(rank_order);

        // Both candidate sets above are non-empty
        let mut ranked = ranked.into_iter();
        let Some(best) = ranked.next() else {
            return Err(AgentError::NoAvailableEndpoint {
                capability: request.capability.clone(),
            });
        };
        let alternatives: Vec<ScoredCandidate> = ranked.take(MAX_ALTERNATIVES).collect();

        let dominant = best.breakdown.dominant(&settings.weights);
        let mut reasoning = format!(
            "{} scored {:.3} for '{}', driven by {}",
            best.endpoint_id, best.score, request.capability, dominant
        );
        if degraded {
            reasoning.push_str("; no endpoint had spare capacity, concurrency bound relaxed");
        }

        tracing::debug!(
            request_id = %request.request_id,
            endpoint = %best.endpoint_id,
            score = best.score,
            alternatives = alternatives.len(),
            degraded,
            "Routed request"
        );

        Ok(RoutingDecision {
            request_id: request.request_id.clone(),
            capability: request.capability.clone(),
            priority: request.priority,
            endpoint_id: best.endpoint_id,
            score: best.score,
            reasoning,
            alternatives,
            degraded,
            timestamp: Utc::now(),
        })
    }

    /// Feed a call outcome into the endpoint's breaker
    pub fn record_outcome(&self, endpoint_id: &str, success: bool) -> CircuitState {
        self.record_outcome_at(endpoint_id, success, Instant::now())
    }

    pub fn record_outcome_at(&self, endpoint_id: &str, success: bool, now: Instant) -> CircuitState {
        let circuit = self.settings().circuit;
        self.breakers().record_at(endpoint_id, success, &circuit, now)
    }

    pub fn circuit_state(&self, endpoint_id: &str) -> CircuitState {
        self.breakers().state_at(endpoint_id, Instant::now())
    }

    pub fn open_circuits(&self) -> Vec<String> {
        self.breakers().open_at(Instant::now())
    }

    /// Drop breaker state of a removed endpoint
    pub fn forget(&self, endpoint_id: &str) {
        self.breakers().forget(endpoint_id);
    }

    /// Swap in new settings once they validate
    pub fn replace_settings(&self, settings: RouterSettings) -> Result<()> {
        settings.validate()?;
        *self.settings.write().unwrap_or_else(PoisonError::into_inner) = settings;
        Ok(())
    }
}

impl Default for Router {
    fn default() -> Self {
        Self {
            settings: RwLock::new(RouterSettings::default()),
            breakers: Mutex::new(CircuitBreakers::new()),
        }
    }
}

/// Score descending, then fewer in-flight requests, then id
fn rank_order(a: &ScoredCandidate, b: &ScoredCandidate) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.current_concurrent.cmp(&b.current_concurrent))
        .then_with(|| a.endpoint_id.cmp(&b.endpoint_id))
}

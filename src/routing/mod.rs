//! Routing engine
//!
//! Filters a registry snapshot down to eligible endpoints, scores them as a
//! weighted sum of health, capacity, latency and reliability, and returns the
//! best one with ranked alternatives. Per-endpoint circuit breakers are the
//! only state the router keeps.

mod circuit;
mod decision;
mod engine;
mod request;
mod scoring;

pub use circuit::{CircuitBreakers, CircuitSettings, CircuitState};
pub use decision::{MAX_ALTERNATIVES, RoutingDecision, ScoredCandidate};
pub use engine::{Router, RouterSettings};
pub use request::{Priority, RoutingRequest};
pub use scoring::{RoutingWeights, ScoreBreakdown, ScoreFactor};

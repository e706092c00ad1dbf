//! Telemetry model shared by the registry, router and heartbeat channel
//!
//! - HealthState: the four health tiers and their routing scores
//! - HealthThresholds: derivation of a tier from load and staleness
//! - LoadMetrics: per-endpoint load report, replaced wholesale
//! - ResourceSnapshot: host resource sampling for heartbeat envelopes

mod health;
mod load;
mod resources;

pub use health::{HealthState, HealthThresholds};
pub use load::LoadMetrics;
pub use resources::ResourceSnapshot;

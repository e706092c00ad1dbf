//! capagent - edge-side local capability agent
//!
//! Keeps a live directory of locally hosted tool endpoints, routes capability
//! requests to the best available endpoint, and reports status to a remote
//! controller over a self-healing heartbeat channel.

pub mod adapter;
pub mod config;
pub mod error;
pub mod heartbeat;
pub mod id;
pub mod registry;
pub mod routing;
pub mod telemetry;

pub use adapter::{Adapter, AggregateHealth, OverallStatus};
pub use config::AgentConfig;
pub use error::{AgentError, Result};

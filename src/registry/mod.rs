//! Tool registry
//!
//! Owns every endpoint record. Other components read snapshots and subscribe
//! to change events; only the registry mutates records.

mod discovery;
mod endpoint;
mod events;
mod store;

pub use discovery::{DiscoveryReport, DiscoverySources, run_discovery_loop};
pub use endpoint::{EndpointOrigin, EndpointSpec, ToolEndpoint};
pub use events::RegistryEvent;
pub use store::ToolRegistry;

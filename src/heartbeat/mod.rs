//! Heartbeat channel to the remote controller
//!
//! - ConnectionState / ConnectionStats: link state machine and counters
//! - Backoff: doubling retry delay with a cap
//! - HeartbeatEnvelope / HeartbeatResponse / HeartbeatCommand: wire types
//! - HeartbeatTransport: send seam, with the reqwest-backed HttpTransport
//! - HeartbeatChannel: the cancellable send loop and its event stream

mod backoff;
mod channel;
mod envelope;
mod state;
mod transport;

pub use backoff::Backoff;
pub use channel::{ChannelEvent, HeartbeatChannel, HeartbeatSettings};
pub use envelope::{ConnectionSummary, EndpointStatus, HeartbeatCommand, HeartbeatEnvelope, HeartbeatResponse};
pub use state::{ConnectionState, ConnectionStats};
pub use transport::{HeartbeatTransport, HttpTransport};

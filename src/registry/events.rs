//! Registry change notifications

use serde::{Deserialize, Serialize};

use crate::telemetry::HealthState;

/// Emitted on every registry mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RegistryEvent {
    Registered { id: String },
    Updated { id: String, health: HealthState },
    Deregistered { id: String },
    /// Discovery no longer sees the endpoint; it is kept for the grace period
    MarkedUnavailable { id: String, missed_scans: u32 },
    /// Grace period exhausted
    Removed { id: String },
}

impl RegistryEvent {
    /// Endpoint id this event concerns
    pub fn endpoint_id(&self) -> &str {
        match self {
            Self::Registered { id }
            | Self::Updated { id, .. }
            | Self::Deregistered { id }
            | Self::MarkedUnavailable { id, .. }
            | Self::Removed { id } => id,
        }
    }

    /// Whether the endpoint no longer exists after this event
    pub fn is_removal(&self) -> bool {
        matches!(self, Self::Deregistered { .. } | Self::Removed { .. })
    }
}

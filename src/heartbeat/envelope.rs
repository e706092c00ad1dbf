//! Heartbeat wire types
//!
//! Outbound `HeartbeatEnvelope`, inbound `HeartbeatResponse` and the commands
//! it may carry. Commands arrive as `{type, data}`; unrecognised types are kept
//! as `HeartbeatCommand::Unknown` so newer controllers do not break older agents.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::registry::ToolEndpoint;
use crate::telemetry::{HealthState, LoadMetrics, ResourceSnapshot};

use super::state::{ConnectionState, ConnectionStats};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionSummary {
    pub state: ConnectionState,
    pub uptime_secs: u64,
    pub total_heartbeats: u64,
    pub successful_heartbeats: u64,
    pub failed_heartbeats: u64,
    pub consecutive_failures: u32,
}

impl ConnectionSummary {
    pub fn new(state: ConnectionState, stats: &ConnectionStats) -> Self {
        Self {
            state,
            uptime_secs: stats.uptime_secs(),
            total_heartbeats: stats.total_heartbeats,
            successful_heartbeats: stats.successful_heartbeats,
            failed_heartbeats: stats.failed_heartbeats,
            consecutive_failures: stats.consecutive_failures,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EndpointStatus {
    pub health: HealthState,
    pub load: LoadMetrics,
    pub last_updated: DateTime<Utc>,
}

impl From<&ToolEndpoint> for EndpointStatus {
    fn from(endpoint: &ToolEndpoint) -> Self {
        Self {
            health: endpoint.health,
            load: endpoint.load.clone(),
            last_updated: endpoint.last_updated,
        }
    }
}

/// Periodic status report. Built fresh for every send.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HeartbeatEnvelope {
    pub adapter_id: String,
    pub sequence_number: u64,
    pub timestamp: DateTime<Utc>,
    pub connection: ConnectionSummary,
    pub resources: ResourceSnapshot,
    pub endpoints: BTreeMap<String, EndpointStatus>,
    pub configuration_version: String,
    pub capabilities: BTreeSet<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

/// Controller reply
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HeartbeatResponse {
    pub success: bool,
    pub server_timestamp: Option<String>,
    /// Seconds until the next heartbeat
    pub next_heartbeat_interval: Option<f64>,
    pub commands: Vec<HeartbeatCommand>,
    pub configuration_updates: Map<String, Value>,
    pub message: Option<String>,
}

impl HeartbeatResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    pub fn with_command(mut self, command: HeartbeatCommand) -> Self {
        self.commands.push(command);
        self
    }

    pub fn with_next_interval(mut self, secs: f64) -> Self {
        self.next_heartbeat_interval = Some(secs);
        self
    }
}

/// Command issued by the controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawCommand", into = "RawCommand")]
pub enum HeartbeatCommand {
    UpdateConfig(Map<String, Value>),
    RestartHeartbeat,
    SyncTools,
    Unknown { kind: String, data: Value },
}

impl HeartbeatCommand {
    pub fn kind(&self) -> &str {
        match self {
            Self::UpdateConfig(_) => "update_config",
            Self::RestartHeartbeat => "restart_heartbeat",
            Self::SyncTools => "sync_tools",
            Self::Unknown { kind, .. } => kind,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawCommand {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

impl From<RawCommand> for HeartbeatCommand {
    fn from(raw: RawCommand) -> Self {
        match raw.kind.as_str() {
            "update_config" => Self::UpdateConfig(match raw.data {
                Value::Object(map) => map,
                _ => Map::new(),
            }),
            "restart_heartbeat" => Self::RestartHeartbeat,
            "sync_tools" => Self::SyncTools,
            _ => Self::Unknown {
                kind: raw.kind,
                data: raw.data,
            },
        }
    }
}

impl From<HeartbeatCommand> for RawCommand {
    fn from(command: HeartbeatCommand) -> Self {
        let kind = command.kind().to_string();
        let data = match command {
            HeartbeatCommand::UpdateConfig(map) => Value::Object(map),
            HeartbeatCommand::Unknown { data, .. } => data,
            _ => Value::Null,
        };
        Self { kind, data }
    }
}

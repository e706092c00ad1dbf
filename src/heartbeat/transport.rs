//! Heartbeat transport
//!
//! The channel talks to the controller through the `HeartbeatTransport` trait,
//! so tests can script responses without a network.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::config::AgentConfig;
use crate::error::{AgentError, Result};

use super::envelope::{HeartbeatEnvelope, HeartbeatResponse};

/// Sends one envelope and returns the controller's reply
#[async_trait]
pub trait HeartbeatTransport: Send + Sync {
    async fn send(&self, envelope: &HeartbeatEnvelope) -> Result<HeartbeatResponse>;
}

/// JSON over HTTP POST
pub struct HttpTransport {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpTransport {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AgentError::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key,
        })
    }

    pub fn from_config(config: &AgentConfig) -> Result<Self> {
        Self::new(config.cloud_endpoint.clone(), config.api_key.clone())
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

fn classify(e: reqwest::Error) -> AgentError {
    if e.is_timeout() {
        AgentError::Timeout(format!("heartbeat request timed out: {}", e))
    } else {
        AgentError::Transport(format!("Request failed: {}", e))
    }
}

#[async_trait]
impl HeartbeatTransport for HttpTransport {
    async fn send(&self, envelope: &HeartbeatEnvelope) -> Result<HeartbeatResponse> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .header("content-type", "application/json")
            .json(envelope);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(classify)?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AgentError::Transport(format!("Controller error {}: {}", status, body)));
        }

        response.json().await.map_err(|e| {
            if e.is_decode() {
                AgentError::Transport(format!("Failed to parse response: {}", e))
            } else {
                classify(e)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_transport_from_config() {
        let config = AgentConfig {
            cloud_endpoint: "https://controller.example/heartbeat".to_string(),
            api_key: Some("k".to_string()),
            ..AgentConfig::default()
        };
        let transport = HttpTransport::from_config(&config).unwrap();
        assert_eq!(transport.endpoint(), "https://controller.example/heartbeat");
    }

    #[tokio::test]
    async fn test_unreachable_controller_is_transport_error() {
        let transport = HttpTransport::new("http://127.0.0.1:9/heartbeat", None).unwrap();
        let envelope: HeartbeatEnvelope = serde_json::from_value(serde_json::json!({
            "adapter_id": "a",
            "sequence_number": 1,
            "timestamp": "2026-01-01T00:00:00Z",
            "connection": {
                "state": "connecting",
                "uptime_secs": 0,
                "total_heartbeats": 0,
                "successful_heartbeats": 0,
                "failed_heartbeats": 0,
                "consecutive_failures": 0
            },
            "resources": {"load_average": 0.0, "memory_used": 0.0, "cpu_count": 1, "uptime_secs": 0},
            "endpoints": {},
            "configuration_version": "abc",
            "capabilities": []
        }))
        .unwrap();

        let err = transport.send(&envelope).await.unwrap_err();
        assert!(err.is_retryable());
    }
}

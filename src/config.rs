//! Agent configuration
//!
//! Loaded from --config, ./capagent.yml or ~/.config/capagent/capagent.yml.
//! Intervals, timeouts and delays are whole seconds; `latency_threshold` is milliseconds.

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::AgentError;
use crate::id::generate_adapter_id;
use crate::registry::EndpointSpec;
use crate::routing::RoutingWeights;
use crate::telemetry::HealthThresholds;

/// Environment variable consulted when `api_key` is not set in the file
pub const API_KEY_ENV: &str = "CAPAGENT_API_KEY";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    pub log_level: Option<String>,
    pub adapter_id: String,
    pub cloud_endpoint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub heartbeat_interval: u64,
    pub heartbeat_timeout: u64,
    pub retry_count: u32,
    pub retry_delay: u64,
    pub max_retry_delay: u64,
    pub discovery_interval: u64,
    pub stale_after: u64,
    pub load_threshold: f64,
    pub latency_threshold: f64,
    pub error_rate_threshold: f64,
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_timeout: u64,
    pub failover_enabled: bool,
    pub routing_weights: RoutingWeights,
    pub discovery: DiscoveryConfig,
    pub metadata: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Manifest files or directories of manifests
    pub paths: Vec<PathBuf>,
    pub static_endpoints: Vec<EndpointSpec>,
    /// Missed scans tolerated before a vanished endpoint is removed
    pub grace_scans: u32,
    /// Blocking worker slots for manifest reads
    pub workers: usize,
    pub scan_timeout: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            paths: Vec::new(),
            static_endpoints: Vec::new(),
            grace_scans: 3,
            workers: 4,
            scan_timeout: 30,
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            log_level: Some("info".to_string()),
            adapter_id: generate_adapter_id(),
            cloud_endpoint: "http://localhost:8080/api/v1/adapters/heartbeat".to_string(),
            api_key: None,
            heartbeat_interval: 30,
            heartbeat_timeout: 10,
            retry_count: 3,
            retry_delay: 1,
            max_retry_delay: 60,
            discovery_interval: 60,
            stale_after: 90,
            load_threshold: 0.8,
            latency_threshold: 1000.0,
            error_rate_threshold: 0.1,
            circuit_breaker_threshold: 5,
            circuit_breaker_timeout: 60,
            failover_enabled: true,
            routing_weights: RoutingWeights::default(),
            discovery: DiscoveryConfig::default(),
            metadata: BTreeMap::new(),
        }
    }
}

impl AgentConfig {
    /// Load configuration with fallback chain
    ///
    /// Search order:
    /// 1. Explicit path if provided
    /// 2. ./capagent.yml
    /// 3. ~/.config/capagent/capagent.yml
    /// 4. Defaults
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        let mut config = Self::locate(config_path)?;
        if config.api_key.is_none() {
            config.api_key = std::env::var(API_KEY_ENV).ok().filter(|k| !k.is_empty());
        }
        Ok(config)
    }

    fn locate(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        let project_name = env!("CARGO_PKG_NAME");
        let fallback_config = PathBuf::from(format!("{}.yml", project_name));
        if fallback_config.exists() {
            match Self::load_from_file(&fallback_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load config from {}: {}", fallback_config.display(), e);
                }
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join(project_name).join(format!("{}.yml", project_name));
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Validate weights and thresholds. Failure is fatal at startup.
    pub fn validate(&self) -> crate::Result<()> {
        if self.adapter_id.trim().is_empty() {
            return Err(AgentError::Config("adapter_id must not be empty".into()));
        }
        self.routing_weights.validate()?;
        if !(self.load_threshold > 0.0 && self.load_threshold <= 1.0) {
            return Err(AgentError::Config(format!(
                "load_threshold must be in (0, 1], got {}",
                self.load_threshold
            )));
        }
        if !(self.error_rate_threshold > 0.0 && self.error_rate_threshold <= 1.0) {
            return Err(AgentError::Config(format!(
                "error_rate_threshold must be in (0, 1], got {}",
                self.error_rate_threshold
            )));
        }
        if !(self.latency_threshold > 0.0) {
            return Err(AgentError::Config(format!(
                "latency_threshold must be > 0, got {}",
                self.latency_threshold
            )));
        }
        if self.circuit_breaker_threshold == 0 {
            return Err(AgentError::Config("circuit_breaker_threshold must be >= 1".into()));
        }
        if self.heartbeat_interval == 0 {
            return Err(AgentError::Config("heartbeat_interval must be > 0".into()));
        }
        if self.heartbeat_timeout == 0 {
            return Err(AgentError::Config("heartbeat_timeout must be > 0".into()));
        }
        if self.retry_delay == 0 {
            return Err(AgentError::Config("retry_delay must be > 0".into()));
        }
        if self.max_retry_delay < self.retry_delay {
            return Err(AgentError::Config(format!(
                "max_retry_delay ({}) must be >= retry_delay ({})",
                self.max_retry_delay, self.retry_delay
            )));
        }
        if self.discovery_interval == 0 {
            return Err(AgentError::Config("discovery_interval must be > 0".into()));
        }
        if self.discovery.workers == 0 {
            return Err(AgentError::Config("discovery.workers must be >= 1".into()));
        }
        Ok(())
    }

    /// Merge runtime updates from the controller.
    ///
    /// Nested objects such as `routing_weights` merge field by field; other
    /// values replace the current one. Unknown keys are ignored. The merged
    /// result must validate, otherwise the configuration is left untouched.
    pub fn apply_updates(&mut self, updates: &Map<String, Value>) -> crate::Result<Vec<String>> {
        let mut current = serde_json::to_value(&*self)?;
        let mut applied = Vec::new();
        if let Some(object) = current.as_object_mut() {
            for (key, value) in updates {
                if key == "adapter_id" || key == "api_key" {
                    continue;
                }
                if let Some(slot) = object.get_mut(key) {
                    merge_value(slot, value);
                    applied.push(key.clone());
                }
            }
        }
        if applied.is_empty() {
            return Ok(applied);
        }

        let mut merged: AgentConfig = serde_json::from_value(current)
            .map_err(|e| AgentError::Config(format!("invalid configuration update: {}", e)))?;
        merged.api_key = self.api_key.clone();
        merged.validate()?;
        *self = merged;
        Ok(applied)
    }

    /// Short content hash of the effective configuration (secrets excluded)
    pub fn version(&self) -> String {
        let mut redacted = self.clone();
        redacted.api_key = None;
        let bytes = serde_json::to_vec(&redacted).unwrap_or_default();
        let digest = Sha256::digest(&bytes);
        hex::encode(&digest[..6])
    }

    pub fn health_thresholds(&self) -> HealthThresholds {
        HealthThresholds {
            load_threshold: self.load_threshold,
            latency_threshold_ms: self.latency_threshold,
            error_rate_threshold: self.error_rate_threshold,
            stale_after: Duration::from_secs(self.stale_after),
        }
    }

    pub fn discovery_interval(&self) -> Duration {
        Duration::from_secs(self.discovery_interval)
    }
}

/// Overlay `patch` onto `target`, recursing into objects present on both sides
fn merge_value(target: &mut Value, patch: &Value) {
    match (target.as_object_mut(), patch.as_object()) {
        (Some(current), Some(fields)) => {
            for (key, value) in fields {
                match current.get_mut(key) {
                    Some(slot) => merge_value(slot, value),
                    None => {
                        current.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        _ => *target = patch.clone(),
    }
}

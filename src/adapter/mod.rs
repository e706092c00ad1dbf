//! Adapter: composition root
//!
//! Builds the registry, router and heartbeat channel from one configuration and
//! wires them together. Collaborators only use this surface: register or
//! update a tool, route a capability request, report the outcome, read health.

mod health;
mod pump;

pub use health::{AggregateHealth, OverallStatus};

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{debug, info};
use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::AgentConfig;
use crate::error::{AgentError, Result};
use crate::heartbeat::{HeartbeatChannel, HeartbeatTransport, HttpTransport};
use crate::registry::{
    DiscoveryReport, DiscoverySources, EndpointOrigin, EndpointSpec, ToolEndpoint, ToolRegistry, run_discovery_loop,
};
use crate::routing::{CircuitState, Priority, Router, RouterSettings, RoutingDecision, RoutingRequest};
use crate::telemetry::{HealthState, LoadMetrics};

use pump::EventPump;

/// How long a routed decision waits for its outcome report
const PENDING_OUTCOME_TTL: Duration = Duration::from_secs(600);

#[derive(Debug, Clone)]
struct PendingOutcome {
    endpoint_id: String,
    routed_at: Instant,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct Adapter {
    config: Arc<Mutex<AgentConfig>>,
    registry: Arc<ToolRegistry>,
    router: Arc<Router>,
    heartbeat: Arc<HeartbeatChannel>,
    pending: Mutex<HashMap<String, PendingOutcome>>,
    routing_failures: AtomicU64,
    outcome_failures: AtomicU64,
    tasks: TaskTracker,
    cancel: Mutex<Option<CancellationToken>>,
}

impl Adapter {
    /// Build the agent. Invalid configuration fails here, before anything starts.
    pub fn new(config: AgentConfig, transport: Arc<dyn HeartbeatTransport>) -> Result<Self> {
        config.validate()?;

        let registry = Arc::new(
            ToolRegistry::new(config.health_thresholds()).with_discovery(DiscoverySources::from_config(&config.discovery)),
        );
        let router = Arc::new(Router::new(RouterSettings::from_config(&config))?);
        let config = Arc::new(Mutex::new(config));
        let heartbeat = Arc::new(HeartbeatChannel::with_shared_config(
            Arc::clone(&config),
            Arc::clone(&registry),
            transport,
        ));

        Ok(Self {
            config,
            registry,
            router,
            heartbeat,
            pending: Mutex::new(HashMap::new()),
            routing_failures: AtomicU64::new(0),
            outcome_failures: AtomicU64::new(0),
            tasks: TaskTracker::new(),
            cancel: Mutex::new(None),
        })
    }

    /// Build the agent with the HTTP heartbeat transport
    pub fn from_config(config: AgentConfig) -> Result<Self> {
        let transport = HttpTransport::from_config(&config)?;
        Self::new(config, Arc::new(transport))
    }

    /// Start the heartbeat loop, the discovery loop and the event pump
    pub fn start(&self) {
        let mut cancel_slot = lock(&self.cancel);
        if cancel_slot.is_some() {
            debug!("Adapter already started");
            return;
        }
        let cancel = CancellationToken::new();

        let pump = EventPump {
            config: Arc::clone(&self.config),
            router: Arc::clone(&self.router),
        };
        self.tasks
            .spawn(pump.run(self.registry.subscribe(), self.heartbeat.subscribe(), cancel.clone()));

        let interval = lock(&self.config).discovery_interval();
        self.tasks
            .spawn(run_discovery_loop(Arc::clone(&self.registry), interval, cancel.clone()));

        self.heartbeat.start();
        *cancel_slot = Some(cancel);
        info!("Adapter {} started", self.adapter_id());
    }

    /// Stop every background task and disconnect
    pub async fn stop(&self) {
        let cancel = lock(&self.cancel).take();
        if let Some(cancel) = cancel {
            cancel.cancel();
        }
        self.heartbeat.stop().await;
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
        info!("Adapter {} stopped", self.adapter_id());
    }

    pub fn adapter_id(&self) -> String {
        lock(&self.config).adapter_id.clone()
    }

    /// Current effective configuration
    pub fn config(&self) -> AgentConfig {
        lock(&self.config).clone()
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    pub fn heartbeat(&self) -> &Arc<HeartbeatChannel> {
        &self.heartbeat
    }

    /// Register a tool, or replace the static attributes of one already known
    pub fn register_or_update_tool(&self, spec: EndpointSpec) -> Result<String> {
        self.registry.upsert(spec, EndpointOrigin::Manual)
    }

    pub fn update_tool_status(&self, id: &str, health: Option<HealthState>, load: LoadMetrics) -> Result<()> {
        self.registry.update_status(id, health, load)
    }

    pub fn deregister_tool(&self, id: &str) -> Result<ToolEndpoint> {
        self.registry.deregister(id)
    }

    /// Run one discovery scan now
    pub async fn discover(&self) -> Result<DiscoveryReport> {
        self.registry.discover().await
    }

    /// Choose an endpoint for `capability`. The decision's request id is the
    /// handle for `report_outcome`.
    pub fn route(
        &self,
        capability: &str,
        priority: Priority,
        timeout: Option<Duration>,
        metadata: BTreeMap<String, Value>,
    ) -> Result<RoutingDecision> {
        let mut request = RoutingRequest::new(capability)
            .with_priority(priority)
            .with_metadata(metadata);
        if let Some(timeout) = timeout {
            request = request.with_timeout(timeout);
        }

        let snapshot = self.registry.snapshot(Some(capability));
        let decision = match self.router.route(&request, &snapshot) {
            Ok(decision) => decision,
            Err(e) => {
                self.routing_failures.fetch_add(1, Ordering::Relaxed);
                return Err(e);
            }
        };

        let now = Instant::now();
        let mut pending = lock(&self.pending);
        pending.retain(|_, p| now.duration_since(p.routed_at) < PENDING_OUTCOME_TTL);
        pending.insert(
            decision.request_id.clone(),
            PendingOutcome {
                endpoint_id: decision.endpoint_id.clone(),
                routed_at: now,
            },
        );
        Ok(decision)
    }

    /// Feed the result of calling the chosen endpoint back into its circuit breaker
    pub fn report_outcome(&self, decision_id: &str, success: bool) -> Result<CircuitState> {
        let outcome = lock(&self.pending)
            .remove(decision_id)
            .ok_or_else(|| AgentError::NotFound(format!("decision {}", decision_id)))?;

        if !success {
            self.outcome_failures.fetch_add(1, Ordering::Relaxed);
        }
        Ok(self.router.record_outcome(&outcome.endpoint_id, success))
    }

    pub fn health(&self) -> AggregateHealth {
        let connection = self.heartbeat.state();
        let endpoints_by_health = self.registry.counts_by_health();
        let (adapter_id, configuration_version) = {
            let config = lock(&self.config);
            (config.adapter_id.clone(), config.version())
        };

        AggregateHealth {
            status: OverallStatus::derive(connection, &endpoints_by_health),
            adapter_id,
            connection,
            stats: self.heartbeat.stats(),
            endpoints_by_health,
            open_circuits: self.router.open_circuits(),
            routing_failures: self.routing_failures.load(Ordering::Relaxed),
            outcome_failures: self.outcome_failures.load(Ordering::Relaxed),
            pending_outcomes: lock(&self.pending).len(),
            configuration_version,
        }
    }
}

//! Heartbeat channel
//!
//! One background task per started channel. Each tick builds an envelope from
//! the registry, sends it, and applies whatever the controller sends back.
//! A failed send moves the channel to RECONNECTING and runs up to
//! `retry_count` retries with doubling delays; when those run out the channel
//! sits in ERROR for `max_retry_delay` and then starts over from CONNECTING.
//! Errors never escape the loop, they only show up as state changes and stats.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde_json::{Map, Value};
use tokio::sync::broadcast::{self, error::TryRecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::AgentConfig;
use crate::error::{AgentError, Result};
use crate::registry::{RegistryEvent, ToolRegistry};
use crate::telemetry::ResourceSnapshot;

use super::backoff::Backoff;
use super::envelope::{ConnectionSummary, EndpointStatus, HeartbeatCommand, HeartbeatEnvelope, HeartbeatResponse};
use super::state::{ConnectionState, ConnectionStats};
use super::transport::HeartbeatTransport;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Timing knobs, adjustable at runtime by the controller
#[derive(Debug, Clone, PartialEq)]
pub struct HeartbeatSettings {
    pub interval: Duration,
    pub timeout: Duration,
    pub retry_count: u32,
    pub retry_delay: Duration,
    pub max_retry_delay: Duration,
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self::from_config(&AgentConfig::default())
    }
}

impl HeartbeatSettings {
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            interval: Duration::from_secs(config.heartbeat_interval),
            timeout: Duration::from_secs(config.heartbeat_timeout),
            retry_count: config.retry_count,
            retry_delay: Duration::from_secs(config.retry_delay),
            max_retry_delay: Duration::from_secs(config.max_retry_delay),
        }
    }

    /// Apply the heartbeat keys of a configuration update.
    ///
    /// Values that are not positive integers are skipped. Returns the keys applied.
    pub fn apply_updates(&mut self, updates: &Map<String, Value>) -> Vec<String> {
        let mut applied = Vec::new();
        for (key, value) in updates {
            let target = match key.as_str() {
                "heartbeat_interval" => &mut self.interval,
                "heartbeat_timeout" => &mut self.timeout,
                "retry_delay" => &mut self.retry_delay,
                "max_retry_delay" => &mut self.max_retry_delay,
                "retry_count" => {
                    match value.as_u64().and_then(|n| u32::try_from(n).ok()) {
                        Some(n) => {
                            self.retry_count = n;
                            applied.push(key.clone());
                        }
                        None => warn!("Ignoring invalid retry_count: {}", value),
                    }
                    continue;
                }
                _ => continue,
            };
            match value.as_u64().filter(|secs| *secs > 0) {
                Some(secs) => {
                    *target = Duration::from_secs(secs);
                    applied.push(key.clone());
                }
                None => warn!("Ignoring invalid {}: {}", key, value),
            }
        }
        self.max_retry_delay = self.max_retry_delay.max(self.retry_delay);
        applied
    }
}

/// Notifications published by the channel
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    StateChanged {
        from: ConnectionState,
        to: ConnectionState,
        at: DateTime<Utc>,
    },
    /// Published after the built-in handling of the command
    Command(HeartbeatCommand),
    /// Configuration delta from the controller, published once it has been
    /// merged into the shared configuration
    ConfigUpdated(Map<String, Value>),
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Shared {
    adapter_id: String,
    config: Arc<Mutex<AgentConfig>>,
    registry: Arc<ToolRegistry>,
    transport: Arc<dyn HeartbeatTransport>,
    settings: Mutex<HeartbeatSettings>,
    state: Mutex<ConnectionState>,
    stats: Mutex<ConnectionStats>,
    sequence: AtomicU64,
    configuration_version: Mutex<String>,
    metadata: BTreeMap<String, Value>,
    sample_resources: AtomicBool,
    started: Mutex<std::time::Instant>,
    events: broadcast::Sender<ChannelEvent>,
}

/// What the loop does after a successful send
enum Flow {
    Continue,
    Restart,
}

enum Retry {
    Recovered(HeartbeatResponse, f64),
    Exhausted,
    Cancelled,
}

impl Shared {
    fn settings(&self) -> HeartbeatSettings {
        lock(&self.settings).clone()
    }

    fn transition(&self, to: ConnectionState) {
        let from = {
            let mut state = lock(&self.state);
            std::mem::replace(&mut *state, to)
        };
        if from == to {
            return;
        }
        info!("Heartbeat connection {} -> {}", from, to);
        let _ = self.events.send(ChannelEvent::StateChanged { from, to, at: Utc::now() });
    }

    fn record_failure(&self, error: &AgentError) {
        let consecutive = {
            let mut stats = lock(&self.stats);
            stats.record_failure(error.to_string());
            stats.consecutive_failures
        };
        tracing::warn!(
            error = %error,
            retryable = error.is_retryable(),
            consecutive_failures = consecutive,
            "Heartbeat failed"
        );
    }

    /// Count registry changes since the previous envelope
    fn drain_changes(changes: &mut broadcast::Receiver<RegistryEvent>) -> u64 {
        let mut count = 0;
        loop {
            match changes.try_recv() {
                Ok(_) => count += 1,
                Err(TryRecvError::Lagged(skipped)) => count += skipped,
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
        count
    }

    async fn build_envelope(&self, changes: &mut broadcast::Receiver<RegistryEvent>) -> HeartbeatEnvelope {
        let sequence_number = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let started = *lock(&self.started);
        let resources = if self.sample_resources.load(Ordering::Relaxed) {
            ResourceSnapshot::sample(started).await
        } else {
            ResourceSnapshot {
                uptime_secs: started.elapsed().as_secs(),
                ..ResourceSnapshot::default()
            }
        };

        let snapshot = self.registry.snapshot(None);
        let capabilities = snapshot
            .iter()
            .filter(|e| e.health.is_routable())
            .flat_map(|e| e.capabilities.iter().cloned())
            .collect();
        let endpoints = snapshot.iter().map(|e| (e.id.clone(), EndpointStatus::from(e))).collect();

        let mut metadata = self.metadata.clone();
        metadata.insert("registry_changes".to_string(), Value::from(Self::drain_changes(changes)));

        let state = *lock(&self.state);
        let connection = ConnectionSummary::new(state, &lock(&self.stats));

        HeartbeatEnvelope {
            adapter_id: self.adapter_id.clone(),
            sequence_number,
            timestamp: Utc::now(),
            connection,
            resources,
            endpoints,
            configuration_version: lock(&self.configuration_version).clone(),
            capabilities,
            metadata,
        }
    }

    /// Build and send one envelope. Every call consumes a sequence number.
    async fn send_once(&self, changes: &mut broadcast::Receiver<RegistryEvent>) -> Result<(HeartbeatResponse, f64)> {
        let envelope = self.build_envelope(changes).await;
        let timeout = self.settings().timeout;
        let sent_at = tokio::time::Instant::now();

        let response = tokio::time::timeout(timeout, self.transport.send(&envelope))
            .await
            .map_err(|_| AgentError::Timeout(format!("no controller reply within {}s", timeout.as_secs())))??;
        if !response.success {
            return Err(AgentError::Transport(format!(
                "controller rejected heartbeat {}: {}",
                envelope.sequence_number,
                response.message.as_deref().unwrap_or("no message")
            )));
        }

        Ok((response, sent_at.elapsed().as_secs_f64() * 1000.0))
    }

    /// Merge a controller delta into the shared configuration. A delta that
    /// fails validation is dropped whole, heartbeat keys included.
    fn apply_config(&self, updates: Map<String, Value>) {
        let merged = {
            let mut config = lock(&self.config);
            match config.apply_updates(&updates) {
                Ok(applied) if applied.is_empty() => None,
                Ok(applied) => Some((applied, config.version())),
                Err(e) => {
                    warn!("Rejected configuration update: {}", e);
                    return;
                }
            }
        };

        if let Some((applied, version)) = merged {
            info!("Applied configuration update: {:?}", applied);
            *lock(&self.configuration_version) = version;
            let heartbeat_keys = lock(&self.settings).apply_updates(&updates);
            if !heartbeat_keys.is_empty() {
                debug!("Heartbeat settings updated: {:?}", heartbeat_keys);
                lock(&self.stats).current_interval_secs = self.settings().interval.as_secs_f64();
            }
        }
        let _ = self.events.send(ChannelEvent::ConfigUpdated(updates));
    }

    fn handle_command(&self, command: &HeartbeatCommand) -> Flow {
        let flow = match command {
            HeartbeatCommand::UpdateConfig(updates) => {
                self.apply_config(updates.clone());
                Flow::Continue
            }
            HeartbeatCommand::RestartHeartbeat => {
                info!("Controller requested heartbeat restart");
                lock(&self.stats).reset_failures();
                Flow::Restart
            }
            HeartbeatCommand::SyncTools => {
                let registry = Arc::clone(&self.registry);
                tokio::spawn(async move {
                    match registry.discover().await {
                        Ok(report) => debug!("Controller-requested discovery: {:?}", report),
                        Err(e) => warn!("Controller-requested discovery failed: {}", e),
                    }
                });
                Flow::Continue
            }
            HeartbeatCommand::Unknown { kind, .. } => {
                debug!("Forwarding unrecognised command '{}'", kind);
                Flow::Continue
            }
        };
        let _ = self.events.send(ChannelEvent::Command(command.clone()));
        flow
    }

    fn on_success(&self, response: HeartbeatResponse, latency_ms: f64) -> Flow {
        lock(&self.stats).record_success(latency_ms, response.server_timestamp.clone());
        self.transition(ConnectionState::Connected);

        if let Some(secs) = response.next_heartbeat_interval {
            match Duration::try_from_secs_f64(secs) {
                Ok(interval) if !interval.is_zero() => {
                    lock(&self.settings).interval = interval;
                    lock(&self.stats).current_interval_secs = secs;
                }
                _ => warn!("Ignoring invalid next_heartbeat_interval: {}", secs),
            }
        }
        if !response.configuration_updates.is_empty() {
            self.apply_config(response.configuration_updates);
        }

        let mut flow = Flow::Continue;
        for command in &response.commands {
            if let Flow::Restart = self.handle_command(command) {
                flow = Flow::Restart;
            }
        }
        flow
    }
}

/// Run `fut` unless the token is cancelled first
async fn cancellable<F: Future>(cancel: &CancellationToken, fut: F) -> Option<F::Output> {
    tokio::select! {
        _ = cancel.cancelled() => None,
        output = fut => Some(output),
    }
}

async fn retry(
    shared: &Shared,
    cancel: &CancellationToken,
    changes: &mut broadcast::Receiver<RegistryEvent>,
) -> Retry {
    let settings = shared.settings();
    let mut backoff = Backoff::new(settings.retry_delay, settings.max_retry_delay);

    for attempt in 1..=settings.retry_count {
        let delay = backoff.next_delay();
        tracing::debug!(
            attempt,
            retry_count = settings.retry_count,
            delay_secs = delay.as_secs(),
            "Retrying heartbeat"
        );
        if cancellable(cancel, tokio::time::sleep(delay)).await.is_none() {
            return Retry::Cancelled;
        }
        match cancellable(cancel, shared.send_once(changes)).await {
            None => return Retry::Cancelled,
            Some(Ok((response, latency))) => return Retry::Recovered(response, latency),
            Some(Err(e)) => shared.record_failure(&e),
        }
    }
    Retry::Exhausted
}

async fn run(shared: Arc<Shared>, cancel: CancellationToken) {
    let mut changes = shared.registry.subscribe();

    'outer: loop {
        shared.transition(ConnectionState::Connecting);

        loop {
            let flow = match cancellable(&cancel, shared.send_once(&mut changes)).await {
                None => return,
                Some(Ok((response, latency))) => shared.on_success(response, latency),
                Some(Err(e)) => {
                    shared.record_failure(&e);
                    shared.transition(ConnectionState::Reconnecting);
                    match retry(&shared, &cancel, &mut changes).await {
                        Retry::Recovered(response, latency) => shared.on_success(response, latency),
                        Retry::Cancelled => return,
                        Retry::Exhausted => {
                            shared.transition(ConnectionState::Error);
                            let cooldown = shared.settings().max_retry_delay;
                            tracing::warn!(cooldown_secs = cooldown.as_secs(), "Heartbeat retries exhausted");
                            if cancellable(&cancel, tokio::time::sleep(cooldown)).await.is_none() {
                                return;
                            }
                            continue 'outer;
                        }
                    }
                }
            };

            match flow {
                Flow::Restart => continue 'outer,
                Flow::Continue => {
                    let interval = shared.settings().interval;
                    if cancellable(&cancel, tokio::time::sleep(interval)).await.is_none() {
                        return;
                    }
                }
            }
        }
    }
}

struct Runner {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Resilient liveness link to the controller
pub struct HeartbeatChannel {
    shared: Arc<Shared>,
    runner: Mutex<Option<Runner>>,
}

impl HeartbeatChannel {
    pub fn new(config: &AgentConfig, registry: Arc<ToolRegistry>, transport: Arc<dyn HeartbeatTransport>) -> Self {
        Self::with_shared_config(Arc::new(Mutex::new(config.clone())), registry, transport)
    }

    /// Build a channel that merges controller updates into `config`, which
    /// other components may read
    pub fn with_shared_config(
        config: Arc<Mutex<AgentConfig>>,
        registry: Arc<ToolRegistry>,
        transport: Arc<dyn HeartbeatTransport>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (settings, adapter_id, version, metadata) = {
            let config = lock(&config);
            (
                HeartbeatSettings::from_config(&config),
                config.adapter_id.clone(),
                config.version(),
                config.metadata.clone(),
            )
        };
        let stats = ConnectionStats {
            current_interval_secs: settings.interval.as_secs_f64(),
            ..ConnectionStats::default()
        };

        Self {
            shared: Arc::new(Shared {
                adapter_id,
                config,
                registry,
                transport,
                settings: Mutex::new(settings),
                state: Mutex::new(ConnectionState::Disconnected),
                stats: Mutex::new(stats),
                sequence: AtomicU64::new(0),
                configuration_version: Mutex::new(version),
                metadata,
                sample_resources: AtomicBool::new(true),
                started: Mutex::new(std::time::Instant::now()),
                events,
            }),
            runner: Mutex::new(None),
        }
    }

    /// Enable or disable /proc sampling for envelopes
    pub fn with_resource_sampling(self, enabled: bool) -> Self {
        self.shared.sample_resources.store(enabled, Ordering::Relaxed);
        self
    }

    /// Spawn the heartbeat loop. No-op if it is already running.
    pub fn start(&self) {
        let mut runner = lock(&self.runner);
        if runner.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            debug!("Heartbeat channel already running");
            return;
        }

        *lock(&self.shared.started) = std::time::Instant::now();
        lock(&self.shared.stats).started_at = Some(Utc::now());

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run(Arc::clone(&self.shared), cancel.clone()));
        *runner = Some(Runner { cancel, handle });
        info!("Heartbeat channel started for {}", self.shared.adapter_id);
    }

    /// Cancel any in-flight send or pending wait and go to DISCONNECTED
    pub async fn stop(&self) {
        let runner = lock(&self.runner).take();
        if let Some(runner) = runner {
            runner.cancel.cancel();
            if let Err(e) = runner.handle.await {
                warn!("Heartbeat task ended abnormally: {}", e);
            }
        }
        self.shared.transition(ConnectionState::Disconnected);
    }

    pub fn is_running(&self) -> bool {
        lock(&self.runner).as_ref().is_some_and(|r| !r.handle.is_finished())
    }

    pub fn state(&self) -> ConnectionState {
        *lock(&self.shared.state)
    }

    pub fn stats(&self) -> ConnectionStats {
        lock(&self.shared.stats).clone()
    }

    pub fn settings(&self) -> HeartbeatSettings {
        self.shared.settings()
    }

    /// Last sequence number handed out
    pub fn sequence_number(&self) -> u64 {
        self.shared.sequence.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.shared.events.subscribe()
    }

    pub fn set_configuration_version(&self, version: String) {
        *lock(&self.shared.configuration_version) = version;
    }
}

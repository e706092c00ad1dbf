//! Tool registry: the sole owner and mutator of endpoint records
//!
//! Records live in a fixed set of shards keyed by a hash of the endpoint id, so
//! writes to one id are serialized without taking a registry-wide lock.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use log::{debug, info, warn};
use tokio::sync::broadcast;

use crate::error::{AgentError, Result};
use crate::telemetry::{HealthState, HealthThresholds, LoadMetrics};

use super::discovery::DiscoverySources;
use super::endpoint::{EndpointOrigin, EndpointSpec, ToolEndpoint};
use super::events::RegistryEvent;

const SHARD_COUNT: usize = 16;
const EVENT_CHANNEL_CAPACITY: usize = 256;

type Shard = RwLock<HashMap<String, ToolEndpoint>>;

/// Directory of locally hosted tool endpoints
pub struct ToolRegistry {
    shards: Vec<Shard>,
    thresholds: HealthThresholds,
    pub(super) discovery: Option<DiscoverySources>,
    events: broadcast::Sender<RegistryEvent>,
}

impl ToolRegistry {
    /// Create an empty registry
    pub fn new(thresholds: HealthThresholds) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            shards: (0..SHARD_COUNT).map(|_| RwLock::new(HashMap::new())).collect(),
            thresholds,
            discovery: None,
            events,
        }
    }

    /// Attach discovery sources scanned by `discover()`
    pub fn with_discovery(mut self, sources: DiscoverySources) -> Self {
        self.discovery = Some(sources);
        self
    }

    pub fn thresholds(&self) -> &HealthThresholds {
        &self.thresholds
    }

    /// Subscribe to change notifications
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    pub(super) fn emit(&self, event: RegistryEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn shard_index(id: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        id.hash(&mut hasher);
        (hasher.finish() as usize) % SHARD_COUNT
    }

    pub(super) fn read_shard(&self, id: &str) -> RwLockReadGuard<'_, HashMap<String, ToolEndpoint>> {
        self.shards[Self::shard_index(id)]
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(super) fn write_shard(&self, id: &str) -> RwLockWriteGuard<'_, HashMap<String, ToolEndpoint>> {
        self.shards[Self::shard_index(id)]
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Visit every record, one shard at a time
    pub(super) fn for_each_shard<F>(&self, mut f: F)
    where
        F: FnMut(&HashMap<String, ToolEndpoint>),
    {
        for shard in &self.shards {
            let guard = shard.read().unwrap_or_else(PoisonError::into_inner);
            f(&guard);
        }
    }

    fn check_attributes(id: &str, max_concurrent: u32) -> Result<()> {
        if id.trim().is_empty() {
            return Err(AgentError::Config("endpoint id must not be empty".into()));
        }
        if max_concurrent == 0 {
            return Err(AgentError::Config(format!(
                "endpoint '{}' must allow at least one concurrent request",
                id
            )));
        }
        Ok(())
    }

    fn check_endpoint(endpoint: &ToolEndpoint) -> Result<()> {
        Self::check_attributes(&endpoint.id, endpoint.max_concurrent)
    }

    /// Register an endpoint. Fails with DuplicateId unless `replace` is set.
    pub fn register(&self, mut endpoint: ToolEndpoint, replace: bool) -> Result<String> {
        Self::check_endpoint(&endpoint)?;
        let id = endpoint.id.clone();
        endpoint.over_capacity = endpoint.current_concurrent > endpoint.max_concurrent;

        {
            let mut shard = self.write_shard(&id);
            if shard.contains_key(&id) && !replace {
                return Err(AgentError::DuplicateId(id));
            }
            shard.insert(id.clone(), endpoint);
        }

        info!("Registered endpoint {}", id);
        self.emit(RegistryEvent::Registered { id: id.clone() });
        Ok(id)
    }

    /// Register a new endpoint or replace the static attributes of an existing one
    pub fn upsert(&self, spec: EndpointSpec, origin: EndpointOrigin) -> Result<String> {
        Self::check_attributes(&spec.id, spec.max_concurrent)?;
        let id = spec.id.clone();
        let event = {
            let mut shard = self.write_shard(&id);
            match shard.get_mut(&id) {
                Some(existing) => {
                    existing.apply_spec(spec);
                    existing.last_updated = Utc::now();
                    RegistryEvent::Updated {
                        id: id.clone(),
                        health: existing.health,
                    }
                }
                None => {
                    let endpoint = ToolEndpoint::from_spec(spec, origin);
                    shard.insert(id.clone(), endpoint);
                    RegistryEvent::Registered { id: id.clone() }
                }
            }
        };

        debug!("Upserted endpoint {}", id);
        self.emit(event);
        Ok(id)
    }

    /// Replace an endpoint's load report and health.
    ///
    /// When `health` is None it is derived from the load and the staleness rule.
    pub fn update_status(&self, id: &str, health: Option<HealthState>, load: LoadMetrics) -> Result<()> {
        let now = Utc::now();
        let new_health = {
            let mut shard = self.write_shard(id);
            let endpoint = shard
                .get_mut(id)
                .ok_or_else(|| AgentError::NotFound(id.to_string()))?;

            let health = health.unwrap_or_else(|| self.thresholds.derive(&load, now));
            endpoint.current_concurrent = load.active_requests;
            endpoint.over_capacity = endpoint.current_concurrent > endpoint.max_concurrent;
            if endpoint.over_capacity {
                warn!(
                    "Endpoint {} reports {} concurrent requests, above its bound of {}",
                    id, endpoint.current_concurrent, endpoint.max_concurrent
                );
            }
            endpoint.load = load;
            endpoint.health = health;
            endpoint.last_updated = now;
            health
        };

        self.emit(RegistryEvent::Updated {
            id: id.to_string(),
            health: new_health,
        });
        Ok(())
    }

    /// Remove an endpoint
    pub fn deregister(&self, id: &str) -> Result<ToolEndpoint> {
        let removed = self
            .write_shard(id)
            .remove(id)
            .ok_or_else(|| AgentError::NotFound(id.to_string()))?;

        info!("Deregistered endpoint {}", id);
        self.emit(RegistryEvent::Deregistered { id: id.to_string() });
        Ok(removed)
    }

    /// Current record for one endpoint, with staleness applied
    pub fn get(&self, id: &str) -> Option<ToolEndpoint> {
        let now = Utc::now();
        self.read_shard(id).get(id).map(|e| self.effective(e, now))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.read_shard(id).contains_key(id)
    }

    fn effective(&self, endpoint: &ToolEndpoint, now: chrono::DateTime<Utc>) -> ToolEndpoint {
        let mut view = endpoint.clone();
        if self.thresholds.is_stale(endpoint.last_updated, now) {
            view.health = HealthState::Unavailable;
        }
        view
    }

    /// Endpoints ordered by id, optionally filtered by capability.
    ///
    /// Side-effect free: staleness is applied to the returned copies only.
    pub fn snapshot(&self, capability: Option<&str>) -> Vec<ToolEndpoint> {
        let now = Utc::now();
        let mut endpoints = Vec::new();
        self.for_each_shard(|shard| {
            endpoints.extend(
                shard
                    .values()
                    .filter(|e| capability.is_none_or(|c| e.has_capability(c)))
                    .map(|e| self.effective(e, now)),
            );
        });
        endpoints.sort_by(|a, b| a.id.cmp(&b.id));
        endpoints
    }

    pub fn len(&self) -> usize {
        let mut count = 0;
        self.for_each_shard(|shard| count += shard.len());
        count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Union of all advertised capabilities
    pub fn capabilities(&self) -> BTreeSet<String> {
        let mut capabilities = BTreeSet::new();
        self.for_each_shard(|shard| {
            for endpoint in shard.values() {
                capabilities.extend(endpoint.capabilities.iter().cloned());
            }
        });
        capabilities
    }

    /// Endpoint counts per health tier (every tier present, possibly zero)
    pub fn counts_by_health(&self) -> BTreeMap<HealthState, usize> {
        let mut counts: BTreeMap<HealthState, usize> = HealthState::ALL.iter().map(|h| (*h, 0)).collect();
        for endpoint in self.snapshot(None) {
            *counts.entry(endpoint.health).or_insert(0) += 1;
        }
        counts
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new(HealthThresholds::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn endpoint(id: &str, capability: &str) -> ToolEndpoint {
        ToolEndpoint::from_spec(
            EndpointSpec::new(id, format!("http://127.0.0.1/{}", id)).with_capability(capability),
            EndpointOrigin::Manual,
        )
    }

    #[test]
    fn test_register_then_snapshot_round_trip() {
        let registry = ToolRegistry::default();
        let e = endpoint("ocr-1", "ocr");
        let id = registry.register(e.clone(), false).unwrap();
        assert_eq!(id, "ocr-1");

        let snapshot = registry.snapshot(None);
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0], e);
    }

    #[test]
    fn test_register_duplicate_fails() {
        let registry = ToolRegistry::default();
        registry.register(endpoint("a", "ocr"), false).unwrap();
        let err = registry.register(endpoint("a", "ocr"), false).unwrap_err();
        assert!(matches!(err, AgentError::DuplicateId(id) if id == "a"));
    }

    #[test]
    fn test_register_replace() {
        let registry = ToolRegistry::default();
        registry.register(endpoint("a", "ocr"), false).unwrap();
        registry.register(endpoint("a", "summarize"), true).unwrap();
        let snapshot = registry.snapshot(None);
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot[0].has_capability("summarize"));
    }

    #[test]
    fn test_register_rejects_zero_capacity() {
        let registry = ToolRegistry::default();
        let mut e = endpoint("a", "ocr");
        e.max_concurrent = 0;
        assert!(matches!(registry.register(e, false), Err(AgentError::Config(_))));
    }

    #[test]
    fn test_update_status_reflected_in_snapshot() {
        let registry = ToolRegistry::default();
        let e = endpoint("ocr-1", "ocr");
        registry.register(e.clone(), false).unwrap();

        let load = LoadMetrics::idle().with_active_requests(4).with_avg_response_time(120.0);
        registry
            .update_status("ocr-1", Some(HealthState::Warning), load.clone())
            .unwrap();

        let updated = &registry.snapshot(None)[0];
        assert_eq!(updated.id, e.id);
        assert_eq!(updated.capabilities, e.capabilities);
        assert_eq!(updated.health, HealthState::Warning);
        assert_eq!(updated.load, load);
        assert_eq!(updated.current_concurrent, 4);
    }

    #[test]
    fn test_update_status_unknown_id() {
        let registry = ToolRegistry::default();
        let err = registry
            .update_status("missing", None, LoadMetrics::idle())
            .unwrap_err();
        assert!(matches!(err, AgentError::NotFound(_)));
    }

    #[test]
    fn test_update_status_derives_health() {
        let registry = ToolRegistry::default();
        registry.register(endpoint("a", "ocr"), false).unwrap();

        registry
            .update_status("a", None, LoadMetrics::idle().with_error_rate(0.5))
            .unwrap();
        assert_eq!(registry.get("a").unwrap().health, HealthState::Critical);

        let stale = LoadMetrics {
            last_updated: Utc::now() - chrono::Duration::seconds(600),
            ..LoadMetrics::idle()
        };
        registry.update_status("a", None, stale).unwrap();
        assert_eq!(registry.get("a").unwrap().health, HealthState::Unavailable);
    }

    #[test]
    fn test_update_status_flags_over_capacity() {
        let registry = ToolRegistry::default();
        let mut e = endpoint("a", "ocr");
        e.max_concurrent = 2;
        registry.register(e, false).unwrap();
        registry
            .update_status("a", None, LoadMetrics::idle().with_active_requests(3))
            .unwrap();
        let view = registry.get("a").unwrap();
        assert!(view.over_capacity);
        assert!(!view.has_capacity());
    }

    #[test]
    fn test_snapshot_marks_stale_unavailable_without_mutation() {
        let registry = ToolRegistry::new(HealthThresholds {
            stale_after: Duration::from_secs(30),
            ..HealthThresholds::default()
        });
        let mut e = endpoint("a", "ocr");
        e.last_updated = Utc::now() - chrono::Duration::seconds(60);
        registry.register(e, false).unwrap();

        assert_eq!(registry.snapshot(None)[0].health, HealthState::Unavailable);
        // The stored record keeps its reported tier
        assert_eq!(registry.read_shard("a")["a"].health, HealthState::Healthy);
    }

    #[test]
    fn test_snapshot_filters_and_orders() {
        let registry = ToolRegistry::default();
        registry.register(endpoint("c", "ocr"), false).unwrap();
        registry.register(endpoint("a", "ocr"), false).unwrap();
        registry.register(endpoint("b", "summarize"), false).unwrap();

        let all: Vec<String> = registry.snapshot(None).into_iter().map(|e| e.id).collect();
        assert_eq!(all, vec!["a", "b", "c"]);

        let ocr: Vec<String> = registry.snapshot(Some("ocr")).into_iter().map(|e| e.id).collect();
        assert_eq!(ocr, vec!["a", "c"]);
    }

    #[test]
    fn test_deregister() {
        let registry = ToolRegistry::default();
        registry.register(endpoint("a", "ocr"), false).unwrap();
        registry.deregister("a").unwrap();
        assert!(registry.is_empty());
        assert!(matches!(registry.deregister("a"), Err(AgentError::NotFound(_))));
    }

    #[test]
    fn test_update_after_deregister_does_not_resurrect() {
        let registry = ToolRegistry::default();
        registry.register(endpoint("a", "ocr"), false).unwrap();
        registry.deregister("a").unwrap();
        assert!(registry.update_status("a", None, LoadMetrics::idle()).is_err());
        assert!(!registry.contains("a"));
    }

    #[test]
    fn test_upsert_registers_then_updates() {
        let registry = ToolRegistry::default();
        registry
            .upsert(EndpointSpec::new("a", "old").with_capability("ocr"), EndpointOrigin::Manual)
            .unwrap();
        registry
            .update_status("a", Some(HealthState::Warning), LoadMetrics::idle().with_active_requests(1))
            .unwrap();
        registry
            .upsert(EndpointSpec::new("a", "new").with_capability("ocr"), EndpointOrigin::Manual)
            .unwrap();

        let view = registry.get("a").unwrap();
        assert_eq!(view.address, "new");
        assert_eq!(view.health, HealthState::Warning);
        assert_eq!(view.current_concurrent, 1);
    }

    #[test]
    fn test_upsert_rejects_zero_concurrency_for_known_id() {
        let registry = ToolRegistry::default();
        registry
            .upsert(EndpointSpec::new("a", "addr").with_capability("ocr"), EndpointOrigin::Manual)
            .unwrap();
        let mut events = registry.subscribe();

        let result = registry.upsert(
            EndpointSpec::new("a", "other").with_capability("ocr").with_max_concurrent(0),
            EndpointOrigin::Manual,
        );
        assert!(matches!(result, Err(AgentError::Config(_))));

        let view = registry.get("a").unwrap();
        assert_eq!(view.address, "addr");
        assert_eq!(view.max_concurrent, EndpointSpec::new("a", "addr").max_concurrent);
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_capabilities_and_counts() {
        let registry = ToolRegistry::default();
        registry.register(endpoint("a", "ocr"), false).unwrap();
        registry.register(endpoint("b", "summarize"), false).unwrap();
        registry
            .update_status("b", Some(HealthState::Critical), LoadMetrics::idle())
            .unwrap();

        let caps: Vec<String> = registry.capabilities().into_iter().collect();
        assert_eq!(caps, vec!["ocr", "summarize"]);

        let counts = registry.counts_by_health();
        assert_eq!(counts[&HealthState::Healthy], 1);
        assert_eq!(counts[&HealthState::Critical], 1);
        assert_eq!(counts[&HealthState::Unavailable], 0);
    }

    #[tokio::test]
    async fn test_mutations_emit_events() {
        let registry = ToolRegistry::default();
        let mut rx = registry.subscribe();

        registry.register(endpoint("a", "ocr"), false).unwrap();
        registry.update_status("a", None, LoadMetrics::idle()).unwrap();
        registry.deregister("a").unwrap();

        assert_eq!(rx.recv().await.unwrap(), RegistryEvent::Registered { id: "a".into() });
        assert_eq!(
            rx.recv().await.unwrap(),
            RegistryEvent::Updated {
                id: "a".into(),
                health: HealthState::Healthy
            }
        );
        assert_eq!(rx.recv().await.unwrap(), RegistryEvent::Deregistered { id: "a".into() });
    }

    #[test]
    fn test_concurrent_updates_on_distinct_ids() {
        let registry = Arc::new(ToolRegistry::default());
        for i in 0..8 {
            registry.register(endpoint(&format!("e{}", i), "ocr"), false).unwrap();
        }

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for n in 0..50 {
                        registry
                            .update_status(&format!("e{}", i), None, LoadMetrics::idle().with_active_requests(n))
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        for endpoint in registry.snapshot(None) {
            assert_eq!(endpoint.current_concurrent, 49);
        }
    }
}

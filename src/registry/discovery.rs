//! Endpoint discovery from manifest files and static configuration
//!
//! A scan reads every manifest under the configured paths on the blocking pool
//! (bounded by a worker semaphore), then reconciles the result with the
//! registry. Manually registered endpoints are never touched by discovery.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::DiscoveryConfig;
use crate::error::{AgentError, Result};
use crate::telemetry::HealthState;

use super::endpoint::{EndpointOrigin, EndpointSpec, ToolEndpoint};
use super::events::RegistryEvent;
use super::store::ToolRegistry;

const MANIFEST_EXTENSIONS: [&str; 3] = ["yml", "yaml", "json"];

/// Where discovery looks for endpoints
#[derive(Debug, Clone)]
pub struct DiscoverySources {
    pub paths: Vec<PathBuf>,
    pub static_endpoints: Vec<EndpointSpec>,
    pub grace_scans: u32,
    pub scan_timeout: Duration,
    workers: Arc<Semaphore>,
}

impl DiscoverySources {
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self::from_config(&DiscoveryConfig {
            paths,
            ..DiscoveryConfig::default()
        })
    }

    pub fn from_config(config: &DiscoveryConfig) -> Self {
        Self {
            paths: config.paths.clone(),
            static_endpoints: config.static_endpoints.clone(),
            grace_scans: config.grace_scans,
            scan_timeout: Duration::from_secs(config.scan_timeout),
            workers: Arc::new(Semaphore::new(config.workers.max(1))),
        }
    }

    pub fn with_static_endpoint(mut self, spec: EndpointSpec) -> Self {
        self.static_endpoints.push(spec);
        self
    }

    pub fn with_grace_scans(mut self, grace_scans: u32) -> Self {
        self.grace_scans = grace_scans;
        self
    }
}

/// Outcome of one discovery scan
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiscoveryReport {
    pub registered: usize,
    pub restored: usize,
    pub refreshed: usize,
    pub marked_unavailable: usize,
    pub removed: usize,
    pub failed_manifests: usize,
}

impl DiscoveryReport {
    pub fn changed(&self) -> bool {
        self.registered + self.restored + self.marked_unavailable + self.removed > 0
    }
}

/// A manifest holds either one endpoint or a list of them
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Manifest {
    Many(Vec<EndpointSpec>),
    One(EndpointSpec),
}

fn is_manifest(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| MANIFEST_EXTENSIONS.contains(&ext))
}

/// Expand configured paths into manifest files. Directories are listed one level
/// deep; anything else is treated as a glob pattern.
fn expand_paths(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_file() {
            files.push(path.clone());
            continue;
        }
        let pattern = if path.is_dir() {
            path.join("*")
        } else {
            path.clone()
        };
        match glob::glob(&pattern.to_string_lossy()) {
            Ok(entries) => files.extend(entries.filter_map(|r| r.ok()).filter(|p| p.is_file() && is_manifest(p))),
            Err(e) => warn!("Invalid discovery path {}: {}", path.display(), e),
        }
    }
    files.sort();
    files.dedup();
    files
}

fn read_manifest(path: &Path) -> Result<Vec<EndpointSpec>> {
    let content = std::fs::read_to_string(path)?;
    let manifest: Manifest = serde_yaml::from_str(&content)?;
    Ok(match manifest {
        Manifest::Many(specs) => specs,
        Manifest::One(spec) => vec![spec],
    })
}

async fn scan(sources: &DiscoverySources) -> (Vec<EndpointSpec>, usize) {
    let paths = sources.paths.clone();
    let files = tokio::task::spawn_blocking(move || expand_paths(&paths))
        .await
        .unwrap_or_default();

    let reads = files.into_iter().map(|path| {
        let workers = Arc::clone(&sources.workers);
        async move {
            let _permit = workers.acquire_owned().await.ok();
            let display = path.display().to_string();
            let result = tokio::task::spawn_blocking(move || read_manifest(&path))
                .await
                .unwrap_or_else(|e| Err(AgentError::Io(std::io::Error::other(e))));
            (display, result)
        }
    });

    let mut specs = sources.static_endpoints.clone();
    let mut failed = 0;
    for (path, result) in join_all(reads).await {
        match result {
            Ok(found) => {
                debug!("Manifest {} lists {} endpoint(s)", path, found.len());
                specs.extend(found);
            }
            Err(e) => {
                warn!("Skipping manifest {}: {}", path, e);
                failed += 1;
            }
        }
    }
    (specs, failed)
}

impl ToolRegistry {
    /// Run one discovery scan and reconcile its result with the registry
    pub async fn discover(&self) -> Result<DiscoveryReport> {
        let Some(sources) = self.discovery.as_ref() else {
            return Ok(DiscoveryReport::default());
        };

        let (specs, failed) = tokio::time::timeout(sources.scan_timeout, scan(sources))
            .await
            .map_err(|_| {
                AgentError::Timeout(format!(
                    "discovery scan exceeded {}s",
                    sources.scan_timeout.as_secs()
                ))
            })?;

        let mut report = self.reconcile(specs, sources.grace_scans);
        report.failed_manifests = failed;
        if report.changed() {
            info!(
                "Discovery: {} registered, {} restored, {} unavailable, {} removed",
                report.registered, report.restored, report.marked_unavailable, report.removed
            );
        }
        Ok(report)
    }

    fn reconcile(&self, specs: Vec<EndpointSpec>, grace_scans: u32) -> DiscoveryReport {
        let mut report = DiscoveryReport::default();
        let mut found: BTreeMap<String, EndpointSpec> = BTreeMap::new();
        for spec in specs {
            if spec.id.trim().is_empty() || spec.max_concurrent == 0 {
                warn!("Ignoring discovered endpoint with invalid id or capacity: {:?}", spec.id);
                continue;
            }
            if found.contains_key(&spec.id) {
                warn!("Endpoint {} listed more than once, keeping the first", spec.id);
                continue;
            }
            found.insert(spec.id.clone(), spec);
        }

        let now = Utc::now();
        for (id, spec) in &found {
            let event = {
                let mut shard = self.write_shard(id);
                match shard.get_mut(id) {
                    None => {
                        shard.insert(id.clone(), ToolEndpoint::from_spec(spec.clone(), EndpointOrigin::Discovered));
                        report.registered += 1;
                        Some(RegistryEvent::Registered { id: id.clone() })
                    }
                    Some(existing) if existing.origin == EndpointOrigin::Manual => None,
                    Some(existing) if existing.missed_scans > 0 => {
                        existing.apply_spec(spec.clone());
                        existing.missed_scans = 0;
                        existing.health = HealthState::Healthy;
                        existing.last_updated = now;
                        existing.load.last_updated = now;
                        report.restored += 1;
                        Some(RegistryEvent::Updated {
                            id: id.clone(),
                            health: HealthState::Healthy,
                        })
                    }
                    Some(existing) => {
                        let changed = existing.spec() != *spec;
                        existing.apply_spec(spec.clone());
                        existing.last_updated = now;
                        report.refreshed += 1;
                        changed.then(|| RegistryEvent::Updated {
                            id: id.clone(),
                            health: existing.health,
                        })
                    }
                }
            };
            if let Some(event) = event {
                self.emit(event);
            }
        }

        let mut missing = Vec::new();
        self.for_each_shard(|shard| {
            missing.extend(
                shard
                    .values()
                    .filter(|e| e.origin == EndpointOrigin::Discovered && !found.contains_key(&e.id))
                    .map(|e| e.id.clone()),
            );
        });

        for id in missing {
            let event = {
                let mut shard = self.write_shard(&id);
                let Some(endpoint) = shard.get_mut(&id) else {
                    continue;
                };
                endpoint.missed_scans += 1;
                if endpoint.missed_scans > grace_scans {
                    shard.remove(&id);
                    report.removed += 1;
                    info!("Removed endpoint {} after {} missed scans", id, grace_scans + 1);
                    RegistryEvent::Removed { id }
                } else {
                    endpoint.health = HealthState::Unavailable;
                    report.marked_unavailable += 1;
                    RegistryEvent::MarkedUnavailable {
                        missed_scans: endpoint.missed_scans,
                        id,
                    }
                }
            };
            self.emit(event);
        }

        report
    }
}

/// Scan immediately, then on every interval until cancelled
pub async fn run_discovery_loop(registry: Arc<ToolRegistry>, interval: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Discovery loop stopped");
                break;
            }
            _ = ticker.tick() => {
                if let Err(e) = registry.discover().await {
                    warn!("Discovery scan failed: {}", e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::HealthThresholds;
    use tempfile::TempDir;

    fn registry_for(dir: &TempDir, grace_scans: u32) -> ToolRegistry {
        ToolRegistry::new(HealthThresholds::default())
            .with_discovery(DiscoverySources::new(vec![dir.path().to_path_buf()]).with_grace_scans(grace_scans))
    }

    fn write_manifest(dir: &TempDir, name: &str, body: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, body).unwrap();
        path
    }

    #[tokio::test]
    async fn test_discover_registers_manifest_endpoints() {
        let dir = TempDir::new().unwrap();
        write_manifest(
            &dir,
            "ocr.yml",
            "id: ocr-1\ncapabilities: [ocr]\naddress: http://127.0.0.1:9001\n",
        );
        write_manifest(
            &dir,
            "tools.json",
            r#"[{"id": "sum-1", "capabilities": ["summarize"], "address": "unix:///run/sum.sock", "max_concurrent": 2}]"#,
        );
        write_manifest(&dir, "README.md", "not a manifest");

        let registry = registry_for(&dir, 3);
        let report = registry.discover().await.unwrap();
        assert_eq!(report.registered, 2);
        assert_eq!(report.failed_manifests, 0);

        let sum = registry.get("sum-1").unwrap();
        assert_eq!(sum.origin, EndpointOrigin::Discovered);
        assert_eq!(sum.max_concurrent, 2);
    }

    #[tokio::test]
    async fn test_bad_manifest_is_skipped() {
        let dir = TempDir::new().unwrap();
        write_manifest(&dir, "good.yml", "id: a\ncapabilities: [ocr]\naddress: x\n");
        write_manifest(&dir, "bad.yml", "id: [unterminated\n");

        let registry = registry_for(&dir, 3);
        let report = registry.discover().await.unwrap();
        assert_eq!(report.registered, 1);
        assert_eq!(report.failed_manifests, 1);
    }

    #[tokio::test]
    async fn test_vanished_endpoint_grace_then_removal() {
        let dir = TempDir::new().unwrap();
        let path = write_manifest(&dir, "a.yml", "id: a\ncapabilities: [ocr]\naddress: x\n");
        let registry = registry_for(&dir, 2);
        registry.discover().await.unwrap();
        std::fs::remove_file(path).unwrap();

        let first = registry.discover().await.unwrap();
        assert_eq!(first.marked_unavailable, 1);
        let endpoint = registry.get("a").unwrap();
        assert_eq!(endpoint.health, HealthState::Unavailable);
        assert_eq!(endpoint.missed_scans, 1);

        let second = registry.discover().await.unwrap();
        assert_eq!(second.marked_unavailable, 1);
        assert!(registry.contains("a"));

        let third = registry.discover().await.unwrap();
        assert_eq!(third.removed, 1);
        assert!(!registry.contains("a"));
    }

    #[tokio::test]
    async fn test_reappearing_endpoint_is_restored() {
        let dir = TempDir::new().unwrap();
        let body = "id: a\ncapabilities: [ocr]\naddress: x\n";
        let path = write_manifest(&dir, "a.yml", body);
        let registry = registry_for(&dir, 3);
        registry.discover().await.unwrap();

        std::fs::remove_file(&path).unwrap();
        registry.discover().await.unwrap();
        assert_eq!(registry.get("a").unwrap().health, HealthState::Unavailable);

        std::fs::write(&path, body).unwrap();
        let report = registry.discover().await.unwrap();
        assert_eq!(report.restored, 1);
        let endpoint = registry.get("a").unwrap();
        assert_eq!(endpoint.health, HealthState::Healthy);
        assert_eq!(endpoint.missed_scans, 0);
    }

    #[tokio::test]
    async fn test_manual_endpoints_untouched() {
        let dir = TempDir::new().unwrap();
        let registry = registry_for(&dir, 0);
        registry
            .upsert(EndpointSpec::new("manual", "addr").with_capability("ocr"), EndpointOrigin::Manual)
            .unwrap();

        let report = registry.discover().await.unwrap();
        assert_eq!(report, DiscoveryReport::default());
        assert_eq!(registry.get("manual").unwrap().health, HealthState::Healthy);

        // A manifest claiming the same id does not take over the record
        write_manifest(&dir, "m.yml", "id: manual\ncapabilities: [other]\naddress: elsewhere\n");
        registry.discover().await.unwrap();
        let endpoint = registry.get("manual").unwrap();
        assert_eq!(endpoint.address, "addr");
        assert_eq!(endpoint.origin, EndpointOrigin::Manual);
    }

    #[tokio::test]
    async fn test_static_endpoints_are_discovered() {
        let sources = DiscoverySources::new(Vec::new())
            .with_static_endpoint(EndpointSpec::new("static-1", "addr").with_capability("ocr"));
        let registry = ToolRegistry::default().with_discovery(sources);

        let report = registry.discover().await.unwrap();
        assert_eq!(report.registered, 1);
        let again = registry.discover().await.unwrap();
        assert_eq!(again.refreshed, 1);
        assert!(!again.changed());
    }

    #[tokio::test]
    async fn test_discover_without_sources_is_noop() {
        let registry = ToolRegistry::default();
        assert_eq!(registry.discover().await.unwrap(), DiscoveryReport::default());
    }

    #[tokio::test]
    async fn test_discovery_loop_stops_on_cancel() {
        let sources = DiscoverySources::new(Vec::new())
            .with_static_endpoint(EndpointSpec::new("static-1", "addr").with_capability("ocr"));
        let registry = Arc::new(ToolRegistry::default().with_discovery(sources));
        let mut events = registry.subscribe();
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(run_discovery_loop(
            Arc::clone(&registry),
            Duration::from_secs(60),
            cancel.clone(),
        ));
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, RegistryEvent::Registered { id: "static-1".into() });

        cancel.cancel();
        handle.await.unwrap();
        assert!(registry.contains("static-1"));
    }
}

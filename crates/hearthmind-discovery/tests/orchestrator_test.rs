//! Orchestrator behavior against scripted in-process sources.

use async_trait::async_trait;
use hearthmind_bridge::{BridgeError, ZigbeeCapabilityRecord, parse_capability_record};
use hearthmind_core::config::DiscoveryConfig;
use hearthmind_core::health::{DiscoveryHealth, SessionEvent};
use hearthmind_discovery::{
    CapabilitySource, DiscoveryOrchestrator, DiscoveryState, RegistrySource, SourceError,
    ViewFilter,
};
use hearthmind_hub::registry::{RegistryAction, RegistryEvent, RegistryScope};
use hearthmind_hub::{Device, Entity, RegistrySnapshot};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, broadcast};

struct MockRegistrySource {
    snapshot: Mutex<RegistrySnapshot>,
    calls: AtomicUsize,
    call_delay: Duration,
    lifecycle_tx: broadcast::Sender<SessionEvent>,
    events_tx: broadcast::Sender<RegistryEvent>,
    connected: AtomicBool,
}

impl MockRegistrySource {
    fn new(snapshot: RegistrySnapshot) -> Arc<Self> {
        Self::with_delay(snapshot, Duration::ZERO)
    }

    fn with_delay(snapshot: RegistrySnapshot, call_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            snapshot: Mutex::new(snapshot),
            calls: AtomicUsize::new(0),
            call_delay,
            lifecycle_tx: broadcast::channel(64).0,
            events_tx: broadcast::channel(64).0,
            connected: AtomicBool::new(true),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RegistrySource for MockRegistrySource {
    async fn snapshot(&self) -> Result<RegistrySnapshot, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.call_delay.is_zero() {
            tokio::time::sleep(self.call_delay).await;
        }
        Ok(self.snapshot.lock().await.clone())
    }

    fn registry_events(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events_tx.subscribe()
    }

    fn lifecycle(&self) -> broadcast::Receiver<SessionEvent> {
        self.lifecycle_tx.subscribe()
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

struct MockCapabilitySource {
    records: Mutex<Vec<ZigbeeCapabilityRecord>>,
    fail_after: AtomicUsize,
    calls: AtomicUsize,
    lifecycle_tx: broadcast::Sender<SessionEvent>,
    connected: AtomicBool,
}

impl MockCapabilitySource {
    fn new(records: Vec<ZigbeeCapabilityRecord>) -> Arc<Self> {
        Arc::new(Self {
            records: Mutex::new(records),
            fail_after: AtomicUsize::new(usize::MAX),
            calls: AtomicUsize::new(0),
            lifecycle_tx: broadcast::channel(64).0,
            connected: AtomicBool::new(true),
        })
    }

    /// Succeed for the first `n` snapshot calls, then time out.
    fn fail_after(&self, n: usize) {
        self.fail_after.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl CapabilitySource for MockCapabilitySource {
    async fn snapshot(
        &self,
        timeout: Duration,
    ) -> Result<Vec<ZigbeeCapabilityRecord>, SourceError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call >= self.fail_after.load(Ordering::SeqCst) {
            return Err(SourceError::Bridge(BridgeError::Timeout(timeout)));
        }
        Ok(self.records.lock().await.clone())
    }

    fn lifecycle(&self) -> broadcast::Receiver<SessionEvent> {
        self.lifecycle_tx.subscribe()
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

fn device(id: &str, name: &str, area: Option<&str>) -> Device {
    serde_json::from_value(json!({
        "id": id,
        "name": name,
        "area_id": area,
        "integration": "mqtt"
    }))
    .unwrap()
}

fn entity(id: &str, device_id: &str) -> Entity {
    serde_json::from_value(json!({"entity_id": id, "device_id": device_id})).unwrap()
}

fn record(address: &str, friendly_name: &str, features: usize) -> ZigbeeCapabilityRecord {
    let exposes: Vec<_> = (0..features)
        .map(|i| json!({"type": "numeric", "name": format!("metric_{i}")}))
        .collect();
    parse_capability_record(&json!({
        "ieee_address": address,
        "friendly_name": friendly_name,
        "definition": {"vendor": "Acme", "model": "X1", "exposes": exposes}
    }))
    .unwrap()
}

fn base_snapshot() -> RegistrySnapshot {
    RegistrySnapshot {
        devices: vec![
            device("dev-1", "porch_light", None),
            device("dev-2", "kitchen_plug", Some("kitchen")),
        ],
        entities: vec![entity("light.porch", "dev-1"), entity("switch.plug", "dev-2")],
        areas: vec![serde_json::from_value(json!({"area_id": "kitchen", "name": "Kitchen"})).unwrap()],
    }
}

fn config() -> DiscoveryConfig {
    DiscoveryConfig::default().with_cache_ttl(3600)
}

#[tokio::test]
async fn initial_snapshot_reconciles_device_without_area() {
    let registry = MockRegistrySource::new(base_snapshot());
    let capabilities = MockCapabilitySource::new(vec![record("0x01", "porch_light", 5)]);
    let orchestrator = DiscoveryOrchestrator::new(config(), registry.clone(), capabilities);

    assert_eq!(orchestrator.state(), DiscoveryState::Idle);
    orchestrator.start().await;
    assert_eq!(orchestrator.state(), DiscoveryState::Ready);

    let model = orchestrator.reconciled().await;
    assert_eq!(model.views.len(), 2);

    let porch = model
        .views
        .iter()
        .find(|view| view.device.id == "dev-1")
        .unwrap();
    assert!(porch.area.is_none());
    let capability = porch.capability.as_ref().unwrap();
    assert_eq!(capability.exposes.len(), 5);

    // Nothing silently dropped.
    let linked = model
        .views
        .iter()
        .filter(|view| view.capability.is_some())
        .count();
    assert_eq!(linked + model.unlinked.len(), 1);

    assert_eq!(orchestrator.health().await, DiscoveryHealth::Fresh);
    orchestrator.shutdown();
}

#[tokio::test]
async fn view_filters_by_area_and_domain() {
    let registry = MockRegistrySource::new(base_snapshot());
    let capabilities = MockCapabilitySource::new(Vec::new());
    let orchestrator = DiscoveryOrchestrator::new(config(), registry, capabilities);
    orchestrator.start().await;

    let kitchen = orchestrator
        .devices(&ViewFilter::new().with_area("kitchen"))
        .await;
    assert_eq!(kitchen.len(), 1);
    assert_eq!(kitchen[0].device.id, "dev-2");

    let mqtt = orchestrator
        .devices(&ViewFilter::new().with_domain("mqtt"))
        .await;
    assert_eq!(mqtt.len(), 2);

    let none = orchestrator
        .devices(&ViewFilter::new().with_domain("zwave"))
        .await;
    assert!(none.is_empty());

    orchestrator.shutdown();
}

#[tokio::test]
async fn capability_timeout_keeps_prior_records() {
    let registry = MockRegistrySource::new(base_snapshot());
    let capabilities = MockCapabilitySource::new(vec![record("0x01", "porch_light", 2)]);
    let orchestrator =
        DiscoveryOrchestrator::new(config(), registry, capabilities.clone());
    orchestrator.start().await;
    assert_eq!(orchestrator.capability_cache().len().await, 1);

    // Every further pull times out; the cache must keep its prior value.
    capabilities.fail_after(1);
    let result = orchestrator.force_refresh().await;
    assert!(matches!(
        result,
        Err(SourceError::Bridge(BridgeError::Timeout(_)))
    ));

    assert_eq!(orchestrator.capability_cache().len().await, 1);
    assert!(orchestrator.capability_cache().get("0x01").await.is_some());
    orchestrator.shutdown();
}

#[tokio::test]
async fn reconnect_flap_coalesces_into_one_resnapshot() {
    let registry = MockRegistrySource::with_delay(base_snapshot(), Duration::from_millis(100));
    let capabilities = MockCapabilitySource::new(Vec::new());
    let orchestrator = DiscoveryOrchestrator::new(config(), registry.clone(), capabilities);
    orchestrator.start().await;
    let after_start = registry.calls();

    // A rapid disconnect/reconnect flap.
    for _ in 0..5 {
        let _ = registry.lifecycle_tx.send(SessionEvent::Reconnected);
    }

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(
        registry.calls(),
        after_start + 1,
        "a reconnect burst must trigger exactly one re-snapshot"
    );
    orchestrator.shutdown();
}

#[tokio::test]
async fn concurrent_force_refresh_coalesces() {
    let registry = MockRegistrySource::with_delay(base_snapshot(), Duration::from_millis(100));
    let capabilities = MockCapabilitySource::new(Vec::new());
    let orchestrator = DiscoveryOrchestrator::new(config(), registry.clone(), capabilities);
    orchestrator.start().await;
    let after_start = registry.calls();

    let first = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.force_refresh().await })
    };
    // Give the first refresh time to take the guard.
    tokio::time::sleep(Duration::from_millis(10)).await;
    orchestrator.force_refresh().await.unwrap();
    first.await.unwrap().unwrap();

    assert_eq!(registry.calls(), after_start + 1);
    orchestrator.shutdown();
}

#[tokio::test]
async fn registry_events_apply_targeted_deltas() {
    let registry = MockRegistrySource::new(base_snapshot());
    let capabilities = MockCapabilitySource::new(Vec::new());
    let orchestrator = DiscoveryOrchestrator::new(config(), registry.clone(), capabilities);
    orchestrator.start().await;
    let after_start = registry.calls();

    registry
        .events_tx
        .send(RegistryEvent {
            scope: RegistryScope::Device,
            action: RegistryAction::Create,
            id: "dev-3".to_string(),
            payload: Some(json!({"id": "dev-3", "name": "new_sensor", "area_id": "kitchen"})),
        })
        .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    let created = orchestrator.registry_cache().device("dev-3").await.unwrap();
    assert_eq!(created.name.as_deref(), Some("new_sensor"));
    // Targeted invalidation, not a re-snapshot per event.
    assert_eq!(registry.calls(), after_start);

    registry
        .events_tx
        .send(RegistryEvent {
            scope: RegistryScope::Device,
            action: RegistryAction::Remove,
            id: "dev-3".to_string(),
            payload: None,
        })
        .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    let removed = orchestrator.registry_cache().device("dev-3").await.unwrap();
    assert!(removed.is_removed());
    orchestrator.shutdown();
}

#[tokio::test]
async fn health_degrades_when_a_transport_is_down() {
    let registry = MockRegistrySource::new(base_snapshot());
    let capabilities = MockCapabilitySource::new(Vec::new());
    let orchestrator =
        DiscoveryOrchestrator::new(config(), registry.clone(), capabilities.clone());
    orchestrator.start().await;
    assert_eq!(orchestrator.health().await, DiscoveryHealth::Fresh);

    capabilities.connected.store(false, Ordering::SeqCst);
    assert_eq!(orchestrator.health().await, DiscoveryHealth::Degraded);

    capabilities.connected.store(true, Ordering::SeqCst);
    assert_eq!(orchestrator.health().await, DiscoveryHealth::Fresh);
    orchestrator.shutdown();
}

#[tokio::test]
async fn stale_caches_surface_as_stale_health() {
    let registry = MockRegistrySource::new(base_snapshot());
    let capabilities = MockCapabilitySource::new(Vec::new());
    let orchestrator = DiscoveryOrchestrator::new(
        DiscoveryConfig::default().with_cache_ttl(0),
        registry,
        capabilities,
    );
    orchestrator.start().await;

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(orchestrator.health().await, DiscoveryHealth::Stale);
    // Stale data is still served, never cleared.
    assert_eq!(orchestrator.reconciled().await.views.len(), 2);
    orchestrator.shutdown();
}

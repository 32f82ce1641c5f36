//! Hub registry client: device/entity/area snapshots and update events.
//!
//! One `call()` per registry; each result list is parsed record by record so
//! a single malformed entry never fails a batch. Registry-update events are
//! not applied here — they are forwarded on a broadcast channel for the
//! cache layer's targeted invalidation.

use crate::error::HubResult;
use crate::model::{Area, Device, Entity, RegistrySnapshot, parse_records};
use crate::protocol::{HubCommand, HubEvent};
use crate::session::{HubSession, SubscriptionHandle};
use hearthmind_core::health::SessionEvent;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Registry list commands.
pub const DEVICE_REGISTRY_LIST: &str = "config/device_registry/list";
pub const ENTITY_REGISTRY_LIST: &str = "config/entity_registry/list";
pub const AREA_REGISTRY_LIST: &str = "config/area_registry/list";

/// Registry update event types.
pub const DEVICE_REGISTRY_UPDATED: &str = "device_registry_updated";
pub const ENTITY_REGISTRY_UPDATED: &str = "entity_registry_updated";

/// Which registry an update event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryScope {
    Device,
    Entity,
}

/// What happened to the affected record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryAction {
    Create,
    Update,
    Remove,
}

impl RegistryAction {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "create" => Some(Self::Create),
            "update" => Some(Self::Update),
            "remove" => Some(Self::Remove),
            _ => None,
        }
    }
}

/// A registry change forwarded to the cache layer.
#[derive(Debug, Clone)]
pub struct RegistryEvent {
    pub scope: RegistryScope,
    pub action: RegistryAction,
    /// Hub id of the affected device or entity.
    pub id: String,
    /// The changed record, when the hub includes it in the event. Without a
    /// payload the cache can only flag the collection for refresh.
    pub payload: Option<Value>,
}

/// Client for the hub's three registries, built on [`HubSession::call`].
pub struct HubRegistryClient {
    session: Arc<HubSession>,
    events_tx: broadcast::Sender<RegistryEvent>,
}

impl HubRegistryClient {
    /// Wrap a ready session.
    pub fn new(session: Arc<HubSession>) -> Self {
        let (events_tx, _) = broadcast::channel(256);
        Self { session, events_tx }
    }

    /// The underlying session.
    pub fn session(&self) -> &Arc<HubSession> {
        &self.session
    }

    /// Lifecycle events of the underlying session.
    pub fn lifecycle(&self) -> broadcast::Receiver<SessionEvent> {
        self.session.lifecycle()
    }

    /// Fetch the device registry.
    pub async fn snapshot_devices(&self) -> HubResult<Vec<Device>> {
        let result = self.session.call(HubCommand::new(DEVICE_REGISTRY_LIST)).await?;
        let list = as_list(&result);
        let (devices, _skipped) = parse_records::<Device>(list, "device");
        Ok(devices)
    }

    /// Fetch the entity registry.
    pub async fn snapshot_entities(&self) -> HubResult<Vec<Entity>> {
        let result = self.session.call(HubCommand::new(ENTITY_REGISTRY_LIST)).await?;
        let list = as_list(&result);
        let (entities, _skipped) = parse_records::<Entity>(list, "entity");
        Ok(entities)
    }

    /// Fetch the area registry.
    pub async fn snapshot_areas(&self) -> HubResult<Vec<Area>> {
        let result = self.session.call(HubCommand::new(AREA_REGISTRY_LIST)).await?;
        let list = as_list(&result);
        let (areas, _skipped) = parse_records::<Area>(list, "area");
        Ok(areas)
    }

    /// Fetch all three registries from the same session, so cross-references
    /// share one snapshot generation.
    pub async fn snapshot(&self) -> HubResult<RegistrySnapshot> {
        let devices = self.snapshot_devices().await?;
        let entities = self.snapshot_entities().await?;
        let areas = self.snapshot_areas().await?;
        Ok(RegistrySnapshot {
            devices,
            entities,
            areas,
        })
    }

    /// Subscribe to the two registry-update event types and forward each
    /// change on [`Self::registry_events`]. The client applies nothing
    /// itself.
    pub async fn watch_registry_updates(&self) -> HubResult<Vec<SubscriptionHandle>> {
        let mut handles = Vec::with_capacity(2);

        for (event_type, scope) in [
            (DEVICE_REGISTRY_UPDATED, RegistryScope::Device),
            (ENTITY_REGISTRY_UPDATED, RegistryScope::Entity),
        ] {
            let events_tx = self.events_tx.clone();
            let handle = self
                .session
                .subscribe(
                    event_type,
                    Arc::new(move |event: HubEvent| {
                        match parse_registry_event(scope, &event.data) {
                            Some(update) => {
                                let _ = events_tx.send(update);
                            }
                            None => {
                                warn!(
                                    event_type = %event.event_type,
                                    "registry event missing action or id, dropped"
                                );
                            }
                        }
                    }),
                )
                .await?;
            handles.push(handle);
        }

        Ok(handles)
    }

    /// Receiver for forwarded registry change events.
    pub fn registry_events(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events_tx.subscribe()
    }
}

fn as_list(result: &Value) -> &[Value] {
    match result.as_array() {
        Some(list) => list.as_slice(),
        None => {
            debug!("registry result was not a list");
            &[]
        }
    }
}

/// Pull action + id (+ optional changed record) out of a registry event.
fn parse_registry_event(scope: RegistryScope, data: &Value) -> Option<RegistryEvent> {
    let action = RegistryAction::parse(data.get("action")?.as_str()?)?;
    let id_field = match scope {
        RegistryScope::Device => "device_id",
        RegistryScope::Entity => "entity_id",
    };
    let id = data.get(id_field)?.as_str()?.to_string();
    let payload = match scope {
        RegistryScope::Device => data.get("device").cloned(),
        RegistryScope::Entity => data.get("entity").cloned(),
    }
    .filter(|payload| !payload.is_null());

    Some(RegistryEvent {
        scope,
        action,
        id,
        payload,
    })
}

//! Staleness-aware caches for registry and capability data.
//!
//! Reads are always served, stale or not: availability beats strict
//! freshness, and staleness only makes a cache eligible for forced refresh.
//! Mutations are atomic with respect to readers — `replace_all` builds the
//! new maps outside the lock and swaps them in, `apply_delta` is a targeted
//! single-entry change under the write lock. A `remove` event stamps the
//! record instead of deleting it, so the last-known state survives for
//! audit.

use hearthmind_bridge::{Availability, ZigbeeCapabilityRecord};
use hearthmind_core::envelope::CacheEnvelope;
use hearthmind_hub::registry::{RegistryAction, RegistryEvent, RegistryScope};
use hearthmind_hub::{Area, Device, Entity, RegistrySnapshot};
use chrono::Utc;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// The four lookup maps plus the record stores they are derived from. All
/// built from one snapshot generation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegistryMaps {
    /// Device metadata by hub device id.
    pub devices: HashMap<String, Device>,
    /// Entity records by hub entity id.
    pub entities: HashMap<String, Entity>,
    /// Area records by area id.
    pub areas: HashMap<String, Area>,
    /// entity id -> owning device id.
    pub entity_device: HashMap<String, String>,
    /// device id -> area id.
    pub device_area: HashMap<String, String>,
    /// entity id -> area id, the entity's own assignment or its device's.
    pub entity_area: HashMap<String, String>,
}

impl RegistryMaps {
    /// Derive the lookup maps from a snapshot.
    ///
    /// An entity whose `device_id` does not resolve within the same snapshot
    /// generation is dropped with a warning, never fatal.
    pub fn build(snapshot: RegistrySnapshot) -> Self {
        let mut maps = Self::default();

        for device in snapshot.devices {
            if let Some(area_id) = &device.area_id {
                maps.device_area.insert(device.id.clone(), area_id.clone());
            }
            maps.devices.insert(device.id.clone(), device);
        }

        for area in snapshot.areas {
            maps.areas.insert(area.id.clone(), area);
        }

        for entity in snapshot.entities {
            if let Some(device_id) = &entity.device_id {
                if !maps.devices.contains_key(device_id) {
                    warn!(
                        entity_id = %entity.id,
                        device_id = %device_id,
                        "entity references a device missing from this snapshot, dropped"
                    );
                    continue;
                }
                maps.entity_device
                    .insert(entity.id.clone(), device_id.clone());
            }
            if let Some(area_id) = resolve_entity_area(&entity, &maps.device_area) {
                maps.entity_area.insert(entity.id.clone(), area_id);
            }
            maps.entities.insert(entity.id.clone(), entity);
        }

        maps
    }
}

/// An entity's area: its own assignment wins, otherwise its device's.
fn resolve_entity_area(entity: &Entity, device_area: &HashMap<String, String>) -> Option<String> {
    entity.area_id.clone().or_else(|| {
        entity
            .device_id
            .as_ref()
            .and_then(|device_id| device_area.get(device_id))
            .cloned()
    })
}

/// TTL-tagged cache over the hub registries.
pub struct RegistryCache {
    ttl: Duration,
    inner: RwLock<CacheEnvelope<RegistryMaps>>,
}

impl RegistryCache {
    /// Create an empty cache with the given freshness window.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: RwLock::new(CacheEnvelope::default()),
        }
    }

    /// Atomically swap in a full snapshot and reset the capture timestamp.
    /// The maps are built outside the lock; readers see pre- or post-state,
    /// never a half-updated cache.
    pub async fn replace_all(&self, snapshot: RegistrySnapshot) {
        let maps = RegistryMaps::build(snapshot);
        self.inner.write().await.replace(maps);
    }

    /// Targeted single-entry update from a registry event. With a payload
    /// the change is applied in place; without one the affected collection
    /// is flagged for the next refresh, keeping last-known data.
    pub async fn apply_delta(&self, event: &RegistryEvent) {
        let mut envelope = self.inner.write().await;

        match (event.scope, event.action) {
            (RegistryScope::Device, RegistryAction::Remove) => {
                let maps = envelope.get_mut();
                maps.device_area.remove(&event.id);
                match maps.devices.get_mut(&event.id) {
                    Some(device) => device.removed_at = Some(Utc::now()),
                    None => debug!(id = %event.id, "remove event for unknown device"),
                }
            }
            (RegistryScope::Entity, RegistryAction::Remove) => {
                let maps = envelope.get_mut();
                maps.entity_device.remove(&event.id);
                maps.entity_area.remove(&event.id);
                match maps.entities.get_mut(&event.id) {
                    Some(entity) => entity.removed_at = Some(Utc::now()),
                    None => debug!(id = %event.id, "remove event for unknown entity"),
                }
            }
            (RegistryScope::Device, _) => match event.payload.as_ref() {
                Some(payload) => match serde_json::from_value::<Device>(payload.clone()) {
                    Ok(device) => upsert_device(envelope.get_mut(), device),
                    Err(err) => {
                        warn!(id = %event.id, error = %err, "unparseable device payload, flagging refresh");
                        envelope.mark_dirty();
                    }
                },
                None => {
                    debug!(id = %event.id, "device event without payload, flagging refresh");
                    envelope.mark_dirty();
                }
            },
            (RegistryScope::Entity, _) => match event.payload.as_ref() {
                Some(payload) => match serde_json::from_value::<Entity>(payload.clone()) {
                    Ok(entity) => upsert_entity(envelope.get_mut(), entity),
                    Err(err) => {
                        warn!(id = %event.id, error = %err, "unparseable entity payload, flagging refresh");
                        envelope.mark_dirty();
                    }
                },
                None => {
                    debug!(id = %event.id, "entity event without payload, flagging refresh");
                    envelope.mark_dirty();
                }
            },
        }
    }

    /// Device metadata lookup.
    pub async fn device(&self, device_id: &str) -> Option<Device> {
        self.inner.read().await.get().devices.get(device_id).cloned()
    }

    /// Entity record lookup.
    pub async fn entity(&self, entity_id: &str) -> Option<Entity> {
        self.inner.read().await.get().entities.get(entity_id).cloned()
    }

    /// Area record lookup.
    pub async fn area(&self, area_id: &str) -> Option<Area> {
        self.inner.read().await.get().areas.get(area_id).cloned()
    }

    /// Owning device of an entity.
    pub async fn device_of(&self, entity_id: &str) -> Option<String> {
        self.inner.read().await.get().entity_device.get(entity_id).cloned()
    }

    /// Area of a device.
    pub async fn area_of_device(&self, device_id: &str) -> Option<String> {
        self.inner.read().await.get().device_area.get(device_id).cloned()
    }

    /// Area of an entity, own or inherited.
    pub async fn area_of_entity(&self, entity_id: &str) -> Option<String> {
        self.inner.read().await.get().entity_area.get(entity_id).cloned()
    }

    /// All device records, removed ones included.
    pub async fn devices(&self) -> Vec<Device> {
        self.inner.read().await.get().devices.values().cloned().collect()
    }

    /// All entity records, removed ones included.
    pub async fn entities(&self) -> Vec<Entity> {
        self.inner.read().await.get().entities.values().cloned().collect()
    }

    /// All areas.
    pub async fn areas(&self) -> Vec<Area> {
        self.inner.read().await.get().areas.values().cloned().collect()
    }

    /// Clone of the full map state, for diagnostics and tests.
    pub async fn maps(&self) -> RegistryMaps {
        self.inner.read().await.get().clone()
    }

    /// Whether the cache is past its freshness window.
    pub async fn is_stale(&self) -> bool {
        self.inner.read().await.is_stale(self.ttl)
    }

    /// Whether an event arrived that could not be applied in place.
    pub async fn is_dirty(&self) -> bool {
        self.inner.read().await.is_dirty()
    }

    /// Age of the current snapshot generation.
    pub async fn age(&self) -> Duration {
        self.inner.read().await.age()
    }
}

fn upsert_device(maps: &mut RegistryMaps, device: Device) {
    match &device.area_id {
        Some(area_id) => {
            maps.device_area.insert(device.id.clone(), area_id.clone());
        }
        None => {
            maps.device_area.remove(&device.id);
        }
    }

    // Entities inheriting their area from this device follow the change.
    for (entity_id, device_id) in &maps.entity_device {
        if device_id != &device.id {
            continue;
        }
        let own_area = maps
            .entities
            .get(entity_id)
            .and_then(|entity| entity.area_id.as_ref());
        if own_area.is_some() {
            continue;
        }
        match &device.area_id {
            Some(area_id) => {
                maps.entity_area.insert(entity_id.clone(), area_id.clone());
            }
            None => {
                maps.entity_area.remove(entity_id);
            }
        }
    }

    maps.devices.insert(device.id.clone(), device);
}

fn upsert_entity(maps: &mut RegistryMaps, entity: Entity) {
    if let Some(device_id) = &entity.device_id {
        if !maps.devices.contains_key(device_id) {
            warn!(
                entity_id = %entity.id,
                device_id = %device_id,
                "entity event references an unknown device, dropped"
            );
            return;
        }
        maps.entity_device
            .insert(entity.id.clone(), device_id.clone());
    } else {
        maps.entity_device.remove(&entity.id);
    }

    match resolve_entity_area(&entity, &maps.device_area) {
        Some(area_id) => {
            maps.entity_area.insert(entity.id.clone(), area_id);
        }
        None => {
            maps.entity_area.remove(&entity.id);
        }
    }

    maps.entities.insert(entity.id.clone(), entity);
}

/// TTL-tagged cache over the bridge's capability records, keyed by hardware
/// address.
pub struct CapabilityCache {
    ttl: Duration,
    inner: RwLock<CacheEnvelope<HashMap<String, ZigbeeCapabilityRecord>>>,
}

impl CapabilityCache {
    /// Create an empty cache with the given freshness window.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: RwLock::new(CacheEnvelope::default()),
        }
    }

    /// Replace the records wholesale: retained bridge dumps are authoritative.
    pub async fn replace_all(&self, records: Vec<ZigbeeCapabilityRecord>) {
        let map: HashMap<String, ZigbeeCapabilityRecord> = records
            .into_iter()
            .map(|record| (record.ieee_address.clone(), record))
            .collect();
        self.inner.write().await.replace(map);
    }

    /// Upsert one record from an incremental response-topic refresh.
    pub async fn update(&self, record: ZigbeeCapabilityRecord) {
        self.inner
            .write()
            .await
            .get_mut()
            .insert(record.ieee_address.clone(), record);
    }

    /// Track an availability change for a radio, by friendly name.
    pub async fn set_availability(&self, friendly_name: &str, availability: Availability) {
        let mut envelope = self.inner.write().await;
        let record = envelope
            .get_mut()
            .values_mut()
            .find(|record| record.friendly_name.as_deref() == Some(friendly_name));
        match record {
            Some(record) => record.availability = Some(availability),
            None => debug!(friendly_name, "availability for unknown radio"),
        }
    }

    /// Record lookup by hardware address, regardless of staleness.
    pub async fn get(&self, ieee_address: &str) -> Option<ZigbeeCapabilityRecord> {
        self.inner.read().await.get().get(ieee_address).cloned()
    }

    /// All capability records.
    pub async fn all(&self) -> Vec<ZigbeeCapabilityRecord> {
        self.inner.read().await.get().values().cloned().collect()
    }

    /// Number of cached records.
    pub async fn len(&self) -> usize {
        self.inner.read().await.get().len()
    }

    /// Whether no records are cached.
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.get().is_empty()
    }

    /// Whether the cache is past its freshness window.
    pub async fn is_stale(&self) -> bool {
        self.inner.read().await.is_stale(self.ttl)
    }

    /// Age of the current record set.
    pub async fn age(&self) -> Duration {
        self.inner.read().await.age()
    }
}

//! Canonical registry records.
//!
//! Everything except the primary key is optional: hubs evolve their registry
//! schemas independently of us, and one malformed or unfamiliar record must
//! never fail a whole snapshot. [`parse_records`] skips bad records and
//! counts them instead.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// A device from the hub's device registry.
///
/// Lifecycle: created on first snapshot or a `create` registry event,
/// mutated on `update` events, and logically removed on `remove` events —
/// `removed_at` is stamped while the last-known state is retained for audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    /// Hub-assigned identifier.
    pub id: String,

    /// Display name reported by the integration.
    #[serde(default)]
    pub name: Option<String>,

    /// User override for the display name. Takes precedence.
    #[serde(default)]
    pub name_by_user: Option<String>,

    #[serde(default)]
    pub manufacturer: Option<String>,

    #[serde(default)]
    pub model: Option<String>,

    #[serde(default)]
    pub model_id: Option<String>,

    #[serde(default)]
    pub serial_number: Option<String>,

    /// Area assignment, if any.
    #[serde(default)]
    pub area_id: Option<String>,

    /// Integration/platform domain that owns the device.
    #[serde(default, alias = "platform")]
    pub integration: Option<String>,

    /// Config entry the device was set up through.
    #[serde(default, alias = "primary_config_entry")]
    pub config_entry_id: Option<String>,

    #[serde(default)]
    pub sw_version: Option<String>,

    #[serde(default)]
    pub hw_version: Option<String>,

    /// Weak back-reference to a parent device. Devices do not own their
    /// parent; a dangling reference here is tolerated.
    #[serde(default)]
    pub via_device_id: Option<String>,

    #[serde(default)]
    pub labels: Vec<String>,

    /// Creation time as epoch seconds, when the hub reports it.
    #[serde(default)]
    pub created_at: Option<f64>,

    /// Last modification time as epoch seconds.
    #[serde(default)]
    pub modified_at: Option<f64>,

    /// Soft-disable marker (`user`, `integration`, ...).
    #[serde(default)]
    pub disabled_by: Option<String>,

    /// Stamped on logical removal. Never set by the wire format.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub removed_at: Option<DateTime<Utc>>,
}

impl Device {
    /// Best display name: user override, then integration name, then id.
    pub fn display_name(&self) -> &str {
        self.name_by_user
            .as_deref()
            .or(self.name.as_deref())
            .unwrap_or(&self.id)
    }

    /// Whether the device has been logically removed.
    pub fn is_removed(&self) -> bool {
        self.removed_at.is_some()
    }
}

/// An entity from the hub's entity registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Hub-assigned identifier, `<domain>.<object_id>`.
    #[serde(rename = "entity_id")]
    pub id: String,

    /// Weak reference to the owning device.
    #[serde(default)]
    pub device_id: Option<String>,

    /// Area override. When absent the entity inherits its device's area.
    #[serde(default)]
    pub area_id: Option<String>,

    /// User-assigned name. Highest display precedence.
    #[serde(default)]
    pub name: Option<String>,

    /// Name suggested by the integration.
    #[serde(default)]
    pub original_name: Option<String>,

    #[serde(default)]
    pub platform: Option<String>,

    #[serde(default)]
    pub aliases: Vec<String>,

    #[serde(default)]
    pub labels: Vec<String>,

    #[serde(default)]
    pub disabled_by: Option<String>,

    #[serde(default)]
    pub hidden_by: Option<String>,

    /// `config`, `diagnostic`, or unset for primary entities.
    #[serde(default, rename = "entity_category")]
    pub category: Option<String>,

    /// Stamped on logical removal. Never set by the wire format.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub removed_at: Option<DateTime<Utc>>,
}

impl Entity {
    /// The domain prefix of the entity id (`sensor.kitchen_temp` -> `sensor`).
    pub fn domain(&self) -> &str {
        self.id.split('.').next().unwrap_or(&self.id)
    }

    /// Display name precedence: user-assigned, then original, then the
    /// object part of the id.
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .or(self.original_name.as_deref())
            .unwrap_or_else(|| self.id.split('.').nth(1).unwrap_or(&self.id))
    }

    /// Whether the entity has been logically removed.
    pub fn is_removed(&self) -> bool {
        self.removed_at.is_some()
    }
}

/// An area from the hub's area registry. Pure lookup table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Area {
    #[serde(rename = "area_id")]
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub floor_id: Option<String>,

    #[serde(default)]
    pub icon: Option<String>,
}

/// One full pull of the three registries, taken from the same session so the
/// cross-references inside it share a snapshot generation.
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    pub devices: Vec<Device>,
    pub entities: Vec<Entity>,
    pub areas: Vec<Area>,
}

/// Parse a registry result list record by record.
///
/// Malformed records (most commonly a missing primary key) are skipped and
/// counted, never failing the batch. Returns the parsed records and the
/// skip count.
pub fn parse_records<T: DeserializeOwned>(list: &[Value], kind: &str) -> (Vec<T>, usize) {
    let mut records = Vec::with_capacity(list.len());
    let mut skipped = 0usize;

    for raw in list {
        match serde_json::from_value::<T>(raw.clone()) {
            Ok(record) => records.push(record),
            Err(err) => {
                skipped += 1;
                warn!(kind, error = %err, "skipping malformed registry record");
            }
        }
    }

    if skipped > 0 {
        warn!(kind, skipped, parsed = records.len(), "registry snapshot had malformed records");
    }
    (records, skipped)
}

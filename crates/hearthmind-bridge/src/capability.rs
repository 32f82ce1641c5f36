//! Capability records parsed from bridge payloads.
//!
//! The bridge's device dump is rich and loosely versioned, so parsing is
//! deliberately forgiving: every field except the hardware address is
//! optional, exposed features are extracted recursively without assuming a
//! fixed nesting depth, and feature types we do not model are kept as opaque
//! blobs so downstream consumers can still display them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// Per-device availability as published on the availability topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Availability {
    Online,
    Offline,
}

impl Availability {
    /// Parse an availability payload, which is either a bare string or a
    /// `{"state": ...}` object depending on the bridge's config.
    pub fn parse(payload: &Value) -> Option<Self> {
        let state = payload
            .as_str()
            .or_else(|| payload.get("state").and_then(Value::as_str))?;
        match state {
            "online" => Some(Self::Online),
            "offline" => Some(Self::Offline),
            _ => None,
        }
    }
}

/// What kind of feature a device exposes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureKind {
    Numeric,
    Binary,
    Enum,
    Text,
    List,
    Composite,
    /// A feature type we do not model. The raw blob is retained on the
    /// feature so nothing is dropped.
    #[serde(untagged)]
    Other(String),
}

impl FeatureKind {
    fn parse(raw: &str) -> Self {
        match raw {
            "numeric" => Self::Numeric,
            "binary" => Self::Binary,
            "enum" => Self::Enum,
            "text" => Self::Text,
            "list" => Self::List,
            "composite" => Self::Composite,
            other => Self::Other(other.to_string()),
        }
    }
}

/// One exposed feature, possibly composite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExposedFeature {
    pub kind: FeatureKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Payload property the feature reads/writes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_min: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_max: Option<f64>,

    /// Allowed values for enum features.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,

    /// Access bitmask as reported by the bridge.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access: Option<u8>,

    /// Sub-features of composite (or unmodeled grouping) features.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub features: Vec<ExposedFeature>,

    /// Original blob, kept only for unmodeled feature kinds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<Value>,
}

impl ExposedFeature {
    /// Parse one feature entry, recursing into nested features.
    pub fn parse(value: &Value) -> Option<Self> {
        let kind_raw = value.get("type")?.as_str()?;
        let kind = FeatureKind::parse(kind_raw);

        let features = value
            .get("features")
            .and_then(Value::as_array)
            .map(|list| list.iter().filter_map(Self::parse).collect())
            .unwrap_or_default();

        let raw = match kind {
            FeatureKind::Other(_) => Some(value.clone()),
            _ => None,
        };

        Some(Self {
            kind,
            name: str_field(value, "name"),
            property: str_field(value, "property"),
            unit: str_field(value, "unit"),
            value_min: value.get("value_min").and_then(Value::as_f64),
            value_max: value.get("value_max").and_then(Value::as_f64),
            values: value
                .get("values")
                .and_then(Value::as_array)
                .map(|list| {
                    list.iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            access: value.get("access").and_then(Value::as_u64).map(|a| a as u8),
            features,
            raw,
        })
    }

    /// Total number of leaf features, counting through composites.
    pub fn leaf_count(&self) -> usize {
        if self.features.is_empty() {
            1
        } else {
            self.features.iter().map(ExposedFeature::leaf_count).sum()
        }
    }
}

/// Canonical capability record for one radio, keyed by hardware address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZigbeeCapabilityRecord {
    /// Hardware address. Primary key; a distinct namespace from hub ids.
    pub ieee_address: String,

    #[serde(default)]
    pub friendly_name: Option<String>,

    #[serde(default)]
    pub manufacturer: Option<String>,

    #[serde(default)]
    pub model: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    /// Radio role: `Router`, `EndDevice`, `Coordinator`.
    #[serde(default)]
    pub device_type: Option<String>,

    #[serde(default)]
    pub power_source: Option<String>,

    #[serde(default)]
    pub sw_build_id: Option<String>,

    #[serde(default)]
    pub date_code: Option<String>,

    #[serde(default)]
    pub supported: Option<bool>,

    #[serde(default)]
    pub interview_completed: Option<bool>,

    #[serde(default)]
    pub link_quality: Option<u8>,

    #[serde(default)]
    pub battery: Option<f64>,

    #[serde(default)]
    pub battery_low: Option<bool>,

    #[serde(default)]
    pub availability: Option<Availability>,

    #[serde(default)]
    pub exposes: Vec<ExposedFeature>,

    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
}

impl ZigbeeCapabilityRecord {
    /// Fold an incremental state payload (link quality, battery, last-seen)
    /// into the record. Response-topic refreshes come through here.
    pub fn apply_state(&mut self, payload: &Value) {
        if let Some(lqi) = payload.get("linkquality").and_then(Value::as_u64) {
            self.link_quality = Some(lqi.min(u8::MAX as u64) as u8);
        }
        if let Some(battery) = payload.get("battery").and_then(Value::as_f64) {
            self.battery = Some(battery);
        }
        if let Some(low) = payload.get("battery_low").and_then(Value::as_bool) {
            self.battery_low = Some(low);
        }
        if let Some(last_seen) = payload.get("last_seen").and_then(Value::as_str) {
            if let Ok(ts) = DateTime::parse_from_rfc3339(last_seen) {
                self.last_seen = Some(ts.with_timezone(&Utc));
            }
        }
    }
}

/// Parse one raw device entry. `None` when the hardware address is missing —
/// the record is unusable as a capability source.
pub fn parse_capability_record(value: &Value) -> Option<ZigbeeCapabilityRecord> {
    let ieee_address = str_field(value, "ieee_address")?;
    let definition = value.get("definition").filter(|d| !d.is_null());

    let exposes = definition
        .and_then(|d| d.get("exposes"))
        .and_then(Value::as_array)
        .map(|list| list.iter().filter_map(ExposedFeature::parse).collect())
        .unwrap_or_default();

    Some(ZigbeeCapabilityRecord {
        ieee_address,
        friendly_name: str_field(value, "friendly_name"),
        manufacturer: definition
            .and_then(|d| str_field(d, "vendor"))
            .or_else(|| str_field(value, "manufacturer")),
        model: definition
            .and_then(|d| str_field(d, "model"))
            .or_else(|| str_field(value, "model_id")),
        description: definition.and_then(|d| str_field(d, "description")),
        device_type: str_field(value, "type"),
        power_source: str_field(value, "power_source"),
        sw_build_id: str_field(value, "software_build_id"),
        date_code: str_field(value, "date_code"),
        supported: value.get("supported").and_then(Value::as_bool),
        interview_completed: value.get("interview_completed").and_then(Value::as_bool),
        link_quality: None,
        battery: None,
        battery_low: None,
        availability: None,
        exposes,
        last_seen: None,
    })
}

/// Parse a device dump list record by record. Records without a hardware
/// address are skipped and counted, never failing the batch.
pub fn parse_capability_list(value: &Value) -> (Vec<ZigbeeCapabilityRecord>, usize) {
    let Some(list) = value.as_array() else {
        warn!("bridge device dump was not a list");
        return (Vec::new(), 0);
    };

    let mut records = Vec::with_capacity(list.len());
    let mut skipped = 0usize;
    for raw in list {
        match parse_capability_record(raw) {
            Some(record) => records.push(record),
            None => skipped += 1,
        }
    }

    if skipped > 0 {
        warn!(skipped, parsed = records.len(), "bridge dump had records without hardware addresses");
    }
    (records, skipped)
}

/// Bridge/coordinator metadata from the retained info topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct BridgeInfo {
    #[serde(default)]
    pub version: Option<String>,

    #[serde(default)]
    pub coordinator_type: Option<String>,

    #[serde(default)]
    pub coordinator_ieee: Option<String>,

    #[serde(default)]
    pub permit_join: Option<bool>,
}

impl BridgeInfo {
    /// Parse the retained info payload.
    pub fn parse(value: &Value) -> Self {
        let coordinator = value.get("coordinator");
        Self {
            version: str_field(value, "version"),
            coordinator_type: coordinator.and_then(|c| str_field(c, "type")),
            coordinator_ieee: coordinator.and_then(|c| str_field(c, "ieee_address")),
            permit_join: value.get("permit_join").and_then(Value::as_bool),
        }
    }
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

//! Identity resolution across the two device id spaces.
//!
//! The hub assigns its own device ids; the bridge keys radios by hardware
//! address. Neither can serve as the other's primary key, so reconciliation
//! produces a third, derived view: one [`ReconciledDeviceView`] per hub
//! device, with at most one capability record attached. Resolution tries the
//! operator's explicit link table first, then normalized name/model
//! similarity. An unresolved identity is an expected outcome, not an error,
//! and unclaimed bridge records are returned separately so nothing is
//! silently dropped.

use crate::cache::{CapabilityCache, RegistryCache};
use hearthmind_bridge::ZigbeeCapabilityRecord;
use hearthmind_core::config::DiscoveryConfig;
use hearthmind_hub::{Area, Device};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Minimum normalized-name similarity for a fallback link.
const NAME_MATCH_THRESHOLD: f64 = 0.8;

/// Relaxed name threshold when the model ids agree.
const NAME_WITH_MODEL_THRESHOLD: f64 = 0.5;

/// How a device/capability link was established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkOrigin {
    /// Operator-pinned in the explicit link table.
    Explicit,
    /// Normalized friendly-name/model similarity.
    NameModel,
    /// No capability record could be resolved. Normal steady state for
    /// non-Zigbee devices.
    Unmatched,
}

/// The unified read model: one per hub device. Derived and rebuildable, never
/// persisted as a source of truth.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconciledDeviceView {
    pub device: Device,
    /// Resolved area record, when the device has an assignment the area
    /// registry knows.
    pub area: Option<Area>,
    /// The linked radio capability record, when identity resolution
    /// succeeded.
    pub capability: Option<ZigbeeCapabilityRecord>,
    pub origin: LinkOrigin,
}

/// Output of one reconciliation pass.
#[derive(Debug, Clone, Default)]
pub struct ReconciledModel {
    /// One view per live hub device.
    pub views: Vec<ReconciledDeviceView>,
    /// Bridge records no hub device claimed. Exposed so nothing disappears.
    pub unlinked: Vec<ZigbeeCapabilityRecord>,
}

/// Reconciliation engine. Cheap to run, so the model is computed on demand
/// instead of eagerly cached.
pub struct ReconciliationEngine {
    config: DiscoveryConfig,
}

impl ReconciliationEngine {
    pub fn new(config: DiscoveryConfig) -> Self {
        Self { config }
    }

    /// Produce the current model from the two caches.
    pub async fn reconcile(
        &self,
        registry: &RegistryCache,
        capabilities: &CapabilityCache,
    ) -> ReconciledModel {
        let maps = registry.maps().await;
        let records = capabilities.all().await;
        reconcile_model(&self.config, maps.devices, &maps.areas, records)
    }
}

/// Pure reconciliation over already-captured state. Deterministic and
/// order-independent: inputs are sorted before matching.
pub fn reconcile_model(
    config: &DiscoveryConfig,
    devices: HashMap<String, Device>,
    areas: &HashMap<String, Area>,
    records: Vec<ZigbeeCapabilityRecord>,
) -> ReconciledModel {
    let mut devices: Vec<Device> = devices
        .into_values()
        .filter(|device| !device.is_removed())
        .collect();
    devices.sort_by(|a, b| a.id.cmp(&b.id));

    let mut by_address: HashMap<String, ZigbeeCapabilityRecord> = records
        .into_iter()
        .map(|record| (record.ieee_address.clone(), record))
        .collect();
    let mut claimed: HashSet<String> = HashSet::new();

    let mut views = Vec::with_capacity(devices.len());
    for device in devices {
        let (capability, origin) = resolve_identity(config, &device, &by_address, &claimed);
        if let Some(record) = &capability {
            claimed.insert(record.ieee_address.clone());
        }

        let area = device
            .area_id
            .as_ref()
            .and_then(|area_id| areas.get(area_id))
            .cloned();

        views.push(ReconciledDeviceView {
            device,
            area,
            capability,
            origin,
        });
    }

    let mut unlinked: Vec<ZigbeeCapabilityRecord> = by_address
        .drain()
        .filter(|(address, _)| !claimed.contains(address))
        .map(|(_, record)| record)
        .collect();
    unlinked.sort_by(|a, b| a.ieee_address.cmp(&b.ieee_address));

    ReconciledModel { views, unlinked }
}

/// Resolve one device against the unclaimed capability records.
fn resolve_identity(
    config: &DiscoveryConfig,
    device: &Device,
    by_address: &HashMap<String, ZigbeeCapabilityRecord>,
    claimed: &HashSet<String>,
) -> (Option<ZigbeeCapabilityRecord>, LinkOrigin) {
    // (a) the explicit link table.
    if let Some(address) = config.explicit_links.get(&device.id) {
        match by_address.get(address) {
            Some(record) if !claimed.contains(address) => {
                return (Some(record.clone()), LinkOrigin::Explicit);
            }
            _ => {
                debug!(
                    device_id = %device.id,
                    address = %address,
                    "explicit link points at an absent or already-claimed record"
                );
                return (None, LinkOrigin::Unmatched);
            }
        }
    }

    // (b) normalized name/model similarity, for devices that plausibly live
    // behind the bridge.
    if !is_bridge_candidate(config, device) {
        return (None, LinkOrigin::Unmatched);
    }

    let device_name = normalize(device.display_name());
    let device_model = device
        .model_id
        .as_deref()
        .or(device.model.as_deref())
        .map(normalize);

    let mut best: Option<(&ZigbeeCapabilityRecord, f64)> = None;
    let mut addresses: Vec<&String> = by_address.keys().collect();
    addresses.sort();

    for address in addresses {
        if claimed.contains(address) {
            continue;
        }
        let record = &by_address[address];
        let record_name = record
            .friendly_name
            .as_deref()
            .map(normalize)
            .unwrap_or_default();
        let name_score = bigram_dice(&device_name, &record_name);

        let model_agrees = match (&device_model, &record.model) {
            (Some(device_model), Some(record_model)) => {
                !device_model.is_empty() && *device_model == normalize(record_model)
            }
            _ => false,
        };

        let threshold = if model_agrees {
            NAME_WITH_MODEL_THRESHOLD
        } else {
            NAME_MATCH_THRESHOLD
        };
        if name_score < threshold {
            continue;
        }

        if best.map_or(true, |(_, best_score)| name_score > best_score) {
            best = Some((record, name_score));
        }
    }

    match best {
        Some((record, _)) => (Some(record.clone()), LinkOrigin::NameModel),
        None => (None, LinkOrigin::Unmatched),
    }
}

/// Whether a device could plausibly be one of the bridge's radios: its
/// integration domain is one the bridge publishes through, its config entry
/// is mapped to a bridge base topic, or the hub gave us nothing to rule it
/// out with.
fn is_bridge_candidate(config: &DiscoveryConfig, device: &Device) -> bool {
    if let Some(entry) = &device.config_entry_id {
        if config.bridge_config_entries.contains_key(entry) {
            return true;
        }
    }
    match &device.integration {
        Some(integration) => config.bridge_integrations.iter().any(|i| i == integration),
        None => true,
    }
}

/// Lowercased, alphanumeric-only form used for all similarity comparisons.
fn normalize(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Dice coefficient over character bigrams. 1.0 for identical strings, 0.0
/// for disjoint ones; equal single-character strings compare exactly.
fn bigram_dice(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }

    let bigrams = |s: &str| -> Vec<(char, char)> {
        let chars: Vec<char> = s.chars().collect();
        chars.windows(2).map(|w| (w[0], w[1])).collect()
    };

    let a_grams = bigrams(a);
    let mut b_grams = bigrams(b);
    if a_grams.is_empty() || b_grams.is_empty() {
        return 0.0;
    }

    let mut overlap = 0usize;
    for gram in &a_grams {
        if let Some(pos) = b_grams.iter().position(|g| g == gram) {
            b_grams.swap_remove(pos);
            overlap += 1;
        }
    }

    (2.0 * overlap as f64) / (a_grams.len() + bigrams(b).len()) as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearthmind_bridge::parse_capability_record;
    use serde_json::json;

    fn device(id: &str, name: &str, integration: Option<&str>) -> Device {
        serde_json::from_value(json!({
            "id": id,
            "name": name,
            "integration": integration
        }))
        .unwrap()
    }

    fn record(address: &str, friendly_name: &str) -> ZigbeeCapabilityRecord {
        parse_capability_record(&json!({
            "ieee_address": address,
            "friendly_name": friendly_name
        }))
        .unwrap()
    }

    fn devices_map(devices: Vec<Device>) -> HashMap<String, Device> {
        devices.into_iter().map(|d| (d.id.clone(), d)).collect()
    }

    #[test]
    fn normalize_strips_case_and_punctuation() {
        assert_eq!(normalize("Kitchen Sensor"), "kitchensensor");
        assert_eq!(normalize("kitchen_sensor"), "kitchensensor");
        assert_eq!(normalize("TRÅDFRI-bulb"), "trådfribulb");
    }

    #[test]
    fn dice_bounds() {
        assert_eq!(bigram_dice("kitchensensor", "kitchensensor"), 1.0);
        assert_eq!(bigram_dice("abc", "xyz"), 0.0);
        assert_eq!(bigram_dice("", "anything"), 0.0);
        let close = bigram_dice("kitchensensor", "kitchensensor2");
        assert!(close > 0.8, "near-identical names should score high: {close}");
    }

    #[test]
    fn explicit_link_wins_over_name_similarity() {
        let config = DiscoveryConfig::default().with_explicit_link("dev-1", "0x02");
        let devices = devices_map(vec![device("dev-1", "porch_light", Some("mqtt"))]);
        // 0x01 would win on name; the pin says 0x02.
        let records = vec![record("0x01", "porch_light"), record("0x02", "weird_name")];

        let model = reconcile_model(&config, devices, &HashMap::new(), records);
        let view = &model.views[0];
        assert_eq!(view.origin, LinkOrigin::Explicit);
        assert_eq!(view.capability.as_ref().unwrap().ieee_address, "0x02");
        assert_eq!(model.unlinked.len(), 1);
        assert_eq!(model.unlinked[0].ieee_address, "0x01");
    }

    #[test]
    fn name_similarity_links_normalized_variants() {
        let config = DiscoveryConfig::default();
        let devices = devices_map(vec![device("dev-1", "Kitchen Sensor", Some("mqtt"))]);
        let records = vec![record("0x0a", "kitchen_sensor")];

        let model = reconcile_model(&config, devices, &HashMap::new(), records);
        assert_eq!(model.views[0].origin, LinkOrigin::NameModel);
        assert!(model.unlinked.is_empty());
    }

    #[test]
    fn model_agreement_relaxes_name_threshold() {
        let config = DiscoveryConfig::default();
        let mut dev = device("dev-1", "Hallway motion", Some("mqtt"));
        dev.model_id = Some("RTCGQ11LM".to_string());
        let devices = devices_map(vec![dev]);

        let mut rec = record("0x0b", "hall_motion");
        rec.model = Some("RTCGQ11LM".to_string());

        let model = reconcile_model(&config, devices, &HashMap::new(), vec![rec]);
        assert_eq!(model.views[0].origin, LinkOrigin::NameModel);
    }

    #[test]
    fn non_bridge_integrations_never_match_by_name() {
        let config = DiscoveryConfig::default();
        let devices = devices_map(vec![device("dev-1", "porch_light", Some("hue"))]);
        let records = vec![record("0x01", "porch_light")];

        let model = reconcile_model(&config, devices, &HashMap::new(), records);
        assert_eq!(model.views[0].origin, LinkOrigin::Unmatched);
        assert_eq!(model.unlinked.len(), 1);
    }

    #[test]
    fn unmatched_devices_and_records_are_both_kept() {
        let config = DiscoveryConfig::default();
        let devices = devices_map(vec![
            device("dev-1", "porch_light", Some("mqtt")),
            device("dev-2", "cloud_thing", Some("cloudapi")),
        ]);
        let records = vec![
            record("0x01", "porch_light"),
            record("0x02", "orphan_radio"),
            record("0x03", "another_orphan"),
        ];

        let model = reconcile_model(&config, devices, &HashMap::new(), records);
        assert_eq!(model.views.len(), 2);

        let linked = model
            .views
            .iter()
            .filter(|view| view.capability.is_some())
            .count();
        // Nothing silently dropped: linked + unlinked == all records.
        assert_eq!(linked + model.unlinked.len(), 3);
    }

    #[test]
    fn reconcile_is_idempotent_and_order_independent() {
        let config = DiscoveryConfig::default();
        let devices = vec![
            device("dev-2", "kitchen_sensor", Some("mqtt")),
            device("dev-1", "porch_light", Some("mqtt")),
        ];
        let records = vec![
            record("0x02", "porch_light"),
            record("0x01", "kitchen_sensor"),
        ];

        let forward = reconcile_model(
            &config,
            devices_map(devices.clone()),
            &HashMap::new(),
            records.clone(),
        );
        let reversed = reconcile_model(
            &config,
            devices_map(devices.into_iter().rev().collect()),
            &HashMap::new(),
            records.into_iter().rev().collect(),
        );

        assert_eq!(forward.views, reversed.views);
        assert_eq!(forward.unlinked, reversed.unlinked);
    }

    #[test]
    fn one_record_is_claimed_at_most_once() {
        let config = DiscoveryConfig::default();
        let devices = devices_map(vec![
            device("dev-1", "bulb", Some("mqtt")),
            device("dev-2", "bulb", Some("mqtt")),
        ]);
        let records = vec![record("0x01", "bulb")];

        let model = reconcile_model(&config, devices, &HashMap::new(), records);
        let linked = model
            .views
            .iter()
            .filter(|view| view.capability.is_some())
            .count();
        assert_eq!(linked, 1);
        assert!(model.unlinked.is_empty());
    }

    #[test]
    fn removed_devices_are_excluded_from_views() {
        let config = DiscoveryConfig::default();
        let mut gone = device("dev-1", "old_plug", Some("mqtt"));
        gone.removed_at = Some(chrono::Utc::now());
        let devices = devices_map(vec![gone, device("dev-2", "live_plug", Some("mqtt"))]);

        let model = reconcile_model(&config, devices, &HashMap::new(), Vec::new());
        assert_eq!(model.views.len(), 1);
        assert_eq!(model.views[0].device.id, "dev-2");
    }
}

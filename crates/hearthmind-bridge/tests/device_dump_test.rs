//! Parsing a realistic retained device dump end to end.

use hearthmind_bridge::{FeatureKind, parse_capability_list};
use serde_json::json;

#[test]
fn full_dump_parses_with_coordinator_and_partial_records() {
    let dump = json!([
        {
            "ieee_address": "0x00124b0012345678",
            "friendly_name": "Coordinator",
            "type": "Coordinator",
            "supported": true,
            "definition": null,
            "interview_completed": true
        },
        {
            "ieee_address": "0x00158d0001a2b3c4",
            "friendly_name": "living_room_motion",
            "type": "EndDevice",
            "power_source": "Battery",
            "software_build_id": "3000-0001",
            "supported": true,
            "interview_completed": true,
            "definition": {
                "vendor": "Aqara",
                "model": "RTCGQ11LM",
                "description": "Motion sensor",
                "exposes": [
                    {"type": "binary", "name": "occupancy", "property": "occupancy", "access": 1},
                    {"type": "numeric", "name": "illuminance", "property": "illuminance", "access": 1, "unit": "lx"},
                    {"type": "numeric", "name": "battery", "property": "battery", "access": 1, "unit": "%", "value_min": 0.0, "value_max": 100.0}
                ]
            }
        },
        {
            "ieee_address": "0x847127fffe3d0a1b",
            "friendly_name": "office_light",
            "type": "Router",
            "power_source": "Mains (single phase)",
            "supported": true,
            "interview_completed": true,
            "definition": {
                "vendor": "IKEA",
                "model": "LED1836G9",
                "description": "Bulb",
                "exposes": [
                    {
                        "type": "light",
                        "features": [
                            {"type": "binary", "name": "state", "property": "state", "access": 7},
                            {"type": "numeric", "name": "brightness", "property": "brightness", "access": 7, "value_min": 0.0, "value_max": 254.0}
                        ]
                    },
                    {"type": "enum", "name": "effect", "property": "effect", "values": ["blink", "breathe", "okay"]}
                ]
            }
        },
        // An interview-in-progress ghost with no address: skipped, not fatal.
        {"friendly_name": "joining_device", "supported": false}
    ]);

    let (records, skipped) = parse_capability_list(&dump);
    assert_eq!(records.len(), 3);
    assert_eq!(skipped, 1);

    let coordinator = &records[0];
    assert_eq!(coordinator.device_type.as_deref(), Some("Coordinator"));
    assert!(coordinator.exposes.is_empty());

    let motion = &records[1];
    assert_eq!(motion.manufacturer.as_deref(), Some("Aqara"));
    assert_eq!(motion.model.as_deref(), Some("RTCGQ11LM"));
    assert_eq!(motion.exposes.len(), 3);
    assert_eq!(
        motion.exposes[2].value_max,
        Some(100.0),
        "numeric constraints survive parsing"
    );

    let light = &records[2];
    // The "light" grouping type is not one we model: kept opaque, children
    // still walked.
    assert_eq!(light.exposes[0].kind, FeatureKind::Other("light".to_string()));
    assert!(light.exposes[0].raw.is_some());
    assert_eq!(light.exposes[0].features.len(), 2);
    assert_eq!(light.exposes[0].leaf_count(), 2);
    assert_eq!(light.exposes[1].values.len(), 3);
}

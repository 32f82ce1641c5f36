//! Zigbee bridge MQTT transport and capability parsing.
//!
//! The bridge publishes its world on a retained topic tree and has no native
//! request/response primitive. This crate owns the broker connection (one
//! event-loop task), keeps the retained baseline, and emulates
//! request/response by publishing on a request topic and awaiting the next
//! message on the paired response topic, serialized per topic.
//!
//! ## Architecture
//!
//! - [`client::BridgeClient`]: connection, retained store, topic waiters
//! - [`topics::TopicSet`]: the `<base>/bridge/...` topic convention
//! - [`capability`]: raw payloads -> [`capability::ZigbeeCapabilityRecord`]

pub mod capability;
pub mod client;
pub mod error;
pub mod topics;

pub use capability::{
    Availability, BridgeInfo, ExposedFeature, FeatureKind, ZigbeeCapabilityRecord,
    parse_capability_list, parse_capability_record,
};
pub use client::BridgeClient;
pub use error::{BridgeError, BridgeResult};
pub use topics::TopicSet;

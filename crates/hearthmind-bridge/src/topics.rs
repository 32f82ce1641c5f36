//! The bridge's topic conventions.
//!
//! Retained snapshots: `<base>/bridge/devices|groups|info|networkmap`.
//! Request/response emulation: `<base>/bridge/request/<resource>/list` paired
//! with `<base>/bridge/response/<resource>/list`.
//! Per-device availability: `<base>/<friendly_name>/availability`.

/// Resource name for the device list.
pub const DEVICES: &str = "devices";

/// Resource name for the group list.
pub const GROUPS: &str = "groups";

/// Topic builder for one bridge instance, identified by its base topic.
#[derive(Debug, Clone)]
pub struct TopicSet {
    base: String,
}

impl TopicSet {
    /// Create a topic set for a base topic, e.g. `zigbee2mqtt`.
    pub fn new(base: impl Into<String>) -> Self {
        Self { base: base.into() }
    }

    /// The base topic.
    pub fn base(&self) -> &str {
        &self.base
    }

    /// Retained device dump.
    pub fn devices(&self) -> String {
        format!("{}/bridge/devices", self.base)
    }

    /// Retained group dump.
    pub fn groups(&self) -> String {
        format!("{}/bridge/groups", self.base)
    }

    /// Retained bridge/coordinator info.
    pub fn info(&self) -> String {
        format!("{}/bridge/info", self.base)
    }

    /// Retained network map.
    pub fn network_map(&self) -> String {
        format!("{}/bridge/networkmap", self.base)
    }

    /// Request topic for a resource list.
    pub fn request(&self, resource: &str) -> String {
        format!("{}/bridge/request/{}/list", self.base, resource)
    }

    /// Response topic paired with [`Self::request`].
    pub fn response(&self, resource: &str) -> String {
        format!("{}/bridge/response/{}/list", self.base, resource)
    }

    /// Wildcard subscription covering every response topic.
    pub fn response_wildcard(&self) -> String {
        format!("{}/bridge/response/#", self.base)
    }

    /// Wildcard subscription for per-device availability.
    pub fn availability_wildcard(&self) -> String {
        format!("{}/+/availability", self.base)
    }

    /// All retained snapshot topics, subscribed on (re)connect.
    pub fn snapshots(&self) -> [String; 4] {
        [self.devices(), self.groups(), self.info(), self.network_map()]
    }

    /// Whether `topic` is one of the retained snapshot topics.
    pub fn is_snapshot(&self, topic: &str) -> bool {
        self.snapshots().iter().any(|t| t == topic)
    }

    /// The retained snapshot topic that can answer a resource request, if
    /// one exists. A fresh retained dump supersedes waiting on the response
    /// topic.
    pub fn snapshot_for(&self, resource: &str) -> Option<String> {
        match resource {
            DEVICES => Some(self.devices()),
            GROUPS => Some(self.groups()),
            _ => None,
        }
    }

    /// Extract the friendly name from an availability topic, if `topic` is
    /// one.
    pub fn availability_device<'t>(&self, topic: &'t str) -> Option<&'t str> {
        let rest = topic.strip_prefix(self.base.as_str())?.strip_prefix('/')?;
        let name = rest.strip_suffix("/availability")?;
        // `<base>/bridge/...` topics are not devices.
        if name.is_empty() || name == "bridge" || name.contains('/') {
            return None;
        }
        Some(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_shapes() {
        let topics = TopicSet::new("z2m");
        assert_eq!(topics.devices(), "z2m/bridge/devices");
        assert_eq!(topics.request(DEVICES), "z2m/bridge/request/devices/list");
        assert_eq!(topics.response(DEVICES), "z2m/bridge/response/devices/list");
        assert_eq!(topics.response_wildcard(), "z2m/bridge/response/#");
        assert_eq!(topics.availability_wildcard(), "z2m/+/availability");
    }

    #[test]
    fn snapshot_classification() {
        let topics = TopicSet::new("zigbee2mqtt");
        assert!(topics.is_snapshot("zigbee2mqtt/bridge/devices"));
        assert!(topics.is_snapshot("zigbee2mqtt/bridge/networkmap"));
        assert!(!topics.is_snapshot("zigbee2mqtt/bridge/response/devices/list"));
        assert!(!topics.is_snapshot("other/bridge/devices"));
    }

    #[test]
    fn snapshot_for_known_resources() {
        let topics = TopicSet::new("z2m");
        assert_eq!(topics.snapshot_for(DEVICES), Some("z2m/bridge/devices".to_string()));
        assert_eq!(topics.snapshot_for("health"), None);
    }

    #[test]
    fn availability_device_extraction() {
        let topics = TopicSet::new("z2m");
        assert_eq!(
            topics.availability_device("z2m/kitchen_sensor/availability"),
            Some("kitchen_sensor")
        );
        assert_eq!(topics.availability_device("z2m/bridge/availability"), None);
        assert_eq!(topics.availability_device("z2m/kitchen_sensor/state"), None);
        assert_eq!(topics.availability_device("other/dev/availability"), None);
    }
}

//! Configuration types for the discovery engine.
//!
//! These structs are the *consumed* configuration surface: loading them from
//! files or the environment is the embedding application's job. Defaults
//! follow the same helper-function pattern used throughout the project so
//! partial configs deserialize cleanly.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Hub WebSocket connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// WebSocket endpoint, e.g. `ws://hub.local:8123/api/websocket`.
    pub endpoint: String,

    /// Long-lived access token presented during the auth handshake.
    pub access_token: String,

    /// Per-call timeout in seconds for request/response frames.
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,

    /// Delay before the first reconnection attempt, in seconds.
    #[serde(default = "default_backoff_base")]
    pub backoff_base_secs: u64,

    /// Upper bound on the reconnection backoff delay, in seconds.
    #[serde(default = "default_backoff_cap")]
    pub backoff_cap_secs: u64,
}

fn default_call_timeout() -> u64 {
    10
}

fn default_backoff_base() -> u64 {
    1
}

fn default_backoff_cap() -> u64 {
    30
}

impl HubConfig {
    /// Create a new hub configuration.
    pub fn new(endpoint: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            access_token: access_token.into(),
            call_timeout_secs: default_call_timeout(),
            backoff_base_secs: default_backoff_base(),
            backoff_cap_secs: default_backoff_cap(),
        }
    }

    /// Set the per-call timeout.
    pub fn with_call_timeout(mut self, secs: u64) -> Self {
        self.call_timeout_secs = secs;
        self
    }

    /// Per-call timeout as a [`Duration`].
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    /// Reconnection backoff base as a [`Duration`].
    pub fn backoff_base(&self) -> Duration {
        Duration::from_secs(self.backoff_base_secs)
    }

    /// Reconnection backoff cap as a [`Duration`].
    pub fn backoff_cap(&self) -> Duration {
        Duration::from_secs(self.backoff_cap_secs)
    }
}

/// Zigbee bridge MQTT connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Broker host.
    pub broker: String,

    /// Broker port (default 1883).
    #[serde(default = "default_port")]
    pub port: u16,

    /// Username.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Password.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Client ID. A random one is generated when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    /// Base topic the bridge publishes under (default `zigbee2mqtt`).
    #[serde(default = "default_base_topic")]
    pub base_topic: String,

    /// Keep-alive interval in seconds.
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,

    /// Timeout for request/response emulation over topics, in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_port() -> u16 {
    1883
}

fn default_base_topic() -> String {
    "zigbee2mqtt".to_string()
}

fn default_keep_alive() -> u64 {
    60
}

fn default_request_timeout() -> u64 {
    10
}

impl BridgeConfig {
    /// Create a new bridge configuration.
    pub fn new(broker: impl Into<String>) -> Self {
        Self {
            broker: broker.into(),
            port: default_port(),
            username: None,
            password: None,
            client_id: None,
            base_topic: default_base_topic(),
            keep_alive_secs: default_keep_alive(),
            request_timeout_secs: default_request_timeout(),
        }
    }

    /// Set the port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set authentication.
    pub fn with_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Set the client ID.
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Set the bridge base topic.
    pub fn with_base_topic(mut self, base_topic: impl Into<String>) -> Self {
        self.base_topic = base_topic.into();
        self
    }

    /// Set the request/response timeout.
    pub fn with_request_timeout(mut self, secs: u64) -> Self {
        self.request_timeout_secs = secs;
        self
    }

    /// Get the full broker address.
    pub fn broker_addr(&self) -> String {
        format!("{}:{}", self.broker, self.port)
    }

    /// Request timeout as a [`Duration`].
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Discovery cache and refresh configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Cache freshness window in seconds (default 30 minutes).
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,

    /// Forced full-refresh interval in seconds (default 30 minutes).
    /// Runs regardless of staleness flags to bound worst-case drift.
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,

    /// Upper bound in seconds on one capability snapshot pull.
    #[serde(default = "default_snapshot_timeout")]
    pub snapshot_timeout_secs: u64,

    /// Hub integration domains that indicate a device is managed by the
    /// Zigbee bridge (e.g. `mqtt`).
    #[serde(default = "default_bridge_integrations")]
    pub bridge_integrations: Vec<String>,

    /// Hub config-entry ids mapped to the bridge base topic they represent.
    /// A device whose config entry appears here is a candidate for
    /// capability linking even when its name does not match.
    #[serde(default)]
    pub bridge_config_entries: HashMap<String, String>,

    /// Operator-pinned identity links: hub device id -> radio hardware
    /// address. Consulted before any similarity matching.
    #[serde(default)]
    pub explicit_links: HashMap<String, String>,
}

fn default_cache_ttl() -> u64 {
    30 * 60
}

fn default_refresh_interval() -> u64 {
    30 * 60
}

fn default_snapshot_timeout() -> u64 {
    10
}

fn default_bridge_integrations() -> Vec<String> {
    vec!["mqtt".to_string()]
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: default_cache_ttl(),
            refresh_interval_secs: default_refresh_interval(),
            snapshot_timeout_secs: default_snapshot_timeout(),
            bridge_integrations: default_bridge_integrations(),
            bridge_config_entries: HashMap::new(),
            explicit_links: HashMap::new(),
        }
    }
}

impl DiscoveryConfig {
    /// Set the cache TTL.
    pub fn with_cache_ttl(mut self, secs: u64) -> Self {
        self.cache_ttl_secs = secs;
        self
    }

    /// Set the forced refresh interval.
    pub fn with_refresh_interval(mut self, secs: u64) -> Self {
        self.refresh_interval_secs = secs;
        self
    }

    /// Pin a hub device to a hardware address.
    pub fn with_explicit_link(
        mut self,
        device_id: impl Into<String>,
        ieee_address: impl Into<String>,
    ) -> Self {
        self.explicit_links
            .insert(device_id.into(), ieee_address.into());
        self
    }

    /// Cache TTL as a [`Duration`].
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Refresh interval as a [`Duration`].
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    /// Capability snapshot timeout as a [`Duration`].
    pub fn snapshot_timeout(&self) -> Duration {
        Duration::from_secs(self.snapshot_timeout_secs)
    }
}

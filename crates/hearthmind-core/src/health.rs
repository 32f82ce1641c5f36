//! Transport lifecycle events and discovery health.

use serde::{Deserialize, Serialize};

/// Lifecycle events emitted by a transport's connection management.
///
/// Both the hub session and the bridge client broadcast these; the discovery
/// orchestrator listens and re-snapshots on [`SessionEvent::Reconnected`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// First successful connection.
    Connected,
    /// Connection re-established after a drop. Registries may have changed
    /// while disconnected, so consumers should re-snapshot.
    Reconnected,
    /// Connection lost; the transport is backing off and retrying.
    Disconnected,
}

/// Aggregate health of the discovery engine, exposed to consumers instead of
/// failing their queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryHealth {
    /// All caches within their freshness window, both transports up.
    Fresh,
    /// Serving last-known-good data older than its TTL.
    Stale,
    /// At least one transport is down; data may be arbitrarily old.
    Degraded,
}

impl DiscoveryHealth {
    /// Fold two health indicators, keeping the worse one.
    pub fn worst(self, other: DiscoveryHealth) -> DiscoveryHealth {
        use DiscoveryHealth::{Degraded, Fresh, Stale};
        match (self, other) {
            (Degraded, _) | (_, Degraded) => Degraded,
            (Stale, _) | (_, Stale) => Stale,
            (Fresh, Fresh) => Fresh,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worst_prefers_degraded() {
        assert_eq!(
            DiscoveryHealth::Fresh.worst(DiscoveryHealth::Degraded),
            DiscoveryHealth::Degraded
        );
        assert_eq!(
            DiscoveryHealth::Stale.worst(DiscoveryHealth::Fresh),
            DiscoveryHealth::Stale
        );
        assert_eq!(
            DiscoveryHealth::Fresh.worst(DiscoveryHealth::Fresh),
            DiscoveryHealth::Fresh
        );
    }

    #[test]
    fn health_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&DiscoveryHealth::Degraded).unwrap(),
            "\"degraded\""
        );
    }
}

//! Seams between the orchestrator and the transports.
//!
//! The orchestrator consumes the hub and the bridge through these traits so
//! its sequencing, coalescing, and cache behavior can be exercised without a
//! socket in sight.

use async_trait::async_trait;
use hearthmind_bridge::{BridgeClient, BridgeError, ZigbeeCapabilityRecord};
use hearthmind_core::health::SessionEvent;
use hearthmind_hub::{HubError, HubRegistryClient, RegistryEvent, RegistrySnapshot, SessionState};
use std::time::Duration;
use tokio::sync::broadcast;

/// Error from either snapshot source.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error(transparent)]
    Hub(#[from] HubError),

    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

impl SourceError {
    /// Whether this failure is a per-call timeout, where the caller falls
    /// back to cached data rather than treating the source as broken.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            SourceError::Hub(HubError::Timeout(_)) | SourceError::Bridge(BridgeError::Timeout(_))
        )
    }
}

/// A source of hub registry snapshots and registry-update events.
#[async_trait]
pub trait RegistrySource: Send + Sync {
    /// Pull a full snapshot of the three registries.
    async fn snapshot(&self) -> Result<RegistrySnapshot, SourceError>;

    /// Forwarded registry change events for targeted cache invalidation.
    fn registry_events(&self) -> broadcast::Receiver<RegistryEvent>;

    /// Connection lifecycle events.
    fn lifecycle(&self) -> broadcast::Receiver<SessionEvent>;

    /// Whether the source's transport is currently up.
    fn is_connected(&self) -> bool;
}

/// A source of bridge capability records.
#[async_trait]
pub trait CapabilitySource: Send + Sync {
    /// Request the current capability records, bounded by `timeout`.
    async fn snapshot(&self, timeout: Duration)
    -> Result<Vec<ZigbeeCapabilityRecord>, SourceError>;

    /// Connection lifecycle events.
    fn lifecycle(&self) -> broadcast::Receiver<SessionEvent>;

    /// Whether the source's transport is currently up.
    fn is_connected(&self) -> bool;
}

#[async_trait]
impl RegistrySource for HubRegistryClient {
    async fn snapshot(&self) -> Result<RegistrySnapshot, SourceError> {
        Ok(HubRegistryClient::snapshot(self).await?)
    }

    fn registry_events(&self) -> broadcast::Receiver<RegistryEvent> {
        HubRegistryClient::registry_events(self)
    }

    fn lifecycle(&self) -> broadcast::Receiver<SessionEvent> {
        HubRegistryClient::lifecycle(self)
    }

    fn is_connected(&self) -> bool {
        self.session().state() == SessionState::Ready
    }
}

#[async_trait]
impl CapabilitySource for BridgeClient {
    async fn snapshot(
        &self,
        timeout: Duration,
    ) -> Result<Vec<ZigbeeCapabilityRecord>, SourceError> {
        let mut records = self.request_device_list(timeout).await?;
        // Fold in the last published availability for each radio.
        for record in &mut records {
            if let Some(friendly_name) = record.friendly_name.clone() {
                record.availability = self.availability_of(&friendly_name).await;
            }
        }
        Ok(records)
    }

    fn lifecycle(&self) -> broadcast::Receiver<SessionEvent> {
        BridgeClient::lifecycle(self)
    }

    fn is_connected(&self) -> bool {
        BridgeClient::is_connected(self)
    }
}

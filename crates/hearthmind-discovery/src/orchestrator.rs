//! Discovery orchestrator.
//!
//! Drives the initial snapshot, the periodic forced refresh, and the
//! immediate re-snapshot on transport reconnects. Consumers read through the
//! caches and the reconciliation engine, so nothing here ever blocks a
//! consumer: failed refreshes keep last-known data and are reflected in the
//! health status instead.

use crate::cache::{CapabilityCache, RegistryCache};
use crate::reconcile::{ReconciledDeviceView, ReconciledModel, ReconciliationEngine};
use crate::source::{CapabilitySource, RegistrySource, SourceError};
use hearthmind_bridge::ZigbeeCapabilityRecord;
use hearthmind_core::config::DiscoveryConfig;
use hearthmind_core::health::{DiscoveryHealth, SessionEvent};
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast, watch};
use tracing::{debug, info, warn};

/// Orchestrator lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryState {
    /// Not started.
    Idle,
    /// Initial snapshot running; caches may still be empty.
    SnapshotInFlight,
    /// Serving; background refresh loops armed.
    Ready,
    /// A refresh is replacing the caches. Reads keep being served.
    Refreshing,
}

/// Filter for the consumer-facing device view query.
#[derive(Debug, Clone, Default)]
pub struct ViewFilter {
    area_id: Option<String>,
    domain: Option<String>,
}

impl ViewFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only devices assigned to this area.
    pub fn with_area(mut self, area_id: impl Into<String>) -> Self {
        self.area_id = Some(area_id.into());
        self
    }

    /// Only devices owned by this integration domain.
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    fn matches(&self, view: &ReconciledDeviceView) -> bool {
        if let Some(area_id) = &self.area_id {
            if view.device.area_id.as_deref() != Some(area_id.as_str()) {
                return false;
            }
        }
        if let Some(domain) = &self.domain {
            if view.device.integration.as_deref() != Some(domain.as_str()) {
                return false;
            }
        }
        true
    }
}

/// Top-level driver owning the caches and the refresh lifecycle.
pub struct DiscoveryOrchestrator {
    config: DiscoveryConfig,
    registry_source: Arc<dyn RegistrySource>,
    capability_source: Arc<dyn CapabilitySource>,
    registry_cache: Arc<RegistryCache>,
    capability_cache: Arc<CapabilityCache>,
    engine: ReconciliationEngine,
    state_tx: watch::Sender<DiscoveryState>,
    /// Single in-flight guard: a second `force_refresh` coalesces into the
    /// running one instead of starting another.
    refresh_guard: Mutex<()>,
    shutdown_tx: watch::Sender<bool>,
}

impl DiscoveryOrchestrator {
    /// Wire the orchestrator to its two sources. Nothing runs until
    /// [`Self::start`].
    pub fn new(
        config: DiscoveryConfig,
        registry_source: Arc<dyn RegistrySource>,
        capability_source: Arc<dyn CapabilitySource>,
    ) -> Arc<Self> {
        let ttl = config.cache_ttl();
        Arc::new(Self {
            engine: ReconciliationEngine::new(config.clone()),
            registry_cache: Arc::new(RegistryCache::new(ttl)),
            capability_cache: Arc::new(CapabilityCache::new(ttl)),
            config,
            registry_source,
            capability_source,
            state_tx: watch::channel(DiscoveryState::Idle).0,
            refresh_guard: Mutex::new(()),
            shutdown_tx: watch::channel(false).0,
        })
    }

    /// Run the initial full snapshot and arm the background loops: the
    /// periodic forced refresh, the reconnect listeners, and the registry
    /// event feed.
    pub async fn start(self: &Arc<Self>) {
        self.set_state(DiscoveryState::SnapshotInFlight);
        if let Err(err) = self.refresh_locked().await {
            warn!(error = %err, "initial snapshot incomplete, serving what we have");
        }
        self.set_state(DiscoveryState::Ready);
        info!("discovery ready");

        self.spawn_refresh_ticker();
        self.spawn_lifecycle_listener(self.registry_source.lifecycle(), "hub");
        self.spawn_lifecycle_listener(self.capability_source.lifecycle(), "bridge");
        self.spawn_registry_event_listener();
    }

    /// Current orchestrator state.
    pub fn state(&self) -> DiscoveryState {
        *self.state_tx.borrow()
    }

    /// The registry cache, for consumers that want raw registry lookups.
    pub fn registry_cache(&self) -> &Arc<RegistryCache> {
        &self.registry_cache
    }

    /// The capability cache.
    pub fn capability_cache(&self) -> &Arc<CapabilityCache> {
        &self.capability_cache
    }

    /// Re-snapshot both sources now. Idempotent and safe to call while
    /// another refresh is in flight: the second caller waits for the running
    /// refresh instead of starting its own.
    pub async fn force_refresh(&self) -> Result<(), SourceError> {
        match self.refresh_guard.try_lock() {
            Ok(guard) => {
                if self.state() == DiscoveryState::Ready {
                    self.set_state(DiscoveryState::Refreshing);
                }
                let result = self.refresh_both().await;
                drop(guard);
                if self.state() == DiscoveryState::Refreshing {
                    self.set_state(DiscoveryState::Ready);
                }
                result
            }
            Err(_) => {
                debug!("refresh already in flight, coalescing");
                let _guard = self.refresh_guard.lock().await;
                Ok(())
            }
        }
    }

    /// The current reconciled model, computed on demand from the caches.
    pub async fn reconciled(&self) -> ReconciledModel {
        self.engine
            .reconcile(&self.registry_cache, &self.capability_cache)
            .await
    }

    /// Reconciled device views, filterable by area and integration domain.
    pub async fn devices(&self, filter: &ViewFilter) -> Vec<ReconciledDeviceView> {
        self.reconciled()
            .await
            .views
            .into_iter()
            .filter(|view| filter.matches(view))
            .collect()
    }

    /// Bridge records no hub device claimed.
    pub async fn unlinked_capabilities(&self) -> Vec<ZigbeeCapabilityRecord> {
        self.reconciled().await.unlinked
    }

    /// Aggregate discovery health. Never fails a query: staleness and
    /// transport loss show up here instead.
    pub async fn health(&self) -> DiscoveryHealth {
        if !self.registry_source.is_connected() || !self.capability_source.is_connected() {
            return DiscoveryHealth::Degraded;
        }

        let registry_stale = self.registry_cache.is_stale().await;
        let capability_stale = self.capability_cache.is_stale().await;
        if registry_stale || capability_stale {
            warn!(
                registry_stale,
                capability_stale,
                "serving stale discovery data, eligible for forced refresh"
            );
            return DiscoveryHealth::Stale;
        }

        DiscoveryHealth::Fresh
    }

    /// Stop the background loops.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    fn set_state(&self, state: DiscoveryState) {
        self.state_tx.send_replace(state);
    }

    /// Refresh both caches while already holding the guard.
    async fn refresh_locked(&self) -> Result<(), SourceError> {
        let _guard = self.refresh_guard.lock().await;
        self.refresh_both().await
    }

    /// Pull both snapshots. A failed pull keeps that cache's last-known
    /// data; the first error is reported after both sides were attempted.
    async fn refresh_both(&self) -> Result<(), SourceError> {
        let mut first_error = None;

        match self.registry_source.snapshot().await {
            Ok(snapshot) => {
                debug!(
                    devices = snapshot.devices.len(),
                    entities = snapshot.entities.len(),
                    areas = snapshot.areas.len(),
                    "registry snapshot applied"
                );
                self.registry_cache.replace_all(snapshot).await;
            }
            Err(err) => {
                warn!(error = %err, "registry snapshot failed, keeping last-known data");
                first_error = Some(err);
            }
        }

        match self
            .capability_source
            .snapshot(self.config.snapshot_timeout())
            .await
        {
            Ok(records) => {
                debug!(records = records.len(), "capability snapshot applied");
                self.capability_cache.replace_all(records).await;
            }
            Err(err) => {
                warn!(error = %err, "capability snapshot failed, keeping last-known data");
                first_error.get_or_insert(err);
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Periodic forced refresh, bounding worst-case drift regardless of
    /// staleness flags.
    fn spawn_refresh_ticker(self: &Arc<Self>) {
        let orchestrator = Arc::clone(self);
        let mut shutdown = self.shutdown_tx.subscribe();
        let period = self.config.refresh_interval();

        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut ticker = tokio::time::interval_at(start, period);
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = ticker.tick() => {
                        debug!("periodic refresh");
                        let _ = orchestrator.force_refresh().await;
                    }
                }
            }
        });
    }

    /// Re-run discovery when a transport reconnects. A burst of reconnect
    /// events collapses into one refresh: the queue is drained before and
    /// after, and concurrent refreshes coalesce on the guard anyway.
    fn spawn_lifecycle_listener(
        self: &Arc<Self>,
        mut events: broadcast::Receiver<SessionEvent>,
        source: &'static str,
    ) {
        let orchestrator = Arc::clone(self);
        let mut shutdown = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    event = events.recv() => match event {
                        Ok(SessionEvent::Reconnected) => {
                            while events.try_recv().is_ok() {}
                            info!(source, "transport reconnected, re-running discovery");
                            let _ = orchestrator.force_refresh().await;
                            while events.try_recv().is_ok() {}
                        }
                        Ok(SessionEvent::Disconnected) => {
                            debug!(source, "transport disconnected");
                        }
                        Ok(SessionEvent::Connected) => {}
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        });
    }

    /// Feed registry-update events into the cache for targeted invalidation.
    fn spawn_registry_event_listener(self: &Arc<Self>) {
        let orchestrator = Arc::clone(self);
        let mut events = self.registry_source.registry_events();
        let mut shutdown = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    event = events.recv() => match event {
                        Ok(event) => {
                            debug!(id = %event.id, action = ?event.action, "applying registry delta");
                            orchestrator.registry_cache.apply_delta(&event).await;
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "registry event stream lagged, re-snapshotting");
                            let _ = orchestrator.force_refresh().await;
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        });
    }
}

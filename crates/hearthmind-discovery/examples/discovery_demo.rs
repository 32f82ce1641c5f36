//! Discovery Engine Demo
//!
//! Wires the full discovery stack against a live hub and bridge:
//! 1. HubSession + HubRegistryClient over the hub WebSocket API
//! 2. BridgeClient over the MQTT broker's bridge topic tree
//! 3. DiscoveryOrchestrator sequencing snapshots and serving reconciled views
//!
//! Endpoints come from HUB_ENDPOINT / HUB_TOKEN / BRIDGE_BROKER env vars.

use std::sync::Arc;
use std::time::Duration;

use hearthmind_bridge::BridgeClient;
use hearthmind_core::config::{BridgeConfig, DiscoveryConfig, HubConfig};
use hearthmind_discovery::{DiscoveryOrchestrator, ViewFilter};
use hearthmind_hub::{HubRegistryClient, HubSession};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    println!("=== HearthMind Discovery Demo ===\n");

    let hub_endpoint = std::env::var("HUB_ENDPOINT")
        .unwrap_or_else(|_| "ws://localhost:8123/api/websocket".to_string());
    let hub_token = std::env::var("HUB_TOKEN").unwrap_or_default();
    let broker = std::env::var("BRIDGE_BROKER").unwrap_or_else(|_| "localhost".to_string());

    // --- Transports ---
    let session = HubSession::connect(HubConfig::new(hub_endpoint, hub_token)).await?;
    let registry = Arc::new(HubRegistryClient::new(session.clone()));
    registry.watch_registry_updates().await?;

    let bridge = BridgeClient::connect(BridgeConfig::new(broker)).await?;

    // --- Orchestrator ---
    let orchestrator = DiscoveryOrchestrator::new(
        DiscoveryConfig::default(),
        registry.clone(),
        bridge.clone(),
    );
    orchestrator.start().await;

    // --- Read surface ---
    let model = orchestrator.reconciled().await;
    println!("discovered {} devices", model.views.len());
    for view in &model.views {
        let linked = view
            .capability
            .as_ref()
            .map(|c| format!("{} features", c.exposes.len()))
            .unwrap_or_else(|| "no radio".to_string());
        println!(
            "  {} [{}] area={} {}",
            view.device.display_name(),
            view.device.id,
            view.area.as_ref().map(|a| a.name.as_str()).unwrap_or("-"),
            linked
        );
    }
    println!("unlinked radios: {}", model.unlinked.len());

    let kitchen = orchestrator
        .devices(&ViewFilter::new().with_area("kitchen"))
        .await;
    println!("kitchen devices: {}", kitchen.len());
    println!("health: {:?}", orchestrator.health().await);

    // Serve until interrupted; registries stay synchronized in the
    // background.
    tokio::signal::ctrl_c().await?;
    orchestrator.shutdown();
    bridge.close().await;
    session.close().await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    Ok(())
}

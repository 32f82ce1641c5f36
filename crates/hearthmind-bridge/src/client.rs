//! Bridge MQTT client.
//!
//! One broker connection, one event-loop task. Retained snapshot topics are
//! the authoritative baseline and are re-delivered by the broker after every
//! reconnect; response-topic messages are deltas. Request/response is
//! emulated: publish on the request topic, then take the next message on the
//! paired response topic (or a fresh retained snapshot, whichever arrives
//! first). At most one request is in flight per topic, serialized by a
//! per-topic lock.

use crate::capability::{Availability, BridgeInfo, ZigbeeCapabilityRecord, parse_capability_list};
use crate::error::{BridgeError, BridgeResult};
use crate::topics::{self, TopicSet};
use dashmap::DashMap;
use hearthmind_core::config::BridgeConfig;
use hearthmind_core::health::SessionEvent;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, broadcast, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Bridge device dumps for large networks run into megabytes.
const MAX_PACKET_SIZE: usize = 10 * 1024 * 1024;

/// The bridge MQTT client.
pub struct BridgeClient {
    config: BridgeConfig,
    client: AsyncClient,
    topics: TopicSet,
    /// Latest payload per retained snapshot topic.
    retained: RwLock<HashMap<String, Value>>,
    /// Per-device availability, keyed by friendly name.
    availability: RwLock<HashMap<String, Availability>>,
    /// Armed next-message waiters, keyed by topic.
    waiters: DashMap<String, mpsc::Sender<Value>>,
    /// Per-resource request serialization locks.
    request_locks: DashMap<String, Arc<Mutex<()>>>,
    lifecycle_tx: broadcast::Sender<SessionEvent>,
    connected: AtomicBool,
    ever_connected: AtomicBool,
    closed: AtomicBool,
}

impl BridgeClient {
    /// Connect to the broker and spawn the event-loop task.
    ///
    /// Subscriptions are issued on every `ConnAck` so they survive broker
    /// reconnects; rumqttc handles the broker-level retry itself.
    pub async fn connect(config: BridgeConfig) -> BridgeResult<Arc<Self>> {
        let client_id = config
            .client_id
            .clone()
            .unwrap_or_else(|| format!("hearthmind-{}", Uuid::new_v4()));

        let mut options = MqttOptions::new(client_id, &config.broker, config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
        options.set_max_packet_size(MAX_PACKET_SIZE, MAX_PACKET_SIZE);
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            options.set_credentials(username, password);
        }

        let (client, eventloop) = AsyncClient::new(options, 64);
        let topics = TopicSet::new(&config.base_topic);

        let bridge = Arc::new(Self {
            config,
            client,
            topics,
            retained: RwLock::new(HashMap::new()),
            availability: RwLock::new(HashMap::new()),
            waiters: DashMap::new(),
            request_locks: DashMap::new(),
            lifecycle_tx: broadcast::channel(16).0,
            connected: AtomicBool::new(false),
            ever_connected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        });

        tokio::spawn(Arc::clone(&bridge).run_event_loop(eventloop));
        info!(broker = %bridge.config.broker_addr(), base = %bridge.config.base_topic, "bridge client started");
        Ok(bridge)
    }

    /// The topic conventions in use.
    pub fn topics(&self) -> &TopicSet {
        &self.topics
    }

    /// Whether the broker connection is currently up.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Lifecycle events (connected, reconnected, disconnected).
    pub fn lifecycle(&self) -> broadcast::Receiver<SessionEvent> {
        self.lifecycle_tx.subscribe()
    }

    /// Request the bridge's device list.
    ///
    /// Publishes on the request topic and awaits the next message on the
    /// paired response topic, or a fresh retained device dump, whichever
    /// arrives first. On [`BridgeError::Timeout`] the caller falls back to
    /// the last good cached snapshot.
    pub async fn request_device_list(
        &self,
        timeout: Duration,
    ) -> BridgeResult<Vec<ZigbeeCapabilityRecord>> {
        let payload = self.request(topics::DEVICES, json!({}), timeout).await?;
        let list = extract_list(&payload);
        let (records, _skipped) = parse_capability_list(list);
        Ok(records)
    }

    /// The last retained device dump, if the broker has delivered one.
    /// Retained data is the authoritative baseline after (re)connect.
    pub async fn retained_device_list(&self) -> Option<Vec<ZigbeeCapabilityRecord>> {
        let retained = self.retained.read().await;
        let payload = retained.get(&self.topics.devices())?;
        let (records, _skipped) = parse_capability_list(payload);
        Some(records)
    }

    /// Latest payload on one retained snapshot topic.
    pub async fn retained(&self, topic: &str) -> Option<Value> {
        self.retained.read().await.get(topic).cloned()
    }

    /// Bridge/coordinator metadata, when the info topic has been seen.
    pub async fn bridge_info(&self) -> Option<BridgeInfo> {
        let payload = self.retained(&self.topics.info()).await?;
        Some(BridgeInfo::parse(&payload))
    }

    /// Raw retained group dump.
    pub async fn retained_groups(&self) -> Option<Value> {
        self.retained(&self.topics.groups()).await
    }

    /// Last published availability for a device, by friendly name.
    pub async fn availability_of(&self, friendly_name: &str) -> Option<Availability> {
        self.availability.read().await.get(friendly_name).copied()
    }

    /// Disconnect and stop the event-loop task. Terminal.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let _ = self.client.disconnect().await;
    }

    /// Topic-correlated request/response: publish, then take the next
    /// message on the paired response topic. One in-flight request per
    /// resource; concurrent callers serialize on the per-topic lock.
    pub async fn request(
        &self,
        resource: &str,
        payload: Value,
        timeout: Duration,
    ) -> BridgeResult<Value> {
        let lock = self
            .request_locks
            .entry(resource.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        let response_topic = self.topics.response(resource);
        let snapshot_topic = self.topics.snapshot_for(resource);

        // Arm the waiter before publishing so a fast reply cannot slip past.
        let (tx, mut rx) = mpsc::channel(1);
        self.waiters.insert(response_topic.clone(), tx.clone());
        if let Some(topic) = &snapshot_topic {
            self.waiters.insert(topic.clone(), tx);
        }

        let request_topic = self.topics.request(resource);
        debug!(topic = %request_topic, "publishing bridge request");
        let publish = self
            .client
            .publish(&request_topic, QoS::AtLeastOnce, false, payload.to_string())
            .await;

        let outcome = match publish {
            Err(err) => Err(BridgeError::from(err)),
            Ok(()) => match tokio::time::timeout(timeout, rx.recv()).await {
                Ok(Some(value)) => Ok(value),
                Ok(None) => Err(BridgeError::Transport("bridge client stopped".to_string())),
                Err(_) => Err(BridgeError::Timeout(timeout)),
            },
        };

        self.waiters.remove(&response_topic);
        if let Some(topic) = &snapshot_topic {
            self.waiters.remove(topic);
        }
        outcome
    }

    /// Event-loop task: the single reader of the broker connection.
    async fn run_event_loop(self: Arc<Self>, mut eventloop: EventLoop) {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    self.connected.store(true, Ordering::Relaxed);
                    if let Err(err) = self.subscribe_all().await {
                        warn!(error = %err, "bridge resubscription failed");
                    }
                    let event = if self.ever_connected.swap(true, Ordering::Relaxed) {
                        info!("bridge reconnected, retained baseline incoming");
                        SessionEvent::Reconnected
                    } else {
                        SessionEvent::Connected
                    };
                    let _ = self.lifecycle_tx.send(event);
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    self.handle_publish(&publish.topic, publish.payload.as_ref())
                        .await;
                }
                Ok(_) => {}
                Err(err) => {
                    if self.closed.load(Ordering::SeqCst) {
                        break;
                    }
                    if self.connected.swap(false, Ordering::Relaxed) {
                        let _ = self.lifecycle_tx.send(SessionEvent::Disconnected);
                    }
                    warn!(error = %err, "bridge connection error, rumqttc will retry");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
        debug!("bridge event loop stopped");
    }

    /// Subscribe to the retained snapshot topics, the response tree, and the
    /// availability wildcard.
    async fn subscribe_all(&self) -> BridgeResult<()> {
        for topic in self.topics.snapshots() {
            self.client.subscribe(topic, QoS::AtLeastOnce).await?;
        }
        self.client
            .subscribe(self.topics.response_wildcard(), QoS::AtLeastOnce)
            .await?;
        self.client
            .subscribe(self.topics.availability_wildcard(), QoS::AtLeastOnce)
            .await?;
        Ok(())
    }

    /// Route one publish: resolve armed waiters, refresh the retained
    /// baseline, track availability.
    async fn handle_publish(&self, topic: &str, payload: &[u8]) {
        let value: Value = match serde_json::from_slice(payload) {
            Ok(value) => value,
            // Availability payloads may be bare words, not JSON.
            Err(_) => Value::String(String::from_utf8_lossy(payload).into_owned()),
        };

        if let Some(waiter) = self.waiters.get(topic) {
            let _ = waiter.value().try_send(value.clone());
        }

        if self.topics.is_snapshot(topic) {
            self.retained
                .write()
                .await
                .insert(topic.to_string(), value);
            return;
        }

        if let Some(friendly_name) = self.topics.availability_device(topic) {
            match Availability::parse(&value) {
                Some(availability) => {
                    self.availability
                        .write()
                        .await
                        .insert(friendly_name.to_string(), availability);
                }
                None => debug!(topic, "unrecognized availability payload"),
            }
        }
    }
}

/// Unwrap a list from either a retained dump (bare array) or a response
/// envelope (`{"data": [...], "status": "ok"}`).
fn extract_list(payload: &Value) -> &Value {
    if payload.is_array() {
        payload
    } else {
        payload.get("data").unwrap_or(payload)
    }
}

//! Hub WebSocket session.
//!
//! Owns the single physical connection to the hub. One I/O task both writes
//! queued outbound frames and reads inbound frames; nothing else ever touches
//! the socket. Result frames resolve waiters in the [`CorrelationTable`];
//! event frames are pushed onto a dispatch queue consumed by a separate
//! worker task, so a slow handler cannot stall frame dispatch or pending
//! request resolution.
//!
//! On disconnect the session fails all pending waiters, emits
//! [`SessionEvent::Disconnected`], and reconnects with exponential backoff
//! (full jitter). A successful reconnect re-authenticates, re-issues the
//! server-side event subscriptions, and emits [`SessionEvent::Reconnected`].

use crate::correlation::CorrelationTable;
use crate::error::{HubError, HubResult};
use crate::protocol::{self, HubCommand, HubEvent, InboundFrame};
use futures::{SinkExt, StreamExt};
use hearthmind_core::config::HubConfig;
use hearthmind_core::health::SessionEvent;
use rand::Rng;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, Notify, RwLock, broadcast, mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Capacity of the outbound frame queue.
const OUTBOUND_QUEUE_CAPACITY: usize = 64;

/// Capacity of the event dispatch queue.
const EVENT_QUEUE_CAPACITY: usize = 256;

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No connection yet.
    Disconnected,
    /// TCP/WebSocket connect in progress.
    Connecting,
    /// Socket up, auth handshake in progress.
    Authenticating,
    /// Authenticated; calls and subscriptions are served.
    Ready,
    /// Connection dropped; backoff-reconnect in progress.
    Reconnecting,
    /// Explicitly closed, or credentials went bad. Terminal.
    Closed,
}

/// Callback invoked for each matching event, on the dispatch worker.
pub type EventHandler = Arc<dyn Fn(HubEvent) + Send + Sync>;

/// Identifies one registered handler for later removal.
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    key: u64,
    event_type: String,
}

impl SubscriptionHandle {
    /// Event type this handler is registered for.
    pub fn event_type(&self) -> &str {
        &self.event_type
    }
}

/// The hub WebSocket session.
pub struct HubSession {
    config: HubConfig,
    correlation: CorrelationTable,
    outbound_tx: mpsc::Sender<Message>,
    event_queue_tx: mpsc::Sender<HubEvent>,
    handlers: RwLock<HashMap<String, Vec<(u64, EventHandler)>>>,
    handler_key: AtomicU64,
    /// Event types registered on the hub itself; re-issued after reconnect.
    server_subscribed: Mutex<HashSet<String>>,
    state_tx: watch::Sender<SessionState>,
    lifecycle_tx: broadcast::Sender<SessionEvent>,
    closed: AtomicBool,
    close_notify: Notify,
}

impl std::fmt::Debug for HubSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubSession").finish_non_exhaustive()
    }
}

impl HubSession {
    /// Connect to the hub and perform the auth handshake.
    ///
    /// Returns [`HubError::AuthRejected`] when the hub refuses the access
    /// token and [`HubError::Transport`] on socket failure. On success the
    /// session is `Ready` and its background I/O and dispatch tasks are
    /// running.
    pub async fn connect(config: HubConfig) -> HubResult<Arc<Self>> {
        let (state_tx, _) = watch::channel(SessionState::Disconnected);

        state_tx.send_replace(SessionState::Connecting);
        let ws = Self::dial(&config).await?;

        state_tx.send_replace(SessionState::Authenticating);
        let ws = Self::authenticate(ws, &config).await?;
        state_tx.send_replace(SessionState::Ready);

        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        let (event_queue_tx, event_queue_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let (lifecycle_tx, _) = broadcast::channel(16);

        let session = Arc::new(Self {
            config,
            correlation: CorrelationTable::new(),
            outbound_tx,
            event_queue_tx,
            handlers: RwLock::new(HashMap::new()),
            handler_key: AtomicU64::new(1),
            server_subscribed: Mutex::new(HashSet::new()),
            state_tx,
            lifecycle_tx,
            closed: AtomicBool::new(false),
            close_notify: Notify::new(),
        });

        session.spawn_dispatcher(event_queue_rx);
        tokio::spawn(Arc::clone(&session).run_io(ws, outbound_rx));

        let _ = session.lifecycle_tx.send(SessionEvent::Connected);
        info!(endpoint = %session.config.endpoint, "hub session ready");
        Ok(session)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    /// Subscribe to connection lifecycle events (connected, reconnected,
    /// disconnected).
    pub fn lifecycle(&self) -> broadcast::Receiver<SessionEvent> {
        self.lifecycle_tx.subscribe()
    }

    /// Issue a request/response call over the shared connection.
    ///
    /// Assigns a correlation id, registers a waiter, enqueues the frame, and
    /// suspends until the reader resolves the waiter or the configured
    /// timeout fires. The caller never reads the socket.
    pub async fn call(&self, command: HubCommand) -> HubResult<Value> {
        if self.state() != SessionState::Ready {
            return Err(HubError::Disconnected);
        }

        let (id, rx) = self.correlation.register();
        let frame = command.to_frame(id).to_string();
        debug!(id, msg_type = command.msg_type(), "sending call frame");

        if self.outbound_tx.send(Message::Text(frame)).await.is_err() {
            self.correlation.cancel(id);
            return Err(HubError::Disconnected);
        }

        let timeout = self.config.call_timeout();
        match tokio::time::timeout(timeout, rx).await {
            Err(_) => {
                // Late replies must not leak into the next caller.
                self.correlation.cancel(id);
                Err(HubError::Timeout(timeout))
            }
            Ok(Err(_)) => Err(HubError::Disconnected),
            Ok(Ok(outcome)) => outcome,
        }
    }

    /// Register `handler` for `event_type` and make sure the hub pushes that
    /// event type to this connection.
    ///
    /// Handlers run on the dispatch worker, never inline in the reader.
    pub async fn subscribe(
        &self,
        event_type: &str,
        handler: EventHandler,
    ) -> HubResult<SubscriptionHandle> {
        let key = self.handler_key.fetch_add(1, Ordering::Relaxed);
        self.handlers
            .write()
            .await
            .entry(event_type.to_string())
            .or_default()
            .push((key, handler));

        let mut server = self.server_subscribed.lock().await;
        if !server.contains(event_type) {
            let result = self
                .call(HubCommand::new("subscribe_events").with_field("event_type", event_type))
                .await;
            if let Err(err) = result {
                // Roll the handler back so a retry starts clean.
                if let Some(list) = self.handlers.write().await.get_mut(event_type) {
                    list.retain(|(k, _)| *k != key);
                }
                return Err(err);
            }
            server.insert(event_type.to_string());
        }

        Ok(SubscriptionHandle {
            key,
            event_type: event_type.to_string(),
        })
    }

    /// Remove a previously registered handler.
    pub async fn unsubscribe(&self, handle: &SubscriptionHandle) {
        let mut handlers = self.handlers.write().await;
        if let Some(list) = handlers.get_mut(&handle.event_type) {
            list.retain(|(key, _)| *key != handle.key);
        }
    }

    /// Close the session. Terminal: pending waiters fail and the background
    /// tasks exit.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.close_notify.notify_waiters();
    }

    fn set_state(&self, state: SessionState) {
        self.state_tx.send_replace(state);
    }

    async fn dial(config: &HubConfig) -> HubResult<WsStream> {
        let (ws, _response) = connect_async(config.endpoint.as_str()).await?;
        Ok(ws)
    }

    /// Run the auth handshake on a fresh socket.
    async fn authenticate(mut ws: WsStream, config: &HubConfig) -> HubResult<WsStream> {
        let timeout = config.call_timeout();

        match Self::next_frame(&mut ws, timeout).await? {
            InboundFrame::AuthRequired { version } => {
                debug!(?version, "hub requested authentication");
            }
            // A hub with auth disabled greets with auth_ok directly.
            InboundFrame::AuthOk { .. } => return Ok(ws),
            other => {
                return Err(HubError::Protocol(format!(
                    "expected auth_required, got {other:?}"
                )));
            }
        }

        ws.send(Message::Text(
            protocol::auth_frame(&config.access_token).to_string(),
        ))
        .await?;

        match Self::next_frame(&mut ws, timeout).await? {
            InboundFrame::AuthOk { version } => {
                debug!(?version, "hub accepted credentials");
                Ok(ws)
            }
            InboundFrame::AuthInvalid { message } => {
                Err(HubError::AuthRejected(message.unwrap_or_default()))
            }
            other => Err(HubError::Protocol(format!(
                "unexpected frame during handshake: {other:?}"
            ))),
        }
    }

    /// Read the next parseable text frame, skipping pings and binary noise.
    async fn next_frame(ws: &mut WsStream, timeout: Duration) -> HubResult<InboundFrame> {
        loop {
            let message = match tokio::time::timeout(timeout, ws.next()).await {
                Err(_) => return Err(HubError::Timeout(timeout)),
                Ok(None) => {
                    return Err(HubError::Transport("connection closed".to_string()));
                }
                Ok(Some(Err(err))) => return Err(err.into()),
                Ok(Some(Ok(message))) => message,
            };

            match message {
                Message::Text(text) => match InboundFrame::parse(&text) {
                    Some(frame) => return Ok(frame),
                    None => {
                        return Err(HubError::Protocol(format!("unparseable frame: {text}")));
                    }
                },
                Message::Close(_) => {
                    return Err(HubError::Transport("connection closed".to_string()));
                }
                _ => {}
            }
        }
    }

    /// I/O supervisor: drives one connection, then reconnects with backoff
    /// until closed. This task is the only reader of the socket.
    async fn run_io(self: Arc<Self>, mut ws: WsStream, mut outbound_rx: mpsc::Receiver<Message>) {
        loop {
            let exit = self.drive(&mut ws, &mut outbound_rx).await;

            // Whatever ended the connection, nobody is coming back for the
            // pending waiters on it.
            self.correlation.fail_all();

            if matches!(exit, DriveExit::Closed) || self.closed.load(Ordering::SeqCst) {
                let _ = ws.close(None).await;
                self.set_state(SessionState::Closed);
                info!("hub session closed");
                break;
            }

            self.set_state(SessionState::Reconnecting);
            let _ = self.lifecycle_tx.send(SessionEvent::Disconnected);

            // Frames queued while disconnected belong to failed calls.
            while outbound_rx.try_recv().is_ok() {}

            match self.reestablish().await {
                Some(new_ws) => {
                    ws = new_ws;
                    self.set_state(SessionState::Ready);
                    let _ = self.lifecycle_tx.send(SessionEvent::Reconnected);
                    info!("hub session reconnected");
                }
                None => {
                    self.set_state(SessionState::Closed);
                    break;
                }
            }
        }
    }

    /// Serve one live connection until it drops or the session is closed.
    async fn drive(&self, ws: &mut WsStream, outbound_rx: &mut mpsc::Receiver<Message>) -> DriveExit {
        loop {
            // The notify wakes a waiter already inside the select; this
            // catches a close that landed between iterations.
            if self.closed.load(Ordering::SeqCst) {
                return DriveExit::Closed;
            }
            tokio::select! {
                _ = self.close_notify.notified() => return DriveExit::Closed,
                outbound = outbound_rx.recv() => {
                    match outbound {
                        Some(message) => {
                            if let Err(err) = ws.send(message).await {
                                warn!(error = %err, "hub write failed");
                                return DriveExit::ConnectionLost;
                            }
                        }
                        // Session dropped by every owner.
                        None => return DriveExit::Closed,
                    }
                }
                inbound = ws.next() => {
                    match inbound {
                        Some(Ok(Message::Text(text))) => self.route_frame(&text),
                        Some(Ok(Message::Ping(_))) => {
                            // tungstenite queues the pong reply itself
                        }
                        Some(Ok(Message::Close(frame))) => {
                            info!(?frame, "hub sent close frame");
                            return DriveExit::ConnectionLost;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(err)) => {
                            warn!(error = %err, "hub read failed");
                            return DriveExit::ConnectionLost;
                        }
                        None => {
                            info!("hub stream ended");
                            return DriveExit::ConnectionLost;
                        }
                    }
                }
            }
        }
    }

    /// Route one inbound frame: replies to the correlation table, events to
    /// the dispatch queue, everything else logged and dropped.
    fn route_frame(&self, text: &str) {
        let Some(frame) = InboundFrame::parse(text) else {
            debug!("dropping unparseable frame");
            return;
        };

        match frame {
            InboundFrame::Result {
                id,
                success,
                result,
                error,
            } => {
                let outcome = if success {
                    Ok(result.unwrap_or(Value::Null))
                } else {
                    let detail = error.unwrap_or_else(|| protocol::FrameError {
                        code: "unknown".to_string(),
                        message: String::new(),
                    });
                    Err(HubError::Call {
                        code: detail.code,
                        message: detail.message,
                    })
                };
                if !self.correlation.resolve(id, outcome) {
                    debug!(id, "result frame without a pending waiter");
                }
            }
            InboundFrame::Event { id: _, event } => {
                if self.event_queue_tx.try_send(event).is_err() {
                    warn!("event dispatch queue full, dropping event");
                }
            }
            InboundFrame::Pong { id } => debug!(id, "pong"),
            InboundFrame::AuthRequired { .. }
            | InboundFrame::AuthOk { .. }
            | InboundFrame::AuthInvalid { .. } => {
                warn!("auth frame outside handshake, dropping");
            }
            InboundFrame::Unknown => debug!("unmatched frame dropped"),
        }
    }

    /// Reconnect with exponential backoff and full jitter. Returns `None`
    /// when the session was closed or credentials went bad.
    async fn reestablish(&self) -> Option<WsStream> {
        let base = self.config.backoff_base();
        let cap = self.config.backoff_cap();
        let mut attempt: u32 = 0;

        loop {
            if self.closed.load(Ordering::SeqCst) {
                return None;
            }

            let delay = backoff_delay(attempt, base, cap);
            info!(attempt, delay_ms = delay.as_millis() as u64, "hub reconnect backoff");
            tokio::select! {
                _ = self.close_notify.notified() => return None,
                _ = tokio::time::sleep(delay) => {}
            }

            match Self::dial(&self.config).await {
                Ok(ws) => match Self::authenticate(ws, &self.config).await {
                    Ok(mut ws) => {
                        if let Err(err) = self.resubscribe(&mut ws).await {
                            warn!(error = %err, "resubscription failed, retrying connection");
                        } else {
                            return Some(ws);
                        }
                    }
                    Err(HubError::AuthRejected(message)) => {
                        error!(message = %message, "credentials rejected during reconnect, closing session");
                        return None;
                    }
                    Err(err) => {
                        warn!(error = %err, attempt, "reconnect handshake failed");
                    }
                },
                Err(err) => {
                    warn!(error = %err, attempt, "reconnect attempt failed");
                }
            }

            attempt = attempt.saturating_add(1);
        }
    }

    /// Re-issue the server-side event subscriptions on a fresh socket,
    /// before the reader loop takes over. Still the single reader: this runs
    /// on the I/O task between connections.
    async fn resubscribe(&self, ws: &mut WsStream) -> HubResult<()> {
        let event_types: Vec<String> = {
            let server = self.server_subscribed.lock().await;
            server.iter().cloned().collect()
        };

        for event_type in event_types {
            let id = self.correlation.allocate_id();
            let frame = HubCommand::new("subscribe_events")
                .with_field("event_type", event_type.as_str())
                .to_frame(id);
            ws.send(Message::Text(frame.to_string())).await?;

            loop {
                match Self::next_frame(ws, self.config.call_timeout()).await? {
                    InboundFrame::Result {
                        id: reply_id,
                        success,
                        ..
                    } if reply_id == id => {
                        if !success {
                            warn!(event_type = %event_type, "hub refused resubscription");
                        }
                        break;
                    }
                    other => debug!(?other, "frame during resubscribe, dropping"),
                }
            }
        }

        Ok(())
    }

    /// Spawn the worker that fans events out to registered handlers.
    fn spawn_dispatcher(self: &Arc<Self>, mut event_rx: mpsc::Receiver<HubEvent>) {
        let session = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                let Some(session) = session.upgrade() else { break };
                let handlers = session.handlers.read().await;
                match handlers.get(&event.event_type) {
                    Some(list) if !list.is_empty() => {
                        for (_, handler) in list {
                            handler(event.clone());
                        }
                    }
                    _ => debug!(event_type = %event.event_type, "event without subscribers dropped"),
                }
            }
            debug!("hub event dispatcher stopped");
        });
    }
}

enum DriveExit {
    /// Explicit close or all session owners gone.
    Closed,
    /// The connection dropped; reconnect.
    ConnectionLost,
}

/// Exponential backoff with full jitter: uniform in `[0, min(base * 2^n, cap)]`.
fn backoff_delay(attempt: u32, base: Duration, cap: Duration) -> Duration {
    let exp = base.as_secs_f64() * 2.0_f64.powi(attempt.min(16) as i32);
    let capped = exp.min(cap.as_secs_f64());
    let jittered = rand::thread_rng().gen_range(0.0..=capped);
    Duration::from_secs_f64(jittered)
}

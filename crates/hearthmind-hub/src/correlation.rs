//! Correlation table: request id -> pending waiter.
//!
//! Multiple logical callers share one physical connection by registering a
//! oneshot waiter here and suspending; the reader loop resolves waiters as
//! result frames arrive. Ids increase monotonically for the lifetime of the
//! session and are never reused across reconnects.

use crate::error::{HubError, HubResult};
use dashmap::DashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::oneshot;

/// Pending request/response waiters keyed by correlation id.
pub struct CorrelationTable {
    next_id: AtomicU64,
    pending: DashMap<u64, oneshot::Sender<HubResult<Value>>>,
}

impl CorrelationTable {
    /// Create an empty table. Ids start at 1; the hub treats 0 as invalid.
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            pending: DashMap::new(),
        }
    }

    /// Allocate the next correlation id without registering a waiter. Used
    /// for fire-and-check frames the I/O task reads the reply to itself.
    pub fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Allocate the next correlation id and register a waiter for it.
    pub fn register(&self) -> (u64, oneshot::Receiver<HubResult<Value>>) {
        let id = self.allocate_id();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);
        (id, rx)
    }

    /// Resolve the waiter for `id`, if any. Returns `false` when no waiter
    /// was registered (late or duplicate reply).
    pub fn resolve(&self, id: u64, result: HubResult<Value>) -> bool {
        match self.pending.remove(&id) {
            Some((_, tx)) => tx.send(result).is_ok(),
            None => false,
        }
    }

    /// Drop the waiter for `id` without resolving it. Used when the caller
    /// gave up (timeout) so a late reply is discarded instead of delivered.
    pub fn cancel(&self, id: u64) {
        self.pending.remove(&id);
    }

    /// Fail every pending waiter with [`HubError::Disconnected`]. Called by
    /// the reader when the connection drops.
    pub fn fail_all(&self) {
        let ids: Vec<u64> = self.pending.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, tx)) = self.pending.remove(&id) {
                let _ = tx.send(Err(HubError::Disconnected));
            }
        }
    }

    /// Number of unresolved waiters.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

impl Default for CorrelationTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn resolve_delivers_to_waiter() {
        let table = CorrelationTable::new();
        let (id, rx) = table.register();

        assert!(table.resolve(id, Ok(json!({"ok": true}))));
        let result = rx.await.unwrap().unwrap();
        assert_eq!(result["ok"], true);
        assert_eq!(table.pending_count(), 0);
    }

    #[tokio::test]
    async fn ids_are_monotonic() {
        let table = CorrelationTable::new();
        let (a, _rx_a) = table.register();
        let (b, _rx_b) = table.register();
        let (c, _rx_c) = table.register();
        assert!(a < b && b < c);
    }

    #[tokio::test]
    async fn resolve_unknown_id_is_noop() {
        let table = CorrelationTable::new();
        assert!(!table.resolve(42, Ok(Value::Null)));
    }

    #[tokio::test]
    async fn cancelled_waiter_discards_late_reply() {
        let table = CorrelationTable::new();
        let (id, rx) = table.register();
        drop(rx);
        table.cancel(id);

        assert!(!table.resolve(id, Ok(Value::Null)));
    }

    #[tokio::test]
    async fn fail_all_disconnects_every_waiter() {
        let table = CorrelationTable::new();
        let (_a, rx_a) = table.register();
        let (_b, rx_b) = table.register();

        table.fail_all();

        assert!(matches!(rx_a.await.unwrap(), Err(HubError::Disconnected)));
        assert!(matches!(rx_b.await.unwrap(), Err(HubError::Disconnected)));
        assert_eq!(table.pending_count(), 0);
    }
}

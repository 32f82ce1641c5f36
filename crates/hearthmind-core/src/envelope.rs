//! TTL-tagged cache envelope.
//!
//! Every cached collection in the discovery engine is wrapped in a
//! [`CacheEnvelope`] carrying its capture timestamp. Staleness never deletes
//! data: a stale envelope keeps serving its last-known-good contents and
//! merely becomes eligible for a forced refresh.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// A cached collection tagged with the instant it was captured.
#[derive(Debug, Clone)]
pub struct CacheEnvelope<T> {
    data: T,
    captured_at: DateTime<Utc>,
    /// Set when a registry event arrived without enough data to apply in
    /// place; the next refresh cycle reconciles it.
    dirty: bool,
}

impl<T> CacheEnvelope<T> {
    /// Wrap freshly captured data.
    pub fn new(data: T) -> Self {
        Self {
            data,
            captured_at: Utc::now(),
            dirty: false,
        }
    }

    /// The cached data, regardless of staleness.
    pub fn get(&self) -> &T {
        &self.data
    }

    /// Mutable access for targeted in-place deltas. Does not touch the
    /// capture timestamp: a delta refines the same snapshot generation.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.data
    }

    /// When the data was captured.
    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    /// Age of the cached data.
    pub fn age(&self) -> Duration {
        (Utc::now() - self.captured_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// Whether the data is older than `ttl`.
    pub fn is_stale(&self, ttl: Duration) -> bool {
        self.age() > ttl
    }

    /// Replace the contents wholesale, resetting the capture timestamp and
    /// clearing the dirty flag.
    pub fn replace(&mut self, data: T) {
        self.data = data;
        self.captured_at = Utc::now();
        self.dirty = false;
    }

    /// Flag the envelope for refresh without discarding its contents.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Whether a refresh has been requested for this envelope.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}

impl<T: Default> Default for CacheEnvelope<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

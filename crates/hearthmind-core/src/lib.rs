//! Core types shared across the HearthMind discovery engine.
//!
//! This crate defines the configuration surface, the TTL cache envelope, and
//! the transport lifecycle/health types used by every other crate in the
//! workspace. It deliberately contains no I/O.

pub mod config;
pub mod envelope;
pub mod health;

pub use config::{BridgeConfig, DiscoveryConfig, HubConfig};
pub use envelope::CacheEnvelope;
pub use health::{DiscoveryHealth, SessionEvent};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}

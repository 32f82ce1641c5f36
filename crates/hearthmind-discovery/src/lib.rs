//! Discovery and synchronization engine.
//!
//! Merges the hub's registries and the bridge's capability records into one
//! consistent, cacheable model:
//!
//! - [`cache`]: TTL-tagged, staleness-aware registry and capability caches
//! - [`reconcile`]: identity resolution across the two id spaces
//! - [`orchestrator`]: snapshot sequencing, periodic refresh, reconnect
//!   handling, and the read-only query surface for downstream consumers
//! - [`source`]: the seams the orchestrator consumes the transports through
//!
//! Consumers never block on a transport: every read is served from the
//! caches, which always hold last-known-good data plus a staleness flag.

pub mod cache;
pub mod orchestrator;
pub mod reconcile;
pub mod source;

pub use cache::{CapabilityCache, RegistryCache, RegistryMaps};
pub use orchestrator::{DiscoveryOrchestrator, DiscoveryState, ViewFilter};
pub use reconcile::{LinkOrigin, ReconciledDeviceView, ReconciledModel, ReconciliationEngine};
pub use source::{CapabilitySource, RegistrySource, SourceError};

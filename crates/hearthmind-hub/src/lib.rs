//! Hub WebSocket transport and registry client.
//!
//! This crate owns the single long-lived connection to the home-automation
//! hub. The central invariant: exactly one task reads the socket. Every
//! request/response caller goes through the [`CorrelationTable`] and suspends
//! until the reader resolves its waiter; event subscribers get their frames
//! through a dispatch queue so a slow handler cannot stall the reader.
//!
//! ## Architecture
//!
//! - [`session::HubSession`]: connection lifecycle, auth handshake, reader
//!   loop, reconnect with backoff
//! - [`correlation::CorrelationTable`]: request id -> pending waiter map
//! - [`registry::HubRegistryClient`]: device/entity/area snapshots and
//!   registry-update event forwarding
//! - [`model`]: canonical registry records with tolerant per-record parsing

pub mod correlation;
pub mod error;
pub mod model;
pub mod protocol;
pub mod registry;
pub mod session;

pub use correlation::CorrelationTable;
pub use error::{HubError, HubResult};
pub use model::{Area, Device, Entity, RegistrySnapshot};
pub use protocol::{HubCommand, HubEvent, InboundFrame};
pub use registry::{HubRegistryClient, RegistryAction, RegistryEvent, RegistryScope};
pub use session::{EventHandler, HubSession, SessionState, SubscriptionHandle};

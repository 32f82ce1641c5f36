//! Bridge transport error taxonomy.

use std::time::Duration;

/// Errors surfaced by the bridge transport.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// Broker-level failure (connect, publish, subscribe).
    #[error("bridge transport failure: {0}")]
    Transport(String),

    /// No message arrived on the response topic within the window. The
    /// caller falls back to the last good cached snapshot.
    #[error("bridge request timed out after {0:?}")]
    Timeout(Duration),

    /// A payload that could not be interpreted at all. Per-record problems
    /// inside a list are skipped and counted instead.
    #[error("bridge payload unparseable: {0}")]
    Parse(String),
}

/// Result alias for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;

impl From<rumqttc::ClientError> for BridgeError {
    fn from(err: rumqttc::ClientError) -> Self {
        BridgeError::Transport(err.to_string())
    }
}

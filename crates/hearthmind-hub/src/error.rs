//! Hub transport error taxonomy.

use std::time::Duration;

/// Errors surfaced by the hub transport and registry client.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    /// The hub rejected our credentials. Fatal for this transport until the
    /// token is corrected; the orchestrator surfaces it and does not retry
    /// indefinitely.
    #[error("authentication rejected: {0}")]
    AuthRejected(String),

    /// Socket-level failure (connect, read, write).
    #[error("transport failure: {0}")]
    Transport(String),

    /// The connection dropped while a call was pending, or a call was issued
    /// while the session is not ready. Recoverable: the session reconnects
    /// with backoff in the background.
    #[error("connection lost")]
    Disconnected,

    /// A call's waiter was not resolved within the configured timeout.
    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    /// The hub answered a call with `success: false`.
    #[error("hub rejected call ({code}): {message}")]
    Call { code: String, message: String },

    /// A frame that violates the expected protocol shape.
    #[error("protocol violation: {0}")]
    Protocol(String),
}

/// Result alias for hub operations.
pub type HubResult<T> = Result<T, HubError>;

impl From<tokio_tungstenite::tungstenite::Error> for HubError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        HubError::Transport(err.to_string())
    }
}

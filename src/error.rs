//! Error types for realtime-link.

use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by the subscription multiplexer and its transports.
///
/// Connection-level failures (`ConnectError`, `TransportClosed`) are normally
/// recovered internally by reconnecting; callers only see them once retries
/// are exhausted. Request-level failures (`AckTimeout`, `ServerError`) reject
/// only the caller that issued the request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RealtimeLinkError {
    /// A connect attempt failed or did not complete within the connect timeout.
    #[error("Connect error: {0}")]
    ConnectError(String),

    /// The channel closed mid-stream.
    #[error("Transport closed: {0}")]
    TransportClosed(String),

    /// A correlated request did not receive a reply before its deadline.
    #[error("Acknowledgement timeout for request {request_id} after {timeout:?}")]
    AckTimeout { request_id: u64, timeout: Duration },

    /// An inbound frame could not be parsed.
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    /// The server answered a correlated request with an error.
    #[error("Server error ({code}): {message}")]
    ServerError { code: String, message: String },

    /// A pending request was abandoned because the connection went away.
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// The operation needs a live connection and there is none.
    #[error("Not connected")]
    NotConnected,

    /// The active transport cannot perform the requested operation.
    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Authentication error: {0}")]
    AuthenticationError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// The multiplexer background task is no longer running.
    #[error("Multiplexer is closed")]
    Closed,
}

impl RealtimeLinkError {
    /// `true` for failures the reconnect loop is expected to recover from.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ConnectError(_) | Self::TransportClosed(_) | Self::ConnectionLost(_)
        )
    }
}

impl From<serde_json::Error> for RealtimeLinkError {
    fn from(e: serde_json::Error) -> Self {
        Self::SerializationError(e.to_string())
    }
}

/// Result type for realtime-link operations.
pub type Result<T> = std::result::Result<T, RealtimeLinkError>;

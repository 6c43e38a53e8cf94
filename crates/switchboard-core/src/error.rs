//! Error types for the hub.

use switchboard_protocol::ProtocolError;
use switchboard_transport::TransportError;
use thiserror::Error;

/// Hub and connection errors.
#[derive(Debug, Error)]
pub enum HubError {
    /// Upgrade handshake or transport I/O failure.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Operation on a connection that is already closed.
    #[error("Connection closed")]
    Closed,

    /// A write deadline or the send grace window elapsed.
    #[error("Operation timed out")]
    Timeout,

    /// Envelope could not be encoded or decoded.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Error returned by a message handler.
///
/// Sent back to the peer as `{"type": "error", "data": <message>}`; the
/// connection stays open.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    /// Create a new handler error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The error reported when a handler panics.
    #[must_use]
    pub fn panicked() -> Self {
        Self::new("internal error while handling message")
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

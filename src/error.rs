//! Error types for the transform-sync client.
//!
//! Only transport and codec failures are errors. Server-reported room errors
//! and the "not enough players" degrade are ordinary protocol traffic and are
//! surfaced as [`SessionEvent`](crate::SessionEvent)s instead.

use thiserror::Error;

/// Errors that can occur when using the transform-sync client.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Failed to open a connection to the server.
    #[error("connect error: {0}")]
    Connect(String),

    /// Failed to send a message through the transport.
    #[error("transport send error: {0}")]
    TransportSend(String),

    /// Failed to receive a message from the transport.
    #[error("transport receive error: {0}")]
    TransportReceive(String),

    /// The transport connection was closed.
    #[error("transport connection closed")]
    TransportClosed,

    /// Failed to serialize or deserialize a protocol message.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A server payload was structurally invalid for its step.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Attempted an operation that requires an active session, but the client is not connected.
    #[error("not connected to server")]
    NotConnected,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SessionError {
    /// Returns `true` for errors that mean the connection itself is gone.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Connect(_)
                | Self::TransportSend(_)
                | Self::TransportReceive(_)
                | Self::TransportClosed
                | Self::Io(_)
        )
    }
}

/// A specialized [`Result`] type for transform-sync client operations.
pub type Result<T> = std::result::Result<T, SessionError>;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_are_classified() {
        assert!(SessionError::TransportClosed.is_transport());
        assert!(SessionError::Connect("refused".into()).is_transport());
        assert!(!SessionError::Protocol("bad rooms".into()).is_transport());
        assert!(!SessionError::NotConnected.is_transport());
    }

    #[test]
    fn serde_errors_convert() {
        let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: SessionError = err.into();
        assert!(matches!(err, SessionError::Serialization(_)));
        assert!(err.to_string().starts_with("serialization error"));
    }
}

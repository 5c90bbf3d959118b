//! Transport abstraction for the transform-sync protocol.
//!
//! The [`Transport`] trait defines a bidirectional text message channel between
//! the client and server. The protocol uses one JSON object per message, so
//! every transport implementation must handle message framing internally
//! (e.g., WebSocket frames, length-prefixed TCP).
//!
//! Opening a connection is the job of a [`Connector`]. Different transports
//! have different connection parameters, so the connector receives the
//! configured address as an opaque string and interprets it itself.
//!
//! # Implementing a Custom Transport
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use transform_sync_client::error::SessionError;
//! use transform_sync_client::transport::Transport;
//!
//! struct MyTransport { /* ... */ }
//!
//! #[async_trait]
//! impl Transport for MyTransport {
//!     async fn send(&mut self, message: String) -> Result<(), SessionError> {
//!         // Send the JSON text message over your transport
//!         todo!()
//!     }
//!
//!     async fn recv(&mut self) -> Option<Result<String, SessionError>> {
//!         // Receive the next JSON text message
//!         // Return None when the connection is closed cleanly
//!         todo!()
//!     }
//!
//!     async fn close(&mut self) -> Result<(), SessionError> {
//!         // Gracefully shut down the connection
//!         todo!()
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::error::SessionError;

/// A bidirectional text message transport.
///
/// Each call to [`send`](Transport::send) transmits one complete JSON message.
/// Each call to [`recv`](Transport::recv) returns one complete JSON message.
///
/// # Cancel Safety
///
/// The [`recv`](Transport::recv) method **MUST** be cancel-safe because the
/// session loop polls it inside `tokio::select!` next to timer ticks and user
/// commands. If `recv` is cancelled before completion, calling it again must
/// not lose data. Channel-based implementations are naturally cancel-safe.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Send a JSON text message to the server.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::TransportSend`] if the message could not be sent.
    async fn send(&mut self, message: String) -> Result<(), SessionError>;

    /// Receive the next JSON text message from the server.
    ///
    /// Returns:
    /// - `Some(Ok(text))` — a complete message was received
    /// - `Some(Err(e))` — a transport error occurred
    /// - `None` — the connection was closed cleanly by the server
    async fn recv(&mut self) -> Option<Result<String, SessionError>>;

    /// Close the transport connection gracefully.
    ///
    /// # Errors
    ///
    /// Returns an error if the graceful shutdown fails. Implementations should
    /// still release resources even if the close handshake fails.
    async fn close(&mut self) -> Result<(), SessionError>;
}

/// Opens [`Transport`]s for a server address.
///
/// Used by [`SessionClient::connect`](crate::SessionClient::connect) so that
/// connection establishment happens inside the session task and a failure is
/// reported asynchronously like any other terminal channel event.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// The transport produced by a successful connection.
    type Transport: Transport;

    /// Open a connection to `address`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Connect`] (or [`SessionError::Io`]) if the
    /// connection cannot be established.
    async fn connect(&self, address: &str) -> Result<Self::Transport, SessionError>;
}

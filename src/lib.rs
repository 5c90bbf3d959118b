//! # Transform Sync Client
//!
//! Async client for the transform-sync multiplayer protocol: a small JSON
//! "step" protocol in which players connect, pick a room, wait for enough
//! players, and then exchange 12-component transform vectors with everyone
//! else in the room.
//!
//! ## Features
//!
//! - **Transport-agnostic**: implement the [`Transport`] trait (and optionally
//!   [`Connector`]) for any text-message duplex channel
//! - **WebSocket built-in**: the default `transport-websocket` feature provides
//!   [`WebSocketTransport`] and [`WebSocketConnector`]
//! - **Event-driven**: receive [`SessionEvent`]s on a bounded channel and draw
//!   them on any [`DisplaySink`](display::DisplaySink)
//! - **Testable core**: the [`Session`](session::Session) state machine is
//!   driven by plain inputs and returns the actions to perform
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use transform_sync_client::{SessionClient, SessionConfig, SessionEvent, WebSocketConnector};
//!
//! let (mut client, mut events) =
//!     SessionClient::connect(WebSocketConnector, SessionConfig::default());
//! while let Some(event) = events.recv().await {
//!     if let SessionEvent::RoomList { rooms } = &event {
//!         client.select_room(rooms[0].clone())?;
//!     }
//! }
//! ```

pub mod channel;
pub mod client;
pub mod display;
pub mod error;
pub mod event;
pub mod protocol;
pub mod session;
pub mod timer;
pub mod transport;
pub mod transports;

// Re-export primary types for ergonomic imports.
pub use client::{SessionClient, SessionConfig};
pub use error::SessionError;
pub use event::SessionEvent;
pub use protocol::{ClientCommand, PlayerId, ServerMessage, Transform};
pub use session::SessionPhase;
pub use transport::{Connector, Transport};

#[cfg(feature = "transport-websocket")]
pub use transports::{WebSocketConnector, WebSocketTransport};

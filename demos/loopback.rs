//! # Loopback Example
//!
//! Implements [`Transport`] over in-process channels and plays the server
//! side by hand. This is useful for:
//!
//! - **Testing**: exercise a session without a real server
//! - **Custom backends**: adapt any text-message I/O layer (TCP, QUIC, WebRTC)
//!
//! ## Running
//!
//! ```sh
//! cargo run --example loopback
//! ```

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::mpsc;
use transform_sync_client::display::ViewState;
use transform_sync_client::{SessionClient, SessionConfig, SessionError, SessionEvent, Transport};

// ─────────────────────────────────────────────────────────────────────
// Step 1: A channel-based transport
// ─────────────────────────────────────────────────────────────────────

/// Client half of the loopback, handed to [`SessionClient::start`].
pub struct LoopbackTransport {
    tx: mpsc::UnboundedSender<String>,
    rx: mpsc::UnboundedReceiver<String>,
}

/// Server half of the loopback.
pub struct LoopbackServer {
    /// What the client sent.
    pub rx: mpsc::UnboundedReceiver<String>,
    /// Frames delivered to the client.
    pub tx: mpsc::UnboundedSender<String>,
}

fn loopback_pair() -> (LoopbackTransport, LoopbackServer) {
    let (client_tx, server_rx) = mpsc::unbounded_channel();
    let (server_tx, client_rx) = mpsc::unbounded_channel();
    (
        LoopbackTransport {
            tx: client_tx,
            rx: client_rx,
        },
        LoopbackServer {
            rx: server_rx,
            tx: server_tx,
        },
    )
}

// ─────────────────────────────────────────────────────────────────────
// Step 2: Implement the Transport trait
// ─────────────────────────────────────────────────────────────────────

#[async_trait]
impl Transport for LoopbackTransport {
    async fn send(&mut self, message: String) -> Result<(), SessionError> {
        self.tx
            .send(message)
            .map_err(|e| SessionError::TransportSend(e.to_string()))
    }

    /// `None` once the server half is dropped. Cancel-safe because
    /// `mpsc::UnboundedReceiver::recv` is.
    async fn recv(&mut self) -> Option<Result<String, SessionError>> {
        self.rx.recv().await.map(Ok)
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────
// Step 3: Play the server
// ─────────────────────────────────────────────────────────────────────

async fn expect_step(
    server: &mut LoopbackServer,
    step: u64,
) -> Result<serde_json::Value, Box<dyn std::error::Error>> {
    let Some(text) = server.rx.recv().await else {
        return Err("client hung up".into());
    };
    let value: serde_json::Value = serde_json::from_str(&text)?;
    tracing::info!("Server received: {value}");
    if value["step"] != step {
        return Err(format!("expected step {step}, got {value}").into());
    }
    Ok(value)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let (transport, mut server) = loopback_pair();

    // Short timers so the demo finishes quickly.
    let config = SessionConfig::default()
        .with_push_warmup(Duration::from_millis(200))
        .with_push_period(Duration::from_millis(200));
    let (mut client, mut event_rx) = SessionClient::start(transport, config);

    // Handshake: assign an id, answer the room-list request.
    server.tx.send(json!({"step": 0, "id": 1}).to_string())?;
    expect_step(&mut server, 1).await?;
    server
        .tx
        .send(json!({"step": 1, "rooms": ["Room1", "Room2"]}).to_string())?;

    let mut view = ViewState::default();
    while let Some(event) = event_rx.recv().await {
        view.apply(&event);
        if let SessionEvent::RoomList { rooms } = &event {
            if let Some(room) = rooms.first() {
                client.select_room(room.clone())?;
            }
            break;
        }
    }

    // Join, start the session and echo the first pushed transform back as
    // the room's transform table.
    let join = expect_step(&mut server, 2).await?;
    let room = join["game_type"].clone();
    let joined = json!({"step": 2, "room": room, "capacity": 4, "current": 2, "minimum": 2});
    server.tx.send(joined.to_string())?;
    server.tx.send(json!({"step": 2.5, "status": "started"}).to_string())?;

    let push = expect_step(&mut server, 3).await?;
    server.tx.send(
        json!({"step": 3, "transforms": {"1": push["transform"], "2": vec![0.0; 12]}}).to_string(),
    )?;

    while let Some(event) = event_rx.recv().await {
        view.apply(&event);
        if matches!(event, SessionEvent::TransformTable { .. }) {
            break;
        }
    }

    for line in view.log.iter() {
        tracing::info!("Log: {line}");
    }
    tracing::info!(
        "Local transform: {:?}",
        client.local_transform().await.components()
    );

    client.exit().await;
    expect_step(&mut server, 4).await?;
    tracing::info!("Done. Loopback transport works!");
    Ok(())
}

//! # Lobby Example
//!
//! A complete transform-sync session over WebSocket:
//!
//! 1. Connect and receive a player id
//! 2. Pick a room from the server's list
//! 3. Wait for the countdown and exchange transforms
//! 4. Exit gracefully on Ctrl+C or disconnect
//!
//! ## Running
//!
//! ```sh
//! # Start a transform-sync server on 127.0.0.1:12345, then:
//! cargo run --example lobby
//!
//! # Override the server URL or the room to join:
//! TRANSFORM_SYNC_URL=ws://my-server:12345 TRANSFORM_SYNC_ROOM=Room2 cargo run --example lobby
//! ```

use transform_sync_client::display::{render, DisplaySink, MessageLog};
use transform_sync_client::protocol::{PlayerId, TransformTable};
use transform_sync_client::{SessionClient, SessionConfig, SessionEvent, WebSocketConnector};

/// Prints the view model to the terminal.
#[derive(Default)]
struct ConsoleSink {
    log: MessageLog,
}

impl DisplaySink for ConsoleSink {
    fn show_connected(&mut self) {
        println!("[connected]");
    }

    fn show_disconnected(&mut self, reason: Option<&str>) {
        println!("[disconnected: {}]", reason.unwrap_or("server closed"));
    }

    fn append_log_message(&mut self, text: &str) {
        self.log.push(text);
        println!("── messages ──");
        for line in self.log.iter() {
            println!("  {line}");
        }
    }

    fn show_room_list(&mut self, rooms: &[String]) {
        println!("rooms: {}", rooms.join(", "));
    }

    fn show_countdown(&mut self, seconds_remaining: u64) {
        println!("starting in {seconds_remaining}s");
    }

    fn hide_countdown(&mut self) {}

    fn show_transform_table(&mut self, transforms: &TransformTable) {
        for (player, transform) in transforms {
            println!("  {player}: {:?}", transform.components());
        }
    }

    fn show_player_id(&mut self, player_id: &PlayerId) {
        println!("you are player {player_id}");
    }

    fn reset_all(&mut self) {
        self.log.clear();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ── Logging ─────────────────────────────────────────────────────
    // Set `RUST_LOG=debug` for verbose output.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // ── Configuration ───────────────────────────────────────────────
    let mut config = SessionConfig::default();
    if let Ok(url) = std::env::var("TRANSFORM_SYNC_URL") {
        config.address = url;
    }
    let wanted_room = std::env::var("TRANSFORM_SYNC_ROOM").ok();
    tracing::info!("Connecting to {}", config.address);

    let (mut client, mut event_rx) = SessionClient::connect(WebSocketConnector, config);
    let mut console = ConsoleSink::default();

    // ── Event loop ──────────────────────────────────────────────────
    loop {
        tokio::select! {
            event = event_rx.recv() => {
                let Some(event) = event else {
                    tracing::info!("Event channel closed, exiting");
                    break;
                };
                render(&mut console, &event);

                match &event {
                    SessionEvent::RoomList { rooms } => {
                        let choice = wanted_room
                            .as_ref()
                            .filter(|wanted| rooms.contains(wanted))
                            .or_else(|| rooms.first());
                        match choice {
                            Some(room) => {
                                tracing::info!("Joining {room}");
                                client.select_room(room.clone())?;
                            }
                            None => tracing::warn!("Server offers no rooms"),
                        }
                    }
                    SessionEvent::PhaseChanged { phase } => {
                        tracing::info!("Phase → {phase:?}");
                    }
                    SessionEvent::Disconnected { .. } => break,
                    _ => {}
                }
            }

            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl+C received, exiting…");
                break;
            }
        }
    }

    // ── Cleanup ─────────────────────────────────────────────────────
    client.exit().await;
    tracing::info!("Session closed. Goodbye!");
    Ok(())
}

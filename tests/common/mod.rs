#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing,
    dead_code
)]
//! Shared test utilities for transform-sync client integration tests.
//!
//! Provides a channel-driven [`MockTransport`] whose server side is held by
//! the test, plus helpers for building server frames.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use transform_sync_client::{SessionError, SessionEvent, Transport};

// ── MockTransport ───────────────────────────────────────────────────

/// Client half of an in-process connection.
///
/// Frames pushed through [`MockServer::send`] are returned by `recv()`.
/// Dropping the server (or calling [`MockServer::hang_up`]) ends the stream.
pub struct MockTransport {
    incoming: mpsc::UnboundedReceiver<Result<String, SessionError>>,
    sent: Arc<StdMutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

/// Server half held by the test.
pub struct MockServer {
    tx: Option<mpsc::UnboundedSender<Result<String, SessionError>>>,
    pub sent: Arc<StdMutex<Vec<String>>>,
    pub closed: Arc<AtomicBool>,
}

pub fn mock_pair() -> (MockTransport, MockServer) {
    let (tx, incoming) = mpsc::unbounded_channel();
    let sent = Arc::new(StdMutex::new(Vec::new()));
    let closed = Arc::new(AtomicBool::new(false));
    let transport = MockTransport {
        incoming,
        sent: Arc::clone(&sent),
        closed: Arc::clone(&closed),
    };
    let server = MockServer {
        tx: Some(tx),
        sent,
        closed,
    };
    (transport, server)
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, message: String) -> Result<(), SessionError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SessionError::TransportClosed);
        }
        self.sent.lock().unwrap().push(message);
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String, SessionError>> {
        self.incoming.recv().await
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

impl MockServer {
    /// Deliver one frame to the client.
    pub fn send(&self, frame: Value) {
        self.send_raw(&frame.to_string());
    }

    pub fn send_raw(&self, text: &str) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(Ok(text.to_string()));
        }
    }

    /// Make the client's next `recv` fail.
    pub fn fail(&self, error: &str) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(Err(SessionError::TransportReceive(error.to_string())));
        }
    }

    /// Close the server side cleanly.
    pub fn hang_up(&mut self) {
        self.tx = None;
    }

    /// Every frame the client sent so far, parsed.
    pub fn received(&self) -> Vec<Value> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|s| serde_json::from_str(s).expect("client sent invalid JSON"))
            .collect()
    }

    /// Frames the client sent with the given `step`.
    pub fn received_step(&self, step: u64) -> Vec<Value> {
        self.received()
            .into_iter()
            .filter(|v| v["step"] == step)
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

// ── Event helpers ───────────────────────────────────────────────────

/// Next event, failing the test if none arrives in time.
pub async fn next_event(events: &mut mpsc::Receiver<SessionEvent>) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(10), events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

/// Consume events until one matches `pred`, returning everything seen.
pub async fn events_until(
    events: &mut mpsc::Receiver<SessionEvent>,
    pred: impl Fn(&SessionEvent) -> bool,
) -> Vec<SessionEvent> {
    let mut seen = Vec::new();
    loop {
        let event = next_event(events).await;
        let done = pred(&event);
        seen.push(event);
        if done {
            return seen;
        }
    }
}

/// Every `LogMessage` text in `events`.
pub fn log_lines(events: &[SessionEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::LogMessage { text } => Some(text.clone()),
            _ => None,
        })
        .collect()
}

/// Let the session loop run until it is idle.
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

// ── Server frame helpers ────────────────────────────────────────────

pub fn welcome(id: Value) -> Value {
    json!({"step": 0, "id": id})
}

pub fn room_list(rooms: &[&str]) -> Value {
    json!({"step": 1, "rooms": rooms})
}

pub fn room_joined(room: &str, current: u32, minimum: u32) -> Value {
    json!({"step": 2, "room": room, "current": current, "minimum": minimum})
}

pub fn session_started() -> Value {
    json!({"step": 2.5})
}

pub fn transforms(entries: &[(&str, [f64; 12])]) -> Value {
    let table: serde_json::Map<String, Value> = entries
        .iter()
        .map(|(id, t)| ((*id).to_string(), json!(t)))
        .collect();
    json!({"step": 3, "transforms": table})
}

pub fn not_enough_players() -> Value {
    json!({"step": 3, "status": "The Room Doesn't have enough players."})
}

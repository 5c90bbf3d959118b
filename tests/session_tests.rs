#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! End-to-end session tests.
//!
//! Drives a [`SessionClient`] through the in-process [`MockServer`] from
//! `tests/common` and checks the frames it sends, the events it emits and
//! the state it exposes.

mod common;

use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;
use transform_sync_client::display::{ViewState, MESSAGE_LOG_CAPACITY};
use transform_sync_client::{
    PlayerId, SessionClient, SessionConfig, SessionError, SessionEvent, SessionPhase, Transform,
};

use common::{
    events_until, log_lines, mock_pair, next_event, not_enough_players, room_joined, room_list,
    session_started, settle, transforms, welcome, MockServer,
};

// ════════════════════════════════════════════════════════════════════
// Helpers
// ════════════════════════════════════════════════════════════════════

fn start() -> (SessionClient, mpsc::Receiver<SessionEvent>, MockServer) {
    let (transport, server) = mock_pair();
    let config = SessionConfig::default().with_rng_seed(42);
    let (client, events) = SessionClient::start(transport, config);
    (client, events, server)
}

fn is_phase(phase: SessionPhase) -> impl Fn(&SessionEvent) -> bool {
    move |e| *e == SessionEvent::PhaseChanged { phase }
}

/// Walk a client into the exchanging phase as player `P1`.
async fn start_exchanging() -> (SessionClient, mpsc::Receiver<SessionEvent>, MockServer) {
    let (client, mut events, server) = start();
    server.send(welcome(json!("P1")));
    server.send(room_list(&["Room1"]));
    server.send(room_joined("Room1", 2, 2));
    server.send(session_started());
    let seen = events_until(&mut events, is_phase(SessionPhase::Exchanging)).await;
    assert!(log_lines(&seen).contains(&"Game has started!".to_string()));
    (client, events, server)
}

// ════════════════════════════════════════════════════════════════════
// Handshake and room selection
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn handshake_then_room_selection() {
    let (client, mut events, server) = start();

    assert_eq!(next_event(&mut events).await, SessionEvent::Connected);

    server.send(welcome(json!("P1")));
    let seen = events_until(&mut events, is_phase(SessionPhase::BrowsingRooms)).await;
    assert!(seen.contains(&SessionEvent::PlayerIdAssigned {
        player_id: PlayerId::from("P1")
    }));
    assert_eq!(server.received(), vec![json!({"step": 1})]);

    server.send(room_list(&["lobby", "arena"]));
    let seen = events_until(&mut events, |e| matches!(e, SessionEvent::RoomList { .. })).await;
    assert_eq!(
        seen.last(),
        Some(&SessionEvent::RoomList {
            rooms: vec!["lobby".into(), "arena".into()]
        })
    );

    client.select_room("arena").unwrap();
    settle().await;
    assert_eq!(
        server.received_step(2),
        vec![json!({"step": 2, "game_type": "arena"})]
    );
    assert_eq!(client.phase().await, SessionPhase::BrowsingRooms);

    server.send(room_joined("arena", 1, 2));
    let seen = events_until(&mut events, is_phase(SessionPhase::RoomJoined)).await;
    assert_eq!(
        log_lines(&seen),
        vec![
            "You have joined arena with 1 player(s).".to_string(),
            "Game will start after 2 players have joined.".to_string(),
        ]
    );
    assert_eq!(client.current_room().await.as_deref(), Some("arena"));
}

#[tokio::test]
async fn numeric_identity_from_server() {
    let (client, mut events, server) = start();
    server.send(json!({"step": "0", "id": 17}));
    events_until(&mut events, |e| {
        matches!(e, SessionEvent::PlayerIdAssigned { .. })
    })
    .await;
    assert_eq!(client.player_id().await, Some(PlayerId::Numeric(17)));
}

#[tokio::test]
async fn room_error_is_logged() {
    let (client, mut events, server) = start();
    server.send(welcome(json!(1)));
    server.send(json!({"step": 2, "error": "Room is full"}));

    let seen = events_until(&mut events, |e| {
        matches!(e, SessionEvent::LogMessage { .. })
    })
    .await;
    assert_eq!(log_lines(&seen), vec!["Room is full".to_string()]);
    assert_eq!(client.phase().await, SessionPhase::BrowsingRooms);
}

// ════════════════════════════════════════════════════════════════════
// Transform exchange
// ════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn exchange_pushes_once_after_warmup() {
    let (client, _events, server) = start_exchanging().await;

    tokio::time::sleep(Duration::from_millis(1900)).await;
    assert!(server.received_step(3).is_empty());

    tokio::time::sleep(Duration::from_millis(200)).await;
    let pushes = server.received_step(3);
    assert_eq!(pushes.len(), 1);
    assert_eq!(pushes[0]["player_id"], "P1");

    let values: Vec<f64> = pushes[0]["transform"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_f64().unwrap())
        .collect();
    assert_eq!(values.len(), 12);
    assert!(values.iter().all(|v| v.abs() <= 0.05));
    assert_eq!(client.local_transform().await.components().to_vec(), values);
}

#[tokio::test(start_paused = true)]
async fn pushes_continue_every_period() {
    let (_client, _events, server) = start_exchanging().await;
    tokio::time::sleep(Duration::from_millis(6100)).await;
    assert_eq!(server.received_step(3).len(), 3);
}

#[tokio::test(start_paused = true)]
async fn transform_update_sets_local_vector_and_table() {
    let (client, mut events, server) = start_exchanging().await;

    server.send(transforms(&[("P1", [0.5; 12]), ("P2", [1.5; 12])]));
    let seen = events_until(&mut events, |e| {
        matches!(e, SessionEvent::TransformTable { .. })
    })
    .await;

    let Some(SessionEvent::TransformTable { transforms }) = seen.last() else {
        panic!("expected transform table");
    };
    assert_eq!(transforms.len(), 2);
    assert_eq!(client.local_transform().await, Transform([0.5; 12]));
    assert_eq!(client.transforms().await.len(), 2);
    assert_eq!(client.phase().await, SessionPhase::Exchanging);

    // The next push perturbs the server-provided vector.
    tokio::time::sleep(Duration::from_millis(2100)).await;
    let pushes = server.received_step(3);
    let last = pushes.last().unwrap()["transform"].as_array().unwrap().clone();
    assert!(last
        .iter()
        .all(|v| (v.as_f64().unwrap() - 0.5).abs() <= 0.05));
}

#[tokio::test(start_paused = true)]
async fn not_enough_players_stops_exchange() {
    let (client, mut events, server) = start_exchanging().await;

    server.send(not_enough_players());
    let seen = events_until(&mut events, is_phase(SessionPhase::RoomJoined)).await;
    assert!(log_lines(&seen).contains(&"Room doesn't have enough Players.".to_string()));
    assert_eq!(client.phase().await, SessionPhase::RoomJoined);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(server.received_step(3).is_empty());
}

#[tokio::test(start_paused = true)]
async fn repeated_session_start_keeps_single_push_stream() {
    let (_client, _events, server) = start_exchanging().await;
    tokio::time::sleep(Duration::from_secs(1)).await;
    server.send(session_started());
    settle().await;

    tokio::time::sleep(Duration::from_millis(4500)).await;
    // Restarted at 1s: pushes at 3s and 5s only.
    assert_eq!(server.received_step(3).len(), 2);
}

// ════════════════════════════════════════════════════════════════════
// Countdown
// ════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn countdown_ticks_down_then_hides() {
    let (client, mut events, server) = start();
    server.send(welcome(json!("P1")));
    server.send(room_joined("Room1", 2, 3));
    server.send(json!({"message": "Minimum Players have joined the room.", "time": 3}));
    events_until(&mut events, is_phase(SessionPhase::CountingDown)).await;

    let seen = events_until(&mut events, |e| *e == SessionEvent::CountdownHidden).await;
    let ticks: Vec<u64> = seen
        .iter()
        .filter_map(|e| match e {
            SessionEvent::CountdownTick { seconds_remaining } => Some(*seconds_remaining),
            _ => None,
        })
        .collect();
    assert_eq!(ticks, vec![3, 2, 1]);

    settle().await;
    assert_eq!(client.phase().await, SessionPhase::RoomJoined);
}

// ════════════════════════════════════════════════════════════════════
// Unknown and malformed traffic
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn unknown_step_is_ignored() {
    let (client, mut events, server) = start();
    server.send(welcome(json!("P1")));
    events_until(&mut events, is_phase(SessionPhase::BrowsingRooms)).await;

    server.send_raw(r#"{"step":"banana"}"#);
    let event = next_event(&mut events).await;
    assert_eq!(
        event,
        SessionEvent::UnknownMessage {
            raw: r#"{"step":"banana"}"#.into()
        }
    );
    assert_eq!(server.received().len(), 1);
    assert_eq!(client.phase().await, SessionPhase::BrowsingRooms);
}

#[tokio::test]
async fn malformed_frames_do_not_end_the_session() {
    let (client, mut events, server) = start();
    server.send_raw("not json");
    server.send_raw(r#"{"step":0,"id":true}"#);
    server.send(welcome(json!("P1")));

    let seen = events_until(&mut events, is_phase(SessionPhase::BrowsingRooms)).await;
    let malformed = seen
        .iter()
        .filter(|e| matches!(e, SessionEvent::MalformedMessage { .. }))
        .count();
    assert_eq!(malformed, 2);
    assert!(client.is_connected());
}

// ════════════════════════════════════════════════════════════════════
// Teardown
// ════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn server_close_resets_everything() {
    let (client, mut events, mut server) = start_exchanging().await;
    server.send(transforms(&[("P1", [0.5; 12])]));
    server.hang_up();

    let seen = events_until(&mut events, |e| {
        matches!(e, SessionEvent::Disconnected { .. })
    })
    .await;
    assert!(seen.contains(&SessionEvent::Reset));
    assert!(!client.is_connected());

    let snapshot = client.snapshot().await;
    assert_eq!(snapshot.phase, SessionPhase::Disconnected);
    assert!(snapshot.player_id.is_none());
    assert!(snapshot.rooms.is_empty());
    assert!(snapshot.players.is_empty());
    assert_eq!(snapshot.local_transform, Transform::ZERO);

    let before = server.received().len();
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(server.received().len(), before, "timers must stop");
    assert!(events.recv().await.is_none());
}

#[tokio::test]
async fn transport_error_disconnects_with_reason() {
    let (_client, mut events, server) = start();
    server.fail("connection reset by peer");

    let seen = events_until(&mut events, |e| {
        matches!(e, SessionEvent::Disconnected { .. })
    })
    .await;
    let Some(SessionEvent::Disconnected {
        reason: Some(reason),
    }) = seen.last()
    else {
        panic!("expected a reason, got {seen:?}");
    };
    assert!(reason.contains("connection reset by peer"));
}

#[tokio::test]
async fn exit_notifies_server_and_closes() {
    let (mut client, mut events, server) = start();
    server.send(welcome(json!("P1")));
    events_until(&mut events, is_phase(SessionPhase::BrowsingRooms)).await;

    client.exit().await;

    assert_eq!(server.received().last(), Some(&json!({"step": 4, "action": "exit"})));
    assert!(server.is_closed());
    assert!(!client.is_connected());
    assert!(matches!(
        client.select_room("Room1"),
        Err(SessionError::NotConnected)
    ));

    let seen = events_until(&mut events, |e| {
        matches!(e, SessionEvent::Disconnected { .. })
    })
    .await;
    assert!(seen.contains(&SessionEvent::Reset));
}

// ════════════════════════════════════════════════════════════════════
// View state
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn view_state_tracks_session() {
    let (_client, mut events, mut server) = start();
    let mut view = ViewState::default();

    server.send(welcome(json!("P1")));
    server.send(room_list(&["Room1", "Room2"]));
    for i in 0..6 {
        server.send(json!({"message": format!("notice {i}")}));
    }
    let seen = events_until(&mut events, |e| {
        *e == SessionEvent::LogMessage {
            text: "notice 5".into(),
        }
    })
    .await;
    for event in &seen {
        view.apply(event);
    }

    assert!(view.connected);
    assert_eq!(view.player_id, Some(PlayerId::from("P1")));
    assert_eq!(view.rooms, vec!["Room1", "Room2"]);
    assert_eq!(view.log.len(), MESSAGE_LOG_CAPACITY);
    assert_eq!(view.log.iter().next(), Some("notice 2"));

    server.hang_up();
    let seen = events_until(&mut events, |e| {
        matches!(e, SessionEvent::Disconnected { .. })
    })
    .await;
    for event in &seen {
        view.apply(event);
    }
    assert_eq!(view, ViewState::default());
}

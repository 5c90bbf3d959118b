#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! Protocol codec tests for the transform-sync client.
//!
//! Decodes JSON fixtures matching real server output and checks the exact
//! wire shape of every outgoing command.

use serde_json::{json, Value};
use transform_sync_client::protocol::{
    ClientCommand, Handshake, JoinOutcome, PlayerId, ServerMessage, ServerStep, Transform,
    TRANSFORM_LEN,
};
use transform_sync_client::SessionError;

fn decode(text: &str) -> ServerMessage {
    ServerMessage::decode(text).expect("decode")
}

fn wire(command: &ClientCommand) -> Value {
    serde_json::from_str(&command.encode().expect("encode")).expect("valid JSON")
}

// ════════════════════════════════════════════════════════════════════
// Server fixtures
// ════════════════════════════════════════════════════════════════════

#[test]
fn fixture_welcome() {
    let msg = decode(r#"{"step": 0, "id": 3}"#);
    assert_eq!(
        msg.step,
        ServerStep::Welcome(Handshake::Accepted {
            id: PlayerId::Numeric(3)
        })
    );
    assert!(msg.message.is_none());
    assert!(msg.time.is_none());
}

#[test]
fn fixture_server_full() {
    let msg = decode(r#"{"step": 0, "error": "Server is full"}"#);
    assert_eq!(
        msg.step,
        ServerStep::Welcome(Handshake::Refused {
            error: "Server is full".into()
        })
    );
}

#[test]
fn fixture_room_list() {
    let msg = decode(r#"{"step": 1, "rooms": ["Room1", "Room2", "Room3"]}"#);
    assert_eq!(
        msg.step,
        ServerStep::RoomList {
            rooms: vec!["Room1".into(), "Room2".into(), "Room3".into()]
        }
    );
}

#[test]
fn fixture_empty_room_list() {
    let msg = decode(r#"{"step": 1, "rooms": []}"#);
    assert_eq!(msg.step, ServerStep::RoomList { rooms: vec![] });
}

#[test]
fn fixture_room_joined_with_capacity() {
    let msg = decode(r#"{"step": 2, "room": "Room1", "capacity": 4, "current": 1, "minimum": 2}"#);
    assert_eq!(
        msg.step,
        ServerStep::RoomJoinResult(JoinOutcome::Joined {
            room: "Room1".into(),
            current: 1,
            minimum: 2,
            capacity: Some(4),
        })
    );
}

#[test]
fn fixture_room_errors() {
    for error in ["Room full", "Invalid room"] {
        let msg = decode(&json!({"step": 2, "error": error}).to_string());
        assert_eq!(
            msg.step,
            ServerStep::RoomJoinResult(JoinOutcome::Rejected {
                error: error.into()
            })
        );
    }
}

#[test]
fn fixture_session_started() {
    let msg = decode(r#"{"step": 2.5, "status": "started"}"#);
    assert_eq!(msg.step, ServerStep::SessionStarted);
}

#[test]
fn fixture_transform_table() {
    let text = json!({
        "step": 3,
        "transforms": {
            "1": [1, 0, 0, 0, 0, 1, 0, 0, 0, 0, 1, 0],
            "2": [0.5, 0.5, 0.5, 0.5, 0.5, 0.5, 0.5, 0.5, 0.5, 0.5, 0.5, 0.5]
        }
    })
    .to_string();
    let ServerStep::TransformUpdate {
        transforms: Some(table),
        status,
    } = decode(&text).step
    else {
        panic!("expected a transform table");
    };
    assert!(status.is_none());
    assert_eq!(table.len(), 2);
    assert_eq!(table["1"].components()[5], 1.0);
    assert_eq!(table["2"], Transform([0.5; TRANSFORM_LEN]));
}

#[test]
fn fixture_not_enough_players() {
    for status in ["The Room Doesn't have enough players.", "No transform array provided"] {
        let msg = decode(&json!({"step": 3, "status": status}).to_string());
        assert_eq!(
            msg.step,
            ServerStep::TransformUpdate {
                transforms: None,
                status: Some(status.into()),
            }
        );
    }
}

#[test]
fn fixture_null_transforms_is_insufficient() {
    let msg = decode(r#"{"step": 3, "transforms": null}"#);
    assert!(matches!(
        msg.step,
        ServerStep::TransformUpdate {
            transforms: None,
            ..
        }
    ));
}

#[test]
fn fixture_notices_without_step() {
    for text in [
        "A new player has joined the room!",
        "A player has left the room!",
        "Invalid Query",
    ] {
        let msg = decode(&json!({ "message": text }).to_string());
        assert_eq!(msg.message.as_deref(), Some(text));
        assert_eq!(msg.step, ServerStep::Unknown { step: None });
    }
}

#[test]
fn fixture_countdown_notice() {
    let msg = decode(
        r#"{"message": "Minimum Players have joined the room. Game will start in 10 secs.", "time": 10}"#,
    );
    assert_eq!(msg.time, Some(10.0));
    assert!(msg.message.unwrap().starts_with("Minimum Players"));
}

// ════════════════════════════════════════════════════════════════════
// Discriminant handling
// ════════════════════════════════════════════════════════════════════

#[test]
fn string_discriminants_match_numeric_ones() {
    assert_eq!(
        decode(r#"{"step": "1", "rooms": ["a"]}"#).step,
        decode(r#"{"step": 1, "rooms": ["a"]}"#).step
    );
    assert_eq!(decode(r#"{"step": "2.5"}"#).step, ServerStep::SessionStarted);
}

#[test]
fn unrecognized_discriminants_are_unknown() {
    for step in [json!("banana"), json!(4), json!(2.4), json!(null), json!([0])] {
        let text = json!({ "step": step }).to_string();
        assert!(
            matches!(decode(&text).step, ServerStep::Unknown { .. }),
            "step {step} should be unknown"
        );
    }
}

#[test]
fn structural_violations_are_protocol_errors() {
    for text in [
        r#"{"step": 1}"#,
        r#"{"step": 1, "rooms": "Room1"}"#,
        r#"{"step": 2, "room": "Room1"}"#,
        r#"{"step": 3, "transforms": {"1": [1, 2, 3]}}"#,
        r#"{"step": 0}"#,
        r#"[1, 2, 3]"#,
    ] {
        assert!(
            matches!(ServerMessage::decode(text), Err(SessionError::Protocol(_))),
            "{text} should be rejected"
        );
    }
}

#[test]
fn invalid_json_is_a_serialization_error() {
    assert!(matches!(
        ServerMessage::decode("{step: 1"),
        Err(SessionError::Serialization(_))
    ));
}

// ════════════════════════════════════════════════════════════════════
// Outgoing commands
// ════════════════════════════════════════════════════════════════════

#[test]
fn outgoing_wire_shapes() {
    assert_eq!(wire(&ClientCommand::RequestRoomList), json!({"step": 1}));
    assert_eq!(
        wire(&ClientCommand::JoinRoom {
            room: "Room2".into()
        }),
        json!({"step": 2, "game_type": "Room2"})
    );
    assert_eq!(
        wire(&ClientCommand::Exit),
        json!({"step": 4, "action": "exit"})
    );
}

#[test]
fn push_carries_id_in_server_form() {
    let numeric = wire(&ClientCommand::PushTransform {
        player_id: PlayerId::Numeric(2),
        transform: Transform([0.25; TRANSFORM_LEN]),
    });
    assert_eq!(numeric["player_id"], json!(2));
    assert_eq!(numeric["transform"], json!(vec![0.25; TRANSFORM_LEN]));

    let named = wire(&ClientCommand::PushTransform {
        player_id: PlayerId::from("P1"),
        transform: Transform::ZERO,
    });
    assert_eq!(named["player_id"], json!("P1"));
}

#[test]
fn non_finite_transform_is_not_sent() {
    let mut values = [0.0; TRANSFORM_LEN];
    values[7] = f64::INFINITY;
    let command = ClientCommand::PushTransform {
        player_id: PlayerId::Numeric(1),
        transform: Transform(values),
    };
    assert!(matches!(command.encode(), Err(SessionError::Protocol(_))));
}

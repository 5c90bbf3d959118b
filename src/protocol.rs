//! Wire format for the transform-sync protocol.
//!
//! Every message is a single JSON object whose `step` field says what kind of
//! message it is. The client sends four commands ([`ClientCommand`]); the
//! server answers with five step kinds ([`ServerStep`]). Any server message
//! may additionally carry an advisory `time` (seconds) and a display
//! `message`, independent of its step.
//!
//! The session-started marker is step `2.5`. It is matched exactly (either
//! the number `2.5` or the string `"2.5"`), never as a numeric range, so it
//! stays distinct from the room-join result on step `2`.

use std::collections::BTreeMap;
use std::fmt;

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::{Result, SessionError};

/// Number of components in a [`Transform`].
pub const TRANSFORM_LEN: usize = 12;

// ── Identity ────────────────────────────────────────────────────────

/// Identifier assigned to this client by the server on the step 0 handshake.
///
/// The reference server hands out integers, but any JSON string is accepted.
/// The original wire form is kept so it can be echoed back unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PlayerId {
    Numeric(u64),
    Named(String),
}

impl PlayerId {
    /// Key under which this player appears in a step 3 `transforms` object.
    ///
    /// JSON object keys are always strings, so numeric ids are rendered in
    /// decimal.
    pub fn as_key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Numeric(n) => write!(f, "{n}"),
            Self::Named(s) => f.write_str(s),
        }
    }
}

impl From<&str> for PlayerId {
    fn from(value: &str) -> Self {
        Self::Named(value.to_string())
    }
}

impl From<u64> for PlayerId {
    fn from(value: u64) -> Self {
        Self::Numeric(value)
    }
}

// ── Transform ───────────────────────────────────────────────────────

/// A player's spatial state: exactly [`TRANSFORM_LEN`] floats.
///
/// Deserialization rejects arrays of any other length.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Transform(pub [f64; TRANSFORM_LEN]);

impl Transform {
    /// The all-zero transform every session starts from.
    pub const ZERO: Self = Self([0.0; TRANSFORM_LEN]);

    pub fn components(&self) -> &[f64; TRANSFORM_LEN] {
        &self.0
    }

    /// Returns a copy with `delta(i)` added to every component.
    pub fn offset_by(&self, mut delta: impl FnMut(usize) -> f64) -> Self {
        let mut next = self.0;
        for (i, value) in next.iter_mut().enumerate() {
            *value += delta(i);
        }
        Self(next)
    }

    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|v| v.is_finite())
    }

    /// Largest absolute per-component difference to `other`.
    pub fn max_abs_diff(&self, other: &Self) -> f64 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max)
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::ZERO
    }
}

/// Transforms of every player in the room, keyed by [`PlayerId::as_key`].
pub type TransformTable = BTreeMap<String, Transform>;

// ── Client → server ─────────────────────────────────────────────────

/// Commands sent from client to server.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientCommand {
    /// `{"step":1}`
    RequestRoomList,
    /// `{"step":2,"game_type":<room>}`
    JoinRoom { room: String },
    /// `{"step":3,"player_id":<id>,"transform":[12 floats]}`
    PushTransform {
        player_id: PlayerId,
        transform: Transform,
    },
    /// `{"step":4,"action":"exit"}`
    Exit,
}

impl ClientCommand {
    /// Step number carried on the wire.
    pub fn step(&self) -> u8 {
        match self {
            Self::RequestRoomList => 1,
            Self::JoinRoom { .. } => 2,
            Self::PushTransform { .. } => 3,
            Self::Exit => 4,
        }
    }

    /// Serialize to the JSON text sent over the transport.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Protocol`] if a transform component is not a
    /// finite number (JSON has no encoding for NaN or infinity).
    pub fn encode(&self) -> Result<String> {
        if let Self::PushTransform { transform, .. } = self {
            if !transform.is_finite() {
                return Err(SessionError::Protocol(
                    "transform contains a non-finite component".into(),
                ));
            }
        }
        Ok(serde_json::to_string(self)?)
    }
}

impl Serialize for ClientCommand {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("step", &self.step())?;
        match self {
            Self::RequestRoomList => {}
            Self::JoinRoom { room } => map.serialize_entry("game_type", room)?,
            Self::PushTransform {
                player_id,
                transform,
            } => {
                map.serialize_entry("player_id", player_id)?;
                map.serialize_entry("transform", transform)?;
            }
            Self::Exit => map.serialize_entry("action", "exit")?,
        }
        map.end()
    }
}

// ── Server → client ─────────────────────────────────────────────────

/// Outcome of the step 0 handshake.
#[derive(Debug, Clone, PartialEq)]
pub enum Handshake {
    Accepted { id: PlayerId },
    /// The server refused the connection (e.g. `"Server is full"`).
    Refused { error: String },
}

/// Outcome of a step 2 room join.
#[derive(Debug, Clone, PartialEq)]
pub enum JoinOutcome {
    Joined {
        room: String,
        current: u32,
        minimum: u32,
        capacity: Option<u32>,
    },
    Rejected {
        error: String,
    },
}

/// Step-specific body of a server message.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerStep {
    /// Step 0.
    Welcome(Handshake),
    /// Step 1.
    RoomList { rooms: Vec<String> },
    /// Step 2.
    RoomJoinResult(JoinOutcome),
    /// Step 2.5.
    SessionStarted,
    /// Step 3. `transforms` is `None` when the room no longer has enough
    /// players; the server then explains why in `status`.
    TransformUpdate {
        transforms: Option<TransformTable>,
        status: Option<String>,
    },
    /// Missing or unrecognized `step`. Holds the raw discriminant, if any.
    Unknown { step: Option<Value> },
}

/// A decoded server message.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerMessage {
    /// Remaining seconds of a server-side countdown.
    pub time: Option<f64>,
    /// Human-readable notice for the message log.
    pub message: Option<String>,
    pub step: ServerStep,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum StepKind {
    Welcome,
    RoomList,
    RoomJoin,
    SessionStarted,
    TransformUpdate,
}

fn classify_step(step: &Value) -> Option<StepKind> {
    match step {
        Value::Number(n) => {
            let n = n.as_f64()?;
            if n == 0.0 {
                Some(StepKind::Welcome)
            } else if n == 1.0 {
                Some(StepKind::RoomList)
            } else if n == 2.0 {
                Some(StepKind::RoomJoin)
            } else if n == 2.5 {
                Some(StepKind::SessionStarted)
            } else if n == 3.0 {
                Some(StepKind::TransformUpdate)
            } else {
                None
            }
        }
        Value::String(s) => match s.as_str() {
            "0" => Some(StepKind::Welcome),
            "1" => Some(StepKind::RoomList),
            "2" => Some(StepKind::RoomJoin),
            "2.5" => Some(StepKind::SessionStarted),
            "3" => Some(StepKind::TransformUpdate),
            _ => None,
        },
        _ => None,
    }
}

#[derive(Deserialize)]
struct WelcomeFields {
    id: Option<PlayerId>,
    error: Option<String>,
}

#[derive(Deserialize)]
struct RoomListFields {
    rooms: Vec<String>,
}

#[derive(Deserialize)]
struct RoomJoinFields {
    error: Option<String>,
    room: Option<String>,
    current: Option<u32>,
    minimum: Option<u32>,
    capacity: Option<u32>,
}

#[derive(Deserialize)]
struct TransformFields {
    transforms: Option<TransformTable>,
    status: Option<String>,
}

fn fields<T: serde::de::DeserializeOwned>(object: &Map<String, Value>, step: &str) -> Result<T> {
    serde_json::from_value(Value::Object(object.clone()))
        .map_err(|e| SessionError::Protocol(format!("step {step}: {e}")))
}

impl ServerMessage {
    /// Parse one inbound JSON text message.
    ///
    /// An unrecognized or missing `step` is not an error; it decodes to
    /// [`ServerStep::Unknown`] so the caller can log it.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Serialization`] if `text` is not JSON and
    /// [`SessionError::Protocol`] if it is not an object or a known step is
    /// missing its required fields.
    pub fn decode(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        let Value::Object(object) = value else {
            return Err(SessionError::Protocol(
                "server message is not a JSON object".into(),
            ));
        };

        let time = object.get("time").and_then(Value::as_f64);
        let message = object
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_owned);

        let raw_step = object.get("step");
        let step = match raw_step.and_then(classify_step) {
            Some(StepKind::Welcome) => {
                let f: WelcomeFields = fields(&object, "0")?;
                match (f.id, f.error) {
                    (_, Some(error)) => ServerStep::Welcome(Handshake::Refused { error }),
                    (Some(id), None) => ServerStep::Welcome(Handshake::Accepted { id }),
                    (None, None) => {
                        return Err(SessionError::Protocol(
                            "step 0: neither `id` nor `error` present".into(),
                        ))
                    }
                }
            }
            Some(StepKind::RoomList) => {
                let f: RoomListFields = fields(&object, "1")?;
                ServerStep::RoomList { rooms: f.rooms }
            }
            Some(StepKind::RoomJoin) => {
                let f: RoomJoinFields = fields(&object, "2")?;
                match f {
                    RoomJoinFields {
                        error: Some(error), ..
                    } => ServerStep::RoomJoinResult(JoinOutcome::Rejected { error }),
                    RoomJoinFields {
                        room: Some(room),
                        current: Some(current),
                        minimum: Some(minimum),
                        capacity,
                        ..
                    } => ServerStep::RoomJoinResult(JoinOutcome::Joined {
                        room,
                        current,
                        minimum,
                        capacity,
                    }),
                    _ => {
                        return Err(SessionError::Protocol(
                            "step 2: expected `error` or `room`/`current`/`minimum`".into(),
                        ))
                    }
                }
            }
            Some(StepKind::SessionStarted) => ServerStep::SessionStarted,
            Some(StepKind::TransformUpdate) => {
                let f: TransformFields = fields(&object, "3")?;
                ServerStep::TransformUpdate {
                    transforms: f.transforms,
                    status: f.status,
                }
            }
            None => ServerStep::Unknown {
                step: raw_step.cloned(),
            },
        };

        Ok(Self {
            time,
            message,
            step,
        })
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use serde_json::json;

    fn encode(cmd: &ClientCommand) -> Value {
        serde_json::from_str(&cmd.encode().unwrap()).unwrap()
    }

    #[test]
    fn commands_encode_to_exact_wire_shapes() {
        assert_eq!(encode(&ClientCommand::RequestRoomList), json!({"step": 1}));
        assert_eq!(
            encode(&ClientCommand::JoinRoom {
                room: "arena".into()
            }),
            json!({"step": 2, "game_type": "arena"})
        );
        assert_eq!(
            encode(&ClientCommand::Exit),
            json!({"step": 4, "action": "exit"})
        );
    }

    #[test]
    fn push_transform_keeps_numeric_player_id() {
        let cmd = ClientCommand::PushTransform {
            player_id: PlayerId::Numeric(7),
            transform: Transform::ZERO,
        };
        let value = encode(&cmd);
        assert_eq!(value["step"], json!(3));
        assert_eq!(value["player_id"], json!(7));
        assert_eq!(value["transform"].as_array().unwrap().len(), TRANSFORM_LEN);
    }

    #[test]
    fn non_finite_transform_fails_to_encode() {
        let mut components = [0.0; TRANSFORM_LEN];
        components[3] = f64::NAN;
        let cmd = ClientCommand::PushTransform {
            player_id: "P1".into(),
            transform: Transform(components),
        };
        assert!(matches!(cmd.encode(), Err(SessionError::Protocol(_))));
    }

    #[test]
    fn session_started_matches_number_and_string() {
        for text in [r#"{"step":2.5}"#, r#"{"step":"2.5"}"#] {
            let msg = ServerMessage::decode(text).unwrap();
            assert_eq!(msg.step, ServerStep::SessionStarted, "{text}");
        }
    }

    #[test]
    fn near_miss_discriminants_are_unknown() {
        for text in [
            r#"{"step":2.4}"#,
            r#"{"step":"2.50"}"#,
            r#"{"step":5}"#,
            r#"{"step":"banana"}"#,
            r#"{"step":null}"#,
        ] {
            let msg = ServerMessage::decode(text).unwrap();
            assert!(
                matches!(msg.step, ServerStep::Unknown { step: Some(_) }),
                "{text} decoded as {:?}",
                msg.step
            );
        }
    }

    #[test]
    fn missing_step_is_unknown_but_keeps_time_and_message() {
        let msg = ServerMessage::decode(r#"{"message":"Invalid Query","time":3.2}"#).unwrap();
        assert_eq!(msg.step, ServerStep::Unknown { step: None });
        assert_eq!(msg.message.as_deref(), Some("Invalid Query"));
        assert_eq!(msg.time, Some(3.2));
    }

    #[test]
    fn welcome_accepts_integer_and_string_ids() {
        let msg = ServerMessage::decode(r#"{"step":0,"id":0}"#).unwrap();
        assert_eq!(
            msg.step,
            ServerStep::Welcome(Handshake::Accepted {
                id: PlayerId::Numeric(0)
            })
        );

        let msg = ServerMessage::decode(r#"{"step":0,"id":"P1"}"#).unwrap();
        assert_eq!(
            msg.step,
            ServerStep::Welcome(Handshake::Accepted { id: "P1".into() })
        );
    }

    #[test]
    fn welcome_with_error_is_refused() {
        let msg = ServerMessage::decode(r#"{"step":0,"error":"Server is full"}"#).unwrap();
        assert_eq!(
            msg.step,
            ServerStep::Welcome(Handshake::Refused {
                error: "Server is full".into()
            })
        );
    }

    #[test]
    fn room_join_success_keeps_capacity() {
        let msg = ServerMessage::decode(
            r#"{"step":2,"room":"Room2","capacity":4,"current":1,"minimum":2}"#,
        )
        .unwrap();
        assert_eq!(
            msg.step,
            ServerStep::RoomJoinResult(JoinOutcome::Joined {
                room: "Room2".into(),
                current: 1,
                minimum: 2,
                capacity: Some(4),
            })
        );
    }

    #[test]
    fn room_join_error_wins_over_other_fields() {
        let msg = ServerMessage::decode(r#"{"step":2,"error":"Room full"}"#).unwrap();
        assert_eq!(
            msg.step,
            ServerStep::RoomJoinResult(JoinOutcome::Rejected {
                error: "Room full".into()
            })
        );
    }

    #[test]
    fn transform_update_with_and_without_transforms() {
        let zeros = vec![0.0; TRANSFORM_LEN];
        let text = json!({"step": 3, "transforms": {"0": zeros, "1": zeros}}).to_string();
        let msg = ServerMessage::decode(&text).unwrap();
        let ServerStep::TransformUpdate {
            transforms: Some(table),
            ..
        } = msg.step
        else {
            panic!("expected transforms, got {:?}", msg.step);
        };
        assert_eq!(table.len(), 2);
        assert!(table.contains_key("1"));

        let msg =
            ServerMessage::decode(r#"{"step":3,"status":"The Room Doesn't have enough players."}"#)
                .unwrap();
        assert_eq!(
            msg.step,
            ServerStep::TransformUpdate {
                transforms: None,
                status: Some("The Room Doesn't have enough players.".into())
            }
        );
    }

    #[test]
    fn structural_violations_are_protocol_errors() {
        for text in [
            r#"{"step":1,"rooms":"Room1"}"#,
            r#"{"step":1}"#,
            r#"{"step":0}"#,
            r#"{"step":2,"room":"Room1"}"#,
            r#"{"step":3,"transforms":{"0":[1.0,2.0]}}"#,
            r#"[1,2,3]"#,
        ] {
            let err = ServerMessage::decode(text).unwrap_err();
            assert!(matches!(err, SessionError::Protocol(_)), "{text}: {err}");
        }
    }

    #[test]
    fn invalid_json_is_serialization_error() {
        let err = ServerMessage::decode("{not json").unwrap_err();
        assert!(matches!(err, SessionError::Serialization(_)));
    }

    #[test]
    fn transform_offset_and_diff() {
        let t = Transform::ZERO.offset_by(|i| i as f64 * 0.01);
        assert!((t.max_abs_diff(&Transform::ZERO) - 0.11).abs() < 1e-12);
        assert_eq!(t.components()[0], 0.0);
    }
}

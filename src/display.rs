//! Presentation boundary.
//!
//! The session never touches a UI directly. It emits [`SessionEvent`]s, and
//! [`render`] applies them to any [`DisplaySink`]. [`ViewState`] is an
//! in-memory sink that keeps the last rendered state, which is what the demos
//! print and what tests assert against.

use std::collections::VecDeque;

use crate::event::SessionEvent;
use crate::protocol::{PlayerId, TransformTable};

/// Number of lines kept by the message log.
pub const MESSAGE_LOG_CAPACITY: usize = 4;

/// A surface the session's view model can be drawn on.
pub trait DisplaySink {
    fn show_connected(&mut self);
    fn show_disconnected(&mut self, reason: Option<&str>);
    fn append_log_message(&mut self, text: &str);
    fn show_room_list(&mut self, rooms: &[String]);
    fn show_countdown(&mut self, seconds_remaining: u64);
    fn hide_countdown(&mut self);
    fn show_transform_table(&mut self, transforms: &TransformTable);
    fn show_player_id(&mut self, player_id: &PlayerId);
    /// Clear the room list, countdown, transform table, player id and log.
    fn reset_all(&mut self);
}

/// Apply one session event to `sink`.
///
/// Events with no visual counterpart (phase changes, unknown or malformed
/// messages) are ignored.
pub fn render<S: DisplaySink + ?Sized>(sink: &mut S, event: &SessionEvent) {
    match event {
        SessionEvent::Connected => sink.show_connected(),
        SessionEvent::PlayerIdAssigned { player_id } => sink.show_player_id(player_id),
        SessionEvent::LogMessage { text } => sink.append_log_message(text),
        SessionEvent::RoomList { rooms } => sink.show_room_list(rooms),
        SessionEvent::CountdownTick { seconds_remaining } => {
            sink.show_countdown(*seconds_remaining)
        }
        SessionEvent::CountdownHidden => sink.hide_countdown(),
        SessionEvent::TransformTable { transforms } => sink.show_transform_table(transforms),
        SessionEvent::Reset => sink.reset_all(),
        SessionEvent::Disconnected { reason } => sink.show_disconnected(reason.as_deref()),
        SessionEvent::PhaseChanged { .. }
        | SessionEvent::UnknownMessage { .. }
        | SessionEvent::MalformedMessage { .. } => {}
    }
}

/// Bounded FIFO of log lines. Appending beyond capacity evicts the oldest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageLog {
    lines: VecDeque<String>,
    capacity: usize,
}

impl MessageLog {
    /// A capacity of zero is raised to one.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            lines: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, line: impl Into<String>) {
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line.into());
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Lines from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }
}

impl Default for MessageLog {
    fn default() -> Self {
        Self::with_capacity(MESSAGE_LOG_CAPACITY)
    }
}

/// In-memory [`DisplaySink`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViewState {
    pub connected: bool,
    pub player_id: Option<PlayerId>,
    pub rooms: Vec<String>,
    /// `Some` while the countdown is visible.
    pub countdown: Option<u64>,
    pub transforms: TransformTable,
    pub log: MessageLog,
}

impl ViewState {
    pub fn apply(&mut self, event: &SessionEvent) {
        render(self, event);
    }
}

impl DisplaySink for ViewState {
    fn show_connected(&mut self) {
        self.connected = true;
    }

    fn show_disconnected(&mut self, _reason: Option<&str>) {
        self.connected = false;
    }

    fn append_log_message(&mut self, text: &str) {
        self.log.push(text);
    }

    fn show_room_list(&mut self, rooms: &[String]) {
        self.rooms = rooms.to_vec();
    }

    fn show_countdown(&mut self, seconds_remaining: u64) {
        self.countdown = Some(seconds_remaining);
    }

    fn hide_countdown(&mut self) {
        self.countdown = None;
    }

    fn show_transform_table(&mut self, transforms: &TransformTable) {
        self.transforms = transforms.clone();
    }

    fn show_player_id(&mut self, player_id: &PlayerId) {
        self.player_id = Some(player_id.clone());
    }

    fn reset_all(&mut self) {
        self.player_id = None;
        self.rooms.clear();
        self.countdown = None;
        self.transforms.clear();
        self.log.clear();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::protocol::Transform;

    #[test]
    fn log_keeps_the_newest_lines() {
        let mut log = MessageLog::default();
        for line in ["a", "b", "c", "d", "e"] {
            log.push(line);
        }
        assert_eq!(log.iter().collect::<Vec<_>>(), vec!["b", "c", "d", "e"]);
    }

    #[test]
    fn zero_capacity_log_still_holds_one_line() {
        let mut log = MessageLog::with_capacity(0);
        log.push("first");
        log.push("second");
        assert_eq!(log.iter().collect::<Vec<_>>(), vec!["second"]);
    }

    #[test]
    fn events_drive_the_view() {
        let mut view = ViewState::default();
        view.apply(&SessionEvent::Connected);
        view.apply(&SessionEvent::PlayerIdAssigned {
            player_id: PlayerId::Numeric(4),
        });
        view.apply(&SessionEvent::RoomList {
            rooms: vec!["Room1".into()],
        });
        view.apply(&SessionEvent::CountdownTick {
            seconds_remaining: 3,
        });
        view.apply(&SessionEvent::LogMessage {
            text: "hello".into(),
        });

        assert!(view.connected);
        assert_eq!(view.player_id, Some(PlayerId::Numeric(4)));
        assert_eq!(view.rooms, vec!["Room1"]);
        assert_eq!(view.countdown, Some(3));
        assert_eq!(view.log.len(), 1);

        view.apply(&SessionEvent::CountdownHidden);
        assert_eq!(view.countdown, None);
    }

    #[test]
    fn reset_then_disconnect_clears_everything() {
        let mut view = ViewState::default();
        view.apply(&SessionEvent::Connected);
        view.apply(&SessionEvent::TransformTable {
            transforms: TransformTable::from([("1".to_string(), Transform::ZERO)]),
        });
        view.apply(&SessionEvent::LogMessage { text: "x".into() });

        view.apply(&SessionEvent::Reset);
        view.apply(&SessionEvent::Disconnected { reason: None });
        assert_eq!(view, ViewState::default());
    }
}

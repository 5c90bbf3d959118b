//! The session state machine.
//!
//! [`Session`] is the single owner of everything a connection accumulates:
//! phase, identity, room list, local and remote transforms, countdown counter
//! and the [`TimerScheduler`]. It is driven by one dispatch function,
//! [`Session::handle`], which consumes a [`SessionInput`] and returns the
//! [`SessionAction`]s the caller must perform (sends, channel close, view
//! events). Handlers run to completion and never await, so the session needs
//! no locking.
//!
//! Phases:
//!
//! ```text
//! Disconnected ─opened─▶ Identified ─welcome─▶ BrowsingRooms ─joined─▶ RoomJoined
//!                                                                 │  ▲
//!                                              countdown start/end│  │
//!                                                                 ▼  │
//!                                                             CountingDown
//! RoomJoined | CountingDown ─session started─▶ Exchanging ─not enough players─▶ RoomJoined
//! any ─closed | failed | exit─▶ Disconnected
//! ```

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::channel::ChannelEvent;
use crate::event::SessionEvent;
use crate::protocol::{
    ClientCommand, Handshake, JoinOutcome, PlayerId, ServerMessage, ServerStep, Transform,
    TransformTable,
};
use crate::timer::{TimerKind, TimerScheduler, TimerSettings, TimerTick};

/// Log line shown when the session starts.
pub const SESSION_STARTED_NOTICE: &str = "Game has started!";

/// Log line shown when a transform update reports too few players.
pub const INSUFFICIENT_PLAYERS_NOTICE: &str = "Room doesn't have enough Players.";

/// Where the session is in the connection/room/exchange lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionPhase {
    #[default]
    Disconnected,
    /// Channel open, waiting for the server-assigned identity.
    Identified,
    /// Identity known, room list requested or shown.
    BrowsingRooms,
    /// In a room, waiting for enough players.
    RoomJoined,
    /// In a room with a server countdown running.
    CountingDown,
    /// Session started; transforms are being exchanged.
    Exchanging,
}

impl SessionPhase {
    /// Phases in which the client is a member of a room.
    pub fn in_room(self) -> bool {
        matches!(self, Self::RoomJoined | Self::CountingDown | Self::Exchanging)
    }
}

/// User-initiated requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    SelectRoom(String),
    Exit,
}

/// Everything that can drive the session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionInput {
    Channel(ChannelEvent),
    Timer(TimerTick),
    Command(SessionCommand),
}

/// Side effects requested by the session, to be performed in order.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionAction {
    Send(ClientCommand),
    CloseChannel,
    Emit(SessionEvent),
}

/// Point-in-time copy of the session's observable state.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionSnapshot {
    pub phase: SessionPhase,
    pub player_id: Option<PlayerId>,
    pub rooms: Vec<String>,
    pub room: Option<String>,
    pub local_transform: Transform,
    pub players: TransformTable,
    /// Seconds left on the countdown, if it is running.
    pub countdown: Option<u64>,
}

/// Per-connection protocol state.
#[derive(Debug)]
pub struct Session {
    phase: SessionPhase,
    player_id: Option<PlayerId>,
    rooms: Vec<String>,
    room: Option<String>,
    local_transform: Transform,
    players: TransformTable,
    countdown_remaining: u64,
    channel_open: bool,
    terminated: bool,
    timers: TimerScheduler,
    rng: StdRng,
    outbox: Vec<SessionAction>,
}

impl Session {
    /// Create a session whose timers deliver ticks on `tick_tx`.
    ///
    /// `seed` makes transform perturbation reproducible.
    pub fn new(
        settings: TimerSettings,
        seed: Option<u64>,
        tick_tx: mpsc::UnboundedSender<TimerTick>,
    ) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            phase: SessionPhase::Disconnected,
            player_id: None,
            rooms: Vec::new(),
            room: None,
            local_transform: Transform::ZERO,
            players: TransformTable::new(),
            countdown_remaining: 0,
            channel_open: false,
            terminated: false,
            timers: TimerScheduler::new(settings, tick_tx),
            rng,
            outbox: Vec::new(),
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn player_id(&self) -> Option<&PlayerId> {
        self.player_id.as_ref()
    }

    pub fn local_transform(&self) -> &Transform {
        &self.local_transform
    }

    pub fn timer_active(&self, kind: TimerKind) -> bool {
        self.timers.is_active(kind)
    }

    /// `true` once the session has been torn down. A terminated session
    /// ignores every further input.
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            phase: self.phase,
            player_id: self.player_id.clone(),
            rooms: self.rooms.clone(),
            room: self.room.clone(),
            local_transform: self.local_transform,
            players: self.players.clone(),
            countdown: self
                .timers
                .is_active(TimerKind::Countdown)
                .then_some(self.countdown_remaining),
        }
    }

    /// Dispatch one input and return the actions it produced.
    pub fn handle(&mut self, input: SessionInput) -> Vec<SessionAction> {
        if self.terminated {
            debug!(?input, "session terminated, ignoring input");
            return Vec::new();
        }
        match input {
            SessionInput::Channel(event) => self.on_channel(event),
            SessionInput::Timer(tick) => self.on_timer(tick),
            SessionInput::Command(command) => self.on_command(command),
        }
        std::mem::take(&mut self.outbox)
    }

    // ── Channel events ──────────────────────────────────────────────

    fn on_channel(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Opened => {
                self.channel_open = true;
                self.emit(SessionEvent::Connected);
                self.transition(SessionPhase::Identified);
            }
            ChannelEvent::Message(text) => match ServerMessage::decode(&text) {
                Ok(message) => self.on_message(message, text),
                Err(e) => {
                    warn!(raw = %text, "ignoring malformed server message: {e}");
                    self.emit(SessionEvent::MalformedMessage {
                        raw: text,
                        error: e.to_string(),
                    });
                }
            },
            ChannelEvent::Closed { reason } => {
                self.channel_open = false;
                self.teardown(reason);
            }
            ChannelEvent::Failed { error } => {
                self.channel_open = false;
                self.teardown(Some(error));
            }
        }
    }

    fn on_message(&mut self, message: ServerMessage, raw: String) {
        let ServerMessage {
            time,
            message: notice,
            step,
        } = message;

        let countdown_restarted = match time {
            Some(seconds) if seconds > 0.0 => {
                self.start_countdown(seconds);
                true
            }
            _ => false,
        };
        let had_notice = notice.is_some();
        if let Some(text) = notice {
            self.log(text);
        }

        match step {
            ServerStep::Welcome(Handshake::Accepted { id }) => self.on_welcome(id),
            ServerStep::Welcome(Handshake::Refused { error }) => {
                warn!(%error, "server refused the connection");
                self.log(error);
            }
            ServerStep::RoomList { rooms } => {
                debug!(count = rooms.len(), "room list received");
                self.rooms = rooms.clone();
                self.emit(SessionEvent::RoomList { rooms });
            }
            ServerStep::RoomJoinResult(outcome) => self.on_join_result(outcome),
            ServerStep::SessionStarted => self.on_session_started(),
            ServerStep::TransformUpdate {
                transforms: Some(table),
                ..
            } => self.on_transforms(table),
            ServerStep::TransformUpdate {
                transforms: None,
                status,
            } => self.on_insufficient_players(status),
            ServerStep::Unknown { step: None } if countdown_restarted || had_notice => {
                debug!("notice without step");
            }
            ServerStep::Unknown { step } => {
                warn!(?step, raw = %raw, "ignoring message with unknown step");
                self.emit(SessionEvent::UnknownMessage { raw });
            }
        }
    }

    fn on_welcome(&mut self, id: PlayerId) {
        if let Some(current) = &self.player_id {
            warn!(%current, offered = %id, "identity already assigned, ignoring welcome");
            return;
        }
        info!(player_id = %id, "connected as player");
        self.player_id = Some(id.clone());
        self.emit(SessionEvent::PlayerIdAssigned { player_id: id });
        self.send(ClientCommand::RequestRoomList);
        self.transition(SessionPhase::BrowsingRooms);
    }

    fn on_join_result(&mut self, outcome: JoinOutcome) {
        match outcome {
            JoinOutcome::Rejected { error } => {
                debug!(%error, "room join rejected");
                self.log(error);
            }
            JoinOutcome::Joined {
                room,
                current,
                minimum,
                capacity,
            } => {
                debug!(%room, current, minimum, ?capacity, "joined room");
                self.log(format!(
                    "You have joined {room} with {current} player(s)."
                ));
                if current < minimum {
                    self.log(format!(
                        "Game will start after {minimum} players have joined."
                    ));
                }
                self.room = Some(room);
                let next = if self.timers.is_active(TimerKind::Countdown) {
                    SessionPhase::CountingDown
                } else {
                    SessionPhase::RoomJoined
                };
                self.transition(next);
            }
        }
    }

    fn on_session_started(&mut self) {
        self.log(SESSION_STARTED_NOTICE.to_string());
        // `time` was handled before the step, so this also hides a countdown
        // the same message started.
        self.timers.cancel(TimerKind::Countdown);
        self.emit(SessionEvent::CountdownHidden);
        self.timers.start_transform_push();
        self.transition(SessionPhase::Exchanging);
    }

    fn on_transforms(&mut self, table: TransformTable) {
        if let Some(own) = self
            .player_id
            .as_ref()
            .and_then(|id| table.get(&id.as_key()))
        {
            self.local_transform = *own;
        }
        self.players = table.clone();
        self.emit(SessionEvent::TransformTable { transforms: table });
    }

    fn on_insufficient_players(&mut self, status: Option<String>) {
        debug!(?status, "not enough players for the session");
        self.log(INSUFFICIENT_PLAYERS_NOTICE.to_string());
        self.stop_countdown();
        self.timers.cancel_all();
        if self.phase.in_room() {
            self.transition(SessionPhase::RoomJoined);
        }
    }

    // ── Timers ──────────────────────────────────────────────────────

    fn on_timer(&mut self, tick: TimerTick) {
        if !self.timers.accept(&tick) {
            debug!(kind = ?tick.kind, "dropping tick from cancelled timer");
            return;
        }
        match tick.kind {
            TimerKind::Countdown => self.on_countdown_tick(),
            TimerKind::TransformPush => self.on_push_tick(),
        }
    }

    fn start_countdown(&mut self, seconds: f64) {
        // Saturating float-to-int cast; `seconds` is known to be positive.
        self.countdown_remaining = seconds.ceil() as u64;
        self.timers.start_countdown();
        debug!(seconds = self.countdown_remaining, "countdown started");
        if self.phase == SessionPhase::RoomJoined {
            self.transition(SessionPhase::CountingDown);
        }
    }

    /// Cancel the countdown and hide its view, if it is running.
    fn stop_countdown(&mut self) {
        if self.timers.is_active(TimerKind::Countdown) {
            self.timers.cancel(TimerKind::Countdown);
            self.emit(SessionEvent::CountdownHidden);
        }
    }

    fn on_countdown_tick(&mut self) {
        if self.countdown_remaining == 0 {
            self.stop_countdown();
            if self.phase == SessionPhase::CountingDown {
                self.transition(SessionPhase::RoomJoined);
            }
            return;
        }
        self.emit(SessionEvent::CountdownTick {
            seconds_remaining: self.countdown_remaining,
        });
        self.countdown_remaining -= 1;
    }

    fn on_push_tick(&mut self) {
        if !self.channel_open {
            debug!("channel not open, stopping transform push");
            self.timers.cancel(TimerKind::TransformPush);
            return;
        }
        let Some(player_id) = self.player_id.clone() else {
            warn!("no player id assigned, skipping transform push");
            return;
        };

        let jitter = self.timers.settings().push_jitter;
        let rng = &mut self.rng;
        self.local_transform = self.local_transform.offset_by(|_| {
            if jitter.is_finite() && jitter > 0.0 {
                rng.gen_range(-jitter..=jitter)
            } else {
                0.0
            }
        });
        self.send(ClientCommand::PushTransform {
            player_id,
            transform: self.local_transform,
        });
    }

    // ── Commands ────────────────────────────────────────────────────

    fn on_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::SelectRoom(room) => {
                if !self.channel_open
                    || matches!(
                        self.phase,
                        SessionPhase::Disconnected | SessionPhase::Identified
                    )
                {
                    warn!(%room, phase = ?self.phase, "room list not available yet, ignoring selection");
                    return;
                }
                debug!(%room, "joining room");
                self.send(ClientCommand::JoinRoom { room });
            }
            SessionCommand::Exit => {
                if self.channel_open {
                    self.send(ClientCommand::Exit);
                    self.outbox.push(SessionAction::CloseChannel);
                    self.channel_open = false;
                }
                self.teardown(Some("exited".into()));
            }
        }
    }

    // ── Helpers ─────────────────────────────────────────────────────

    /// Release everything the connection accumulated. Runs once; later calls
    /// are no-ops.
    fn teardown(&mut self, reason: Option<String>) {
        if self.terminated {
            return;
        }
        self.terminated = true;
        self.timers.cancel_all();
        self.player_id = None;
        self.rooms.clear();
        self.room = None;
        self.players.clear();
        self.local_transform = Transform::ZERO;
        self.countdown_remaining = 0;
        debug!(?reason, "session torn down");
        self.emit(SessionEvent::Reset);
        self.transition(SessionPhase::Disconnected);
        self.emit(SessionEvent::Disconnected { reason });
    }

    fn transition(&mut self, next: SessionPhase) {
        if next == self.phase {
            return;
        }
        if self.phase == SessionPhase::Exchanging {
            self.timers.cancel(TimerKind::TransformPush);
        }
        debug!(from = ?self.phase, to = ?next, "phase change");
        self.phase = next;
        self.emit(SessionEvent::PhaseChanged { phase: next });
    }

    fn send(&mut self, command: ClientCommand) {
        self.outbox.push(SessionAction::Send(command));
    }

    fn emit(&mut self, event: SessionEvent) {
        self.outbox.push(SessionAction::Emit(event));
    }

    fn log(&mut self, text: String) {
        info!(%text, "message");
        self.emit(SessionEvent::LogMessage { text });
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
    use std::time::Duration;

    struct Harness {
        session: Session,
        ticks: mpsc::UnboundedReceiver<TimerTick>,
    }

    impl Harness {
        fn new() -> Self {
            let (tx, ticks) = mpsc::unbounded_channel();
            let mut session = Session::new(TimerSettings::default(), Some(7), tx);
            session.handle(SessionInput::Channel(ChannelEvent::Opened));
            Self { session, ticks }
        }

        fn server(&mut self, value: serde_json::Value) -> Vec<SessionAction> {
            self.raw(&value.to_string())
        }

        fn raw(&mut self, text: &str) -> Vec<SessionAction> {
            self.session
                .handle(SessionInput::Channel(ChannelEvent::Message(text.into())))
        }

        fn command(&mut self, command: SessionCommand) -> Vec<SessionAction> {
            self.session.handle(SessionInput::Command(command))
        }

        /// Let (paused) time pass and dispatch every tick that fired.
        async fn advance(&mut self, duration: Duration) -> Vec<SessionAction> {
            tokio::time::sleep(duration).await;
            let mut actions = Vec::new();
            while let Ok(tick) = self.ticks.try_recv() {
                actions.extend(self.session.handle(SessionInput::Timer(tick)));
            }
            actions
        }

        fn welcomed(id: &str) -> Self {
            let mut h = Self::new();
            h.server(json!({"step": 0, "id": id}));
            h
        }

        fn in_session(id: &str) -> Self {
            let mut h = Self::welcomed(id);
            h.server(json!({"step": 1, "rooms": ["lobby", "arena"]}));
            h.server(json!({"step": 2, "room": "arena", "current": 2, "minimum": 2}));
            h.server(json!({"step": 2.5}));
            h
        }
    }

    fn sends(actions: &[SessionAction]) -> Vec<&ClientCommand> {
        actions
            .iter()
            .filter_map(|a| match a {
                SessionAction::Send(c) => Some(c),
                _ => None,
            })
            .collect()
    }

    fn events(actions: &[SessionAction]) -> Vec<&SessionEvent> {
        actions
            .iter()
            .filter_map(|a| match a {
                SessionAction::Emit(e) => Some(e),
                _ => None,
            })
            .collect()
    }

    fn logs(actions: &[SessionAction]) -> Vec<String> {
        events(actions)
            .into_iter()
            .filter_map(|e| match e {
                SessionEvent::LogMessage { text } => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    fn pushes(actions: &[SessionAction]) -> Vec<Transform> {
        sends(actions)
            .into_iter()
            .filter_map(|c| match c {
                ClientCommand::PushTransform { transform, .. } => Some(*transform),
                _ => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn opened_moves_to_identified() {
        let h = Harness::new();
        assert_eq!(h.session.phase(), SessionPhase::Identified);
    }

    #[tokio::test(start_paused = true)]
    async fn room_selection_scenario() {
        let mut h = Harness::new();

        let actions = h.server(json!({"step": 0, "id": "P1"}));
        assert_eq!(sends(&actions), vec![&ClientCommand::RequestRoomList]);
        assert!(events(&actions).contains(&&SessionEvent::PlayerIdAssigned {
            player_id: "P1".into()
        }));
        assert_eq!(h.session.phase(), SessionPhase::BrowsingRooms);

        let actions = h.server(json!({"step": 1, "rooms": ["lobby", "arena"]}));
        assert_eq!(
            events(&actions),
            vec![&SessionEvent::RoomList {
                rooms: vec!["lobby".into(), "arena".into()]
            }]
        );
        assert_eq!(h.session.snapshot().rooms, vec!["lobby", "arena"]);

        let actions = h.command(SessionCommand::SelectRoom("arena".into()));
        assert_eq!(
            sends(&actions),
            vec![&ClientCommand::JoinRoom {
                room: "arena".into()
            }]
        );
        assert_eq!(h.session.phase(), SessionPhase::BrowsingRooms);

        let actions = h.server(json!({"step": 2, "room": "arena", "current": 1, "minimum": 2}));
        assert_eq!(
            logs(&actions),
            vec![
                "You have joined arena with 1 player(s).".to_string(),
                "Game will start after 2 players have joined.".to_string(),
            ]
        );
        assert_eq!(h.session.phase(), SessionPhase::RoomJoined);
        assert_eq!(h.session.snapshot().room.as_deref(), Some("arena"));
    }

    #[tokio::test(start_paused = true)]
    async fn full_room_skips_waiting_notice() {
        let mut h = Harness::welcomed("P1");
        let actions = h.server(json!({"step": 2, "room": "Room1", "current": 2, "minimum": 1}));
        assert_eq!(logs(&actions).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn join_error_is_logged_and_phase_kept() {
        let mut h = Harness::welcomed("P1");
        let actions = h.server(json!({"step": 2, "error": "Room full"}));
        assert_eq!(logs(&actions), vec!["Room full".to_string()]);
        assert_eq!(h.session.phase(), SessionPhase::BrowsingRooms);
    }

    #[tokio::test(start_paused = true)]
    async fn selection_before_welcome_is_ignored() {
        let mut h = Harness::new();
        let actions = h.command(SessionCommand::SelectRoom("arena".into()));
        assert!(actions.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn second_welcome_does_not_replace_identity() {
        let mut h = Harness::welcomed("P1");
        let actions = h.server(json!({"step": 0, "id": "P2"}));
        assert!(sends(&actions).is_empty());
        assert_eq!(h.session.player_id(), Some(&PlayerId::from("P1")));
    }

    #[tokio::test(start_paused = true)]
    async fn refused_handshake_is_logged() {
        let mut h = Harness::new();
        let actions = h.server(json!({"step": 0, "error": "Server is full"}));
        assert_eq!(logs(&actions), vec!["Server is full".to_string()]);
        assert_eq!(h.session.phase(), SessionPhase::Identified);
        assert!(h.session.player_id().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn session_start_pushes_after_warmup_within_jitter() {
        let mut h = Harness::welcomed("P1");
        let actions = h.server(json!({"step": "2.5"}));
        assert_eq!(h.session.phase(), SessionPhase::Exchanging);
        assert_eq!(logs(&actions), vec![SESSION_STARTED_NOTICE.to_string()]);
        assert!(sends(&actions).is_empty());

        let before = *h.session.local_transform();
        let actions = h.advance(Duration::from_millis(1990)).await;
        assert!(pushes(&actions).is_empty(), "no push before warm-up");

        let actions = h.advance(Duration::from_millis(110)).await;
        let pushed = pushes(&actions);
        assert_eq!(pushed.len(), 1);
        assert!(pushed[0].max_abs_diff(&before) <= 0.05);
        assert_ne!(pushed[0], before);

        let sent = sends(&actions);
        let ClientCommand::PushTransform { player_id, .. } = sent[0] else {
            panic!("expected push");
        };
        assert_eq!(player_id, &PlayerId::from("P1"));
    }

    #[tokio::test(start_paused = true)]
    async fn each_push_perturbs_the_previous_vector() {
        let mut h = Harness::in_session("P1");
        let first = pushes(&h.advance(Duration::from_millis(2001)).await);
        let second = pushes(&h.advance(Duration::from_secs(2)).await);
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
        assert!(second[0].max_abs_diff(&first[0]) <= 0.05);
    }

    #[tokio::test(start_paused = true)]
    async fn restarting_session_keeps_one_push_stream() {
        let mut h = Harness::in_session("P1");
        h.advance(Duration::from_secs(1)).await;
        h.server(json!({"step": 2.5}));

        // Old stream would fire at 2s and 4s, new one fires at 3s and 5s.
        let actions = h.advance(Duration::from_millis(2500)).await;
        assert_eq!(pushes(&actions).len(), 1);
        let actions = h.advance(Duration::from_secs(2)).await;
        assert_eq!(pushes(&actions).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn session_start_hides_running_countdown() {
        let mut h = Harness::welcomed("P1");
        h.server(json!({"step": 2, "room": "arena", "current": 1, "minimum": 1, "time": 5}));
        assert_eq!(h.session.phase(), SessionPhase::CountingDown);

        let actions = h.server(json!({"step": 2.5}));
        let events = events(&actions);
        let hidden = events
            .iter()
            .position(|e| **e == SessionEvent::CountdownHidden)
            .expect("countdown hidden");
        let exchanging = events
            .iter()
            .position(|e| {
                **e == SessionEvent::PhaseChanged {
                    phase: SessionPhase::Exchanging,
                }
            })
            .expect("phase change");
        assert!(hidden < exchanging);
        assert!(!h.session.timer_active(TimerKind::Countdown));
    }

    #[tokio::test(start_paused = true)]
    async fn session_start_with_time_still_hides_countdown() {
        let mut h = Harness::welcomed("P1");
        h.server(json!({"step": 2, "room": "arena", "current": 2, "minimum": 2}));
        h.server(json!({"time": 10}));
        assert_eq!(h.session.phase(), SessionPhase::CountingDown);

        let actions = h.server(json!({"step": 2.5, "time": 5}));
        assert!(events(&actions).contains(&&SessionEvent::CountdownHidden));
        assert!(!h.session.timer_active(TimerKind::Countdown));
        assert_eq!(h.session.phase(), SessionPhase::Exchanging);
        assert_eq!(h.session.snapshot().countdown, None);

        let actions = h.advance(Duration::from_millis(1500)).await;
        assert!(!events(&actions)
            .iter()
            .any(|e| matches!(e, SessionEvent::CountdownTick { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn transform_update_uses_own_entry() {
        let mut h = Harness::in_session("P1");
        let own = [0.5; 12];
        let actions = h.server(json!({
            "step": 3,
            "transforms": {"A": vec![1.0; 12], "P1": own}
        }));
        assert_eq!(h.session.local_transform(), &Transform(own));
        assert_eq!(h.session.phase(), SessionPhase::Exchanging);
        let Some(SessionEvent::TransformTable { transforms }) = events(&actions).pop() else {
            panic!("expected transform table");
        };
        assert_eq!(transforms.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn transform_update_without_own_entry_keeps_vector() {
        let mut h = Harness::in_session("P1");
        h.server(json!({"step": 3, "transforms": {"P1": vec![0.25; 12]}}));
        h.server(json!({"step": 3, "transforms": {"A": vec![9.0; 12]}}));
        assert_eq!(h.session.local_transform(), &Transform([0.25; 12]));
        assert_eq!(h.session.snapshot().players.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn numeric_ids_match_string_keys() {
        let mut h = Harness::new();
        h.server(json!({"step": 0, "id": 3}));
        h.server(json!({"step": 3, "transforms": {"3": vec![0.75; 12]}}));
        assert_eq!(h.session.local_transform(), &Transform([0.75; 12]));
    }

    #[tokio::test(start_paused = true)]
    async fn insufficient_players_cancels_timers_and_degrades() {
        let mut h = Harness::in_session("P1");
        h.server(json!({"step": 3, "time": 10}));
        // time restarts the countdown, the missing transforms cancel it again.
        assert_eq!(h.session.phase(), SessionPhase::RoomJoined);
        assert!(!h.session.timer_active(TimerKind::Countdown));
        assert!(!h.session.timer_active(TimerKind::TransformPush));

        let actions = h.advance(Duration::from_secs(10)).await;
        assert!(actions.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn insufficient_players_logs_notice() {
        let mut h = Harness::in_session("P1");
        let actions = h.server(
            json!({"step": 3, "status": "The Room Doesn't have enough players."}),
        );
        assert_eq!(logs(&actions), vec![INSUFFICIENT_PLAYERS_NOTICE.to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn countdown_displays_then_hides() {
        let mut h = Harness::welcomed("P1");
        h.server(json!({"step": 2, "room": "arena", "current": 1, "minimum": 2}));
        h.server(json!({"message": "Minimum Players have joined the room.", "time": 2.3}));
        assert_eq!(h.session.phase(), SessionPhase::CountingDown);

        // Sample between ticks.
        h.advance(Duration::from_millis(500)).await;
        let mut shown = Vec::new();
        for _ in 0..3 {
            for event in events(&h.advance(Duration::from_secs(1)).await) {
                if let SessionEvent::CountdownTick { seconds_remaining } = event {
                    shown.push(*seconds_remaining);
                }
            }
        }
        assert_eq!(shown, vec![3, 2, 1]);

        let actions = h.advance(Duration::from_secs(1)).await;
        assert!(events(&actions).contains(&&SessionEvent::CountdownHidden));
        assert_eq!(h.session.phase(), SessionPhase::RoomJoined);
        assert!(!h.session.timer_active(TimerKind::Countdown));
    }

    #[tokio::test(start_paused = true)]
    async fn new_time_restarts_countdown() {
        let mut h = Harness::welcomed("P1");
        h.server(json!({"time": 10}));
        h.advance(Duration::from_millis(2500)).await;
        h.server(json!({"time": 1}));

        let actions = h.advance(Duration::from_millis(4300)).await;
        let shown: Vec<u64> = events(&actions)
            .into_iter()
            .filter_map(|e| match e {
                SessionEvent::CountdownTick { seconds_remaining } => Some(*seconds_remaining),
                _ => None,
            })
            .collect();
        assert_eq!(shown, vec![1]);
        assert!(events(&actions).contains(&&SessionEvent::CountdownHidden));
    }

    #[tokio::test(start_paused = true)]
    async fn message_and_step_are_both_processed() {
        let mut h = Harness::welcomed("P1");
        let actions = h.server(json!({
            "step": 1,
            "rooms": ["Room1"],
            "message": "Pick a room"
        }));
        assert_eq!(logs(&actions), vec!["Pick a room".to_string()]);
        assert!(events(&actions).contains(&&SessionEvent::RoomList {
            rooms: vec!["Room1".into()]
        }));
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_step_is_reported_without_side_effects() {
        let mut h = Harness::welcomed("P1");
        let before = h.session.snapshot();
        let actions = h.raw(r#"{"step":"banana"}"#);
        assert_eq!(
            actions,
            vec![SessionAction::Emit(SessionEvent::UnknownMessage {
                raw: r#"{"step":"banana"}"#.into()
            })]
        );
        assert_eq!(h.session.snapshot(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_payload_is_reported() {
        let mut h = Harness::welcomed("P1");
        let actions = h.raw(r#"{"step":1,"rooms":42}"#);
        assert!(matches!(
            actions.as_slice(),
            [SessionAction::Emit(SessionEvent::MalformedMessage { .. })]
        ));
        assert_eq!(h.session.phase(), SessionPhase::BrowsingRooms);
    }

    #[tokio::test(start_paused = true)]
    async fn close_from_any_phase_resets_everything() {
        for failed in [false, true] {
            let mut h = Harness::in_session("P1");
            h.server(json!({"time": 30}));
            h.server(json!({"step": 3, "transforms": {"P1": vec![0.5; 12]}}));

            let event = if failed {
                ChannelEvent::Failed {
                    error: "reset".into(),
                }
            } else {
                ChannelEvent::Closed { reason: None }
            };
            let actions = h.session.handle(SessionInput::Channel(event));

            assert_eq!(h.session.snapshot(), SessionSnapshot::default());
            assert!(!h.session.timer_active(TimerKind::Countdown));
            assert!(!h.session.timer_active(TimerKind::TransformPush));
            assert!(matches!(
                events(&actions).last(),
                Some(SessionEvent::Disconnected { .. })
            ));
            assert!(events(&actions).contains(&&SessionEvent::Reset));

            let actions = h.advance(Duration::from_secs(30)).await;
            assert!(actions.is_empty());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn exit_sends_exit_then_closes() {
        let mut h = Harness::in_session("P1");
        let actions = h.command(SessionCommand::Exit);
        assert_eq!(actions[0], SessionAction::Send(ClientCommand::Exit));
        assert_eq!(actions[1], SessionAction::CloseChannel);
        assert_eq!(h.session.phase(), SessionPhase::Disconnected);
        assert!(h.session.is_terminated());

        // The channel's own Closed event after exit adds nothing.
        let actions = h
            .session
            .handle(SessionInput::Channel(ChannelEvent::Closed { reason: None }));
        assert!(actions.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn seeded_sessions_perturb_identically() {
        let mut a = Harness::in_session("P1");
        let mut b = Harness::in_session("P1");
        tokio::time::sleep(Duration::from_millis(2001)).await;
        let pa = pushes(&a.advance(Duration::ZERO).await);
        let pb = pushes(&b.advance(Duration::ZERO).await);
        assert_eq!(pa.len(), 1);
        assert_eq!(pa, pb);
    }
}

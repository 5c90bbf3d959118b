//! Async controller for a transform-sync session.
//!
//! [`SessionClient`] is a thin handle that talks to a background session
//! loop over an unbounded MPSC channel. The loop owns the [`Channel`], the
//! [`Session`] state machine and its timers, and multiplexes channel events,
//! timer ticks and user commands with `tokio::select!`. Events are emitted on
//! a bounded channel ([`tokio::sync::mpsc::Receiver<SessionEvent>`]) returned
//! from [`SessionClient::start`] or [`SessionClient::connect`].
//!
//! # Example
//!
//! ```rust,ignore
//! let config = SessionConfig::new("ws://127.0.0.1:12345");
//! let (mut client, mut events) = SessionClient::connect(WebSocketConnector, config);
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         SessionEvent::RoomList { rooms } => {
//!             if let Some(room) = rooms.first() {
//!                 client.select_room(room.clone())?;
//!             }
//!         }
//!         SessionEvent::Disconnected { .. } => break,
//!         _ => {}
//!     }
//! }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, error, warn};

use crate::channel::{Channel, ChannelEvent};
use crate::error::{Result, SessionError};
use crate::event::SessionEvent;
use crate::protocol::{PlayerId, Transform, TransformTable};
use crate::session::{
    Session, SessionAction, SessionCommand, SessionInput, SessionPhase, SessionSnapshot,
};
use crate::timer::{TimerSettings, TimerTick, DEFAULT_PUSH_JITTER};
use crate::transport::{Connector, Transport};

/// Address used when none is configured.
pub const DEFAULT_ADDRESS: &str = "ws://127.0.0.1:12345";

/// Default capacity of the bounded event channel.
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Default timeout for the graceful exit.
const DEFAULT_EXIT_TIMEOUT: Duration = Duration::from_secs(1);

/// Timer periods are raised to at least this value.
const MIN_TIMER_PERIOD: Duration = Duration::from_millis(1);

// ── Configuration ───────────────────────────────────────────────────

/// Configuration for a [`SessionClient`].
///
/// # Example
///
/// ```
/// use transform_sync_client::client::SessionConfig;
/// use std::time::Duration;
///
/// let config = SessionConfig::new("ws://game.example:12345")
///     .with_event_channel_capacity(512)
///     .with_push_period(Duration::from_millis(500))
///     .with_rng_seed(7);
/// assert_eq!(config.address, "ws://game.example:12345");
/// assert_eq!(config.timers.push_period, Duration::from_millis(500));
/// ```
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Server address handed to the [`Connector`].
    pub address: String,
    /// Capacity of the bounded event channel.
    ///
    /// When the consumer cannot keep up, events are dropped (with a warning
    /// logged) so the session loop never blocks. `Disconnected` waits for
    /// room for up to `exit_timeout`; a consumer that has stopped draining
    /// for longer than that misses it.
    ///
    /// Defaults to **256**. Values below 1 are clamped to 1.
    pub event_channel_capacity: usize,
    /// Time [`SessionClient::exit`] waits for the loop to send the exit
    /// command and close the channel before aborting it.
    ///
    /// Defaults to **1 second**.
    pub exit_timeout: Duration,
    /// Countdown and transform-push timing.
    pub timers: TimerSettings,
    /// Seed for the transform perturbation. `None` seeds from entropy.
    pub rng_seed: Option<u64>,
}

impl SessionConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            exit_timeout: DEFAULT_EXIT_TIMEOUT,
            timers: TimerSettings::default(),
            rng_seed: None,
        }
    }

    /// Defaults to **256**. Values below 1 are clamped to 1.
    #[must_use]
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }

    /// A zero timeout aborts the session loop immediately.
    #[must_use]
    pub fn with_exit_timeout(mut self, timeout: Duration) -> Self {
        self.exit_timeout = timeout;
        self
    }

    /// Values below 1 ms are clamped to 1 ms.
    #[must_use]
    pub fn with_countdown_period(mut self, period: Duration) -> Self {
        self.timers.countdown_period = period.max(MIN_TIMER_PERIOD);
        self
    }

    /// Delay between session start and the first transform push.
    #[must_use]
    pub fn with_push_warmup(mut self, warmup: Duration) -> Self {
        self.timers.push_warmup = warmup;
        self
    }

    /// Values below 1 ms are clamped to 1 ms.
    #[must_use]
    pub fn with_push_period(mut self, period: Duration) -> Self {
        self.timers.push_period = period.max(MIN_TIMER_PERIOD);
        self
    }

    /// Bound of the per-component perturbation. The sign is ignored and a
    /// non-finite value falls back to the default of 0.05.
    #[must_use]
    pub fn with_push_jitter(mut self, jitter: f64) -> Self {
        self.timers.push_jitter = sanitize_jitter(jitter);
        self
    }

    #[must_use]
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    /// Timer settings with the builder's clamping applied, for fields that
    /// were assigned directly.
    fn sanitized_timers(&self) -> TimerSettings {
        TimerSettings {
            countdown_period: self.timers.countdown_period.max(MIN_TIMER_PERIOD),
            push_warmup: self.timers.push_warmup,
            push_period: self.timers.push_period.max(MIN_TIMER_PERIOD),
            push_jitter: sanitize_jitter(self.timers.push_jitter),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new(DEFAULT_ADDRESS)
    }
}

fn sanitize_jitter(jitter: f64) -> f64 {
    if jitter.is_finite() {
        jitter.abs()
    } else {
        DEFAULT_PUSH_JITTER
    }
}

// ── Shared state ────────────────────────────────────────────────────

/// State published by the session loop for the handle's accessors.
struct ClientState {
    connected: AtomicBool,
    snapshot: Mutex<SessionSnapshot>,
}

impl ClientState {
    fn new(connected: bool) -> Self {
        Self {
            connected: AtomicBool::new(connected),
            snapshot: Mutex::new(SessionSnapshot::default()),
        }
    }
}

// ── Client handle ───────────────────────────────────────────────────

/// Async handle for one session.
///
/// Commands are queued to the session loop and return immediately; their
/// effects are observed through the event receiver or the state accessors.
pub struct SessionClient {
    cmd_tx: mpsc::UnboundedSender<SessionCommand>,
    state: Arc<ClientState>,
    task: Option<tokio::task::JoinHandle<()>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    exit_timeout: Duration,
}

impl SessionClient {
    /// Run a session over an already-connected transport.
    ///
    /// The first event is always [`SessionEvent::Connected`].
    #[must_use = "the event receiver must be used to receive events"]
    pub fn start(
        transport: impl Transport,
        config: SessionConfig,
    ) -> (Self, mpsc::Receiver<SessionEvent>) {
        let (client, session_loop, event_rx) = Self::prepare(&config, true);
        let task = tokio::spawn(session_loop.run(Channel::new(transport)));
        (client.with_task(task), event_rx)
    }

    /// Open a transport to `config.address` through `connector` and run a
    /// session over it.
    ///
    /// Connecting happens in the background. If it fails, the receiver
    /// yields [`SessionEvent::Reset`] and [`SessionEvent::Disconnected`]
    /// carrying the error.
    #[must_use = "the event receiver must be used to receive events"]
    pub fn connect<C: Connector>(
        connector: C,
        config: SessionConfig,
    ) -> (Self, mpsc::Receiver<SessionEvent>) {
        let (client, session_loop, event_rx) = Self::prepare(&config, false);
        let address = config.address;
        let task = tokio::spawn(session_loop.connect_and_run(connector, address));
        (client.with_task(task), event_rx)
    }

    fn prepare(
        config: &SessionConfig,
        connected: bool,
    ) -> (Self, SessionLoop, mpsc::Receiver<SessionEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<SessionCommand>();
        // tokio panics on a zero capacity.
        let capacity = config.event_channel_capacity.max(1);
        let (event_tx, event_rx) = mpsc::channel::<SessionEvent>(capacity);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let (tick_tx, tick_rx) = mpsc::unbounded_channel::<TimerTick>();

        let state = Arc::new(ClientState::new(connected));
        let session_loop = SessionLoop {
            session: Session::new(config.sanitized_timers(), config.rng_seed, tick_tx),
            cmd_rx,
            tick_rx,
            shutdown_rx,
            event_tx,
            state: Arc::clone(&state),
            exit_timeout: config.exit_timeout,
        };
        let client = Self {
            cmd_tx,
            state,
            task: None,
            shutdown_tx: Some(shutdown_tx),
            exit_timeout: config.exit_timeout,
        };
        (client, session_loop, event_rx)
    }

    fn with_task(mut self, task: tokio::task::JoinHandle<()>) -> Self {
        self.task = Some(task);
        self
    }

    // ── Public API methods ──────────────────────────────────────────

    /// Ask to join `room`. The outcome arrives as log and phase events.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotConnected`] if the session has ended.
    pub fn select_room(&self, room: impl Into<String>) -> Result<()> {
        self.send(SessionCommand::SelectRoom(room.into()))
    }

    /// Leave the session: notify the server, close the channel and stop the
    /// background task.
    ///
    /// The loop gets `exit_timeout` to finish gracefully before it is
    /// aborted. Calling this more than once is harmless.
    pub async fn exit(&mut self) {
        debug!("SessionClient: exit requested");

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(self.exit_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    warn!("session loop terminated with join error: {join_err}");
                }
                Err(_) => {
                    warn!("session loop did not exit within timeout; aborting task");
                    task.abort();
                    if let Err(join_err) = task.await {
                        debug!("session loop aborted: {join_err}");
                    }
                }
            }
        }

        self.state.connected.store(false, Ordering::Release);
    }

    // ── State accessors ─────────────────────────────────────────────

    /// Returns `true` while the channel is believed to be open.
    pub fn is_connected(&self) -> bool {
        self.state.connected.load(Ordering::Acquire)
    }

    pub async fn phase(&self) -> SessionPhase {
        self.state.snapshot.lock().await.phase
    }

    /// The server-assigned identity, once the handshake completed.
    pub async fn player_id(&self) -> Option<PlayerId> {
        self.state.snapshot.lock().await.player_id.clone()
    }

    /// The most recent room list.
    pub async fn rooms(&self) -> Vec<String> {
        self.state.snapshot.lock().await.rooms.clone()
    }

    /// The room this client joined, if any.
    pub async fn current_room(&self) -> Option<String> {
        self.state.snapshot.lock().await.room.clone()
    }

    pub async fn local_transform(&self) -> Transform {
        self.state.snapshot.lock().await.local_transform
    }

    /// Latest transforms of every player in the room.
    pub async fn transforms(&self) -> TransformTable {
        self.state.snapshot.lock().await.players.clone()
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        self.state.snapshot.lock().await.clone()
    }

    // ── Internal helpers ────────────────────────────────────────────

    fn send(&self, command: SessionCommand) -> Result<()> {
        if !self.state.connected.load(Ordering::Acquire) {
            return Err(SessionError::NotConnected);
        }
        self.cmd_tx
            .send(command)
            .map_err(|_| SessionError::NotConnected)
    }
}

impl std::fmt::Debug for SessionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionClient")
            .field("connected", &self.is_connected())
            .field("has_task", &self.task.is_some())
            .finish()
    }
}

impl Drop for SessionClient {
    fn drop(&mut self) {
        // No executor is available to drive a graceful exit here, so the
        // loop is aborted. Its timers abort with it.
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ── Session loop ────────────────────────────────────────────────────

/// Everything the background task owns.
struct SessionLoop {
    session: Session,
    cmd_rx: mpsc::UnboundedReceiver<SessionCommand>,
    tick_rx: mpsc::UnboundedReceiver<TimerTick>,
    shutdown_rx: oneshot::Receiver<()>,
    event_tx: mpsc::Sender<SessionEvent>,
    state: Arc<ClientState>,
    /// Upper bound on waiting for room for `Disconnected`.
    exit_timeout: Duration,
}

impl SessionLoop {
    async fn connect_and_run<C: Connector>(mut self, connector: C, address: String) {
        debug!(%address, "connecting");
        let connected = tokio::select! {
            result = Channel::<C::Transport>::connect(&connector, &address) => result,
            _ = &mut self.shutdown_rx => {
                debug!("exit requested while connecting");
                self.fail("exited before connecting".into()).await;
                return;
            }
        };
        match connected {
            Ok(channel) => self.run(channel).await,
            Err(e) => {
                error!(%address, "failed to connect: {e}");
                self.fail(e.to_string()).await;
            }
        }
    }

    /// Multiplex channel events, timer ticks and commands until the session
    /// terminates.
    async fn run<T: Transport>(mut self, mut channel: Channel<T>) {
        debug!("session loop started");

        loop {
            let input = tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(command) => SessionInput::Command(command),
                    // Client handle dropped.
                    None => {
                        debug!("command channel closed, exiting session");
                        SessionInput::Command(SessionCommand::Exit)
                    }
                },

                _ = &mut self.shutdown_rx => {
                    debug!("exit signal received");
                    SessionInput::Command(SessionCommand::Exit)
                }

                event = channel.next_event() => SessionInput::Channel(event),

                Some(tick) = self.tick_rx.recv() => SessionInput::Timer(tick),
            };

            let actions = self.dispatch(input).await;
            for action in actions {
                match action {
                    SessionAction::Send(command) => channel.send(&command).await,
                    SessionAction::CloseChannel => channel.close().await,
                    SessionAction::Emit(event) => self.emit(event).await,
                }
            }

            if self.session.is_terminated() {
                break;
            }
        }

        channel.close().await;
        debug!("session loop exited");
    }

    /// Terminate a session that never got a channel.
    async fn fail(&mut self, error: String) {
        let actions = self
            .dispatch(SessionInput::Channel(ChannelEvent::Failed { error }))
            .await;
        for action in actions {
            if let SessionAction::Emit(event) = action {
                self.emit(event).await;
            }
        }
    }

    /// Run the state machine and publish the resulting state before any of
    /// its actions are performed.
    async fn dispatch(&mut self, input: SessionInput) -> Vec<SessionAction> {
        let actions = self.session.handle(input);
        let snapshot = self.session.snapshot();
        self.state
            .connected
            .store(snapshot.phase != SessionPhase::Disconnected, Ordering::Release);
        *self.state.snapshot.lock().await = snapshot;
        actions
    }

    /// Forward an event to the consumer.
    ///
    /// `Disconnected` is the last event of a session and waits up to
    /// `exit_timeout` for room in the channel. Everything else uses
    /// `try_send` and is dropped with a warning when the channel is full.
    async fn emit(&self, event: SessionEvent) {
        if matches!(event, SessionEvent::Disconnected { .. }) {
            match tokio::time::timeout(self.exit_timeout, self.event_tx.send(event)).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => debug!("event channel closed, receiver dropped"),
                Err(_) => warn!("event channel stayed full, dropping Disconnected"),
            }
            return;
        }
        match self.event_tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                warn!(
                    "event channel full, dropping event: {:?}",
                    std::mem::discriminant(&dropped)
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("event channel closed, receiver dropped");
            }
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    // ── Mock transport ──────────────────────────────────────────────

    /// Records sent messages and replays scripted responses.
    struct MockTransport {
        incoming: VecDeque<Option<std::result::Result<String, SessionError>>>,
        sent: Arc<StdMutex<Vec<String>>>,
        closed: Arc<AtomicBool>,
    }

    impl MockTransport {
        fn new(
            incoming: Vec<Option<std::result::Result<String, SessionError>>>,
        ) -> (Self, Arc<StdMutex<Vec<String>>>, Arc<AtomicBool>) {
            let sent = Arc::new(StdMutex::new(Vec::new()));
            let closed = Arc::new(AtomicBool::new(false));
            let transport = Self {
                incoming: VecDeque::from(incoming),
                sent: Arc::clone(&sent),
                closed: Arc::clone(&closed),
            };
            (transport, sent, closed)
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn send(&mut self, message: String) -> std::result::Result<(), SessionError> {
            self.sent.lock().unwrap().push(message);
            Ok(())
        }

        async fn recv(&mut self) -> Option<std::result::Result<String, SessionError>> {
            match self.incoming.pop_front() {
                Some(item) => item,
                // Script exhausted; stay open until exit.
                None => std::future::pending().await,
            }
        }

        async fn close(&mut self) -> std::result::Result<(), SessionError> {
            self.closed.store(true, Ordering::Relaxed);
            Ok(())
        }
    }

    fn msg(value: serde_json::Value) -> Option<std::result::Result<String, SessionError>> {
        Some(Ok(value.to_string()))
    }

    fn sent_steps(sent: &Arc<StdMutex<Vec<String>>>) -> Vec<serde_json::Value> {
        sent.lock()
            .unwrap()
            .iter()
            .map(|s| serde_json::from_str::<serde_json::Value>(s).unwrap()["step"].clone())
            .collect()
    }

    async fn next_event(events: &mut mpsc::Receiver<SessionEvent>) -> SessionEvent {
        tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    /// Collect events up to and including `Disconnected`.
    async fn until_disconnected(events: &mut mpsc::Receiver<SessionEvent>) -> Vec<SessionEvent> {
        let mut seen = Vec::new();
        loop {
            let event = next_event(events).await;
            let done = matches!(event, SessionEvent::Disconnected { .. });
            seen.push(event);
            if done {
                return seen;
            }
        }
    }

    // ── Tests ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn connected_is_first_event() {
        let (transport, _sent, _closed) = MockTransport::new(vec![]);
        let (_client, mut events) = SessionClient::start(transport, SessionConfig::default());
        assert_eq!(next_event(&mut events).await, SessionEvent::Connected);
    }

    #[tokio::test]
    async fn welcome_requests_room_list() {
        let (transport, sent, _closed) =
            MockTransport::new(vec![msg(serde_json::json!({"step": 0, "id": 9}))]);
        let (client, mut events) = SessionClient::start(transport, SessionConfig::default());

        loop {
            if let SessionEvent::PlayerIdAssigned { player_id } = next_event(&mut events).await {
                assert_eq!(player_id, PlayerId::Numeric(9));
                break;
            }
        }
        tokio::task::yield_now().await;
        assert_eq!(sent_steps(&sent), vec![serde_json::json!(1)]);
        assert_eq!(client.player_id().await, Some(PlayerId::Numeric(9)));
        assert_eq!(client.phase().await, SessionPhase::BrowsingRooms);
    }

    #[tokio::test]
    async fn select_room_sends_join() {
        let (transport, sent, _closed) = MockTransport::new(vec![
            msg(serde_json::json!({"step": 0, "id": "P1"})),
            msg(serde_json::json!({"step": 1, "rooms": ["Room1"]})),
        ]);
        let (client, mut events) = SessionClient::start(transport, SessionConfig::default());

        loop {
            if let SessionEvent::RoomList { rooms } = next_event(&mut events).await {
                client.select_room(rooms[0].clone()).unwrap();
                break;
            }
        }
        for _ in 0..10 {
            if sent.lock().unwrap().len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let sent = sent.lock().unwrap();
        let join: serde_json::Value = serde_json::from_str(&sent[1]).unwrap();
        assert_eq!(join, serde_json::json!({"step": 2, "game_type": "Room1"}));
    }

    #[tokio::test]
    async fn transport_close_resets_and_disconnects() {
        let (transport, _sent, _closed) = MockTransport::new(vec![
            msg(serde_json::json!({"step": 0, "id": "P1"})),
            None,
        ]);
        let (client, mut events) = SessionClient::start(transport, SessionConfig::default());

        let seen = until_disconnected(&mut events).await;
        assert!(seen.contains(&SessionEvent::Reset));
        assert_eq!(seen.last(), Some(&SessionEvent::Disconnected { reason: None }));
        assert!(!client.is_connected());
        assert_eq!(client.snapshot().await, SessionSnapshot::default());
        assert!(matches!(
            client.select_room("Room1"),
            Err(SessionError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn transport_recv_error_emits_disconnected() {
        let (transport, _sent, _closed) = MockTransport::new(vec![Some(Err(
            SessionError::TransportReceive("connection reset".into()),
        ))]);
        let (_client, mut events) = SessionClient::start(transport, SessionConfig::default());

        let seen = until_disconnected(&mut events).await;
        let Some(SessionEvent::Disconnected { reason: Some(reason) }) = seen.last() else {
            panic!("expected Disconnected with reason, got {seen:?}");
        };
        assert!(reason.contains("connection reset"));
    }

    #[tokio::test]
    async fn exit_sends_exit_and_closes() {
        let (transport, sent, closed) =
            MockTransport::new(vec![msg(serde_json::json!({"step": 0, "id": "P1"}))]);
        let (mut client, mut events) = SessionClient::start(transport, SessionConfig::default());
        loop {
            if matches!(
                next_event(&mut events).await,
                SessionEvent::PlayerIdAssigned { .. }
            ) {
                break;
            }
        }

        client.exit().await;

        assert_eq!(
            sent_steps(&sent).last(),
            Some(&serde_json::json!(4)),
            "exit command must be the last message sent"
        );
        assert!(closed.load(Ordering::Relaxed));
        assert!(!client.is_connected());

        let seen = until_disconnected(&mut events).await;
        assert!(seen.contains(&SessionEvent::Reset));
        assert!(events.recv().await.is_none());
    }

    #[tokio::test]
    async fn double_exit_does_not_panic() {
        let (transport, _sent, _closed) = MockTransport::new(vec![]);
        let (mut client, _events) = SessionClient::start(transport, SessionConfig::default());
        client.exit().await;
        client.exit().await;
        assert!(matches!(
            client.select_room("x"),
            Err(SessionError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn drop_without_exit() {
        let (transport, _sent, _closed) = MockTransport::new(vec![]);
        let (client, mut events) = SessionClient::start(transport, SessionConfig::default());
        assert_eq!(next_event(&mut events).await, SessionEvent::Connected);
        drop(client);
        // The aborted task drops its sender, ending the stream.
        assert!(events.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn session_start_pushes_transform_after_warmup() {
        let (transport, sent, _closed) = MockTransport::new(vec![
            msg(serde_json::json!({"step": 0, "id": "P1"})),
            msg(serde_json::json!({"step": 2, "room": "Room1", "current": 2, "minimum": 2})),
            msg(serde_json::json!({"step": 2.5})),
        ]);
        let config = SessionConfig::default().with_rng_seed(1);
        let (client, _events) = SessionClient::start(transport, config);

        tokio::time::sleep(Duration::from_millis(1900)).await;
        assert_eq!(client.phase().await, SessionPhase::Exchanging);
        assert!(!sent_steps(&sent).contains(&serde_json::json!(3)));

        tokio::time::sleep(Duration::from_millis(200)).await;
        let pushes: Vec<serde_json::Value> = sent
            .lock()
            .unwrap()
            .iter()
            .map(|s| serde_json::from_str::<serde_json::Value>(s).unwrap())
            .filter(|v| v["step"] == 3)
            .collect();
        assert_eq!(pushes.len(), 1);
        assert_eq!(pushes[0]["player_id"], "P1");
        assert_eq!(pushes[0]["transform"].as_array().unwrap().len(), 12);
    }

    struct FailingConnector;

    #[async_trait]
    impl Connector for FailingConnector {
        type Transport = MockTransport;

        async fn connect(&self, address: &str) -> std::result::Result<MockTransport, SessionError> {
            Err(SessionError::Connect(format!("refused: {address}")))
        }
    }

    #[tokio::test]
    async fn connect_failure_resets_and_disconnects() {
        let (client, mut events) =
            SessionClient::connect(FailingConnector, SessionConfig::new("ws://nowhere"));
        assert!(!client.is_connected());

        let seen = until_disconnected(&mut events).await;
        assert_eq!(seen.first(), Some(&SessionEvent::Reset));
        let Some(SessionEvent::Disconnected { reason: Some(reason) }) = seen.last() else {
            panic!("expected Disconnected with reason, got {seen:?}");
        };
        assert!(reason.contains("ws://nowhere"));
        assert!(!seen.contains(&SessionEvent::Connected));
    }

    struct ScriptedConnector {
        script: StdMutex<Option<MockTransport>>,
    }

    #[async_trait]
    impl Connector for ScriptedConnector {
        type Transport = MockTransport;

        async fn connect(&self, _address: &str) -> std::result::Result<MockTransport, SessionError> {
            self.script
                .lock()
                .unwrap()
                .take()
                .ok_or_else(|| SessionError::Connect("already used".into()))
        }
    }

    #[tokio::test]
    async fn connect_success_runs_session() {
        let (transport, _sent, _closed) =
            MockTransport::new(vec![msg(serde_json::json!({"step": 0, "id": "P7"}))]);
        let connector = ScriptedConnector {
            script: StdMutex::new(Some(transport)),
        };
        let (client, mut events) = SessionClient::connect(connector, SessionConfig::default());

        assert_eq!(next_event(&mut events).await, SessionEvent::Connected);
        loop {
            if let SessionEvent::PlayerIdAssigned { player_id } = next_event(&mut events).await {
                assert_eq!(player_id, PlayerId::from("P7"));
                break;
            }
        }
        assert!(client.is_connected());
    }

    #[tokio::test]
    async fn config_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.address, DEFAULT_ADDRESS);
        assert_eq!(config.event_channel_capacity, 256);
        assert_eq!(config.exit_timeout, Duration::from_secs(1));
        assert_eq!(config.timers, TimerSettings::default());
        assert!(config.rng_seed.is_none());
    }

    #[tokio::test]
    async fn config_builder_clamps() {
        let config = SessionConfig::default()
            .with_event_channel_capacity(0)
            .with_countdown_period(Duration::ZERO)
            .with_push_period(Duration::ZERO)
            .with_push_jitter(-0.2);
        assert_eq!(config.event_channel_capacity, 1);
        assert_eq!(config.timers.countdown_period, MIN_TIMER_PERIOD);
        assert_eq!(config.timers.push_period, MIN_TIMER_PERIOD);
        assert!((config.timers.push_jitter - 0.2).abs() < f64::EPSILON);

        let config = SessionConfig::default().with_push_jitter(f64::NAN);
        assert!((config.timers.push_jitter - DEFAULT_PUSH_JITTER).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn directly_assigned_zero_periods_do_not_panic() {
        let mut config = SessionConfig::default();
        config.timers.countdown_period = Duration::ZERO;
        config.event_channel_capacity = 0;
        let (transport, _sent, _closed) = MockTransport::new(vec![msg(
            serde_json::json!({"time": 1}),
        )]);
        let (mut client, mut events) = SessionClient::start(transport, config);
        assert_eq!(next_event(&mut events).await, SessionEvent::Connected);
        tokio::time::sleep(Duration::from_millis(20)).await;
        client.exit().await;
    }

    #[tokio::test]
    async fn small_event_channel_still_delivers_disconnected() {
        let mut script: Vec<_> = (0..20)
            .map(|i| msg(serde_json::json!({"message": format!("line {i}")})))
            .collect();
        script.push(None);
        let (transport, _sent, _closed) = MockTransport::new(script);
        let config = SessionConfig::default().with_event_channel_capacity(2);
        let (_client, mut events) = SessionClient::start(transport, config);

        // Let the loop run into backpressure before draining.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let seen = until_disconnected(&mut events).await;
        assert!(seen.len() < 20, "events beyond capacity are dropped");
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_consumer_does_not_hold_the_loop() {
        let (transport, _sent, _closed) = MockTransport::new(vec![None]);
        let config = SessionConfig::default()
            .with_event_channel_capacity(1)
            .with_exit_timeout(Duration::from_millis(500));
        let (mut client, mut events) = SessionClient::start(transport, config);

        // Nobody drains: `Connected` fills the channel and `Disconnected`
        // gives up after the exit timeout, letting the loop finish.
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!client.is_connected());

        let started = tokio::time::Instant::now();
        client.exit().await;
        assert!(started.elapsed() < Duration::from_millis(500));

        assert_eq!(events.recv().await, Some(SessionEvent::Connected));
        assert_eq!(events.recv().await, None);
    }

    /// Hangs forever in `close()` so the exit timeout can be tested.
    struct HangingCloseTransport {
        close_called: Arc<AtomicBool>,
        dropped: Arc<AtomicBool>,
    }

    impl Drop for HangingCloseTransport {
        fn drop(&mut self) {
            self.dropped.store(true, Ordering::Release);
        }
    }

    #[async_trait]
    impl Transport for HangingCloseTransport {
        async fn send(&mut self, _message: String) -> std::result::Result<(), SessionError> {
            Ok(())
        }

        async fn recv(&mut self) -> Option<std::result::Result<String, SessionError>> {
            std::future::pending().await
        }

        async fn close(&mut self) -> std::result::Result<(), SessionError> {
            self.close_called.store(true, Ordering::Release);
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn exit_timeout_aborts_stuck_task() {
        let close_called = Arc::new(AtomicBool::new(false));
        let dropped = Arc::new(AtomicBool::new(false));
        let transport = HangingCloseTransport {
            close_called: Arc::clone(&close_called),
            dropped: Arc::clone(&dropped),
        };
        let config = SessionConfig::default().with_exit_timeout(Duration::from_millis(20));
        let (mut client, mut events) = SessionClient::start(transport, config);
        assert_eq!(next_event(&mut events).await, SessionEvent::Connected);

        client.exit().await;

        assert!(close_called.load(Ordering::Acquire));
        assert!(dropped.load(Ordering::Acquire));
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn debug_impl_for_client() {
        let (transport, _sent, _closed) = MockTransport::new(vec![]);
        let (client, _events) = SessionClient::start(transport, SessionConfig::default());
        let debug = format!("{client:?}");
        assert!(debug.contains("SessionClient"));
        assert!(debug.contains("connected"));
    }
}

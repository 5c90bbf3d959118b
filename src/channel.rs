//! Channel adapter: a [`Transport`] with connection lifecycle bookkeeping.
//!
//! [`Channel`] turns the raw `send`/`recv`/`close` transport surface into the
//! event stream the session consumes. Per connection it yields exactly one
//! [`ChannelEvent::Opened`], any number of [`ChannelEvent::Message`]s and
//! exactly one terminal [`ChannelEvent::Closed`] or [`ChannelEvent::Failed`].
//!
//! Sending is fire-and-forget. A send on a channel that is not open is
//! dropped with a warning, and a transport send failure is not returned to
//! the caller; it becomes the channel's terminal `Failed` event instead.

use tracing::{debug, error, warn};

use crate::error::Result;
use crate::protocol::ClientCommand;
use crate::transport::{Connector, Transport};

/// Connection state as seen by the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Open,
    /// `close()` is in progress.
    Closing,
    Closed,
}

/// Normalized transport lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Opened,
    Message(String),
    /// The connection ended cleanly (server close frame or local `close()`).
    Closed { reason: Option<String> },
    /// The connection could not be opened or broke.
    Failed { error: String },
}

impl ChannelEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed { .. } | Self::Failed { .. })
    }
}

/// Lifecycle-tracking wrapper around an open transport.
#[derive(Debug)]
pub struct Channel<T> {
    transport: T,
    state: ChannelState,
    opened_emitted: bool,
    terminal_emitted: bool,
    pending_terminal: Option<ChannelEvent>,
}

impl<T: Transport> Channel<T> {
    /// Wrap an already-connected transport.
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            state: ChannelState::Open,
            opened_emitted: false,
            terminal_emitted: false,
            pending_terminal: None,
        }
    }

    /// Open a transport through `connector` and wrap it.
    ///
    /// # Errors
    ///
    /// Propagates the connector's error when the connection cannot be opened.
    pub async fn connect<C>(connector: &C, address: &str) -> Result<Self>
    where
        C: Connector<Transport = T>,
    {
        let transport = connector.connect(address).await?;
        Ok(Self::new(transport))
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == ChannelState::Open
    }

    /// Encode and send `command`. Never fails from the caller's point of view.
    pub async fn send(&mut self, command: &ClientCommand) {
        if !self.is_open() {
            warn!(
                step = command.step(),
                state = ?self.state,
                "channel not open, dropping outgoing command"
            );
            return;
        }

        let json = match command.encode() {
            Ok(json) => json,
            Err(e) => {
                warn!(step = command.step(), "failed to encode command: {e}");
                return;
            }
        };

        debug!(step = command.step(), "sending command");
        if let Err(e) = self.transport.send(json).await {
            error!("transport send error: {e}");
            self.state = ChannelState::Closed;
            self.set_terminal(ChannelEvent::Failed {
                error: e.to_string(),
            });
        }
    }

    /// Wait for the next lifecycle event.
    ///
    /// Cancel-safe as long as the transport's `recv` is. Once the terminal
    /// event has been returned this future never completes.
    pub async fn next_event(&mut self) -> ChannelEvent {
        if !self.opened_emitted {
            self.opened_emitted = true;
            return ChannelEvent::Opened;
        }
        if let Some(event) = self.pending_terminal.take() {
            self.terminal_emitted = true;
            return event;
        }
        if self.terminal_emitted || self.state != ChannelState::Open {
            return std::future::pending().await;
        }

        let event = match self.transport.recv().await {
            Some(Ok(text)) => ChannelEvent::Message(text),
            Some(Err(e)) => {
                error!("transport receive error: {e}");
                ChannelEvent::Failed {
                    error: e.to_string(),
                }
            }
            None => {
                debug!("transport closed by server");
                ChannelEvent::Closed { reason: None }
            }
        };
        if event.is_terminal() {
            self.state = ChannelState::Closed;
            self.terminal_emitted = true;
        }
        event
    }

    /// Close the transport. Idempotent.
    ///
    /// If no terminal event has been produced yet, the next
    /// [`next_event`](Self::next_event) yields `Closed`.
    pub async fn close(&mut self) {
        if self.state != ChannelState::Open {
            return;
        }
        self.state = ChannelState::Closing;
        if let Err(e) = self.transport.close().await {
            debug!("transport close error: {e}");
        }
        self.state = ChannelState::Closed;
        self.set_terminal(ChannelEvent::Closed {
            reason: Some("closed by client".into()),
        });
    }

    fn set_terminal(&mut self, event: ChannelEvent) {
        if !self.terminal_emitted && self.pending_terminal.is_none() {
            self.pending_terminal = Some(event);
        }
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
    use crate::error::SessionError;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex as StdMutex};
    use std::time::Duration;

    struct ScriptedTransport {
        incoming: VecDeque<Option<std::result::Result<String, SessionError>>>,
        sent: Arc<StdMutex<Vec<String>>>,
        fail_sends: bool,
        close_calls: Arc<StdMutex<u32>>,
    }

    impl ScriptedTransport {
        fn new(
            incoming: Vec<Option<std::result::Result<String, SessionError>>>,
        ) -> (Self, Arc<StdMutex<Vec<String>>>, Arc<StdMutex<u32>>) {
            let sent = Arc::new(StdMutex::new(Vec::new()));
            let close_calls = Arc::new(StdMutex::new(0));
            let transport = Self {
                incoming: VecDeque::from(incoming),
                sent: Arc::clone(&sent),
                fail_sends: false,
                close_calls: Arc::clone(&close_calls),
            };
            (transport, sent, close_calls)
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&mut self, message: String) -> std::result::Result<(), SessionError> {
            if self.fail_sends {
                return Err(SessionError::TransportSend("broken pipe".into()));
            }
            self.sent.lock().unwrap().push(message);
            Ok(())
        }

        async fn recv(&mut self) -> Option<std::result::Result<String, SessionError>> {
            match self.incoming.pop_front() {
                Some(item) => item,
                None => std::future::pending().await,
            }
        }

        async fn close(&mut self) -> std::result::Result<(), SessionError> {
            *self.close_calls.lock().unwrap() += 1;
            Ok(())
        }
    }

    /// Returns `None` if no event arrives within a second of (paused) time.
    async fn next(channel: &mut Channel<ScriptedTransport>) -> Option<ChannelEvent> {
        tokio::time::timeout(Duration::from_secs(1), channel.next_event())
            .await
            .ok()
    }

    #[tokio::test(start_paused = true)]
    async fn opened_then_messages_then_single_terminal() {
        let (transport, _sent, _closes) = ScriptedTransport::new(vec![
            Some(Ok(r#"{"step":0,"id":1}"#.into())),
            None,
            Some(Ok("never delivered".into())),
        ]);
        let mut channel = Channel::new(transport);

        assert_eq!(next(&mut channel).await, Some(ChannelEvent::Opened));
        assert_eq!(
            next(&mut channel).await,
            Some(ChannelEvent::Message(r#"{"step":0,"id":1}"#.into()))
        );
        assert_eq!(
            next(&mut channel).await,
            Some(ChannelEvent::Closed { reason: None })
        );
        assert_eq!(channel.state(), ChannelState::Closed);
        assert_eq!(next(&mut channel).await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn receive_error_is_failed() {
        let (transport, _sent, _closes) = ScriptedTransport::new(vec![Some(Err(
            SessionError::TransportReceive("reset by peer".into()),
        ))]);
        let mut channel = Channel::new(transport);

        assert_eq!(next(&mut channel).await, Some(ChannelEvent::Opened));
        let event = next(&mut channel).await.unwrap();
        let ChannelEvent::Failed { error } = event else {
            panic!("expected Failed, got {event:?}");
        };
        assert!(error.contains("reset by peer"));
        assert!(!channel.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn close_is_idempotent_and_yields_one_closed() {
        let (transport, _sent, closes) = ScriptedTransport::new(vec![]);
        let mut channel = Channel::new(transport);
        assert_eq!(next(&mut channel).await, Some(ChannelEvent::Opened));

        channel.close().await;
        channel.close().await;
        assert_eq!(*closes.lock().unwrap(), 1);

        assert!(matches!(
            next(&mut channel).await,
            Some(ChannelEvent::Closed { reason: Some(_) })
        ));
        assert_eq!(next(&mut channel).await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn send_on_closed_channel_is_dropped() {
        let (transport, sent, _closes) = ScriptedTransport::new(vec![]);
        let mut channel = Channel::new(transport);
        channel.close().await;

        channel.send(&ClientCommand::RequestRoomList).await;
        assert!(sent.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn send_failure_becomes_terminal_failed() {
        let (mut transport, _sent, _closes) = ScriptedTransport::new(vec![]);
        transport.fail_sends = true;
        let mut channel = Channel::new(transport);
        assert_eq!(next(&mut channel).await, Some(ChannelEvent::Opened));

        channel.send(&ClientCommand::Exit).await;
        assert_eq!(channel.state(), ChannelState::Closed);
        assert!(matches!(
            next(&mut channel).await,
            Some(ChannelEvent::Failed { .. })
        ));

        // A later close does not add a second terminal event.
        channel.close().await;
        assert_eq!(next(&mut channel).await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn send_writes_encoded_command() {
        let (transport, sent, _closes) = ScriptedTransport::new(vec![]);
        let mut channel = Channel::new(transport);

        channel
            .send(&ClientCommand::JoinRoom {
                room: "arena".into(),
            })
            .await;
        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        let value: serde_json::Value = serde_json::from_str(&sent[0]).unwrap();
        assert_eq!(value, serde_json::json!({"step": 2, "game_type": "arena"}));
    }
}

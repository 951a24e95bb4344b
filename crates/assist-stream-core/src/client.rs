//! Chat client: routes transport events into the session and gates sends.
//!
//! The client does no I/O of its own. The caller owns the event receiver
//! returned by [`ChatClient::new`] and feeds every event back through
//! [`ChatClient::handle_event`], one at a time, so all session mutation
//! happens on the caller's task in arrival order.
//!
//! ```no_run
//! use assist_stream_core::{ChatClient, ClientConfig};
//!
//! # async fn run() -> assist_stream_core::Result<()> {
//! let (mut client, mut events) = ChatClient::new(ClientConfig::new("ws://localhost:8000/ws/chat"))?;
//! client.set_authenticated(true)?;
//!
//! while let Some(event) = events.recv().await {
//!     if client.handle_event(event) {
//!         let view = client.view();
//!         println!("{} messages, typing: {}", view.messages.len(), view.typing);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use tokio::sync::mpsc;

use crate::config::ClientConfig;
use crate::connection::{ConnectionManager, LinkUpdate, Phase, TransportEvent};
use crate::error::Result;
use crate::ids::MessageId;
use crate::protocol::Decoded;
use crate::session::{ChatSession, SessionView};

/// Result of [`ChatClient::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// The message was recorded and queued for the socket.
    Sent(MessageId),
    /// The input was blank; nothing happened.
    Empty,
    /// The socket is not open; nothing happened.
    NotConnected,
    /// The outbound queue is full; nothing happened.
    QueueFull,
}

/// A chat session bound to its connection.
#[derive(Debug)]
pub struct ChatClient {
    session: ChatSession,
    connection: ConnectionManager,
}

impl ChatClient {
    /// Create a client and the channel its transport events arrive on.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration does not validate.
    pub fn new(config: ClientConfig) -> Result<(Self, mpsc::Receiver<TransportEvent>)> {
        config.validate()?;
        let (events_tx, events_rx) = mpsc::channel(config.event_buffer);
        let connection = ConnectionManager::new(&config, events_tx)?;
        let client = Self {
            session: ChatSession::new(config.greeting),
            connection,
        };
        Ok((client, events_rx))
    }

    /// Session state.
    #[must_use]
    pub const fn session(&self) -> &ChatSession {
        &self.session
    }

    /// Everything the presentation layer renders.
    #[must_use]
    pub fn view(&self) -> SessionView<'_> {
        self.session.view()
    }

    /// Connection phase.
    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.connection.phase()
    }

    /// Check if the socket is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connection.phase() == Phase::Open
    }

    /// Endpoint the client connects to.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        self.connection.endpoint()
    }

    /// Forward the authentication signal to the connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the upgrade request cannot be built.
    pub fn set_authenticated(&mut self, authenticated: bool) -> Result<()> {
        if !authenticated {
            self.session.on_transport_lost();
        }
        self.connection.set_authenticated(authenticated)
    }

    /// Replace the current connection with a fresh attempt.
    ///
    /// # Errors
    ///
    /// Returns an error if the upgrade request cannot be built.
    pub fn reconnect(&mut self) -> Result<()> {
        self.session.on_transport_lost();
        self.connection.connect()
    }

    /// Close the connection for good; no reconnect follows.
    pub fn shutdown(&mut self) {
        self.connection.shutdown();
        self.session.on_transport_lost();
    }

    /// Start a new conversation. The connection stays open, but a marker
    /// still waiting for its payload belongs to the old conversation and is
    /// dropped.
    pub fn new_conversation(&mut self) {
        self.connection.reset_decoder();
        self.session.new_conversation();
    }

    /// Send a user message.
    ///
    /// Blank input, a socket that is not open and a full outbound queue are
    /// all rejected without touching the session. Otherwise any reply still
    /// streaming is abandoned, the message is recorded, and the text is
    /// queued verbatim as one frame.
    pub fn send(&mut self, text: &str) -> SendOutcome {
        if text.trim().is_empty() {
            return SendOutcome::Empty;
        }
        if !self.is_connected() {
            tracing::warn!(phase = self.phase().as_str(), "Send rejected: not connected");
            return SendOutcome::NotConnected;
        }
        let Some(permit) = self.connection.reserve() else {
            return SendOutcome::QueueFull;
        };

        let id = self.session.submit_user_message(text);
        permit.send(text);
        SendOutcome::Sent(id)
    }

    /// Process one transport event.
    ///
    /// Returns `true` if the UI should be redrawn.
    pub fn handle_event(&mut self, event: TransportEvent) -> bool {
        match self.connection.handle_event(event) {
            None => false,
            Some(LinkUpdate::Opened | LinkUpdate::Reconnecting) => true,
            Some(LinkUpdate::Lost) => {
                self.session.on_transport_lost();
                true
            }
            Some(LinkUpdate::Decoded(decoded)) => self.apply_decoded(decoded),
        }
    }

    fn apply_decoded(&mut self, decoded: Decoded) -> bool {
        match decoded {
            Decoded::Event(event) => self.session.apply(event),
            Decoded::AwaitingPayload(marker) => {
                tracing::trace!(marker = marker.sentinel(), "Awaiting payload");
                false
            }
            Decoded::Discarded(kind) => {
                tracing::debug!(?kind, "Discarded frame");
                false
            }
            Decoded::MalformedPayload { marker, error } => {
                tracing::warn!(marker = marker.sentinel(), error = %error, "Dropping malformed payload");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{STREAM_END, TOKEN_USAGE, TOOL_CALL_END, TOOL_CALL_START};
    use crate::session::TurnState;

    fn client() -> (ChatClient, mpsc::Receiver<TransportEvent>) {
        client_with(ClientConfig::new("ws://127.0.0.1:9/ws/chat"))
    }

    fn client_with(mut config: ClientConfig) -> (ChatClient, mpsc::Receiver<TransportEvent>) {
        config.greeting = None;
        ChatClient::new(config).unwrap()
    }

    /// Put the client in the open phase without a real socket.
    fn open(client: &mut ChatClient) -> u64 {
        client.reconnect().unwrap();
        let generation = client.connection.generation();
        client.handle_event(TransportEvent::Opened { generation });
        generation
    }

    fn frame(client: &mut ChatClient, generation: u64, text: &str) -> bool {
        client.handle_event(TransportEvent::Frame {
            generation,
            text: text.to_string(),
        })
    }

    #[test]
    fn greeting_seeds_the_log() {
        let config = ClientConfig::new("ws://127.0.0.1:9/ws/chat");
        let (client, _rx) = ChatClient::new(config).unwrap();
        assert_eq!(client.view().messages.len(), 1);
        assert!(!client.view().messages[0].is_user());
    }

    #[test]
    fn send_while_disconnected_is_noop() {
        let (mut client, _rx) = client();
        assert_eq!(client.send("hello"), SendOutcome::NotConnected);
        assert!(client.view().messages.is_empty());
    }

    #[tokio::test]
    async fn blank_send_is_rejected() {
        let (mut client, _rx) = client();
        open(&mut client);
        assert_eq!(client.send("   \n"), SendOutcome::Empty);
        assert!(client.view().messages.is_empty());
    }

    #[tokio::test]
    async fn frames_drive_the_session() {
        let (mut client, _rx) = client();
        let generation = open(&mut client);
        assert!(client.is_connected());

        assert!(matches!(client.send("create a ticket"), SendOutcome::Sent(_)));

        frame(&mut client, generation, "Creating");
        frame(&mut client, generation, TOOL_CALL_START);
        frame(&mut client, generation, r#"{"tool":"create_issue","args":{"summary":"Bug"}}"#);
        frame(&mut client, generation, TOOL_CALL_END);
        frame(&mut client, generation, " done.");
        frame(&mut client, generation, TOKEN_USAGE);
        frame(
            &mut client,
            generation,
            r#"{"token_usage":{"input_tokens":10,"output_tokens":5,"thinking_tokens":2},"cost":0.01}"#,
        );
        frame(&mut client, generation, STREAM_END);

        let view = client.view();
        let contents: Vec<_> = view.messages.iter().map(|m| m.content()).collect();
        assert_eq!(
            contents,
            vec!["create a ticket", "Creating done.", r#"create_issue(summary="Bug")"#]
        );
        assert!(!view.typing);
        assert!(view.current_tool_call.is_none());
        assert_eq!(view.totals.total_tokens, 17);
    }

    #[tokio::test]
    async fn full_queue_rejects_send_without_recording() {
        let mut config = ClientConfig::new("ws://127.0.0.1:9/ws/chat");
        config.outbound_buffer = 1;
        let (mut client, _rx) = client_with(config);
        let generation = open(&mut client);
        frame(&mut client, generation, "streaming reply");

        // The link task never runs here, so nothing drains the queue.
        assert!(matches!(client.send("first"), SendOutcome::Sent(_)));
        assert_eq!(client.send("second"), SendOutcome::QueueFull);

        let view = client.view();
        let contents: Vec<_> = view.messages.iter().map(|m| m.content()).collect();
        assert_eq!(contents, vec!["streaming reply", "first"]);
    }

    #[tokio::test]
    async fn rejected_send_keeps_reply_open() {
        let mut config = ClientConfig::new("ws://127.0.0.1:9/ws/chat");
        config.outbound_buffer = 1;
        let (mut client, _rx) = client_with(config);
        let generation = open(&mut client);

        assert!(matches!(client.send("first"), SendOutcome::Sent(_)));
        frame(&mut client, generation, "partial");
        assert!(client.view().typing);

        assert_eq!(client.send("second"), SendOutcome::QueueFull);
        assert!(client.view().typing);
    }

    #[tokio::test]
    async fn new_conversation_drops_pending_usage() {
        let (mut client, _rx) = client();
        let generation = open(&mut client);
        frame(&mut client, generation, "old reply");
        frame(&mut client, generation, TOKEN_USAGE);

        client.new_conversation();
        frame(
            &mut client,
            generation,
            r#"{"token_usage":{"input_tokens":6,"output_tokens":4},"cost":0.5}"#,
        );

        let view = client.view();
        assert_eq!(view.totals.total_tokens, 0);
        assert!(view.last_usage.is_none());
        assert!(view.messages.is_empty());
    }

    #[tokio::test]
    async fn unmarked_payload_is_not_content() {
        let (mut client, _rx) = client();
        let generation = open(&mut client);
        let changed = frame(&mut client, generation, r#"{"tool":"x","args":{}}"#);
        assert!(!changed);
        assert!(client.view().messages.is_empty());
    }

    #[tokio::test]
    async fn transport_loss_forces_idle() {
        let (mut client, _rx) = client();
        let generation = open(&mut client);
        frame(&mut client, generation, "partial");
        assert!(client.view().typing);

        client.handle_event(TransportEvent::Closed {
            generation,
            reason: None,
        });

        assert_eq!(client.session().turn_state(), TurnState::Idle);
        assert_eq!(client.phase(), Phase::Closed);
        assert_eq!(client.send("hello"), SendOutcome::NotConnected);
    }
}

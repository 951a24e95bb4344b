//! Conversation state fed by decoded protocol events.
//!
//! [`ChatSession`] owns everything the presentation layer reads: the message
//! log, whether a reply is streaming, the tool call in flight, the last
//! turn's usage and the conversation totals. It holds no I/O; the client
//! feeds it events in arrival order.
//!
//! # Turn State Machine
//!
//! ```text
//!              Content (open reply)
//!     ┌──────┐ ─────────────────────▶ ┌───────────┐
//!     │ Idle │                        │ Streaming │ ◀─┐ Content (append)
//!     └──────┘ ◀───────────────────── └───────────┘ ──┘
//!        ▲  │   StreamEnd | user send | transport lost
//!        └──┘
//!     StreamEnd (no-op)
//! ```

use crate::ids::{ConversationId, MessageId};
use crate::protocol::ProtocolEvent;
use crate::types::{Message, SessionTotals, ToolCall, UsageSnapshot, BACKEND_ERROR_PREFIX};

/// Whether an assistant reply is currently streaming.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    /// No reply is open.
    Idle,
    /// The given message is open for append.
    Streaming(MessageId),
}

/// Read-only state handed to the presentation layer.
#[derive(Debug, Clone, Copy)]
pub struct SessionView<'a> {
    /// Current conversation.
    pub conversation_id: ConversationId,
    /// Conversation log, oldest first.
    pub messages: &'a [Message],
    /// Whether an assistant reply is streaming.
    pub typing: bool,
    /// Tool call that has started but not finished.
    pub current_tool_call: Option<&'a ToolCall>,
    /// Usage of the most recent turn.
    pub last_usage: Option<&'a UsageSnapshot>,
    /// Usage summed over the conversation.
    pub totals: &'a SessionTotals,
}

/// State of one chat session.
#[derive(Debug)]
pub struct ChatSession {
    conversation_id: ConversationId,
    greeting: Option<String>,
    messages: Vec<Message>,
    next_id: MessageId,
    turn: TurnState,
    current_tool_call: Option<ToolCall>,
    last_usage: Option<UsageSnapshot>,
    totals: SessionTotals,
}

impl ChatSession {
    /// Create a session, seeding the log with `greeting` when given.
    #[must_use]
    pub fn new(greeting: Option<String>) -> Self {
        let mut session = Self {
            conversation_id: ConversationId::generate(),
            greeting,
            messages: Vec::new(),
            next_id: MessageId::new(1),
            turn: TurnState::Idle,
            current_tool_call: None,
            last_usage: None,
            totals: SessionTotals::default(),
        };
        session.seed_greeting();
        session
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Current conversation id.
    #[must_use]
    pub const fn conversation_id(&self) -> ConversationId {
        self.conversation_id
    }

    /// Conversation log, oldest first.
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Current turn state.
    #[must_use]
    pub const fn turn_state(&self) -> TurnState {
        self.turn
    }

    /// Whether an assistant reply is streaming.
    #[must_use]
    pub const fn is_typing(&self) -> bool {
        matches!(self.turn, TurnState::Streaming(_))
    }

    /// The message open for append, if any.
    #[must_use]
    pub fn active_message(&self) -> Option<&Message> {
        match self.turn {
            TurnState::Idle => None,
            TurnState::Streaming(id) => self.message(id),
        }
    }

    /// Tool call that has started but not finished.
    #[must_use]
    pub const fn current_tool_call(&self) -> Option<&ToolCall> {
        self.current_tool_call.as_ref()
    }

    /// Usage of the most recent turn.
    #[must_use]
    pub const fn last_usage(&self) -> Option<&UsageSnapshot> {
        self.last_usage.as_ref()
    }

    /// Usage summed over the conversation.
    #[must_use]
    pub const fn totals(&self) -> &SessionTotals {
        &self.totals
    }

    /// Everything the presentation layer renders.
    #[must_use]
    pub fn view(&self) -> SessionView<'_> {
        SessionView {
            conversation_id: self.conversation_id,
            messages: &self.messages,
            typing: self.is_typing(),
            current_tool_call: self.current_tool_call.as_ref(),
            last_usage: self.last_usage.as_ref(),
            totals: &self.totals,
        }
    }

    // =========================================================================
    // Inbound Events
    // =========================================================================

    /// Apply one decoded event.
    ///
    /// Returns `true` if any visible state changed.
    pub fn apply(&mut self, event: ProtocolEvent) -> bool {
        match event {
            ProtocolEvent::Content(delta) => {
                self.append_content(&delta);
                true
            }
            ProtocolEvent::StreamEnd => self.end_stream(),
            ProtocolEvent::ToolCallStarted(call) => {
                self.start_tool_call(call);
                true
            }
            ProtocolEvent::ToolCallEnded => self.end_tool_call(),
            ProtocolEvent::Usage(usage) => {
                self.record_usage(usage);
                true
            }
        }
    }

    /// Append a text delta to the open reply, opening one if needed.
    fn append_content(&mut self, delta: &str) {
        if delta.starts_with(BACKEND_ERROR_PREFIX) {
            tracing::warn!(content = %delta, "Backend reported an error");
        }

        if let TurnState::Streaming(id) = self.turn {
            if let Some(msg) = self.message_mut(id) {
                msg.push_str(delta);
                return;
            }
        }

        // First delta of a turn: the previous turn's usage is no longer current.
        self.last_usage = None;
        let id = self.push(|id| Message::assistant(id, delta));
        self.turn = TurnState::Streaming(id);
        tracing::debug!(message_id = %id, "Assistant reply opened");
    }

    /// Close the open reply. No-op when idle.
    fn end_stream(&mut self) -> bool {
        match self.turn {
            TurnState::Idle => false,
            TurnState::Streaming(id) => {
                tracing::debug!(message_id = %id, "Assistant reply closed");
                self.turn = TurnState::Idle;
                true
            }
        }
    }

    /// Record a tool call and make it current. A call already open is replaced.
    fn start_tool_call(&mut self, call: ToolCall) {
        if let Some(previous) = &self.current_tool_call {
            tracing::debug!(previous = %previous.tool, next = %call.tool, "Tool call replaced before it ended");
        }
        tracing::debug!(tool = %call.tool, "Tool call started");
        self.push(|id| Message::tool_record(id, call.clone()));
        self.current_tool_call = Some(call);
    }

    /// Clear the current tool call. No-op when none is open.
    fn end_tool_call(&mut self) -> bool {
        match self.current_tool_call.take() {
            Some(call) => {
                tracing::debug!(tool = %call.tool, "Tool call ended");
                true
            }
            None => false,
        }
    }

    /// Fold a turn's usage into the totals and keep it as the last snapshot.
    fn record_usage(&mut self, usage: UsageSnapshot) {
        self.totals.absorb(&usage);
        tracing::debug!(
            input = usage.input_tokens,
            output = usage.output_tokens,
            thinking = usage.thinking_tokens,
            cost = usage.cost,
            session_cost = self.totals.cost,
            "Usage recorded"
        );
        self.last_usage = Some(usage);
    }

    // =========================================================================
    // Local Actions
    // =========================================================================

    /// Record a message typed by the user.
    ///
    /// Any reply still streaming is abandoned as-is before the user message
    /// is added.
    pub fn submit_user_message(&mut self, content: impl Into<String>) -> MessageId {
        self.force_idle();
        self.push(|id| Message::user(id, content))
    }

    /// The connection dropped: nothing in flight can still complete.
    pub fn on_transport_lost(&mut self) {
        self.force_idle();
        self.current_tool_call = None;
    }

    /// Start a new conversation: clear the log, the usage totals and all
    /// per-turn state.
    pub fn new_conversation(&mut self) {
        self.conversation_id = ConversationId::generate();
        self.messages.clear();
        self.turn = TurnState::Idle;
        self.current_tool_call = None;
        self.last_usage = None;
        self.totals = SessionTotals::default();
        self.seed_greeting();
        tracing::info!(conversation_id = %self.conversation_id, "New conversation");
    }

    fn force_idle(&mut self) {
        if let TurnState::Streaming(id) = self.turn {
            tracing::debug!(message_id = %id, "Abandoning unterminated reply");
        }
        self.turn = TurnState::Idle;
    }

    fn seed_greeting(&mut self) {
        if let Some(greeting) = self.greeting.clone() {
            self.push(|id| Message::assistant(id, greeting));
        }
    }

    fn push(&mut self, build: impl FnOnce(MessageId) -> Message) -> MessageId {
        let id = self.next_id;
        self.next_id = id.next();
        self.messages.push(build(id));
        id
    }

    fn message(&self, id: MessageId) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.id() == id)
    }

    fn message_mut(&mut self, id: MessageId) -> Option<&mut Message> {
        self.messages.iter_mut().rev().find(|m| m.id() == id)
    }
}

impl Default for ChatSession {
    fn default() -> Self {
        Self::new(None)
    }
}

//! Conversation data model and the JSON payloads carried after markers.
//!
//! These types are the read-only state the presentation layer renders:
//! messages, the tool call in flight, and token/cost accounting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ids::MessageId;

/// Prefix the backend uses for failures it reports inside the content stream.
pub const BACKEND_ERROR_PREFIX: &str = "ERROR:";

// =============================================================================
// Messages
// =============================================================================

/// Who wrote a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Author {
    /// Text typed by the user.
    User,
    /// Text streamed by the assistant, or a record the client synthesized
    /// on the assistant's behalf (greeting, tool call).
    Assistant,
}

impl Author {
    /// Human-readable label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One entry of the conversation log.
///
/// Content can only grow while the session holds this message as its open
/// reply. Every other message is fixed once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    id: MessageId,
    author: Author,
    content: String,
    created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call: Option<ToolCall>,
}

impl Message {
    pub(crate) fn user(id: MessageId, content: impl Into<String>) -> Self {
        Self::new(id, Author::User, content.into(), None)
    }

    pub(crate) fn assistant(id: MessageId, content: impl Into<String>) -> Self {
        Self::new(id, Author::Assistant, content.into(), None)
    }

    pub(crate) fn tool_record(id: MessageId, call: ToolCall) -> Self {
        Self::new(id, Author::Assistant, call.summary(), Some(call))
    }

    fn new(id: MessageId, author: Author, content: String, tool_call: Option<ToolCall>) -> Self {
        Self {
            id,
            author,
            content,
            created_at: Utc::now(),
            tool_call,
        }
    }

    pub(crate) fn push_str(&mut self, delta: &str) {
        self.content.push_str(delta);
    }

    /// Message id.
    #[must_use]
    pub const fn id(&self) -> MessageId {
        self.id
    }

    /// Message author.
    #[must_use]
    pub const fn author(&self) -> Author {
        self.author
    }

    /// Message text.
    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }

    /// When the message was created.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// The tool invocation this message records, if it is a tool-call record.
    #[must_use]
    pub const fn tool_call(&self) -> Option<&ToolCall> {
        self.tool_call.as_ref()
    }

    /// Check if this is a user message.
    #[must_use]
    pub fn is_user(&self) -> bool {
        self.author == Author::User
    }

    /// Check if the backend reported a failure in this message.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.author == Author::Assistant && self.content.starts_with(BACKEND_ERROR_PREFIX)
    }
}

// =============================================================================
// Marker Payloads
// =============================================================================

/// Why a marker payload was rejected.
#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    /// The frame is not JSON or does not have the expected shape.
    #[error("malformed payload: {0}")]
    Json(#[from] serde_json::Error),

    /// The cost is negative or not a finite number.
    #[error("invalid cost: {0}")]
    InvalidCost(f64),
}

/// A tool invocation reported by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Tool name, opaque to the client.
    pub tool: String,
    /// Tool arguments.
    pub args: Map<String, Value>,
}

#[derive(Deserialize)]
struct RawToolCall {
    tool: String,
    #[serde(default)]
    args: Option<Map<String, Value>>,
}

impl ToolCall {
    /// Parse the frame that follows a tool-start marker.
    ///
    /// `args` may be `null`, which is read as no arguments.
    ///
    /// # Errors
    ///
    /// Returns `PayloadError::Json` if the frame is not `{tool, args}`.
    pub fn parse(frame: &str) -> Result<Self, PayloadError> {
        let raw: RawToolCall = serde_json::from_str(frame)?;
        Ok(Self {
            tool: raw.tool,
            args: raw.args.unwrap_or_default(),
        })
    }

    /// One-line description, e.g. `create_issue(project="OPS", priority=2)`.
    #[must_use]
    pub fn summary(&self) -> String {
        let args = self
            .args
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>()
            .join(", ");
        format!("{}({args})", self.tool)
    }
}

/// Token and cost accounting for one completed turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    /// Prompt tokens.
    pub input_tokens: u64,
    /// Completion tokens.
    pub output_tokens: u64,
    /// Reasoning tokens.
    pub thinking_tokens: u64,
    /// Monetary cost of the turn.
    pub cost: f64,
}

#[derive(Deserialize)]
struct RawUsage {
    token_usage: RawTokenUsage,
    cost: f64,
}

#[derive(Deserialize)]
struct RawTokenUsage {
    input_tokens: u64,
    output_tokens: u64,
    #[serde(default)]
    thinking_tokens: u64,
}

impl UsageSnapshot {
    /// Parse the frame that follows a usage marker.
    ///
    /// A `total_tokens` field sent by the backend is ignored; the total is
    /// always recomputed from its parts.
    ///
    /// # Errors
    ///
    /// Returns `PayloadError::Json` for a wrong shape or negative counts and
    /// `PayloadError::InvalidCost` for a negative or non-finite cost.
    pub fn parse(frame: &str) -> Result<Self, PayloadError> {
        let raw: RawUsage = serde_json::from_str(frame)?;
        if !raw.cost.is_finite() || raw.cost < 0.0 {
            return Err(PayloadError::InvalidCost(raw.cost));
        }
        Ok(Self {
            input_tokens: raw.token_usage.input_tokens,
            output_tokens: raw.token_usage.output_tokens,
            thinking_tokens: raw.token_usage.thinking_tokens,
            cost: raw.cost,
        })
    }

    /// Input + output + thinking tokens, saturating at `u64::MAX`.
    #[must_use]
    pub const fn total_tokens(&self) -> u64 {
        self.input_tokens
            .saturating_add(self.output_tokens)
            .saturating_add(self.thinking_tokens)
    }
}

/// Cumulative usage for one conversation.
///
/// Only grows. Reset by starting a new conversation, never by reconnecting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionTotals {
    /// Sum of turn costs.
    pub cost: f64,
    /// Sum of input tokens.
    pub input_tokens: u64,
    /// Sum of output tokens.
    pub output_tokens: u64,
    /// Sum of thinking tokens.
    pub thinking_tokens: u64,
    /// Sum of all tokens.
    pub total_tokens: u64,
}

impl SessionTotals {
    /// Fold one turn's usage into the totals. Counters saturate.
    pub fn absorb(&mut self, usage: &UsageSnapshot) {
        self.cost += usage.cost;
        self.input_tokens = self.input_tokens.saturating_add(usage.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(usage.output_tokens);
        self.thinking_tokens = self.thinking_tokens.saturating_add(usage.thinking_tokens);
        self.total_tokens = self.total_tokens.saturating_add(usage.total_tokens());
    }
}

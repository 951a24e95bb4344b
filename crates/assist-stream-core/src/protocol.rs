//! Wire protocol for the assistant stream.
//!
//! The backend multiplexes reply text, tool-call notifications, usage
//! telemetry and turn boundaries over one sequence of text frames. The only
//! type information is a handful of sentinel frames and the shape of JSON
//! payloads:
//!
//! | Frame                 | Meaning                          | Payload frame follows |
//! |-----------------------|----------------------------------|-----------------------|
//! | `__TOOL_CALL_START__` | tool invocation begins           | `{tool, args}`        |
//! | `__TOOL_CALL_END__`   | tool invocation finished         | no                    |
//! | `__TOKEN_USAGE__`     | usage for the turn               | `{token_usage, cost}` |
//! | `__TOOL_RESULT__`     | tool result acknowledged         | no                    |
//! | `__END_STREAM__`      | assistant turn complete          | no                    |
//! | anything else         | text delta for the open reply    | no                    |
//!
//! [`FrameDecoder`] turns frames into [`ProtocolEvent`]s. A marker and its
//! payload arrive as two frames but decode as one event.

use crate::types::{PayloadError, ToolCall, UsageSnapshot};

/// End of the assistant turn.
pub const STREAM_END: &str = "__END_STREAM__";
/// Next frame describes a tool invocation.
pub const TOOL_CALL_START: &str = "__TOOL_CALL_START__";
/// The current tool invocation finished.
pub const TOOL_CALL_END: &str = "__TOOL_CALL_END__";
/// Next frame carries token usage and cost.
pub const TOKEN_USAGE: &str = "__TOKEN_USAGE__";
/// A tool result was produced; its content is not sent to the client.
pub const TOOL_RESULT: &str = "__TOOL_RESULT__";

/// Classification of a single frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// `__END_STREAM__`.
    StreamEnd,
    /// `__TOOL_CALL_START__`.
    ToolCallStart,
    /// `__TOOL_CALL_END__`.
    ToolCallEnd,
    /// `__TOKEN_USAGE__`.
    UsageMarker,
    /// `__TOOL_RESULT__`.
    ToolResult,
    /// A tool or usage JSON object.
    StructuredPayload,
    /// Reply text.
    Content,
}

/// Classify one frame on content alone.
///
/// Checks run in precedence order; the first match wins.
#[must_use]
pub fn classify(frame: &str) -> FrameKind {
    match frame {
        STREAM_END => FrameKind::StreamEnd,
        TOOL_CALL_START => FrameKind::ToolCallStart,
        TOOL_CALL_END => FrameKind::ToolCallEnd,
        TOKEN_USAGE => FrameKind::UsageMarker,
        TOOL_RESULT => FrameKind::ToolResult,
        _ if is_structured_payload(frame) => FrameKind::StructuredPayload,
        _ => FrameKind::Content,
    }
}

/// Whether the frame is a JSON object shaped like a tool or usage payload.
fn is_structured_payload(frame: &str) -> bool {
    // Text deltas are the common case; skip the parse unless it can be an object.
    if !frame.trim_start().starts_with('{') {
        return false;
    }
    let Ok(serde_json::Value::Object(obj)) = serde_json::from_str::<serde_json::Value>(frame) else {
        return false;
    };
    (obj.contains_key("tool") && obj.contains_key("args"))
        || (obj.contains_key("token_usage") && obj.contains_key("cost"))
}

/// A marker whose payload arrives in the next frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    /// Waiting for `{tool, args}`.
    ToolCallStart,
    /// Waiting for `{token_usage, cost}`.
    TokenUsage,
}

impl Marker {
    /// The sentinel frame for this marker.
    #[must_use]
    pub const fn sentinel(self) -> &'static str {
        match self {
            Self::ToolCallStart => TOOL_CALL_START,
            Self::TokenUsage => TOKEN_USAGE,
        }
    }
}

/// A decoded protocol event that changes session state.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolEvent {
    /// Text delta for the open assistant reply.
    Content(String),
    /// The assistant turn is complete.
    StreamEnd,
    /// A tool invocation started.
    ToolCallStarted(ToolCall),
    /// The current tool invocation finished.
    ToolCallEnded,
    /// Usage for the turn that is finishing.
    Usage(UsageSnapshot),
}

/// Result of feeding one frame to the decoder.
#[derive(Debug)]
pub enum Decoded {
    /// A complete event.
    Event(ProtocolEvent),
    /// A marker was read; the next frame is its payload.
    AwaitingPayload(Marker),
    /// The frame carries nothing for the session (tool result
    /// acknowledgement, or a structured payload without its marker).
    Discarded(FrameKind),
    /// The frame after a marker could not be read as that marker's payload.
    MalformedPayload {
        /// Marker that expected the payload.
        marker: Marker,
        /// Parse failure.
        error: PayloadError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum DecoderState {
    #[default]
    Ready,
    AwaitingPayload(Marker),
}

/// Stateful frame decoder for one connection.
///
/// After a payload-bearing marker the decoder consumes the very next frame as
/// the payload, whatever it contains. Each connection owns its own decoder so
/// a payload wait never outlives the socket it started on.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    state: DecoderState,
}

impl FrameDecoder {
    /// Create a decoder in the ready state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The marker whose payload is pending, if any.
    #[must_use]
    pub const fn pending_marker(&self) -> Option<Marker> {
        match self.state {
            DecoderState::Ready => None,
            DecoderState::AwaitingPayload(marker) => Some(marker),
        }
    }

    /// Feed the next frame, in arrival order.
    pub fn push(&mut self, frame: &str) -> Decoded {
        if let DecoderState::AwaitingPayload(marker) = std::mem::take(&mut self.state) {
            return decode_payload(marker, frame);
        }

        let kind = classify(frame);
        tracing::trace!(?kind, len = frame.len(), "Classified frame");
        match kind {
            FrameKind::StreamEnd => Decoded::Event(ProtocolEvent::StreamEnd),
            FrameKind::ToolCallEnd => Decoded::Event(ProtocolEvent::ToolCallEnded),
            FrameKind::ToolCallStart => self.await_payload(Marker::ToolCallStart),
            FrameKind::UsageMarker => self.await_payload(Marker::TokenUsage),
            FrameKind::ToolResult | FrameKind::StructuredPayload => Decoded::Discarded(kind),
            FrameKind::Content => Decoded::Event(ProtocolEvent::Content(frame.to_string())),
        }
    }

    fn await_payload(&mut self, marker: Marker) -> Decoded {
        self.state = DecoderState::AwaitingPayload(marker);
        Decoded::AwaitingPayload(marker)
    }
}

fn decode_payload(marker: Marker, frame: &str) -> Decoded {
    let parsed = match marker {
        Marker::ToolCallStart => ToolCall::parse(frame).map(ProtocolEvent::ToolCallStarted),
        Marker::TokenUsage => UsageSnapshot::parse(frame).map(ProtocolEvent::Usage),
    };
    match parsed {
        Ok(event) => Decoded::Event(event),
        Err(error) => Decoded::MalformedPayload { marker, error },
    }
}

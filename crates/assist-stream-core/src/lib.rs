//! Core of the assist chat client.
//!
//! The assistant backend streams everything over one WebSocket as plain text
//! frames: reply text, tool-call notifications, usage telemetry and turn
//! boundaries, told apart only by sentinel frames and JSON shape. This crate
//! provides:
//!
//! - **Protocol**: frame classification and the marker + payload decoder
//! - **Session**: the turn state machine, reply accumulation, tool-call
//!   tracking and usage aggregation
//! - **Connection**: socket lifecycle with fixed-delay reconnect
//! - **Client**: glue that feeds transport events into the session
//!
//! # Example
//!
//! ```
//! use assist_stream_core::protocol::{Decoded, FrameDecoder};
//! use assist_stream_core::ChatSession;
//!
//! let mut session = ChatSession::new(None);
//! let mut decoder = FrameDecoder::new();
//!
//! for frame in ["Hello", ", world", "__END_STREAM__"] {
//!     if let Decoded::Event(event) = decoder.push(frame) {
//!         session.apply(event);
//!     }
//! }
//!
//! assert_eq!(session.messages()[0].content(), "Hello, world");
//! assert!(!session.is_typing());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod ids;
pub mod protocol;
pub mod session;
pub mod types;

pub use client::{ChatClient, SendOutcome};
pub use config::ClientConfig;
pub use connection::{ConnectionManager, LinkUpdate, OutboundPermit, Phase, TransportEvent};
pub use error::{CoreError, Result};
pub use ids::{ConversationId, IdError, MessageId};
pub use session::{ChatSession, SessionView, TurnState};
pub use types::{Author, Message, PayloadError, SessionTotals, ToolCall, UsageSnapshot};

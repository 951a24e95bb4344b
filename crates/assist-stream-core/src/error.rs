//! Error types for the assist-stream core.
//!
//! Frame-level problems (malformed payloads, unexpected frames) are never
//! errors: the protocol drops them and keeps going. Only configuration and
//! connection setup surface as `CoreError`.

use thiserror::Error;

/// A result type using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors returned by the core.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The endpoint is not a `ws://` or `wss://` URL.
    #[error("invalid endpoint '{0}': expected a ws:// or wss:// URL")]
    InvalidEndpoint(String),

    /// The upgrade request could not be built.
    #[error("invalid upgrade request: {0}")]
    Request(String),

    /// The configuration is not usable.
    #[error("invalid configuration: {0}")]
    Config(String),
}

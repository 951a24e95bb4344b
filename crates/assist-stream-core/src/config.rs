//! Client configuration types.

use std::time::Duration;

use serde::Deserialize;

use crate::error::{CoreError, Result};

/// Configuration for the chat client.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// WebSocket endpoint (e.g., "wss://assistant.example.com/ws/chat").
    pub endpoint: String,

    /// Access token forwarded as the `access_token` cookie.
    #[serde(default)]
    pub access_token: Option<String>,

    /// Site id forwarded as the `cloud_id` cookie.
    #[serde(default)]
    pub cloud_id: Option<String>,

    /// Fixed delay before reconnecting after a close or error, in milliseconds.
    #[serde(default = "ClientConfig::default_reconnect_delay")]
    pub reconnect_delay_ms: u64,

    /// Capacity of the transport event channel.
    #[serde(default = "ClientConfig::default_event_buffer")]
    pub event_buffer: usize,

    /// Capacity of the outbound frame channel.
    #[serde(default = "ClientConfig::default_outbound_buffer")]
    pub outbound_buffer: usize,

    /// Assistant message shown at the start of every conversation.
    #[serde(default = "ClientConfig::default_greeting")]
    pub greeting: Option<String>,
}

impl ClientConfig {
    /// Create a configuration for `endpoint` with every other field defaulted.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            access_token: None,
            cloud_id: None,
            reconnect_delay_ms: Self::default_reconnect_delay(),
            event_buffer: Self::default_event_buffer(),
            outbound_buffer: Self::default_outbound_buffer(),
            greeting: Self::default_greeting(),
        }
    }

    const fn default_reconnect_delay() -> u64 {
        2000
    }

    const fn default_event_buffer() -> usize {
        128
    }

    const fn default_outbound_buffer() -> usize {
        32
    }

    #[allow(clippy::unnecessary_wraps)]
    fn default_greeting() -> Option<String> {
        Some("Hello! I'm your automation assistant. How can I help you today?".to_string())
    }

    /// Get the reconnect delay as a `Duration`.
    #[must_use]
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Check that the configuration can be used to connect.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidEndpoint` for a non-WebSocket endpoint and
    /// `CoreError::Config` for zero-sized channels.
    pub fn validate(&self) -> Result<()> {
        if websocket_host(&self.endpoint).map_or(true, str::is_empty) {
            return Err(CoreError::InvalidEndpoint(self.endpoint.clone()));
        }
        if self.event_buffer == 0 || self.outbound_buffer == 0 {
            return Err(CoreError::Config("channel buffers must be non-zero".to_string()));
        }
        Ok(())
    }

    /// Cookie header value carrying the credentials, if a token is set.
    #[must_use]
    pub fn cookie_header(&self) -> Option<String> {
        let token = self.access_token.as_deref()?;
        let mut cookie = format!("access_token={token}");
        if let Some(cloud_id) = self.cloud_id.as_deref() {
            cookie.push_str("; cloud_id=");
            cookie.push_str(cloud_id);
        }
        Some(cookie)
    }
}

/// Extract the host part of a `ws://` or `wss://` URL.
pub(crate) fn websocket_host(url: &str) -> Option<&str> {
    let rest = url
        .strip_prefix("wss://")
        .or_else(|| url.strip_prefix("ws://"))?;
    rest.split('/').next()
}

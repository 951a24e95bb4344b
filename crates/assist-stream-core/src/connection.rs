//! WebSocket connection lifecycle.
//!
//! [`ConnectionManager`] owns the single socket of a chat session. Each
//! connection attempt runs in its own task and reports back through a
//! [`TransportEvent`] channel; every event is tagged with the generation of
//! the attempt that produced it, so events from a socket that has since been
//! replaced or torn down are ignored.
//!
//! On close or error the manager schedules one reconnect after a fixed delay.
//! Attempts are unbounded and continue for as long as the session is
//! authenticated.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::COOKIE;
use tokio_tungstenite::tungstenite::http::{HeaderValue, Request};
use tokio_tungstenite::tungstenite::Message;

use crate::config::ClientConfig;
use crate::error::{CoreError, Result};
use crate::protocol::{Decoded, FrameDecoder};

/// How long a closing link may take to send its Close frame before it is aborted.
const CLOSE_GRACE: Duration = Duration::from_millis(500);

/// Lifecycle phase of the current connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Handshake in progress.
    Connecting,
    /// Frames can flow both ways.
    Open,
    /// No socket. A reconnect may be pending.
    Closed,
}

impl Phase {
    /// Human-readable display string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Open => "connected",
            Self::Closed => "disconnected",
        }
    }
}

/// Events reported by connection and timer tasks.
#[derive(Debug)]
pub enum TransportEvent {
    /// The handshake succeeded.
    Opened {
        /// Connection attempt.
        generation: u64,
    },
    /// A text frame arrived.
    Frame {
        /// Connection attempt.
        generation: u64,
        /// Frame text.
        text: String,
    },
    /// The socket closed.
    Closed {
        /// Connection attempt.
        generation: u64,
        /// Close reason sent by the peer, if any.
        reason: Option<String>,
    },
    /// The handshake or the socket failed.
    Failed {
        /// Connection attempt.
        generation: u64,
        /// Failure description.
        error: String,
    },
    /// The reconnect delay elapsed.
    ReconnectDue {
        /// Connection attempt that was lost.
        generation: u64,
    },
}

impl TransportEvent {
    /// Connection attempt this event belongs to.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        match self {
            Self::Opened { generation }
            | Self::Frame { generation, .. }
            | Self::Closed { generation, .. }
            | Self::Failed { generation, .. }
            | Self::ReconnectDue { generation } => *generation,
        }
    }
}

/// What a transport event meant for the session.
#[derive(Debug)]
pub enum LinkUpdate {
    /// The socket is open.
    Opened,
    /// A frame went through the connection's decoder.
    Decoded(Decoded),
    /// The socket is gone; anything in flight will not complete.
    Lost,
    /// A new connection attempt started.
    Reconnecting,
}

/// Commands from the manager to a link task.
#[derive(Debug)]
enum LinkCommand {
    /// Write one text frame.
    Text(String),
    /// Send a Close frame and stop.
    Close,
}

/// A reserved slot in the outbound queue of the open socket.
///
/// Obtained from [`ConnectionManager::reserve`]; sending through it cannot
/// fail for lack of capacity.
pub struct OutboundPermit<'a> {
    permit: mpsc::Permit<'a, LinkCommand>,
}

impl OutboundPermit<'_> {
    /// Queue `text` as one frame.
    pub fn send(self, text: impl Into<String>) {
        self.permit.send(LinkCommand::Text(text.into()));
    }
}

impl std::fmt::Debug for OutboundPermit<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboundPermit").finish_non_exhaustive()
    }
}

/// One physical socket attempt.
struct Link {
    outbound: mpsc::Sender<LinkCommand>,
    task: JoinHandle<()>,
    decoder: FrameDecoder,
}

/// Owns the socket lifecycle of one chat session.
pub struct ConnectionManager {
    endpoint: String,
    cookie: Option<String>,
    reconnect_delay: Duration,
    outbound_buffer: usize,
    events: mpsc::Sender<TransportEvent>,
    generation: u64,
    phase: Phase,
    link: Option<Link>,
    reconnect: Option<JoinHandle<()>>,
    authenticated: bool,
}

impl ConnectionManager {
    /// Create a manager that reports through `events`. Nothing connects until
    /// [`connect`](Self::connect) or [`set_authenticated`](Self::set_authenticated).
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration does not validate.
    pub fn new(config: &ClientConfig, events: mpsc::Sender<TransportEvent>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            endpoint: config.endpoint.clone(),
            cookie: config.cookie_header(),
            reconnect_delay: config.reconnect_delay(),
            outbound_buffer: config.outbound_buffer,
            events,
            generation: 0,
            phase: Phase::Closed,
            link: None,
            reconnect: None,
            authenticated: false,
        })
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    /// Current connection attempt.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether a reconnect is scheduled.
    #[must_use]
    pub const fn reconnect_pending(&self) -> bool {
        self.reconnect.is_some()
    }

    /// Whether the session is authenticated.
    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Endpoint this manager connects to.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Update the authentication signal.
    ///
    /// Becoming authenticated connects if nothing is connected or scheduled.
    /// Losing authentication tears everything down without reconnecting.
    ///
    /// # Errors
    ///
    /// Returns an error if the upgrade request cannot be built.
    pub fn set_authenticated(&mut self, authenticated: bool) -> Result<()> {
        self.authenticated = authenticated;
        if !authenticated {
            self.shutdown();
            return Ok(());
        }
        if self.phase == Phase::Closed && self.reconnect.is_none() {
            self.connect()?;
        }
        Ok(())
    }

    /// Open a new connection, closing the current one first.
    ///
    /// # Errors
    ///
    /// Returns an error if the upgrade request cannot be built.
    pub fn connect(&mut self) -> Result<()> {
        self.teardown();
        let request = self.build_request()?;

        self.generation += 1;
        let (outbound_tx, outbound_rx) = mpsc::channel::<LinkCommand>(self.outbound_buffer);
        let task = tokio::spawn(run_link(
            request,
            self.generation,
            self.events.clone(),
            outbound_rx,
        ));

        self.link = Some(Link {
            outbound: outbound_tx,
            task,
            decoder: FrameDecoder::new(),
        });
        self.phase = Phase::Connecting;
        tracing::info!(endpoint = %self.endpoint, generation = self.generation, "Connecting");
        Ok(())
    }

    /// Close the socket and cancel any pending reconnect. Events already in
    /// flight from the old socket or timer are ignored afterwards.
    pub fn shutdown(&mut self) {
        self.teardown();
        self.generation += 1;
        tracing::info!(generation = self.generation, "Connection shut down");
    }

    /// Reserve room for one outbound frame. Only succeeds while the socket
    /// is open and its queue has capacity.
    pub fn reserve(&self) -> Option<OutboundPermit<'_>> {
        if self.phase != Phase::Open {
            tracing::warn!(phase = self.phase.as_str(), "No outbound slot: not connected");
            return None;
        }
        let link = self.link.as_ref()?;
        match link.outbound.try_reserve() {
            Ok(permit) => Some(OutboundPermit { permit }),
            Err(e) => {
                tracing::warn!(error = %e, "No outbound slot");
                None
            }
        }
    }

    /// Queue a text frame. Only succeeds while the socket is open.
    pub fn send(&self, text: &str) -> bool {
        match self.reserve() {
            Some(permit) => {
                permit.send(text);
                true
            }
            None => false,
        }
    }

    /// Drop any marker still waiting for its payload on the current socket.
    pub fn reset_decoder(&mut self) {
        if let Some(link) = self.link.as_mut() {
            if let Some(marker) = link.decoder.pending_marker() {
                tracing::debug!(marker = marker.sentinel(), "Discarding pending marker");
            }
            link.decoder = FrameDecoder::new();
        }
    }

    /// Process one event from the transport channel.
    ///
    /// Returns `None` for stale events and for events that need no action.
    pub fn handle_event(&mut self, event: TransportEvent) -> Option<LinkUpdate> {
        if event.generation() != self.generation {
            tracing::debug!(
                event_generation = event.generation(),
                current = self.generation,
                "Ignoring stale transport event"
            );
            return None;
        }

        match event {
            TransportEvent::Opened { .. } => {
                self.phase = Phase::Open;
                tracing::info!(generation = self.generation, "Connected");
                Some(LinkUpdate::Opened)
            }
            TransportEvent::Frame { text, .. } => {
                let link = self.link.as_mut()?;
                Some(LinkUpdate::Decoded(link.decoder.push(&text)))
            }
            TransportEvent::Closed { reason, .. } => {
                tracing::info!(reason = ?reason, "Connection closed");
                Some(self.on_lost())
            }
            TransportEvent::Failed { error, .. } => {
                tracing::warn!(error = %error, "Connection failed");
                Some(self.on_lost())
            }
            TransportEvent::ReconnectDue { .. } => {
                self.reconnect = None;
                if !self.authenticated || self.phase != Phase::Closed {
                    return None;
                }
                match self.connect() {
                    Ok(()) => Some(LinkUpdate::Reconnecting),
                    Err(e) => {
                        tracing::warn!(error = %e, "Reconnect failed");
                        None
                    }
                }
            }
        }
    }

    fn on_lost(&mut self) -> LinkUpdate {
        self.phase = Phase::Closed;
        if let Some(link) = self.link.take() {
            link.task.abort();
        }
        if self.authenticated {
            self.schedule_reconnect();
        }
        LinkUpdate::Lost
    }

    fn schedule_reconnect(&mut self) {
        self.cancel_reconnect();
        let events = self.events.clone();
        let generation = self.generation;
        let delay = self.reconnect_delay;
        tracing::info!(?delay, "Scheduling reconnect");
        self.reconnect = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(TransportEvent::ReconnectDue { generation }).await;
        }));
    }

    fn cancel_reconnect(&mut self) {
        if let Some(timer) = self.reconnect.take() {
            timer.abort();
        }
    }

    fn teardown(&mut self) {
        self.cancel_reconnect();
        if let Some(link) = self.link.take() {
            tracing::debug!(generation = self.generation, "Closing connection");
            close_link(link);
        }
        self.phase = Phase::Closed;
    }

    fn build_request(&self) -> Result<Request<()>> {
        let mut request = self
            .endpoint
            .as_str()
            .into_client_request()
            .map_err(|e| CoreError::Request(e.to_string()))?;
        if let Some(cookie) = &self.cookie {
            let value =
                HeaderValue::from_str(cookie).map_err(|e| CoreError::Request(e.to_string()))?;
            request.headers_mut().insert(COOKIE, value);
        }
        Ok(request)
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("endpoint", &self.endpoint)
            .field("generation", &self.generation)
            .field("phase", &self.phase)
            .field("reconnect_pending", &self.reconnect.is_some())
            .field("authenticated", &self.authenticated)
            .finish_non_exhaustive()
    }
}

/// Ask the link task to send a Close frame, aborting it if it cannot do so
/// within [`CLOSE_GRACE`].
fn close_link(link: Link) {
    let Link { outbound, task, .. } = link;
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        task.abort();
        return;
    };
    if outbound.try_send(LinkCommand::Close).is_err() {
        task.abort();
        return;
    }
    let abort = task.abort_handle();
    runtime.spawn(async move {
        if timeout(CLOSE_GRACE, task).await.is_err() {
            abort.abort();
        }
    });
}

/// Task that owns one socket: performs the handshake, forwards inbound text
/// frames in order and writes outbound frames.
async fn run_link(
    request: Request<()>,
    generation: u64,
    events: mpsc::Sender<TransportEvent>,
    mut outbound: mpsc::Receiver<LinkCommand>,
) {
    let ws_stream = match connect_async(request).await {
        Ok((stream, _)) => stream,
        Err(e) => {
            let _ = events
                .send(TransportEvent::Failed {
                    generation,
                    error: e.to_string(),
                })
                .await;
            return;
        }
    };

    if events.send(TransportEvent::Opened { generation }).await.is_err() {
        return;
    }

    let (mut write, mut read) = ws_stream.split();

    let end = loop {
        tokio::select! {
            Some(command) = outbound.recv() => match command {
                LinkCommand::Text(text) => {
                    if let Err(e) = write.send(Message::Text(text)).await {
                        break TransportEvent::Failed { generation, error: e.to_string() };
                    }
                }
                // The manager has already moved on; nothing to report.
                LinkCommand::Close => {
                    let _ = write.send(Message::Close(None)).await;
                    return;
                }
            },
            incoming = read.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if events.send(TransportEvent::Frame { generation, text }).await.is_err() {
                        return;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    break TransportEvent::Closed {
                        generation,
                        reason: frame.map(|f| f.reason.to_string()),
                    };
                }
                // Control frames are answered by tungstenite; binary frames are not part of the protocol.
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_) | Message::Binary(_))) => {}
                Some(Err(e)) => {
                    break TransportEvent::Failed { generation, error: e.to_string() };
                }
                None => break TransportEvent::Closed { generation, reason: None },
            }
        }
    };

    let _ = events.send(end).await;
}

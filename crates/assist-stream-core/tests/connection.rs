//! End-to-end tests of the chat client against a local WebSocket server.
//!
//! Each test binds its own server on an ephemeral port. The server accepts
//! every connection in the background and hands it to the test, which then
//! plays the backend's side of the stream frame by frame.

use std::time::Duration;

use assist_stream_core::protocol::{STREAM_END, TOKEN_USAGE, TOOL_CALL_END, TOOL_CALL_START};
use assist_stream_core::{ChatClient, ClientConfig, Phase, SendOutcome, TransportEvent};
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::header::COOKIE;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};

/// Upper bound for any single wait in these tests.
const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Reconnect delay used by the client under test.
const RECONNECT_MS: u64 = 50;

// =============================================================================
// Test Server
// =============================================================================

/// One accepted server-side socket.
struct ServerConn {
    ws: WebSocketStream<TcpStream>,
    cookie: Option<String>,
}

impl ServerConn {
    async fn send_frames(&mut self, frames: &[&str]) {
        for frame in frames {
            self.ws
                .send(Message::Text((*frame).to_string()))
                .await
                .expect("server send failed");
        }
    }

    async fn next_text(&mut self) -> String {
        loop {
            let msg = timeout(EVENT_TIMEOUT, self.ws.next())
                .await
                .expect("timed out waiting for client frame")
                .expect("client closed the socket")
                .expect("server read failed");
            if let Message::Text(text) = msg {
                return text;
            }
        }
    }
}

struct TestServer {
    url: String,
    connections: mpsc::Receiver<ServerConn>,
}

impl TestServer {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::channel(8);
        tokio::spawn(serve(listener, tx));
        Self {
            url: format!("ws://{addr}/ws/chat"),
            connections: rx,
        }
    }

    async fn next_connection(&mut self) -> ServerConn {
        timeout(EVENT_TIMEOUT, self.connections.recv())
            .await
            .expect("timed out waiting for a connection")
            .expect("server task stopped")
    }
}

async fn serve(listener: TcpListener, connections: mpsc::Sender<ServerConn>) {
    while let Ok((stream, _)) = listener.accept().await {
        let mut cookie = None;
        let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
            cookie = request
                .headers()
                .get(COOKIE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            Ok(response)
        };
        let Ok(ws) = accept_hdr_async(stream, callback).await else {
            continue;
        };
        if connections.send(ServerConn { ws, cookie }).await.is_err() {
            break;
        }
    }
}

// =============================================================================
// Client Helpers
// =============================================================================

fn client(url: &str) -> (ChatClient, mpsc::Receiver<TransportEvent>) {
    let mut config = ClientConfig::new(url);
    config.greeting = None;
    config.reconnect_delay_ms = RECONNECT_MS;
    ChatClient::new(config).unwrap()
}

/// Feed transport events into the client until `done` holds.
async fn pump_until(
    client: &mut ChatClient,
    events: &mut mpsc::Receiver<TransportEvent>,
    mut done: impl FnMut(&ChatClient) -> bool,
) {
    timeout(EVENT_TIMEOUT, async {
        while !done(client) {
            let event = events.recv().await.expect("event channel closed");
            client.handle_event(event);
        }
    })
    .await
    .expect("timed out waiting for client state");
}

fn contents(client: &ChatClient) -> Vec<String> {
    client
        .view()
        .messages
        .iter()
        .map(|m| m.content().to_string())
        .collect()
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn streams_reply_and_usage() {
    let mut server = TestServer::start().await;
    let (mut client, mut events) = client(&server.url);

    client.set_authenticated(true).unwrap();
    pump_until(&mut client, &mut events, ChatClient::is_connected).await;
    let mut conn = server.next_connection().await;

    conn.send_frames(&[
        "Hello",
        ", how can I help?",
        TOKEN_USAGE,
        r#"{"token_usage":{"input_tokens":12,"output_tokens":8,"thinking_tokens":4},"cost":0.003}"#,
        STREAM_END,
    ])
    .await;

    pump_until(&mut client, &mut events, |c| {
        c.view().last_usage.is_some() && !c.view().typing
    })
    .await;

    assert_eq!(contents(&client), vec!["Hello, how can I help?"]);
    let view = client.view();
    assert_eq!(view.totals.total_tokens, 24);
    assert!((view.totals.cost - 0.003).abs() < 1e-12);
}

#[tokio::test]
async fn tool_calls_are_recorded_between_markers() {
    let mut server = TestServer::start().await;
    let (mut client, mut events) = client(&server.url);

    client.set_authenticated(true).unwrap();
    pump_until(&mut client, &mut events, ChatClient::is_connected).await;
    let mut conn = server.next_connection().await;

    conn.send_frames(&[
        "Creating the ticket",
        TOOL_CALL_START,
        r#"{"tool":"create_issue","args":{"project":"OPS"}}"#,
    ])
    .await;
    pump_until(&mut client, &mut events, |c| c.view().current_tool_call.is_some()).await;
    assert_eq!(client.view().current_tool_call.unwrap().tool, "create_issue");

    conn.send_frames(&[TOOL_CALL_END, STREAM_END]).await;
    pump_until(&mut client, &mut events, |c| {
        c.view().current_tool_call.is_none() && !c.view().typing
    })
    .await;

    assert_eq!(
        contents(&client),
        vec!["Creating the ticket", r#"create_issue(project="OPS")"#]
    );
}

#[tokio::test]
async fn outbound_text_is_sent_verbatim() {
    let mut server = TestServer::start().await;
    let (mut client, mut events) = client(&server.url);

    client.set_authenticated(true).unwrap();
    pump_until(&mut client, &mut events, ChatClient::is_connected).await;
    let mut conn = server.next_connection().await;

    let text = "  list open issues in {\"project\": \"OPS\"}  ";
    assert!(matches!(client.send(text), SendOutcome::Sent(_)));
    assert_eq!(conn.next_text().await, text);
    assert_eq!(contents(&client), vec![text]);
}

#[tokio::test]
async fn credentials_travel_as_cookies() {
    let mut server = TestServer::start().await;
    let mut config = ClientConfig::new(server.url.clone());
    config.access_token = Some("tok-123".to_string());
    config.cloud_id = Some("site-9".to_string());
    let (mut client, mut events) = ChatClient::new(config).unwrap();

    client.set_authenticated(true).unwrap();
    pump_until(&mut client, &mut events, ChatClient::is_connected).await;
    let conn = server.next_connection().await;

    assert_eq!(conn.cookie.as_deref(), Some("access_token=tok-123; cloud_id=site-9"));
}

#[tokio::test]
async fn send_after_server_close_is_noop() {
    let mut server = TestServer::start().await;
    let (mut client, mut events) = client(&server.url);

    client.set_authenticated(true).unwrap();
    pump_until(&mut client, &mut events, ChatClient::is_connected).await;
    let mut conn = server.next_connection().await;

    conn.send_frames(&["partial reply"]).await;
    pump_until(&mut client, &mut events, |c| c.view().typing).await;

    conn.ws.close(None).await.unwrap();
    pump_until(&mut client, &mut events, |c| c.phase() == Phase::Closed).await;

    assert!(!client.view().typing);
    assert_eq!(client.send("anyone there?"), SendOutcome::NotConnected);
    assert_eq!(contents(&client), vec!["partial reply"]);
}

#[tokio::test]
async fn reconnect_discards_pending_marker_and_keeps_totals() {
    let mut server = TestServer::start().await;
    let (mut client, mut events) = client(&server.url);

    client.set_authenticated(true).unwrap();
    pump_until(&mut client, &mut events, ChatClient::is_connected).await;
    let mut conn = server.next_connection().await;

    conn.send_frames(&[
        "Hi there",
        TOKEN_USAGE,
        r#"{"token_usage":{"input_tokens":12,"output_tokens":8},"cost":0.002}"#,
        STREAM_END,
    ])
    .await;
    pump_until(&mut client, &mut events, |c| c.view().totals.total_tokens == 20).await;

    // Drop the socket right after a marker, before its payload.
    conn.send_frames(&["Looking", TOOL_CALL_START]).await;
    conn.ws.close(None).await.unwrap();
    pump_until(&mut client, &mut events, |c| c.phase() == Phase::Closed).await;
    assert!(!client.view().typing);

    pump_until(&mut client, &mut events, ChatClient::is_connected).await;
    let mut conn = server.next_connection().await;

    // On the new socket this is an unmarked payload, not a tool call.
    conn.send_frames(&[r#"{"tool":"create_issue","args":{}}"#, "Fresh", STREAM_END])
        .await;
    pump_until(&mut client, &mut events, |c| {
        c.view().messages.last().map(|m| m.content()) == Some("Fresh") && !c.view().typing
    })
    .await;

    assert_eq!(contents(&client), vec!["Hi there", "Looking", "Fresh"]);
    let view = client.view();
    assert!(view.messages.iter().all(|m| m.tool_call().is_none()));
    assert!(view.current_tool_call.is_none());
    assert_eq!(view.totals.total_tokens, 20);
    assert!((view.totals.cost - 0.002).abs() < 1e-12);
}

#[tokio::test]
async fn shutdown_cancels_pending_reconnect() {
    let mut server = TestServer::start().await;
    let (mut client, mut events) = client(&server.url);

    client.set_authenticated(true).unwrap();
    pump_until(&mut client, &mut events, ChatClient::is_connected).await;
    let mut conn = server.next_connection().await;

    conn.ws.close(None).await.unwrap();
    pump_until(&mut client, &mut events, |c| c.phase() == Phase::Closed).await;
    client.shutdown();

    // Anything still in flight belongs to the old connection.
    let quiet = Duration::from_millis(RECONNECT_MS * 4);
    while let Ok(Some(event)) = timeout(quiet, events.recv()).await {
        assert!(!client.handle_event(event));
    }

    assert_eq!(client.phase(), Phase::Closed);
    assert!(timeout(quiet, server.connections.recv()).await.is_err());
}

/// Wait for the client's Close frame, skipping anything sent before it.
async fn expect_close(conn: &mut ServerConn) {
    timeout(EVENT_TIMEOUT, async {
        loop {
            match conn.ws.next().await {
                Some(Ok(Message::Close(_))) => return,
                Some(Ok(_)) => {}
                other => panic!("socket ended without a Close frame: {other:?}"),
            }
        }
    })
    .await
    .expect("timed out waiting for a Close frame");
}

#[tokio::test]
async fn shutdown_sends_close_frame() {
    let mut server = TestServer::start().await;
    let (mut client, mut events) = client(&server.url);

    client.set_authenticated(true).unwrap();
    pump_until(&mut client, &mut events, ChatClient::is_connected).await;
    let mut conn = server.next_connection().await;

    client.shutdown();
    assert_eq!(client.phase(), Phase::Closed);
    expect_close(&mut conn).await;
}

#[tokio::test]
async fn reconnect_closes_the_old_socket() {
    let mut server = TestServer::start().await;
    let (mut client, mut events) = client(&server.url);

    client.set_authenticated(true).unwrap();
    pump_until(&mut client, &mut events, ChatClient::is_connected).await;
    let mut old = server.next_connection().await;

    client.reconnect().unwrap();
    expect_close(&mut old).await;

    pump_until(&mut client, &mut events, ChatClient::is_connected).await;
    let mut fresh = server.next_connection().await;
    assert!(matches!(client.send("still here"), SendOutcome::Sent(_)));
    assert_eq!(fresh.next_text().await, "still here");
}

#[tokio::test]
async fn new_conversation_keeps_the_connection() {
    let mut server = TestServer::start().await;
    let (mut client, mut events) = client(&server.url);

    client.set_authenticated(true).unwrap();
    pump_until(&mut client, &mut events, ChatClient::is_connected).await;
    let mut conn = server.next_connection().await;

    conn.send_frames(&[
        "Done",
        TOKEN_USAGE,
        r#"{"token_usage":{"input_tokens":1,"output_tokens":1},"cost":0.001}"#,
        STREAM_END,
    ])
    .await;
    pump_until(&mut client, &mut events, |c| c.view().totals.total_tokens == 2).await;

    let before = client.view().conversation_id;
    client.new_conversation();

    let view = client.view();
    assert_ne!(view.conversation_id, before);
    assert!(view.messages.is_empty());
    assert_eq!(view.totals.total_tokens, 0);
    assert!(client.is_connected());

    assert!(matches!(client.send("next question"), SendOutcome::Sent(_)));
    assert_eq!(conn.next_text().await, "next question");
}

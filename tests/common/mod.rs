//! Shared fixtures for the integration tests
//!
//! - `MockTransport`: in-memory transport; each connect yields a `MockPeer`
//!   that plays the server side
//! - `spawn_ws_server`: a local WebSocket server speaking the realtime
//!   protocol closely enough for handshake and framing tests

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

use waav_realtime::core::realtime::{
    RealtimeError, RealtimeResult, Transport, TransportEvent, TransportEvents, TransportSink,
};

/// How long a test waits for traffic before giving up
pub const WAIT: Duration = Duration::from_secs(2);

// =============================================================================
// In-memory transport
// =============================================================================

struct MockSink {
    sent: mpsc::UnboundedSender<String>,
    closed: Arc<AtomicBool>,
}

impl TransportSink for MockSink {
    fn send(&self, text: String) -> RealtimeResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RealtimeError::WebSocketError("closed".to_string()));
        }
        self.sent
            .send(text)
            .map_err(|_| RealtimeError::WebSocketError("peer dropped".to_string()))
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Server side of one in-memory connection
pub struct MockPeer {
    sent: mpsc::UnboundedReceiver<String>,
    inbound: mpsc::UnboundedSender<TransportEvent>,
    closed: Arc<AtomicBool>,
}

impl MockPeer {
    /// Deliver a server event to the client.
    pub fn push(&self, event: Value) {
        let _ = self.inbound.send(TransportEvent::Message(event.to_string()));
    }

    /// Deliver a raw text frame to the client.
    pub fn push_text(&self, text: &str) {
        let _ = self.inbound.send(TransportEvent::Message(text.to_string()));
    }

    /// Close the connection from the server side.
    pub fn hang_up(&self) {
        let _ = self.inbound.send(TransportEvent::Closed);
    }

    /// Fail the connection from the server side.
    pub fn fail(&self, reason: &str) {
        let _ = self.inbound.send(TransportEvent::Error(reason.to_string()));
    }

    /// Whether the client closed its sink.
    pub fn client_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Next message the client sent, parsed.
    pub async fn next_sent(&mut self) -> Value {
        let text = tokio::time::timeout(WAIT, self.sent.recv())
            .await
            .expect("timed out waiting for a client message")
            .expect("client sink dropped");
        serde_json::from_str(&text).expect("client sent invalid JSON")
    }

    /// Next client message of `event_type`, skipping others.
    pub async fn next_sent_of(&mut self, event_type: &str) -> Value {
        loop {
            let message = self.next_sent().await;
            if message["type"] == event_type {
                return message;
            }
        }
    }

    /// Everything the client sent so far.
    pub fn drain_sent(&mut self) -> Vec<Value> {
        let mut messages = Vec::new();
        while let Ok(text) = self.sent.try_recv() {
            messages.push(serde_json::from_str(&text).expect("client sent invalid JSON"));
        }
        messages
    }
}

/// Transport handing out in-memory connections
pub struct MockTransport {
    peers: mpsc::UnboundedSender<MockPeer>,
    refuse: AtomicBool,
    connects: AtomicUsize,
}

impl MockTransport {
    /// Transport plus the receiver of the peers it creates.
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<MockPeer>) {
        let (peers, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            peers,
            refuse: AtomicBool::new(false),
            connects: AtomicUsize::new(0),
        });
        (transport, rx)
    }

    /// Make subsequent connects fail.
    pub fn refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self) -> RealtimeResult<(Box<dyn TransportSink>, TransportEvents)> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.refuse.load(Ordering::SeqCst) {
            return Err(RealtimeError::ConnectionFailed("refused".to_string()));
        }

        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));

        let _ = self.peers.send(MockPeer {
            sent: sent_rx,
            inbound: inbound_tx,
            closed: closed.clone(),
        });

        Ok((
            Box::new(MockSink {
                sent: sent_tx,
                closed,
            }),
            inbound_rx,
        ))
    }
}

/// Receive the peer created by the latest connect.
pub async fn next_peer(peers: &mut mpsc::UnboundedReceiver<MockPeer>) -> MockPeer {
    tokio::time::timeout(WAIT, peers.recv())
        .await
        .expect("timed out waiting for a connection")
        .expect("transport dropped")
}

/// Poll `condition` until it holds or [`WAIT`] elapses.
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

// =============================================================================
// Server event builders
// =============================================================================

pub fn session_created() -> Value {
    json!({
        "event_id": "event_session",
        "type": "session.created",
        "session": {"id": "sess_001", "object": "realtime.session", "model": "gpt-4o-realtime-preview"}
    })
}

pub fn response_created(response_id: &str) -> Value {
    json!({
        "type": "response.created",
        "response": {"id": response_id, "status": "in_progress", "output": []}
    })
}

pub fn function_call_added(response_id: &str, item_id: &str, call_id: &str, name: &str) -> Value {
    json!({
        "type": "response.output_item.added",
        "response_id": response_id,
        "output_index": 0,
        "item": {
            "id": item_id,
            "type": "function_call",
            "status": "in_progress",
            "call_id": call_id,
            "name": name,
            "arguments": ""
        }
    })
}

pub fn function_call_done(
    response_id: &str,
    item_id: &str,
    call_id: &str,
    name: &str,
    arguments: &str,
) -> Value {
    json!({
        "type": "response.output_item.done",
        "response_id": response_id,
        "output_index": 0,
        "item": {
            "id": item_id,
            "type": "function_call",
            "status": "completed",
            "call_id": call_id,
            "name": name,
            "arguments": arguments
        }
    })
}

pub fn assistant_audio_added(response_id: &str, item_id: &str) -> Value {
    json!({
        "type": "response.output_item.added",
        "response_id": response_id,
        "output_index": 0,
        "item": {
            "id": item_id,
            "type": "message",
            "role": "assistant",
            "status": "in_progress",
            "content": []
        }
    })
}

pub fn audio_part_added(response_id: &str, item_id: &str) -> Value {
    json!({
        "type": "response.content_part.added",
        "response_id": response_id,
        "item_id": item_id,
        "output_index": 0,
        "content_index": 0,
        "part": {"type": "audio", "transcript": ""}
    })
}

// =============================================================================
// Local WebSocket server
// =============================================================================

/// What the local server saw of one connection
#[derive(Debug, Default, Clone)]
pub struct ServerLog {
    pub authorization: Option<String>,
    pub beta: Option<String>,
    pub path_and_query: String,
    pub received: Vec<Value>,
}

/// Start a single-connection WebSocket server on an ephemeral port.
///
/// On accept it sends `session.created`, then a ping, then answers every
/// `response.create` with `response.created`. The log is delivered when the
/// client goes away.
pub async fn spawn_ws_server() -> (String, tokio::sync::oneshot::Receiver<ServerLog>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let (log_tx, log_rx) = tokio::sync::oneshot::channel();

    tokio::spawn(async move {
        let Ok((stream, _)) = listener.accept().await else {
            return;
        };

        let mut log = ServerLog::default();
        let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
            let header = |name: &str| {
                request
                    .headers()
                    .get(name)
                    .and_then(|value| value.to_str().ok())
                    .map(str::to_string)
            };
            log.authorization = header("authorization");
            log.beta = header("openai-beta");
            log.path_and_query = request
                .uri()
                .path_and_query()
                .map(|pq| pq.to_string())
                .unwrap_or_default();
            Ok(response)
        };
        let Ok(ws_stream) = tokio_tungstenite::accept_hdr_async(stream, callback).await else {
            return;
        };
        let (mut write, mut read) = ws_stream.split();

        let _ = write
            .send(Message::Text(session_created().to_string().into()))
            .await;
        let _ = write.send(Message::Ping(vec![1, 2, 3].into())).await;

        let mut response_count = 0;
        while let Some(msg) = read.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    let Ok(value) = serde_json::from_str::<Value>(text.as_str()) else {
                        continue;
                    };
                    if value["type"] == "response.create" {
                        response_count += 1;
                        let reply = response_created(&format!("resp_{response_count}"));
                        let _ = write.send(Message::Text(reply.to_string().into())).await;
                    }
                    log.received.push(value);
                }
                Ok(Message::Pong(payload)) => {
                    log.received.push(json!({"type": "pong", "payload": payload.to_vec()}));
                }
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => {}
            }
        }
        let _ = log_tx.send(log);
    });

    (format!("ws://{addr}/v1/realtime"), log_rx)
}

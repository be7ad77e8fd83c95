//! Physical transport underneath a [`RealtimeLink`](super::link::RealtimeLink).
//!
//! A transport opens one duplex text connection and hands back a sink for
//! outbound frames plus a channel of inbound [`TransportEvent`]s. `connect`
//! must only resolve once the handshake has succeeded.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message};

use super::base::{RealtimeError, RealtimeResult};
use super::openai::{OPENAI_REALTIME_BETA, OPENAI_REALTIME_URL, OpenAIRealtimeModel};

/// Default timeout for the WebSocket handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Inbound notifications from an open transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A text frame
    Message(String),
    /// The connection failed; no further events follow
    Error(String),
    /// The remote side closed the connection; no further events follow
    Closed,
}

/// Outbound half of an open transport.
pub trait TransportSink: Send + Sync {
    /// Queue a text frame for delivery.
    fn send(&self, text: String) -> RealtimeResult<()>;

    /// Close the connection. Idempotent.
    fn close(&self);
}

/// Receiver of inbound transport events.
pub type TransportEvents = mpsc::UnboundedReceiver<TransportEvent>;

/// Connection factory injected into the link.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a new connection.
    async fn connect(&self) -> RealtimeResult<(Box<dyn TransportSink>, TransportEvents)>;
}

// =============================================================================
// WebSocket Transport
// =============================================================================

enum Outgoing {
    Text(String),
    Close,
}

struct WebSocketSink {
    tx: mpsc::UnboundedSender<Outgoing>,
}

impl TransportSink for WebSocketSink {
    fn send(&self, text: String) -> RealtimeResult<()> {
        self.tx
            .send(Outgoing::Text(text))
            .map_err(|_| RealtimeError::WebSocketError("Connection task has ended".to_string()))
    }

    fn close(&self) {
        let _ = self.tx.send(Outgoing::Close);
    }
}

/// WebSocket transport for the OpenAI Realtime endpoint.
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    url: String,
    api_key: String,
    model: OpenAIRealtimeModel,
    connect_timeout: Duration,
}

impl WebSocketTransport {
    /// Transport for the public endpoint.
    pub fn new(api_key: impl Into<String>, model: OpenAIRealtimeModel) -> Self {
        Self {
            url: OPENAI_REALTIME_URL.to_string(),
            api_key: api_key.into(),
            model,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Override the endpoint (relays, proxies, test servers).
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Override the handshake timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Endpoint URL including the `model` query parameter.
    pub fn endpoint(&self) -> RealtimeResult<url::Url> {
        let mut url = url::Url::parse(&self.url)
            .map_err(|e| RealtimeError::ConnectionFailed(format!("Invalid URL: {e}")))?;
        url.query_pairs_mut().append_pair("model", self.model.as_str());
        Ok(url)
    }

    fn build_request(&self) -> RealtimeResult<http::Request<()>> {
        let url = self.endpoint()?;
        let host = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            (None, _) => {
                return Err(RealtimeError::ConnectionFailed(format!(
                    "URL has no host: {url}"
                )));
            }
        };

        http::Request::builder()
            .uri(url.as_str())
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("OpenAI-Beta", OPENAI_REALTIME_BETA)
            .header(
                "Sec-WebSocket-Key",
                tungstenite::handshake::client::generate_key(),
            )
            .header("Sec-WebSocket-Version", "13")
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .header("Host", host)
            .body(())
            .map_err(|e| RealtimeError::ConnectionFailed(e.to_string()))
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self) -> RealtimeResult<(Box<dyn TransportSink>, TransportEvents)> {
        let request = self.build_request()?;
        tracing::info!("Connecting to realtime endpoint {}", request.uri());

        let (ws_stream, _response) =
            tokio::time::timeout(self.connect_timeout, tokio_tungstenite::connect_async(request))
                .await
                .map_err(|_| {
                    RealtimeError::Timeout(format!(
                        "WebSocket handshake exceeded {}ms",
                        self.connect_timeout.as_millis()
                    ))
                })?
                .map_err(|e| RealtimeError::ConnectionFailed(e.to_string()))?;

        let (mut ws_sink, mut ws_stream) = ws_stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Outgoing>();
        let (event_tx, event_rx) = mpsc::unbounded_channel::<TransportEvent>();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    outgoing = out_rx.recv() => {
                        match outgoing {
                            Some(Outgoing::Text(text)) => {
                                if let Err(e) = ws_sink.send(Message::Text(text.into())).await {
                                    tracing::error!("Failed to send WebSocket message: {}", e);
                                    let _ = event_tx.send(TransportEvent::Error(e.to_string()));
                                    break;
                                }
                            }
                            // Explicit close, or every sink handle dropped
                            Some(Outgoing::Close) | None => {
                                let _ = ws_sink.send(Message::Close(None)).await;
                                break;
                            }
                        }
                    }

                    incoming = ws_stream.next() => {
                        match incoming {
                            Some(Ok(Message::Text(text))) => {
                                if event_tx.send(TransportEvent::Message(text.as_str().to_owned())).is_err() {
                                    break;
                                }
                            }
                            Some(Ok(Message::Ping(data))) => {
                                if let Err(e) = ws_sink.send(Message::Pong(data)).await {
                                    tracing::error!("Failed to send pong: {}", e);
                                }
                            }
                            Some(Ok(Message::Close(frame))) => {
                                tracing::info!("WebSocket closed by server: {:?}", frame);
                                let _ = event_tx.send(TransportEvent::Closed);
                                break;
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                tracing::error!("WebSocket error: {}", e);
                                let _ = event_tx.send(TransportEvent::Error(e.to_string()));
                                break;
                            }
                            None => {
                                let _ = event_tx.send(TransportEvent::Closed);
                                break;
                            }
                        }
                    }
                }
            }
            tracing::debug!("WebSocket connection task ended");
        });

        Ok((Box::new(WebSocketSink { tx: out_tx }), event_rx))
    }
}

//! Protocol framing over a single realtime connection.
//!
//! [`RealtimeLink`] owns the transport connection. Every outbound command is
//! stamped with a fresh `event_id` and every inbound message is parsed into a
//! [`ServerEvent`]; both directions are republished on the link's
//! [`EventBus`]:
//!
//! - `server.<type>` then `server.*` for inbound events
//! - `client.<type>` then `client.*` for outbound commands
//! - `close` when the active connection drops without `disconnect`
//!
//! Inbound messages are dispatched one at a time, in arrival order, from a
//! single reader task per connection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::task::JoinHandle;

use super::base::{ConnectionState, ProtocolError, RealtimeError, RealtimeResult};
use super::openai::{ClientEvent, ServerEvent};
use super::transport::{Transport, TransportEvent, TransportEvents, TransportSink};
use crate::core::event_bus::EventBus;

/// An inbound event with its envelope.
#[derive(Debug, Clone)]
pub struct ServerMessage {
    /// Server-assigned event id, when present
    pub event_id: Option<String>,
    /// Wire `type`
    pub event_type: String,
    /// Parsed event
    pub event: ServerEvent,
    /// Message as received
    pub raw: Value,
}

/// An outbound command as it was sent.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientMessage {
    /// Locally generated `evt_<uuid>` id
    pub event_id: String,
    /// Wire `type`
    pub event_type: String,
    /// Command fields, excluding `event_id` and `type`
    pub payload: Map<String, Value>,
}

impl ClientMessage {
    /// The full wire envelope `{event_id, type, ...payload}`.
    pub fn to_value(&self) -> Value {
        let mut envelope = self.payload.clone();
        envelope.insert("event_id".to_string(), Value::String(self.event_id.clone()));
        envelope.insert("type".to_string(), Value::String(self.event_type.clone()));
        Value::Object(envelope)
    }
}

/// Payload of every event published on a link's bus.
#[derive(Debug, Clone)]
pub enum LinkEvent {
    Server(Arc<ServerMessage>),
    Client(Arc<ClientMessage>),
    /// The active connection ended; `error` is set when it failed
    Close { error: bool },
}

/// Identifies one successful `connect` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionHandle(u64);

struct LinkConnection {
    state: ConnectionState,
    handle: Option<ConnectionHandle>,
    sink: Option<Box<dyn TransportSink>>,
    reader: Option<JoinHandle<()>>,
}

struct LinkInner {
    transport: Arc<dyn Transport>,
    events: EventBus<LinkEvent>,
    connection: Mutex<LinkConnection>,
    next_handle: AtomicU64,
}

/// Typed, observable framing layer over an injected [`Transport`].
///
/// Cloning shares the connection and the event bus.
#[derive(Clone)]
pub struct RealtimeLink {
    inner: Arc<LinkInner>,
}

impl std::fmt::Debug for RealtimeLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeLink")
            .field("state", &self.state())
            .finish()
    }
}

impl RealtimeLink {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            inner: Arc::new(LinkInner {
                transport,
                events: EventBus::new(),
                connection: Mutex::new(LinkConnection {
                    state: ConnectionState::Disconnected,
                    handle: None,
                    sink: None,
                    reader: None,
                }),
                next_handle: AtomicU64::new(1),
            }),
        }
    }

    /// Bus carrying `server.*`, `client.*` and `close` events.
    pub fn events(&self) -> &EventBus<LinkEvent> {
        &self.inner.events
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.connection.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Handle of the connection currently open or opening.
    pub fn active_handle(&self) -> Option<ConnectionHandle> {
        self.inner.connection.lock().handle
    }

    /// Open the transport connection.
    ///
    /// Fails with [`ProtocolError::AlreadyConnected`] unless disconnected.
    /// On any failure the link is back in `Disconnected`.
    pub async fn connect(&self) -> RealtimeResult<ConnectionHandle> {
        let handle = {
            let mut conn = self.inner.connection.lock();
            if conn.state != ConnectionState::Disconnected {
                return Err(ProtocolError::AlreadyConnected.into());
            }
            let handle = ConnectionHandle(self.inner.next_handle.fetch_add(1, Ordering::Relaxed));
            conn.state = ConnectionState::Connecting;
            conn.handle = Some(handle);
            handle
        };

        let (sink, events) = match self.inner.transport.connect().await {
            Ok(opened) => opened,
            Err(e) => {
                let mut conn = self.inner.connection.lock();
                if conn.handle == Some(handle) {
                    conn.state = ConnectionState::Disconnected;
                    conn.handle = None;
                }
                tracing::error!("Failed to connect realtime link: {}", e);
                return Err(e);
            }
        };

        let mut conn = self.inner.connection.lock();
        if conn.handle != Some(handle) || conn.state != ConnectionState::Connecting {
            drop(conn);
            sink.close();
            return Err(RealtimeError::ConnectionFailed(
                "Disconnected while connecting".to_string(),
            ));
        }
        conn.state = ConnectionState::Connected;
        conn.sink = Some(sink);
        conn.reader = Some(tokio::spawn(read_loop(
            Arc::downgrade(&self.inner),
            handle,
            events,
        )));
        drop(conn);

        tracing::info!("Realtime link connected");
        Ok(handle)
    }

    /// Close the connection. Idempotent.
    ///
    /// With `Some(handle)`, only closes if `handle` is still the active
    /// connection. Does not publish `close`.
    pub fn disconnect(&self, handle: Option<ConnectionHandle>) {
        let mut conn = self.inner.connection.lock();
        if handle.is_some_and(|handle| conn.handle != Some(handle)) {
            tracing::debug!("Ignoring disconnect for superseded connection");
            return;
        }
        if conn.state == ConnectionState::Disconnected {
            return;
        }

        let sink = conn.sink.take();
        let reader = conn.reader.take();
        conn.state = ConnectionState::Disconnected;
        conn.handle = None;
        drop(conn);

        if let Some(sink) = sink {
            sink.close();
        }
        if let Some(reader) = reader {
            reader.abort();
        }
        tracing::info!("Realtime link disconnected");
    }

    /// Send a command of `event_type` with the fields of `payload`.
    ///
    /// `payload` must be a JSON object or null. Returns the message as sent.
    pub fn send(&self, event_type: &str, payload: Value) -> RealtimeResult<Arc<ClientMessage>> {
        if !self.is_connected() {
            return Err(ProtocolError::NotConnected.into());
        }
        let mut payload = match payload {
            Value::Null => Map::new(),
            Value::Object(map) => map,
            _ => return Err(ProtocolError::InvalidPayload(event_type.to_string()).into()),
        };
        payload.remove("event_id");
        payload.remove("type");

        let message = Arc::new(ClientMessage {
            event_id: format!("evt_{}", uuid::Uuid::new_v4().simple()),
            event_type: event_type.to_string(),
            payload,
        });
        let text = serde_json::to_string(&message.to_value())?;

        {
            let conn = self.inner.connection.lock();
            match (&conn.state, &conn.sink) {
                (ConnectionState::Connected, Some(sink)) => sink.send(text)?,
                _ => return Err(ProtocolError::NotConnected.into()),
            }
        }

        tracing::debug!("Sent {} ({})", message.event_type, message.event_id);
        let event = LinkEvent::Client(message.clone());
        self.inner
            .events
            .dispatch(&format!("client.{}", message.event_type), &event);
        self.inner.events.dispatch("client.*", &event);
        Ok(message)
    }

    /// Send a typed command.
    pub fn send_event(&self, event: ClientEvent) -> RealtimeResult<Arc<ClientMessage>> {
        let payload = match serde_json::to_value(&event)? {
            Value::Object(map) => Value::Object(map),
            _ => Value::Null,
        };
        self.send(event.event_type(), payload)
    }
}

impl LinkInner {
    fn is_active(&self, handle: ConnectionHandle) -> bool {
        let conn = self.connection.lock();
        conn.handle == Some(handle) && conn.state == ConnectionState::Connected
    }

    fn receive(&self, text: &str) {
        let raw: Value = match serde_json::from_str(text) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!("Dropping non-JSON realtime message: {}", e);
                return;
            }
        };
        let Some(fields) = raw.as_object() else {
            tracing::warn!("Dropping realtime message that is not an object");
            return;
        };
        let Some(event_type) = fields.get("type").and_then(Value::as_str) else {
            tracing::warn!("Dropping realtime message without a type");
            return;
        };
        let event_type = event_type.to_string();
        let event_id = fields
            .get("event_id")
            .and_then(Value::as_str)
            .map(str::to_string);

        let event = match ServerEvent::deserialize(&raw) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!("Failed to parse server event {}: {}", event_type, e);
                return;
            }
        };

        tracing::debug!("Received {}", event_type);
        let message = LinkEvent::Server(Arc::new(ServerMessage {
            event_id,
            event_type: event_type.clone(),
            event,
            raw,
        }));
        self.events.dispatch(&format!("server.{event_type}"), &message);
        self.events.dispatch("server.*", &message);
    }

    fn connection_lost(&self, handle: ConnectionHandle, error: bool) {
        let mut conn = self.connection.lock();
        if conn.handle != Some(handle) {
            return;
        }
        conn.state = ConnectionState::Disconnected;
        conn.handle = None;
        conn.sink = None;
        conn.reader = None;
        drop(conn);

        if error {
            tracing::error!("Realtime connection failed");
        } else {
            tracing::info!("Realtime connection closed by remote");
        }
        self.events.dispatch("close", &LinkEvent::Close { error });
    }
}

async fn read_loop(inner: Weak<LinkInner>, handle: ConnectionHandle, mut events: TransportEvents) {
    let mut error = false;
    while let Some(event) = events.recv().await {
        let Some(link) = inner.upgrade() else {
            return;
        };
        match event {
            TransportEvent::Message(text) => {
                if link.is_active(handle) {
                    link.receive(&text);
                }
            }
            TransportEvent::Error(reason) => {
                tracing::error!("Realtime transport error: {}", reason);
                error = true;
                break;
            }
            TransportEvent::Closed => break,
        }
    }
    if let Some(link) = inner.upgrade() {
        link.connection_lost(handle, error);
    }
}

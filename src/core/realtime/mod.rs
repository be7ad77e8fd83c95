//! Realtime conversation client.
//!
//! Layers, leaves first:
//!
//! - [`transport`] - physical connection (`Transport` trait, WebSocket impl)
//! - [`link`] - protocol framing, correlation ids and event republishing
//! - [`conversation`] - items and responses rebuilt from server deltas
//! - [`session`] - configuration, tools, turn-taking and audio buffering
//!
//! # Audio Format
//!
//! PCM 16-bit signed little-endian mono at 24kHz, base64 on the wire.

mod base;
pub mod conversation;
pub mod link;
pub mod openai;
pub mod session;
pub mod transport;

pub use base::{
    ConfigError, ConnectionState, ListenerError, ProtocolError, RealtimeError, RealtimeResult,
    StateError,
};
pub use conversation::{
    ConversationStore, ConversationUpdate, FormattedItem, FormattedTool, Item, ItemDelta,
    ResponseRecord,
};
pub use link::{ClientMessage, ConnectionHandle, LinkEvent, RealtimeLink, ServerMessage};
pub use session::{
    EventSource, RealtimeSession, SessionEvent, SessionUpdate, ToolHandler, tool_handler,
};
pub use transport::{
    DEFAULT_CONNECT_TIMEOUT, Transport, TransportEvent, TransportEvents, TransportSink,
    WebSocketTransport,
};

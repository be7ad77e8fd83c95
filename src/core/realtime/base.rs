//! Base types shared by the realtime link, conversation store and session.
//!
//! # Audio Format
//!
//! All audio handled by this module is PCM 16-bit signed, mono, at 24kHz.

use std::fmt;

use thiserror::Error;

pub use crate::core::event_bus::ListenerError;

// =============================================================================
// Error Types
// =============================================================================

/// Failures in the protocol framing layer.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// A command was issued while no connection is active
    #[error("Not connected, use connect() first")]
    NotConnected,

    /// `connect` was called while a connection is active or in progress
    #[error("Already connected, use disconnect() first")]
    AlreadyConnected,

    /// Outbound payloads must be JSON objects
    #[error("Invalid payload for \"{0}\": expected a JSON object")]
    InvalidPayload(String),

    /// A targeted cancel referenced an item that cannot be cancelled
    #[error("Cannot cancel item {item_id}: {reason}")]
    InvalidCancel { item_id: String, reason: String },
}

/// Operations referencing conversation state that does not exist.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StateError {
    /// No item with this id is tracked
    #[error("Item not found: {0}")]
    ItemNotFound(String),

    /// No response with this id is tracked
    #[error("Response not found: {0}")]
    ResponseNotFound(String),

    /// The item has no content part at this index
    #[error("Content part {content_index} not found on item {item_id}")]
    ContentPartNotFound { item_id: String, content_index: usize },

    /// An item payload carried no id
    #[error("Item has no id")]
    MissingItemId,

    /// An audio delta could not be decoded
    #[error("Invalid audio delta for item {item_id}: {reason}")]
    InvalidAudio { item_id: String, reason: String },
}

/// Tool registration and session configuration failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Tool definitions must carry a name
    #[error("Missing tool name in definition")]
    MissingToolName,

    /// A tool with this name is already registered
    #[error("Tool \"{0}\" already added, remove it first")]
    DuplicateTool(String),

    /// An inline session tool collides with a registered tool
    #[error("Tool \"{0}\" has already been defined")]
    ConflictingTool(String),

    /// No registered tool has this name
    #[error("Tool \"{0}\" does not exist, can not be removed")]
    ToolNotFound(String),
}

/// Errors that can occur during realtime operations.
#[derive(Debug, Error)]
pub enum RealtimeError {
    /// Protocol framing error
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Conversation state error
    #[error(transparent)]
    State(#[from] StateError),

    /// Tool / session configuration error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Subscription management error
    #[error(transparent)]
    Listener(#[from] ListenerError),

    /// Connection to the provider failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Operation timeout
    #[error("Operation timed out: {0}")]
    Timeout(String),
}

impl From<serde_json::Error> for RealtimeError {
    fn from(err: serde_json::Error) -> Self {
        RealtimeError::SerializationError(err.to_string())
    }
}

/// Result type for realtime operations.
pub type RealtimeResult<T> = Result<T, RealtimeError>;

// =============================================================================
// Connection State
// =============================================================================

/// Connection state of a realtime link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Not connected to the provider
    #[default]
    Disconnected,
    /// Currently connecting
    Connecting,
    /// Connected and ready
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Connected => write!(f, "Connected"),
        }
    }
}

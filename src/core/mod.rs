pub mod event_bus;
pub mod realtime;

// Re-export commonly used types for convenience
pub use event_bus::{EventBus, ListenerError, ListenerId};
pub use realtime::{
    RealtimeError, RealtimeLink, RealtimeResult, RealtimeSession, SessionEvent, WebSocketTransport,
};

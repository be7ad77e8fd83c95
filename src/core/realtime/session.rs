//! Realtime conversation session.
//!
//! [`RealtimeSession`] drives a [`RealtimeLink`] and keeps a
//! [`ConversationStore`] in sync with it. On top of that it owns:
//!
//! - the persisted session configuration, merged on every update
//! - the tool registry and the tool-call-then-respond loop
//! - the rolling input audio buffer used for manual turn-taking
//!
//! # Events
//!
//! | Name                          | Payload                               |
//! |-------------------------------|---------------------------------------|
//! | `realtime.event`              | every client and server message       |
//! | `conversation.updated`        | item and delta after each change      |
//! | `conversation.interrupted`    | speech started while a turn was open  |
//! | `conversation.item.appended`  | newly created item                    |
//! | `conversation.item.completed` | item that reached `completed`         |
//! | `error`                       | server error or reducer failure       |
//! | `close`                       | connection dropped by the remote side |
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use serde_json::json;
//! use waav_realtime::core::realtime::{RealtimeSession, WebSocketTransport, tool_handler};
//! use waav_realtime::core::realtime::openai::{OpenAIRealtimeModel, ToolDefinition};
//!
//! let transport = WebSocketTransport::new("sk-...", OpenAIRealtimeModel::default());
//! let session = RealtimeSession::new(Arc::new(transport));
//! session.add_tool(
//!     ToolDefinition::function("get_time", "Current time", json!({"type": "object"})),
//!     tool_handler(|_args| async { Ok(json!({"time": "12:00"})) }),
//! )?;
//! session.connect().await?;
//! session.wait_for_session_created().await?;
//! ```

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use parking_lot::Mutex;
use serde_json::{Value, json};
use time::OffsetDateTime;
use tokio::sync::watch;

use super::base::{ConfigError, ProtocolError, RealtimeError, RealtimeResult, StateError};
use super::conversation::{ConversationStore, ConversationUpdate, FormattedTool, Item, ResponseRecord};
use super::link::{LinkEvent, RealtimeLink, ServerMessage};
use super::openai::{
    ClientEvent, ContentPart, ConversationItem, InputAudioTranscription, ItemRole, ItemStatus,
    ItemType, MaxTokens, Modality, OpenAIRealtimeAudioFormat, OpenAIRealtimeVoice, ServerEvent,
    SessionConfig, ToolDefinition, TurnDetection,
};
use super::transport::Transport;
use crate::core::event_bus::EventBus;
use crate::utils::audio::{encode_pcm16, ms_for_samples};

/// Async tool implementation. Receives the parsed call arguments.
pub type ToolHandler =
    Arc<dyn Fn(Value) -> Pin<Box<dyn Future<Output = anyhow::Result<Value>> + Send>> + Send + Sync>;

/// Wrap an async closure as a [`ToolHandler`].
pub fn tool_handler<F, Fut>(handler: F) -> ToolHandler
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    Arc::new(move |args| Box::pin(handler(args)))
}

#[derive(Clone)]
struct RegisteredTool {
    definition: ToolDefinition,
    handler: ToolHandler,
}

/// Partial session configuration. `None` leaves the stored value untouched;
/// nullable settings take `Some(None)` to clear them.
#[derive(Debug, Clone, Default)]
pub struct SessionUpdate {
    pub modalities: Option<Vec<Modality>>,
    pub instructions: Option<String>,
    pub voice: Option<OpenAIRealtimeVoice>,
    pub input_audio_format: Option<OpenAIRealtimeAudioFormat>,
    pub output_audio_format: Option<OpenAIRealtimeAudioFormat>,
    pub input_audio_transcription: Option<Option<InputAudioTranscription>>,
    pub turn_detection: Option<Option<TurnDetection>>,
    /// Inline tools without handlers
    pub tools: Option<Vec<ToolDefinition>>,
    pub tool_choice: Option<String>,
    pub temperature: Option<f32>,
    pub max_response_output_tokens: Option<MaxTokens>,
}

impl SessionUpdate {
    fn apply_to(self, config: &mut SessionConfig) {
        if let Some(modalities) = self.modalities {
            config.modalities = modalities;
        }
        if let Some(instructions) = self.instructions {
            config.instructions = instructions;
        }
        if let Some(voice) = self.voice {
            config.voice = voice;
        }
        if let Some(format) = self.input_audio_format {
            config.input_audio_format = format;
        }
        if let Some(format) = self.output_audio_format {
            config.output_audio_format = format;
        }
        if let Some(transcription) = self.input_audio_transcription {
            config.input_audio_transcription = transcription;
        }
        if let Some(turn_detection) = self.turn_detection {
            config.turn_detection = turn_detection;
        }
        if let Some(tools) = self.tools {
            config.tools = tools;
        }
        if let Some(tool_choice) = self.tool_choice {
            config.tool_choice = tool_choice;
        }
        if let Some(temperature) = self.temperature {
            config.temperature = temperature;
        }
        if let Some(max_tokens) = self.max_response_output_tokens {
            config.max_response_output_tokens = max_tokens;
        }
    }
}

/// Origin of a logged realtime message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSource {
    Client,
    Server,
}

impl std::fmt::Display for EventSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventSource::Client => write!(f, "client"),
            EventSource::Server => write!(f, "server"),
        }
    }
}

/// Events published on the session bus.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A message sent or received, with its wire envelope
    Realtime {
        time: OffsetDateTime,
        source: EventSource,
        event_type: String,
        event: Value,
    },
    ConversationUpdated(ConversationUpdate),
    ConversationInterrupted,
    ItemAppended(Arc<Item>),
    ItemCompleted(Arc<Item>),
    Error { message: String },
    Close { error: bool },
}

impl SessionEvent {
    /// Bus name this event is dispatched under.
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::Realtime { .. } => "realtime.event",
            SessionEvent::ConversationUpdated(_) => "conversation.updated",
            SessionEvent::ConversationInterrupted => "conversation.interrupted",
            SessionEvent::ItemAppended(_) => "conversation.item.appended",
            SessionEvent::ItemCompleted(_) => "conversation.item.completed",
            SessionEvent::Error { .. } => "error",
            SessionEvent::Close { .. } => "close",
        }
    }

    /// The item carried by item-bearing events.
    pub fn item(&self) -> Option<&Arc<Item>> {
        match self {
            SessionEvent::ItemAppended(item) | SessionEvent::ItemCompleted(item) => Some(item),
            SessionEvent::ConversationUpdated(update) => update.item.as_ref(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionStatus {
    Pending,
    Created,
    Closed,
}

struct SessionState {
    config: SessionConfig,
    tools: Vec<RegisteredTool>,
}

impl SessionState {
    fn new(config: SessionConfig) -> Self {
        Self {
            config,
            tools: Vec::new(),
        }
    }

    fn tool(&self, name: &str) -> Option<&RegisteredTool> {
        self.tools.iter().find(|tool| tool.definition.name == name)
    }

    /// Stored config carrying `inline` tools followed by the registered tools.
    fn wire_config(&self, inline: &[ToolDefinition]) -> SessionConfig {
        let mut session = self.config.clone();
        session.tools = inline.to_vec();
        session
            .tools
            .extend(self.tools.iter().map(|tool| tool.definition.clone()));
        session
    }
}

struct SessionInner {
    link: RealtimeLink,
    events: EventBus<SessionEvent>,
    initial_config: SessionConfig,
    state: Mutex<SessionState>,
    // Lock order: input_audio before conversation
    input_audio: Mutex<Vec<i16>>,
    conversation: Mutex<ConversationStore>,
    status: watch::Sender<SessionStatus>,
}

/// Conversation session over a realtime link.
///
/// Cloning yields another handle to the same session.
#[derive(Clone)]
pub struct RealtimeSession {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for RealtimeSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeSession")
            .field("link", &self.inner.link)
            .field("items", &self.inner.conversation.lock().len())
            .finish()
    }
}

impl RealtimeSession {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_config(transport, SessionConfig::default())
    }

    /// Session whose stored configuration starts from `config`; `reset`
    /// returns to it.
    pub fn with_config(transport: Arc<dyn Transport>, config: SessionConfig) -> Self {
        let (status, _) = watch::channel(SessionStatus::Closed);
        let inner = Arc::new(SessionInner {
            link: RealtimeLink::new(transport),
            events: EventBus::new(),
            initial_config: config.clone(),
            state: Mutex::new(SessionState::new(config)),
            input_audio: Mutex::new(Vec::new()),
            conversation: Mutex::new(ConversationStore::new()),
            status,
        });
        register_link_handlers(&inner);
        Self { inner }
    }

    /// Session event bus.
    pub fn events(&self) -> &EventBus<SessionEvent> {
        &self.inner.events
    }

    /// Underlying protocol link.
    pub fn link(&self) -> &RealtimeLink {
        &self.inner.link
    }

    pub fn is_connected(&self) -> bool {
        self.inner.link.is_connected()
    }

    /// Connect and push the stored session configuration.
    pub async fn connect(&self) -> RealtimeResult<()> {
        if self.inner.link.is_connected() {
            return Err(ProtocolError::AlreadyConnected.into());
        }
        self.inner.status.send_replace(SessionStatus::Pending);
        if let Err(e) = self.inner.link.connect().await {
            self.inner.status.send_replace(SessionStatus::Closed);
            return Err(e);
        }
        self.update_session(SessionUpdate::default())
    }

    /// Wait until the server acknowledged the session with `session.created`.
    pub async fn wait_for_session_created(&self) -> RealtimeResult<()> {
        if !self.is_connected() {
            return Err(ProtocolError::NotConnected.into());
        }
        let mut status = self.inner.status.subscribe();
        let reached = status
            .wait_for(|status| *status != SessionStatus::Pending)
            .await
            .map(|status| *status)
            .map_err(|_| RealtimeError::ConnectionFailed("Session dropped".to_string()))?;
        match reached {
            SessionStatus::Created => Ok(()),
            _ => Err(RealtimeError::ConnectionFailed(
                "Connection closed before the session was created".to_string(),
            )),
        }
    }

    /// Disconnect and clear the conversation. Configuration and tools are kept.
    pub fn disconnect(&self) {
        self.inner.status.send_replace(SessionStatus::Closed);
        self.inner.link.disconnect(None);
        self.inner.conversation.lock().clear();
    }

    /// Disconnect, drop every subscriber, and restore the initial
    /// configuration with no tools and an empty input buffer.
    pub fn reset(&self) {
        self.disconnect();
        self.inner.events.clear();
        self.inner.link.events().clear();
        *self.inner.state.lock() = SessionState::new(self.inner.initial_config.clone());
        self.inner.input_audio.lock().clear();
        register_link_handlers(&self.inner);
    }

    /// Stored configuration as an update without inline tools would send
    /// it: the tool list holds the registered tools only.
    pub fn session_config(&self) -> SessionConfig {
        self.inner.state.lock().wire_config(&[])
    }

    /// Wire name of the configured turn detection, `None` for manual turns.
    pub fn turn_detection_type(&self) -> Option<&'static str> {
        self.inner
            .state
            .lock()
            .config
            .turn_detection
            .as_ref()
            .map(TurnDetection::kind)
    }

    /// Merge `update` into the stored configuration and send it when connected.
    ///
    /// The tool list sent is the tools supplied inline with this update
    /// followed by the registered tools. Fails with
    /// [`ConfigError::ConflictingTool`] when an inline tool shares a name with
    /// a registered tool; the stored configuration is then left unchanged.
    pub fn update_session(&self, update: SessionUpdate) -> RealtimeResult<()> {
        let inline = update.tools.clone().unwrap_or_default();
        let session = {
            let mut state = self.inner.state.lock();
            if let Some(conflict) = inline.iter().find(|tool| state.tool(&tool.name).is_some()) {
                return Err(ConfigError::ConflictingTool(conflict.name.clone()).into());
            }
            update.apply_to(&mut state.config);
            state.wire_config(&inline)
        };

        if self.inner.link.is_connected() {
            self.inner
                .link
                .send_event(ClientEvent::SessionUpdate { session })?;
        }
        Ok(())
    }

    /// Register a tool and its handler, then resend the session.
    pub fn add_tool(&self, definition: ToolDefinition, handler: ToolHandler) -> RealtimeResult<()> {
        {
            let mut state = self.inner.state.lock();
            if definition.name.is_empty() {
                return Err(ConfigError::MissingToolName.into());
            }
            if state.tool(&definition.name).is_some() {
                return Err(ConfigError::DuplicateTool(definition.name).into());
            }
            tracing::debug!("Registered tool {}", definition.name);
            state.tools.push(RegisteredTool {
                definition,
                handler,
            });
        }
        self.update_session(SessionUpdate::default())
    }

    /// Unregister a tool, then resend the session.
    pub fn remove_tool(&self, name: &str) -> RealtimeResult<()> {
        {
            let mut state = self.inner.state.lock();
            let position = state
                .tools
                .iter()
                .position(|tool| tool.definition.name == name)
                .ok_or_else(|| ConfigError::ToolNotFound(name.to_string()))?;
            state.tools.remove(position);
        }
        self.update_session(SessionUpdate::default())
    }

    /// Delete an item on the server.
    pub fn delete_item(&self, id: &str) -> RealtimeResult<()> {
        self.inner.link.send_event(ClientEvent::ConversationItemDelete {
            item_id: id.to_string(),
        })?;
        Ok(())
    }

    /// Stream PCM16 input audio to the server and keep it for manual commits.
    pub fn append_input_audio(&self, samples: &[i16]) -> RealtimeResult<()> {
        if samples.is_empty() {
            return Ok(());
        }
        self.inner
            .link
            .send_event(ClientEvent::InputAudioBufferAppend {
                audio: encode_pcm16(samples),
            })?;
        self.inner.input_audio.lock().extend_from_slice(samples);
        Ok(())
    }

    /// Discard uncommitted input audio on the server.
    ///
    /// In manual mode the local buffer is emptied too. Under server VAD the
    /// local buffer is kept: speech offsets count from the start of all audio
    /// appended in the session, and it is the timeline they slice.
    pub fn clear_input_audio(&self) -> RealtimeResult<()> {
        self.inner
            .link
            .send_event(ClientEvent::InputAudioBufferClear)?;
        if self.turn_detection_type().is_none() {
            self.inner.input_audio.lock().clear();
        }
        Ok(())
    }

    /// Number of uncommitted input samples.
    pub fn input_audio_len(&self) -> usize {
        self.inner.input_audio.lock().len()
    }

    /// Send a user message, then request a response.
    pub fn send_user_message_content(&self, content: Vec<ContentPart>) -> RealtimeResult<()> {
        if !content.is_empty() {
            self.inner
                .link
                .send_event(ClientEvent::ConversationItemCreate {
                    item: ConversationItem::user_message(content),
                    previous_item_id: None,
                })?;
        }
        self.create_response()
    }

    /// Request a response.
    ///
    /// Without server turn detection, pending input audio is committed first
    /// and attached to the user item it creates.
    pub fn create_response(&self) -> RealtimeResult<()> {
        create_response(&self.inner)
    }

    /// Cancel the in-progress response.
    ///
    /// With `item_id`, the assistant audio item being played is also
    /// truncated to the `sample_count` samples actually heard.
    pub fn cancel_response(
        &self,
        item_id: Option<&str>,
        sample_count: usize,
    ) -> RealtimeResult<Option<Arc<Item>>> {
        let Some(item_id) = item_id else {
            self.inner.link.send_event(ClientEvent::ResponseCancel)?;
            return Ok(None);
        };

        let item = self
            .inner
            .conversation
            .lock()
            .item(item_id)
            .ok_or_else(|| StateError::ItemNotFound(item_id.to_string()))?;
        let invalid = |reason: &str| ProtocolError::InvalidCancel {
            item_id: item_id.to_string(),
            reason: reason.to_string(),
        };
        if item.item_type != ItemType::Message {
            return Err(invalid("only message items can be cancelled").into());
        }
        if item.role != Some(ItemRole::Assistant) {
            return Err(invalid("only assistant messages can be cancelled").into());
        }
        let content_index = item
            .audio_content_index()
            .ok_or_else(|| invalid("item has no audio content"))?;

        self.inner.link.send_event(ClientEvent::ResponseCancel)?;
        self.inner
            .link
            .send_event(ClientEvent::ConversationItemTruncate {
                item_id: item_id.to_string(),
                content_index,
                audio_end_ms: ms_for_samples(sample_count),
            })?;
        Ok(Some(item))
    }

    /// Wait for the next appended item.
    pub async fn wait_for_next_item(&self, timeout: Option<Duration>) -> Option<Arc<Item>> {
        self.inner
            .events
            .wait_for_next("conversation.item.appended", timeout)
            .await
            .and_then(|event| event.item().cloned())
    }

    /// Wait for the next completed item.
    pub async fn wait_for_next_completed_item(
        &self,
        timeout: Option<Duration>,
    ) -> Option<Arc<Item>> {
        self.inner
            .events
            .wait_for_next("conversation.item.completed", timeout)
            .await
            .and_then(|event| event.item().cloned())
    }

    pub fn item(&self, id: &str) -> Option<Arc<Item>> {
        self.inner.conversation.lock().item(id)
    }

    /// Conversation items in creation order.
    pub fn items(&self) -> Vec<Arc<Item>> {
        self.inner.conversation.lock().items()
    }

    pub fn responses(&self) -> Vec<ResponseRecord> {
        self.inner.conversation.lock().responses()
    }
}

fn create_response(inner: &SessionInner) -> RealtimeResult<()> {
    let manual = inner.state.lock().config.turn_detection.is_none();
    if manual && !inner.input_audio.lock().is_empty() {
        inner
            .link
            .send_event(ClientEvent::InputAudioBufferCommit)?;
        let committed = std::mem::take(&mut *inner.input_audio.lock());
        inner.conversation.lock().queue_input_audio(committed);
    }
    inner.link.send_event(ClientEvent::ResponseCreate)?;
    Ok(())
}

fn register_link_handlers(inner: &Arc<SessionInner>) {
    let bus = inner.link.events();

    let weak = Arc::downgrade(inner);
    bus.on("server.*", move |event: &LinkEvent| {
        if let (Some(inner), LinkEvent::Server(message)) = (weak.upgrade(), event) {
            inner.handle_server_message(message);
            inner.log_event(EventSource::Server, &message.event_type, message.raw.clone());
        }
    });

    let weak = Arc::downgrade(inner);
    bus.on("client.*", move |event: &LinkEvent| {
        if let (Some(inner), LinkEvent::Client(message)) = (weak.upgrade(), event) {
            inner.log_event(EventSource::Client, &message.event_type, message.to_value());
        }
    });

    let weak = Arc::downgrade(inner);
    bus.on("close", move |event: &LinkEvent| {
        if let (Some(inner), LinkEvent::Close { error }) = (weak.upgrade(), event) {
            inner.status.send_replace(SessionStatus::Closed);
            inner.emit(SessionEvent::Close { error: *error });
        }
    });
}

impl SessionInner {
    fn emit(&self, event: SessionEvent) {
        self.events.dispatch(event.name(), &event);
    }

    fn log_event(&self, source: EventSource, event_type: &str, event: Value) {
        self.emit(SessionEvent::Realtime {
            time: OffsetDateTime::now_utc(),
            source,
            event_type: event_type.to_string(),
            event,
        });
    }

    /// Fold an event into the store; failures are logged and published.
    fn apply(&self, event: &ServerEvent, with_input_audio: bool) -> Option<ConversationUpdate> {
        let result = if with_input_audio {
            let input = self.input_audio.lock();
            self.conversation.lock().process_event(event, Some(&input))
        } else {
            self.conversation.lock().process_event(event, None)
        };
        match result {
            Ok(update) => Some(update),
            Err(e) => {
                tracing::warn!("Failed to apply server event: {}", e);
                self.emit(SessionEvent::Error {
                    message: e.to_string(),
                });
                None
            }
        }
    }

    /// Like `apply`, publishing `conversation.updated` when an item changed.
    fn apply_and_publish(&self, event: &ServerEvent) -> Option<Arc<Item>> {
        let update = self.apply(event, false)?;
        let item = update.item.clone()?;
        self.emit(SessionEvent::ConversationUpdated(update));
        Some(item)
    }

    fn handle_server_message(self: &Arc<Self>, message: &ServerMessage) {
        match &message.event {
            ServerEvent::SessionCreated { session } => {
                tracing::info!("Realtime session created: {}", session.id);
                self.status.send_replace(SessionStatus::Created);
            }
            ServerEvent::Error { error } => {
                tracing::warn!("Realtime server error ({}): {}", error.error_type, error.message);
                self.emit(SessionEvent::Error {
                    message: error.message.clone(),
                });
            }
            event @ (ServerEvent::ResponseCreated { .. }
            | ServerEvent::OutputItemAdded { .. }
            | ServerEvent::ContentPartAdded { .. }) => {
                self.apply(event, false);
            }
            event @ ServerEvent::SpeechStarted { .. } => {
                self.apply(event, false);
                self.emit(SessionEvent::ConversationInterrupted);
            }
            event @ ServerEvent::SpeechStopped { .. } => {
                self.apply(event, true);
            }
            event @ ServerEvent::ConversationItemCreated { .. } => {
                if let Some(item) = self.apply_and_publish(event) {
                    self.emit(SessionEvent::ItemAppended(item.clone()));
                    if item.status == ItemStatus::Completed {
                        self.emit(SessionEvent::ItemCompleted(item));
                    }
                }
            }
            event @ (ServerEvent::ConversationItemTruncated { .. }
            | ServerEvent::ConversationItemDeleted { .. }
            | ServerEvent::TranscriptionCompleted { .. }
            | ServerEvent::AudioTranscriptDelta { .. }
            | ServerEvent::AudioDelta { .. }
            | ServerEvent::TextDelta { .. }
            | ServerEvent::FunctionCallArgumentsDelta { .. }) => {
                self.apply_and_publish(event);
            }
            event @ ServerEvent::OutputItemDone { item: done, .. } => {
                let Some(item) = self.apply_and_publish(event) else {
                    return;
                };
                if item.status == ItemStatus::Completed {
                    self.emit(SessionEvent::ItemCompleted(item.clone()));
                }
                if let Some(mut tool) = item.formatted.tool.clone() {
                    if tool.arguments.is_empty() {
                        tool.arguments = done.arguments.clone().unwrap_or_default();
                    }
                    tokio::spawn(call_tool(self.clone(), tool));
                }
            }
            _ => {}
        }
    }
}

async fn call_tool(inner: Arc<SessionInner>, tool: FormattedTool) {
    let handler = inner
        .state
        .lock()
        .tool(&tool.name)
        .map(|registered| registered.handler.clone());

    let result = match (serde_json::from_str::<Value>(&tool.arguments), handler) {
        (Err(e), _) => Err(format!("Invalid arguments: {e}")),
        (Ok(_), None) => Err(format!("Tool \"{}\" has not been added", tool.name)),
        (Ok(args), Some(handler)) => {
            tracing::debug!("Calling tool {} ({})", tool.name, tool.call_id);
            match AssertUnwindSafe(handler(args)).catch_unwind().await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(e.to_string()),
                Err(_) => Err(format!("Tool \"{}\" panicked", tool.name)),
            }
        }
    };
    let output = match result {
        Ok(value) => value,
        Err(message) => {
            tracing::warn!("Tool {} failed: {}", tool.name, message);
            json!({ "error": message })
        }
    };

    if let Err(e) = inner
        .link
        .send_event(ClientEvent::ConversationItemCreate {
            item: ConversationItem::function_call_output(&tool.call_id, output.to_string()),
            previous_item_id: None,
        })
    {
        tracing::warn!("Failed to send output of tool {}: {}", tool.name, e);
    }
    if let Err(e) = create_response(&inner) {
        tracing::warn!("Failed to request response after tool {}: {}", tool.name, e);
    }
}

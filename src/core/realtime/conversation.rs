//! Conversation state reconstructed from server events.
//!
//! [`ConversationStore`] folds the server event stream into items and
//! responses. Items are handed out as `Arc<Item>` snapshots; the store
//! copies an item on write when a snapshot of it is still held elsewhere.
//!
//! Two races are tolerated:
//!
//! - VAD boundaries (`speech_started` / `speech_stopped`) and input audio
//!   transcriptions can arrive before the `conversation.item.created` they
//!   describe. They are queued by item id and claimed on creation.
//! - A transcription can be empty; it is stored as a single space in
//!   `formatted.transcript` so "empty" stays distinguishable from "pending".

use std::collections::HashMap;
use std::sync::Arc;

use super::base::StateError;
use super::openai::{
    ContentPart, ContentType, ConversationItem, ItemRole, ItemStatus, ItemType, ServerEvent,
};
use crate::utils::audio::{decode_pcm16, samples_for_ms, slice_ms};

/// Function call details accumulated for a `function_call` item.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormattedTool {
    pub call_id: String,
    pub name: String,
    pub arguments: String,
}

/// Merged view of an item's content.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FormattedItem {
    /// Concatenated text and text deltas
    pub text: String,
    /// Audio transcript; a single space marks an empty transcription
    pub transcript: String,
    /// PCM16 samples at 24kHz
    pub audio: Vec<i16>,
    /// Set for `function_call` items
    pub tool: Option<FormattedTool>,
    /// Set for `function_call_output` items
    pub output: Option<String>,
}

/// A conversation item tracked by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub id: String,
    pub item_type: ItemType,
    pub role: Option<ItemRole>,
    pub status: ItemStatus,
    /// Raw content parts as reported by the server, patched by deltas
    pub content: Vec<ContentPart>,
    pub call_id: Option<String>,
    pub name: Option<String>,
    /// Raw function call arguments, patched by deltas
    pub arguments: String,
    pub output: Option<String>,
    pub formatted: FormattedItem,
}

impl Item {
    /// Index of the first audio content part.
    pub fn audio_content_index(&self) -> Option<usize> {
        self.content
            .iter()
            .position(|part| part.content_type == ContentType::Audio)
    }

    pub fn is_function_call(&self) -> bool {
        self.item_type == ItemType::FunctionCall
    }
}

/// A response and the ids of the items it produced, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseRecord {
    pub id: String,
    pub output: Vec<String>,
}

/// Incremental content carried by a single event.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemDelta {
    Text(String),
    Transcript(String),
    Audio(Vec<i16>),
    Arguments(String),
}

/// Result of folding one event into the store.
#[derive(Debug, Clone, Default)]
pub struct ConversationUpdate {
    /// Item created or modified by the event
    pub item: Option<Arc<Item>>,
    /// Content appended by the event
    pub delta: Option<ItemDelta>,
}

impl ConversationUpdate {
    fn none() -> Self {
        Self::default()
    }

    fn item(item: Arc<Item>) -> Self {
        Self {
            item: Some(item),
            delta: None,
        }
    }

    fn with_delta(item: Arc<Item>, delta: ItemDelta) -> Self {
        Self {
            item: Some(item),
            delta: Some(delta),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct QueuedSpeech {
    audio_start_ms: u64,
    audio_end_ms: Option<u64>,
    audio: Option<Vec<i16>>,
}

#[derive(Debug, Clone)]
struct QueuedTranscript {
    content_index: usize,
    transcript: String,
}

/// Owned conversation state: items, responses and race queues.
#[derive(Debug, Default)]
pub struct ConversationStore {
    items: HashMap<String, Arc<Item>>,
    item_order: Vec<String>,
    responses: HashMap<String, ResponseRecord>,
    response_order: Vec<String>,
    queued_speech: HashMap<String, QueuedSpeech>,
    queued_transcripts: HashMap<String, QueuedTranscript>,
    queued_input_audio: Option<Vec<i16>>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop all items, responses and queued state.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Attach `audio` to the next user message created.
    pub fn queue_input_audio(&mut self, audio: Vec<i16>) {
        self.queued_input_audio = Some(audio);
    }

    pub fn item(&self, id: &str) -> Option<Arc<Item>> {
        self.items.get(id).cloned()
    }

    /// Items in creation order.
    pub fn items(&self) -> Vec<Arc<Item>> {
        self.item_order
            .iter()
            .filter_map(|id| self.items.get(id).cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.item_order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.item_order.is_empty()
    }

    pub fn response(&self, id: &str) -> Option<ResponseRecord> {
        self.responses.get(id).cloned()
    }

    /// Responses in creation order.
    pub fn responses(&self) -> Vec<ResponseRecord> {
        self.response_order
            .iter()
            .filter_map(|id| self.responses.get(id).cloned())
            .collect()
    }

    /// Fold `event` into the store.
    ///
    /// `input_audio` is the session's rolling input buffer; it is only read
    /// by `input_audio_buffer.speech_stopped`. On error the store is left
    /// unmodified.
    pub fn process_event(
        &mut self,
        event: &ServerEvent,
        input_audio: Option<&[i16]>,
    ) -> Result<ConversationUpdate, StateError> {
        match event {
            ServerEvent::ConversationItemCreated { item, .. } => self.item_created(item),
            ServerEvent::ConversationItemDeleted { item_id } => self.item_deleted(item_id),
            ServerEvent::TranscriptionCompleted {
                item_id,
                content_index,
                transcript,
            } => self.transcription_completed(item_id, *content_index, transcript),
            ServerEvent::ConversationItemTruncated {
                item_id,
                audio_end_ms,
                ..
            } => self.item_truncated(item_id, *audio_end_ms),
            ServerEvent::SpeechStarted {
                item_id,
                audio_start_ms,
            } => {
                self.queued_speech.insert(
                    item_id.clone(),
                    QueuedSpeech {
                        audio_start_ms: *audio_start_ms,
                        ..Default::default()
                    },
                );
                Ok(ConversationUpdate::none())
            }
            ServerEvent::SpeechStopped {
                item_id,
                audio_end_ms,
            } => {
                let speech = self
                    .queued_speech
                    .entry(item_id.clone())
                    .or_insert_with(|| QueuedSpeech {
                        audio_start_ms: *audio_end_ms,
                        ..Default::default()
                    });
                speech.audio_end_ms = Some(*audio_end_ms);
                if let Some(buffer) = input_audio {
                    speech.audio =
                        Some(slice_ms(buffer, speech.audio_start_ms, *audio_end_ms).to_vec());
                }
                Ok(ConversationUpdate::none())
            }
            ServerEvent::ResponseCreated { response } => {
                if !self.responses.contains_key(&response.id) {
                    self.responses.insert(
                        response.id.clone(),
                        ResponseRecord {
                            id: response.id.clone(),
                            output: Vec::new(),
                        },
                    );
                    self.response_order.push(response.id.clone());
                }
                Ok(ConversationUpdate::none())
            }
            ServerEvent::OutputItemAdded {
                response_id, item, ..
            } => {
                let item_id = item.id.as_ref().ok_or(StateError::MissingItemId)?;
                let response = self
                    .responses
                    .get_mut(response_id)
                    .ok_or_else(|| StateError::ResponseNotFound(response_id.clone()))?;
                response.output.push(item_id.clone());
                Ok(ConversationUpdate::none())
            }
            ServerEvent::OutputItemDone { item, .. } => {
                let item_id = item.id.as_ref().ok_or(StateError::MissingItemId)?;
                let tracked = self.item_mut(item_id)?;
                if let Some(status) = item.status {
                    tracked.status = status;
                }
                Ok(ConversationUpdate::item(self.snapshot(item_id)?))
            }
            ServerEvent::ContentPartAdded { item_id, part, .. } => {
                self.item_mut(item_id)?.content.push(part.clone());
                Ok(ConversationUpdate::item(self.snapshot(item_id)?))
            }
            ServerEvent::AudioTranscriptDelta {
                item_id,
                content_index,
                delta,
                ..
            } => {
                self.require_part(item_id, *content_index)?;
                let item = self.item_mut(item_id)?;
                append(&mut item.content[*content_index].transcript, delta);
                item.formatted.transcript.push_str(delta);
                Ok(ConversationUpdate::with_delta(
                    self.snapshot(item_id)?,
                    ItemDelta::Transcript(delta.clone()),
                ))
            }
            ServerEvent::TextDelta {
                item_id,
                content_index,
                delta,
                ..
            } => {
                self.require_part(item_id, *content_index)?;
                let item = self.item_mut(item_id)?;
                append(&mut item.content[*content_index].text, delta);
                item.formatted.text.push_str(delta);
                Ok(ConversationUpdate::with_delta(
                    self.snapshot(item_id)?,
                    ItemDelta::Text(delta.clone()),
                ))
            }
            ServerEvent::AudioDelta { item_id, delta, .. } => {
                if !self.items.contains_key(item_id) {
                    return Err(StateError::ItemNotFound(item_id.clone()));
                }
                let samples = decode_pcm16(delta).map_err(|e| StateError::InvalidAudio {
                    item_id: item_id.clone(),
                    reason: e.to_string(),
                })?;
                self.item_mut(item_id)?
                    .formatted
                    .audio
                    .extend_from_slice(&samples);
                Ok(ConversationUpdate::with_delta(
                    self.snapshot(item_id)?,
                    ItemDelta::Audio(samples),
                ))
            }
            ServerEvent::FunctionCallArgumentsDelta { item_id, delta, .. } => {
                let item = self.item_mut(item_id)?;
                item.arguments.push_str(delta);
                if let Some(tool) = item.formatted.tool.as_mut() {
                    tool.arguments.push_str(delta);
                }
                Ok(ConversationUpdate::with_delta(
                    self.snapshot(item_id)?,
                    ItemDelta::Arguments(delta.clone()),
                ))
            }
            ServerEvent::Error { .. }
            | ServerEvent::SessionCreated { .. }
            | ServerEvent::SessionUpdated { .. }
            | ServerEvent::InputAudioBufferCommitted { .. }
            | ServerEvent::InputAudioBufferCleared
            | ServerEvent::TranscriptionFailed { .. }
            | ServerEvent::ResponseDone { .. }
            | ServerEvent::ContentPartDone { .. }
            | ServerEvent::TextDone { .. }
            | ServerEvent::AudioTranscriptDone { .. }
            | ServerEvent::AudioDone { .. }
            | ServerEvent::FunctionCallArgumentsDone { .. }
            | ServerEvent::RateLimitsUpdated { .. }
            | ServerEvent::Unknown => Ok(ConversationUpdate::none()),
        }
    }

    fn item_created(&mut self, wire: &ConversationItem) -> Result<ConversationUpdate, StateError> {
        let id = wire.id.clone().ok_or(StateError::MissingItemId)?;
        if let Some(existing) = self.items.get(&id) {
            tracing::debug!("Ignoring duplicate creation of item {}", id);
            return Ok(ConversationUpdate::item(existing.clone()));
        }

        let mut item = Item {
            id: id.clone(),
            item_type: wire.item_type,
            role: wire.role,
            status: wire.status.unwrap_or(ItemStatus::InProgress),
            content: wire.content.clone(),
            call_id: wire.call_id.clone(),
            name: wire.name.clone(),
            arguments: wire.arguments.clone().unwrap_or_default(),
            output: wire.output.clone(),
            formatted: FormattedItem::default(),
        };

        if let Some(audio) = self.queued_speech.remove(&id).and_then(|speech| speech.audio) {
            item.formatted.audio = audio;
        }
        item.formatted.text = item
            .content
            .iter()
            .filter(|part| part.content_type.is_text())
            .filter_map(|part| part.text.as_deref())
            .collect();
        if let Some(queued) = self.queued_transcripts.remove(&id) {
            item.formatted.transcript = transcript_or_sentinel(&queued.transcript);
            if let Some(part) = item.content.get_mut(queued.content_index) {
                part.transcript = Some(queued.transcript);
            }
        }

        match item.item_type {
            ItemType::Message => {
                if item.role == Some(ItemRole::User) {
                    item.status = ItemStatus::Completed;
                    if let Some(audio) = self.queued_input_audio.take() {
                        item.formatted.audio = audio;
                    }
                } else {
                    item.status = ItemStatus::InProgress;
                }
            }
            ItemType::FunctionCall => {
                item.status = ItemStatus::InProgress;
                item.formatted.tool = Some(FormattedTool {
                    call_id: item.call_id.clone().unwrap_or_default(),
                    name: item.name.clone().unwrap_or_default(),
                    arguments: String::new(),
                });
            }
            ItemType::FunctionCallOutput => {
                item.status = ItemStatus::Completed;
                item.formatted.output = item.output.clone();
            }
        }

        let item = Arc::new(item);
        self.items.insert(id.clone(), item.clone());
        self.item_order.push(id);
        Ok(ConversationUpdate::item(item))
    }

    fn item_deleted(&mut self, item_id: &str) -> Result<ConversationUpdate, StateError> {
        let item = self
            .items
            .remove(item_id)
            .ok_or_else(|| StateError::ItemNotFound(item_id.to_string()))?;
        self.item_order.retain(|id| id != item_id);
        Ok(ConversationUpdate::item(item))
    }

    fn transcription_completed(
        &mut self,
        item_id: &str,
        content_index: usize,
        transcript: &str,
    ) -> Result<ConversationUpdate, StateError> {
        if !self.items.contains_key(item_id) {
            self.queued_transcripts.insert(
                item_id.to_string(),
                QueuedTranscript {
                    content_index,
                    transcript: transcript.to_string(),
                },
            );
            return Ok(ConversationUpdate::none());
        }

        self.require_part(item_id, content_index)?;
        let item = self.item_mut(item_id)?;
        item.content[content_index].transcript = Some(transcript.to_string());
        item.formatted.transcript = transcript_or_sentinel(transcript);
        Ok(ConversationUpdate::with_delta(
            self.snapshot(item_id)?,
            ItemDelta::Transcript(transcript.to_string()),
        ))
    }

    fn item_truncated(
        &mut self,
        item_id: &str,
        audio_end_ms: u64,
    ) -> Result<ConversationUpdate, StateError> {
        let item = self.item_mut(item_id)?;
        item.formatted.transcript.clear();
        item.formatted.audio.truncate(samples_for_ms(audio_end_ms));
        Ok(ConversationUpdate::item(self.snapshot(item_id)?))
    }

    fn require_part(&self, item_id: &str, content_index: usize) -> Result<(), StateError> {
        let item = self
            .items
            .get(item_id)
            .ok_or_else(|| StateError::ItemNotFound(item_id.to_string()))?;
        if content_index >= item.content.len() {
            return Err(StateError::ContentPartNotFound {
                item_id: item_id.to_string(),
                content_index,
            });
        }
        Ok(())
    }

    fn item_mut(&mut self, item_id: &str) -> Result<&mut Item, StateError> {
        self.items
            .get_mut(item_id)
            .map(Arc::make_mut)
            .ok_or_else(|| StateError::ItemNotFound(item_id.to_string()))
    }

    fn snapshot(&self, item_id: &str) -> Result<Arc<Item>, StateError> {
        self.item(item_id)
            .ok_or_else(|| StateError::ItemNotFound(item_id.to_string()))
    }
}

fn transcript_or_sentinel(transcript: &str) -> String {
    if transcript.is_empty() {
        " ".to_string()
    } else {
        transcript.to_string()
    }
}

fn append(field: &mut Option<String>, delta: &str) {
    field.get_or_insert_with(String::new).push_str(delta);
}

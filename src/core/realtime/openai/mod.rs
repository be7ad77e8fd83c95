//! OpenAI Realtime API wire protocol.
//!
//! # Supported Models
//!
//! - `gpt-4o-realtime-preview` - GPT-4o Realtime Preview
//! - `gpt-4o-realtime-preview-2024-10-01` - October 2024 version
//! - `gpt-4o-realtime-preview-2024-12-17` - December 2024 version
//! - `gpt-4o-mini-realtime-preview` - Mini model for lower latency
//!
//! # Supported Voices
//!
//! alloy, ash, ballad, coral, echo, sage, shimmer, verse
//!
//! # Audio Format
//!
//! Input and output audio is PCM 16-bit signed little-endian at 24kHz,
//! base64-encoded inside JSON events.

mod config;
mod messages;

pub use config::{
    Modality, OPENAI_REALTIME_BETA, OPENAI_REALTIME_SAMPLE_RATE, OPENAI_REALTIME_URL,
    OpenAIRealtimeAudioFormat, OpenAIRealtimeModel, OpenAIRealtimeVoice,
};
pub use messages::{
    ApiError, ClientEvent, ContentPart, ContentType, ConversationItem, InputAudioTranscription,
    ItemRole, ItemStatus, ItemType, MaxTokens, RateLimit, Response, ServerEvent, Session,
    SessionConfig, ToolDefinition, TurnDetection, Usage,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_realtime_url() {
        assert_eq!(OPENAI_REALTIME_URL, "wss://api.openai.com/v1/realtime");
    }

    #[test]
    fn test_sample_rate() {
        assert_eq!(OPENAI_REALTIME_SAMPLE_RATE, 24000);
    }
}

//! Client configuration
//!
//! Configuration is read from .env files, environment variables and an
//! optional YAML file. Priority: YAML > ENV vars > .env values > defaults.
//! The .env file is loaded by the binary at startup, so it only ever
//! provides environment variables that are not already set.
//!
//! # Environment Variables
//! - `OPENAI_API_KEY` (required)
//! - `OPENAI_REALTIME_URL`
//! - `OPENAI_REALTIME_MODEL`
//! - `REALTIME_CONNECT_TIMEOUT_SECONDS`
//! - `REALTIME_INSTRUCTIONS`
//! - `REALTIME_VOICE`
//! - `REALTIME_MODALITIES` (comma separated)
//! - `REALTIME_TURN_DETECTION` (`server_vad`, `semantic_vad` or `none`)
//! - `REALTIME_TRANSCRIPTION_MODEL`
//! - `REALTIME_TEMPERATURE`
//!
//! # Example
//! ```rust,no_run
//! use waav_realtime::config::ClientConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ClientConfig::from_env()?;
//!
//! // Load from YAML file with environment variables as the base
//! let config = ClientConfig::from_file(&PathBuf::from("realtime.yaml"))?;
//! println!("Connecting to {}", config.url);
//! # Ok(())
//! # }
//! ```

use std::env;
use std::path::PathBuf;
use std::time::Duration;

mod yaml;

pub use yaml::{OpenAIYaml, SessionYaml, YamlConfig};

use crate::core::realtime::WebSocketTransport;
use crate::core::realtime::openai::{
    InputAudioTranscription, Modality, OPENAI_REALTIME_URL, OpenAIRealtimeModel,
    OpenAIRealtimeVoice, SessionConfig, TurnDetection,
};

/// Default handshake timeout in seconds.
const DEFAULT_CONNECT_TIMEOUT_SECONDS: u64 = 10;

/// Realtime client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// API key sent as a bearer token
    pub api_key: String,
    /// Realtime WebSocket endpoint, without the model query parameter
    pub url: String,
    pub model: OpenAIRealtimeModel,
    pub connect_timeout: Duration,
    /// Initial session configuration
    pub session: SessionConfig,
}

impl ClientConfig {
    /// Load configuration from environment variables
    ///
    /// # Errors
    /// Returns an error if `OPENAI_API_KEY` is missing, a variable has an
    /// invalid format, or validation fails.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let config = merge_config(None)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file, with environment variables as
    /// the base that YAML values override.
    ///
    /// # Errors
    /// Returns an error if:
    /// - The YAML file cannot be read or is malformed
    /// - Environment variables have invalid formats
    /// - Configuration validation fails
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let yaml_config = YamlConfig::from_file(path)?;
        let config = merge_config(Some(yaml_config))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the merged configuration
    ///
    /// - The API key must not be empty
    /// - The URL must be an absolute `ws://` or `wss://` URL
    /// - The temperature must be within 0.6..=1.2
    pub fn validate(&self) -> Result<(), String> {
        if self.api_key.trim().is_empty() {
            return Err("OPENAI_API_KEY is required".to_string());
        }

        let url = url::Url::parse(&self.url)
            .map_err(|e| format!("Invalid realtime URL '{}': {e}", self.url))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(format!(
                "Realtime URL must use ws:// or wss://, got '{}'",
                url.scheme()
            ));
        }
        if url.host_str().is_none() {
            return Err(format!("Realtime URL '{}' has no host", self.url));
        }

        if !(0.6..=1.2).contains(&self.session.temperature) {
            return Err(format!(
                "Temperature {} is outside the supported range 0.6-1.2",
                self.session.temperature
            ));
        }
        Ok(())
    }

    /// WebSocket transport for this configuration
    pub fn transport(&self) -> WebSocketTransport {
        WebSocketTransport::new(self.api_key.clone(), self.model)
            .with_url(self.url.clone())
            .with_connect_timeout(self.connect_timeout)
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn parse_modalities(values: &[String]) -> Result<Vec<Modality>, String> {
    values
        .iter()
        .map(|value| match value.trim().to_lowercase().as_str() {
            "text" => Ok(Modality::Text),
            "audio" => Ok(Modality::Audio),
            other => Err(format!("Unknown modality '{other}'")),
        })
        .collect()
}

fn parse_turn_detection(value: &str) -> Result<Option<TurnDetection>, String> {
    match value.trim().to_lowercase().as_str() {
        "none" | "manual" | "" => Ok(None),
        "server_vad" => Ok(Some(TurnDetection::server_vad())),
        "semantic_vad" => Ok(Some(TurnDetection::SemanticVad {
            eagerness: None,
            create_response: None,
            interrupt_response: None,
        })),
        other => Err(format!("Unknown turn detection '{other}'")),
    }
}

/// Merge environment variables (base) with optional YAML overrides
fn merge_config(yaml: Option<YamlConfig>) -> Result<ClientConfig, Box<dyn std::error::Error>> {
    let yaml = yaml.unwrap_or_default();
    let openai = yaml.openai.unwrap_or_default();
    let session_yaml = yaml.session.unwrap_or_default();

    let api_key = openai
        .api_key
        .or_else(|| env_var("OPENAI_API_KEY"))
        .unwrap_or_default();
    let url = openai
        .url
        .or_else(|| env_var("OPENAI_REALTIME_URL"))
        .unwrap_or_else(|| OPENAI_REALTIME_URL.to_string());
    let model = openai
        .model
        .or_else(|| env_var("OPENAI_REALTIME_MODEL"))
        .map(|model| OpenAIRealtimeModel::from_str_or_default(&model))
        .unwrap_or_default();

    let connect_timeout_seconds = match openai.connect_timeout_seconds {
        Some(seconds) => seconds,
        None => match env_var("REALTIME_CONNECT_TIMEOUT_SECONDS") {
            Some(value) => value
                .parse::<u64>()
                .map_err(|e| format!("Invalid REALTIME_CONNECT_TIMEOUT_SECONDS '{value}': {e}"))?,
            None => DEFAULT_CONNECT_TIMEOUT_SECONDS,
        },
    };

    let mut session = SessionConfig::default();
    if let Some(instructions) = session_yaml
        .instructions
        .or_else(|| env_var("REALTIME_INSTRUCTIONS"))
    {
        session.instructions = instructions;
    }
    if let Some(voice) = session_yaml.voice.or_else(|| env_var("REALTIME_VOICE")) {
        session.voice = OpenAIRealtimeVoice::from_str_or_default(&voice);
    }
    let modalities = session_yaml.modalities.or_else(|| {
        env_var("REALTIME_MODALITIES")
            .map(|value| value.split(',').map(str::to_string).collect::<Vec<_>>())
    });
    if let Some(modalities) = modalities {
        session.modalities = parse_modalities(&modalities)?;
    }
    if let Some(turn_detection) = session_yaml
        .turn_detection
        .or_else(|| env_var("REALTIME_TURN_DETECTION"))
    {
        session.turn_detection = parse_turn_detection(&turn_detection)?;
    }
    if let Some(model) = session_yaml
        .transcription_model
        .or_else(|| env_var("REALTIME_TRANSCRIPTION_MODEL"))
    {
        session.input_audio_transcription = Some(InputAudioTranscription { model });
    }
    let temperature = match session_yaml.temperature {
        Some(temperature) => Some(temperature),
        None => env_var("REALTIME_TEMPERATURE")
            .map(|value| {
                value
                    .parse::<f32>()
                    .map_err(|e| format!("Invalid REALTIME_TEMPERATURE '{value}': {e}"))
            })
            .transpose()?,
    };
    if let Some(temperature) = temperature {
        session.temperature = temperature;
    }

    Ok(ClientConfig {
        api_key,
        url,
        model,
        connect_timeout: Duration::from_secs(connect_timeout_seconds),
        session,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;
    use tempfile::TempDir;

    const ENV_VARS: &[&str] = &[
        "OPENAI_API_KEY",
        "OPENAI_REALTIME_URL",
        "OPENAI_REALTIME_MODEL",
        "REALTIME_CONNECT_TIMEOUT_SECONDS",
        "REALTIME_INSTRUCTIONS",
        "REALTIME_VOICE",
        "REALTIME_MODALITIES",
        "REALTIME_TURN_DETECTION",
        "REALTIME_TRANSCRIPTION_MODEL",
        "REALTIME_TEMPERATURE",
    ];

    // Helper to clean up environment variables
    fn cleanup_env_vars() {
        unsafe {
            for name in ENV_VARS {
                env::remove_var(name);
            }
        }
    }

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        cleanup_env_vars();
        unsafe {
            env::set_var("OPENAI_API_KEY", "sk-env");
        }

        let config = ClientConfig::from_env().unwrap();
        assert_eq!(config.api_key, "sk-env");
        assert_eq!(config.url, OPENAI_REALTIME_URL);
        assert_eq!(config.model, OpenAIRealtimeModel::default());
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.session, SessionConfig::default());

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_env_session_settings() {
        cleanup_env_vars();
        unsafe {
            env::set_var("OPENAI_API_KEY", "sk-env");
            env::set_var("OPENAI_REALTIME_MODEL", "gpt-4o-mini-realtime-preview");
            env::set_var("REALTIME_VOICE", "coral");
            env::set_var("REALTIME_MODALITIES", "text");
            env::set_var("REALTIME_TURN_DETECTION", "server_vad");
            env::set_var("REALTIME_TRANSCRIPTION_MODEL", "whisper-1");
            env::set_var("REALTIME_TEMPERATURE", "0.7");
        }

        let config = ClientConfig::from_env().unwrap();
        assert_eq!(config.model, OpenAIRealtimeModel::Gpt4oMiniRealtimePreview);
        assert_eq!(config.session.voice, OpenAIRealtimeVoice::Coral);
        assert_eq!(config.session.modalities, vec![Modality::Text]);
        assert_eq!(config.session.turn_detection, Some(TurnDetection::server_vad()));
        assert_eq!(
            config.session.input_audio_transcription,
            Some(InputAudioTranscription {
                model: "whisper-1".to_string()
            })
        );
        assert_eq!(config.session.temperature, 0.7);

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_env_missing_api_key() {
        cleanup_env_vars();

        let result = ClientConfig::from_env();
        assert!(result.unwrap_err().to_string().contains("OPENAI_API_KEY"));
    }

    #[test]
    #[serial]
    fn test_from_env_invalid_values() {
        cleanup_env_vars();
        unsafe {
            env::set_var("OPENAI_API_KEY", "sk-env");
            env::set_var("REALTIME_CONNECT_TIMEOUT_SECONDS", "soon");
        }
        assert!(ClientConfig::from_env().is_err());

        unsafe {
            env::remove_var("REALTIME_CONNECT_TIMEOUT_SECONDS");
            env::set_var("REALTIME_TURN_DETECTION", "sometimes");
        }
        assert!(ClientConfig::from_env().is_err());

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_yaml_overrides_env() {
        cleanup_env_vars();

        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("realtime.yaml");

        let yaml_content = r#"
openai:
  url: "ws://127.0.0.1:9000/v1/realtime"
  connect_timeout_seconds: 3

session:
  instructions: "From YAML"
"#;
        fs::write(&config_path, yaml_content).unwrap();

        unsafe {
            env::set_var("OPENAI_API_KEY", "sk-env");
            env::set_var("OPENAI_REALTIME_URL", "wss://env.example.com/v1/realtime");
            env::set_var("REALTIME_INSTRUCTIONS", "From ENV");
            env::set_var("REALTIME_VOICE", "echo");
        }

        let config = ClientConfig::from_file(&config_path).unwrap();

        // YAML overrides ENV
        assert_eq!(config.url, "ws://127.0.0.1:9000/v1/realtime");
        assert_eq!(config.session.instructions, "From YAML");
        assert_eq!(config.connect_timeout, Duration::from_secs(3));
        // ENV values where YAML is silent
        assert_eq!(config.api_key, "sk-env");
        assert_eq!(config.session.voice, OpenAIRealtimeVoice::Echo);

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_missing_file() {
        cleanup_env_vars();

        let config_path = PathBuf::from("/nonexistent/realtime.yaml");
        let result = ClientConfig::from_file(&config_path);

        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Failed to read config file")
        );
    }

    #[test]
    fn test_validate_url_scheme() {
        let mut config = ClientConfig {
            api_key: "sk-test".to_string(),
            url: "https://api.openai.com/v1/realtime".to_string(),
            model: OpenAIRealtimeModel::default(),
            connect_timeout: Duration::from_secs(1),
            session: SessionConfig::default(),
        };
        assert!(config.validate().unwrap_err().contains("ws:// or wss://"));

        config.url = "not a url".to_string();
        assert!(config.validate().is_err());

        config.url = OPENAI_REALTIME_URL.to_string();
        assert!(config.validate().is_ok());

        config.session.temperature = 2.0;
        assert!(config.validate().unwrap_err().contains("Temperature"));
    }

    #[test]
    fn test_transport_uses_config() {
        let config = ClientConfig {
            api_key: "sk-test".to_string(),
            url: "ws://localhost:9000/v1/realtime".to_string(),
            model: OpenAIRealtimeModel::Gpt4oRealtimePreview20241217,
            connect_timeout: Duration::from_secs(1),
            session: SessionConfig::default(),
        };
        assert_eq!(
            config.transport().endpoint().unwrap().as_str(),
            "ws://localhost:9000/v1/realtime?model=gpt-4o-realtime-preview-2024-12-17"
        );
    }
}

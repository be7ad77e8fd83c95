use serde::Deserialize;
use std::path::PathBuf;

/// Complete YAML configuration structure
///
/// All fields are optional to allow partial configuration. Values present
/// here override environment variables.
///
/// # Example YAML structure
/// ```yaml
/// openai:
///   api_key: "sk-..."
///   url: "wss://api.openai.com/v1/realtime"
///   model: "gpt-4o-realtime-preview-2024-12-17"
///   connect_timeout_seconds: 10
///
/// session:
///   instructions: "You are a helpful assistant."
///   voice: "alloy"
///   modalities: ["text", "audio"]
///   turn_detection: "server_vad"
///   transcription_model: "whisper-1"
///   temperature: 0.8
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub openai: Option<OpenAIYaml>,
    pub session: Option<SessionYaml>,
}

/// Connection settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct OpenAIYaml {
    pub api_key: Option<String>,
    pub url: Option<String>,
    pub model: Option<String>,
    pub connect_timeout_seconds: Option<u64>,
}

/// Session defaults from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SessionYaml {
    pub instructions: Option<String>,
    pub voice: Option<String>,
    pub modalities: Option<Vec<String>>,
    /// "server_vad", "semantic_vad" or "none"
    pub turn_detection: Option<String>,
    /// Enables input audio transcription with this model
    pub transcription_model: Option<String>,
    pub temperature: Option<f32>,
}

impl YamlConfig {
    /// Load configuration from a YAML file
    ///
    /// # Errors
    /// Returns an error if:
    /// - The file cannot be read
    /// - The YAML is malformed
    /// - Fields have invalid types
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {e}", path.display()))?;

        let config: YamlConfig = serde_yaml::from_str(&contents)
            .map_err(|e| format!("Failed to parse YAML config: {e}"))?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_yaml_config_full() {
        let yaml = r#"
openai:
  api_key: "sk-yaml"
  url: "wss://relay.example.com/v1/realtime"
  model: "gpt-4o-mini-realtime-preview"
  connect_timeout_seconds: 5

session:
  instructions: "Be brief"
  voice: "shimmer"
  modalities: ["text"]
  turn_detection: "none"
  transcription_model: "whisper-1"
  temperature: 0.7
"#;

        let config: YamlConfig = serde_yaml::from_str(yaml).unwrap();

        let openai = config.openai.as_ref().unwrap();
        assert_eq!(openai.api_key, Some("sk-yaml".to_string()));
        assert_eq!(openai.connect_timeout_seconds, Some(5));
        let session = config.session.as_ref().unwrap();
        assert_eq!(session.voice, Some("shimmer".to_string()));
        assert_eq!(session.modalities, Some(vec!["text".to_string()]));
        assert_eq!(session.temperature, Some(0.7));
    }

    #[test]
    fn test_yaml_config_partial() {
        let yaml = r#"
session:
  voice: "ash"
"#;

        let config: YamlConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(config.openai.is_none());
        assert_eq!(config.session.unwrap().voice, Some("ash".to_string()));
    }

    #[test]
    fn test_yaml_config_empty() {
        let config: YamlConfig = serde_yaml::from_str("{}").unwrap();
        assert!(config.openai.is_none());
        assert!(config.session.is_none());
    }

    #[test]
    fn test_yaml_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");
        fs::write(&config_path, "openai:\n  model: \"gpt-4o-realtime-preview\"\n").unwrap();

        let config = YamlConfig::from_file(&config_path).unwrap();
        assert_eq!(
            config.openai.unwrap().model,
            Some("gpt-4o-realtime-preview".to_string())
        );
    }

    #[test]
    fn test_yaml_from_file_malformed() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");
        fs::write(&config_path, "openai: [unclosed").unwrap();

        let err = YamlConfig::from_file(&config_path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse YAML config"));
    }
}

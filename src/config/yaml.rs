use serde::Deserialize;
use std::path::PathBuf;

use crate::core::stt::streaming::EndOfStreamMarker;

/// Complete YAML configuration structure
///
/// All fields are optional to allow partial configuration. Values present here
/// override environment variables.
///
/// # Example YAML structure
/// ```yaml
/// server:
///   endpoint: "https://asr.example.com/client/ws/speech"
///   system: "LVASR-ONLINE"
///   inactivity_timeout: 30
///   connect_timeout_seconds: 10
///   insecure_skip_verify: false
///
/// recognition:
///   sample_rate: 16000
///   frame_size: 160
///   interim_results: true
///   continuous: true
///   max_alternatives: 3
///   keywords_threshold: 0.5
///   timestamps: true
///   postprocessors: ["numbers"]
///   end_of_stream:
///     text: "EOS"
///   max_pending_bytes: 1048576
///
/// auth:
///   token_url: "https://auth.example.com/token"
///   api_key: "your-api-key"
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub server: Option<ServerYaml>,
    pub recognition: Option<RecognitionYaml>,
    pub auth: Option<AuthYaml>,
}

/// Recognizer endpoint settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ServerYaml {
    pub endpoint: Option<String>,
    pub system: Option<String>,
    pub inactivity_timeout: Option<u32>,
    pub connect_timeout_seconds: Option<u64>,
    /// Disables TLS certificate validation. Test endpoints only.
    pub insecure_skip_verify: Option<bool>,
}

/// Recognition options from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RecognitionYaml {
    pub audio_codec: Option<String>,
    pub sample_rate: Option<u32>,
    pub frame_size: Option<u32>,
    pub interim_results: Option<bool>,
    pub continuous: Option<bool>,
    pub max_alternatives: Option<u32>,
    pub keywords_threshold: Option<f32>,
    pub word_alternatives_threshold: Option<f32>,
    pub timestamps: Option<bool>,
    pub postprocessors: Option<Vec<String>>,
    pub end_of_stream: Option<EndOfStreamMarker>,
    pub max_pending_bytes: Option<usize>,
}

/// Credential settings from YAML
///
/// Exactly one scheme should be configured: a static `token`, a
/// `token_url` + `api_key` exchange, an `app_id` + `app_secret` pair, or a
/// `username` + `password` pair.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AuthYaml {
    pub token: Option<String>,
    pub token_url: Option<String>,
    pub api_key: Option<String>,
    pub grant_type: Option<String>,
    pub app_id: Option<String>,
    pub app_secret: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl YamlConfig {
    /// Load configuration from a YAML file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or the YAML is malformed.
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {e}", path.display()))?;

        let config: YamlConfig = serde_yaml::from_str(&contents)
            .map_err(|e| format!("Failed to parse YAML config: {e}"))?;

        Ok(config)
    }
}

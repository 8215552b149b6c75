//! Session configuration for the streaming recognition client.
//!
//! A [`SessionConfig`] is a plain value. The transport takes its own copy when
//! a connection is opened, so later edits only affect new sessions.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use crate::auth::Authorization;
use crate::core::stt::base::STTError;

// =============================================================================
// Constants
// =============================================================================

/// Default recognition endpoint (HTTPS form, mapped to WSS on connect).
pub const DEFAULT_API_ENDPOINT: &str = "https://runa.tilde.lv/client/ws/speech/LVASR-ONLINE";

/// Default sample rate in Hz.
pub const DEFAULT_SAMPLE_RATE: u32 = 16000;

/// Default frame size in samples (10 ms at 16 kHz).
pub const DEFAULT_FRAME_SIZE: u32 = 160;

/// Default inactivity timeout in seconds.
pub const DEFAULT_INACTIVITY_TIMEOUT: u32 = 30;

/// Default WebSocket handshake timeout in seconds.
pub const DEFAULT_CONNECT_TIMEOUT: u64 = 30;

/// Default bound on audio buffered while not connected (8 MiB).
pub const DEFAULT_MAX_PENDING_BYTES: usize = 8 * 1024 * 1024;

/// Channel layout appended to the codec descriptor in the connection URL.
pub const CHANNEL_LAYOUT: &str = "layout=(string)interleaved, channels=(int)1";

// =============================================================================
// End-of-stream Marker
// =============================================================================

/// Frame used to tell the server no more audio follows.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EndOfStreamMarker {
    /// A zero-length binary frame
    #[default]
    EmptyBinary,
    /// A text frame with the given content, e.g. `EOS`
    Text(String),
}

// =============================================================================
// Session Configuration
// =============================================================================

/// Parameters for one recognition session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// HTTPS (or WSS) base endpoint of the recognizer.
    #[serde(default = "default_api_endpoint")]
    pub api_endpoint: String,

    /// Recognition system appended as a path segment, if set.
    #[serde(default)]
    pub system: Option<String>,

    /// Audio MIME/codec descriptor. Built from `sample_rate` when unset.
    #[serde(default)]
    pub audio_codec: Option<String>,

    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    /// Samples per audio frame.
    #[serde(default = "default_frame_size")]
    pub frame_size: u32,

    #[serde(default = "default_true")]
    pub interim_results: bool,

    #[serde(default = "default_true")]
    pub continuous: bool,

    /// Seconds without traffic before the transport closes. 0 disables.
    #[serde(default = "default_inactivity_timeout")]
    pub inactivity_timeout: u32,

    #[serde(default = "default_max_alternatives")]
    pub max_alternatives: u32,

    /// Keyword spotting confidence threshold (0.0 - 1.0).
    #[serde(default)]
    pub keywords_threshold: Option<f32>,

    /// Word alternatives confidence threshold (0.0 - 1.0).
    #[serde(default)]
    pub word_alternatives_threshold: Option<f32>,

    #[serde(default)]
    pub timestamps: bool,

    /// Skip TLS certificate validation.
    ///
    /// Security-relevant opt-out for test endpoints with self-signed
    /// certificates. Never enable against production services.
    #[serde(default)]
    pub certificate_validation_disabled: bool,

    /// Server-side post-processors to enable, e.g. `numbers`.
    #[serde(default)]
    pub postprocessors: Vec<String>,

    #[serde(default)]
    pub end_of_stream: EndOfStreamMarker,

    /// Bound on bytes buffered while not connected. 0 means unbounded.
    #[serde(default = "default_max_pending_bytes")]
    pub max_pending_bytes: usize,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_api_endpoint() -> String {
    DEFAULT_API_ENDPOINT.to_string()
}

fn default_sample_rate() -> u32 {
    DEFAULT_SAMPLE_RATE
}

fn default_frame_size() -> u32 {
    DEFAULT_FRAME_SIZE
}

fn default_true() -> bool {
    true
}

fn default_inactivity_timeout() -> u32 {
    DEFAULT_INACTIVITY_TIMEOUT
}

fn default_max_alternatives() -> u32 {
    1
}

fn default_max_pending_bytes() -> usize {
    DEFAULT_MAX_PENDING_BYTES
}

fn default_connect_timeout() -> u64 {
    DEFAULT_CONNECT_TIMEOUT
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            api_endpoint: default_api_endpoint(),
            system: None,
            audio_codec: None,
            sample_rate: DEFAULT_SAMPLE_RATE,
            frame_size: DEFAULT_FRAME_SIZE,
            interim_results: true,
            continuous: true,
            inactivity_timeout: DEFAULT_INACTIVITY_TIMEOUT,
            max_alternatives: 1,
            keywords_threshold: None,
            word_alternatives_threshold: None,
            timestamps: false,
            certificate_validation_disabled: false,
            postprocessors: Vec::new(),
            end_of_stream: EndOfStreamMarker::default(),
            max_pending_bytes: DEFAULT_MAX_PENDING_BYTES,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl SessionConfig {
    /// Configuration for the given endpoint with defaults elsewhere.
    pub fn new(api_endpoint: impl Into<String>) -> Self {
        Self {
            api_endpoint: api_endpoint.into(),
            ..Default::default()
        }
    }

    /// The audio codec descriptor sent as `content-type`.
    pub fn content_type(&self) -> String {
        match self.audio_codec {
            Some(ref codec) => codec.clone(),
            None => format!(
                "audio/x-raw, rate=(int){}, format=(string)S16LE",
                self.sample_rate
            ),
        }
    }

    /// Bytes in one frame of 16-bit mono PCM.
    pub fn frame_bytes(&self) -> usize {
        self.frame_size as usize * 2
    }

    /// Inactivity window, or `None` when disabled.
    pub fn inactivity_window(&self) -> Option<Duration> {
        (self.inactivity_timeout > 0).then(|| Duration::from_secs(self.inactivity_timeout as u64))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Check the configuration before any connection attempt.
    pub fn validate(&self) -> Result<(), STTError> {
        let url = Url::parse(&self.api_endpoint).map_err(|e| {
            STTError::InvalidConfiguration(format!(
                "Invalid endpoint URL '{}': {e}",
                self.api_endpoint
            ))
        })?;

        if !matches!(url.scheme(), "https" | "http" | "wss" | "ws") {
            return Err(STTError::InvalidConfiguration(format!(
                "Unsupported endpoint scheme '{}'",
                url.scheme()
            )));
        }
        if url.host_str().is_none_or(str::is_empty) {
            return Err(STTError::InvalidConfiguration(
                "Endpoint URL has no host".to_string(),
            ));
        }
        if let Some(ref system) = self.system
            && (system.trim().is_empty() || system.contains('/'))
        {
            return Err(STTError::InvalidConfiguration(format!(
                "Invalid recognition system name '{system}'"
            )));
        }
        if let Some(ref codec) = self.audio_codec
            && codec.trim().is_empty()
        {
            return Err(STTError::InvalidConfiguration(
                "Audio codec descriptor is empty".to_string(),
            ));
        }
        if self.sample_rate == 0 {
            return Err(STTError::InvalidConfiguration(
                "Sample rate must be greater than zero".to_string(),
            ));
        }
        if self.frame_size == 0 {
            return Err(STTError::InvalidConfiguration(
                "Frame size must be greater than zero".to_string(),
            ));
        }
        if self.max_alternatives == 0 {
            return Err(STTError::InvalidConfiguration(
                "max_alternatives must be at least 1".to_string(),
            ));
        }
        for (name, value) in [
            ("keywords_threshold", self.keywords_threshold),
            ("word_alternatives_threshold", self.word_alternatives_threshold),
        ] {
            if let Some(v) = value
                && !(0.0..=1.0).contains(&v)
            {
                return Err(STTError::InvalidConfiguration(format!(
                    "{name} must be between 0.0 and 1.0, got {v}"
                )));
            }
        }
        if self.connect_timeout_secs == 0 {
            return Err(STTError::InvalidConfiguration(
                "Connect timeout must be greater than zero".to_string(),
            ));
        }
        if let EndOfStreamMarker::Text(ref text) = self.end_of_stream
            && text.is_empty()
        {
            return Err(STTError::InvalidConfiguration(
                "Text end-of-stream marker must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Build the WebSocket URL for a connection authorized by `auth`.
    ///
    /// `https` maps to `wss` and `http` to `ws`. The query carries the codec
    /// descriptor with channel layout, plus any URL-embedded credentials.
    pub fn websocket_url(&self, auth: &Authorization) -> Result<Url, STTError> {
        self.validate()?;

        let mut url = Url::parse(self.api_endpoint.trim_end_matches('/'))
            .map_err(|e| STTError::InvalidConfiguration(format!("Invalid endpoint URL: {e}")))?;

        let ws_scheme = match url.scheme() {
            "https" => Some("wss"),
            "http" => Some("ws"),
            _ => None,
        };
        if let Some(scheme) = ws_scheme {
            url.set_scheme(scheme).map_err(|_| {
                STTError::InvalidConfiguration(format!("Cannot map endpoint scheme to {scheme}"))
            })?;
        }

        if let Some(ref system) = self.system {
            url.path_segments_mut()
                .map_err(|_| {
                    STTError::InvalidConfiguration("Endpoint URL cannot have a path".to_string())
                })?
                .pop_if_empty()
                .push(system);
        }

        {
            let mut query = url.query_pairs_mut();
            query.append_pair(
                "content-type",
                &format!("{}, {CHANNEL_LAYOUT}", self.content_type()),
            );
            for (key, value) in auth.query_pairs() {
                query.append_pair(key, &value);
            }
        }

        Ok(url)
    }

    /// Build the JSON start message sent right after the connection opens.
    pub fn build_start_message(&self) -> serde_json::Value {
        let mut msg = serde_json::json!({
            "action": "start",
            "content-type": self.content_type(),
            "interim_results": self.interim_results,
            "continuous": self.continuous,
            "inactivity_timeout": self.inactivity_timeout,
            "max_alternatives": self.max_alternatives,
            "timestamps": self.timestamps,
            "enable-postprocess": self.postprocessors,
        });

        if let Some(threshold) = self.keywords_threshold {
            msg["keywords_threshold"] = serde_json::json!(threshold);
        }
        if let Some(threshold) = self.word_alternatives_threshold {
            msg["word_alternatives_threshold"] = serde_json::json!(threshold);
        }

        msg
    }
}

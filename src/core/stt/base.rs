//! Base error and sink types shared by the streaming recognition client.
//!
//! Every failure the client can report is an [`STTError`]. Results and errors
//! travel through the same result sink as `Result<ResultFrame, STTError>`, so a
//! caller never has to watch a second channel for terminal failures.

use bytes::Bytes;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

use super::streaming::ResultFrame;

// =============================================================================
// Error Types
// =============================================================================

/// Errors produced by the credential provider, transport and session.
///
/// `Clone` so that a single failed token refresh can be handed to every caller
/// that was waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum STTError {
    /// Credential rejected by the server or token refresh failed
    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    /// Socket-level failure, non-auth HTTP status or unreachable host
    #[error("Transport error: {0}")]
    TransportError(String),

    /// A result frame could not be decoded
    #[error("Decode error: {0}")]
    DecodeError(String),

    /// No frame sent or received within the configured window (seconds)
    #[error("No traffic for {0} seconds")]
    InactivityTimeout(u32),

    /// Missing or malformed configuration, reported before connecting
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The pending write buffer reached its configured bound
    #[error("Pending write buffer is full ({limit} bytes)")]
    BufferOverflow { limit: usize },
}

impl STTError {
    /// Short, stable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AuthFailed(_) => "auth_failed",
            Self::TransportError(_) => "transport_error",
            Self::DecodeError(_) => "decode_error",
            Self::InactivityTimeout(_) => "inactivity_timeout",
            Self::InvalidConfiguration(_) => "invalid_configuration",
            Self::BufferOverflow { .. } => "buffer_overflow",
        }
    }

    /// Whether the error ends the connection it was raised on.
    ///
    /// Decode errors and buffer overflows are reported while streaming continues.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::DecodeError(_) | Self::BufferOverflow { .. })
    }
}

/// Result type for streaming recognition operations.
pub type STTResult<T> = Result<T, STTError>;

// =============================================================================
// Sink Types
// =============================================================================

/// Receives every decoded result frame, or the error that replaced it.
pub type ResultCallback = Arc<
    dyn Fn(Result<ResultFrame, STTError>) -> Pin<Box<dyn Future<Output = ()> + Send>>
        + Send
        + Sync,
>;

/// Receives each raw audio chunk accepted by the session.
pub type AudioCallback =
    Arc<dyn Fn(Bytes) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Receives power-level samples (dBFS) reported by the audio source.
pub type PowerCallback =
    Arc<dyn Fn(f32) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Sinks a recognition session delivers to, fixed at construction.
#[derive(Clone)]
pub struct SessionSinks {
    pub result: ResultCallback,
    pub audio: Option<AudioCallback>,
    pub power: Option<PowerCallback>,
}

impl SessionSinks {
    /// Sinks with only a result handler.
    pub fn new(result: ResultCallback) -> Self {
        Self {
            result,
            audio: None,
            power: None,
        }
    }

    /// Add a raw audio passthrough sink.
    pub fn with_audio(mut self, audio: AudioCallback) -> Self {
        self.audio = Some(audio);
        self
    }

    /// Add a power-level sink.
    pub fn with_power(mut self, power: PowerCallback) -> Self {
        self.power = Some(power);
        self
    }
}

impl std::fmt::Debug for SessionSinks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionSinks")
            .field("audio", &self.audio.is_some())
            .field("power", &self.power.is_some())
            .finish()
    }
}

//! Real-time streaming speech recognition over WebSocket.
//!
//! This module streams raw PCM audio to a recognition service and delivers
//! incremental transcription results back to the caller.
//!
//! # Features
//!
//! - Explicit connection state machine (`Idle`, `Connecting`, `Open`, `Closing`, `Closed`)
//! - Audio buffered while connecting and flushed in order once open
//! - JSON start message, binary audio frames, end-of-stream marker
//! - Inactivity timeout reset by every frame sent or received
//! - One automatic credential refresh and reconnect on authentication failure
//! - Basic, bearer and signed-URL (HMAC-SHA256) authentication
//! - Optional TLS certificate validation opt-out for test endpoints
//!
//! # Protocol
//!
//! ```text
//! client                                   server
//!   │ ── WebSocket handshake (auth) ────────► │
//!   │ ── {"action":"start", ...} ───────────► │
//!   │ ── binary PCM frame ──────────────────► │
//!   │ ── binary PCM frame ──────────────────► │
//!   │ ◄──────── {"status":0,"result":{...}} ─ │
//!   │ ── end-of-stream marker ──────────────► │
//!   │ ◄── {"status":0,"result":{"final":true}}│
//!   │ ◄───────────────────────────── close ── │
//! ```
//!
//! The connection URL is the configured HTTPS endpoint with its scheme mapped
//! to WSS and the codec descriptor in the `content-type` query parameter:
//!
//! ```text
//! wss://host/client/ws/speech?content-type=audio%2Fx-raw%2C+rate%3D%28int%2916000...
//! ```
//!
//! # Configuration
//!
//! ```yaml
//! api_endpoint: "https://asr.example.com/client/ws/speech"
//! system: "LVASR-ONLINE"
//! sample_rate: 16000
//! frame_size: 160
//! interim_results: true
//! inactivity_timeout: 30
//! max_alternatives: 1
//! postprocessors: ["numbers"]
//! end_of_stream: empty-binary
//! ```

mod audio;
mod config;
mod connector;
mod messages;
mod session;
mod transport;


pub use audio::{AudioSource, CaptureEvent, ReaderAudioSource};
pub use config::{
    CHANNEL_LAYOUT, DEFAULT_API_ENDPOINT, DEFAULT_CONNECT_TIMEOUT, DEFAULT_FRAME_SIZE,
    DEFAULT_INACTIVITY_TIMEOUT, DEFAULT_MAX_PENDING_BYTES, DEFAULT_SAMPLE_RATE,
    EndOfStreamMarker, SessionConfig,
};
pub use connector::{ConnectRequest, Connector, FrameSink, FrameStream, TungsteniteConnector};
pub use messages::{
    Hypothesis, MAX_HYPOTHESES, RecognitionPayload, ResponseStatus, ResultFrame, WordAlignment,
};
pub use session::RecognitionSession;
pub use transport::{CloseReason, ConnectionState, StreamTransport, TransportEvent};

pub mod base;
pub mod streaming;

// Re-export public types and sinks
pub use base::{
    AudioCallback, PowerCallback, ResultCallback, STTError, STTResult, SessionSinks,
};

// Re-export the streaming client
pub use streaming::{
    AudioSource, CaptureEvent, CloseReason, ConnectionState, Connector, EndOfStreamMarker,
    ReaderAudioSource, RecognitionSession, ResultFrame, SessionConfig, StreamTransport,
    TransportEvent, TungsteniteConnector,
};

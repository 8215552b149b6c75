pub mod stt;

// Re-export commonly used types for convenience
pub use stt::{
    ConnectionState, RecognitionSession, ResultFrame, STTError, STTResult, SessionConfig,
    SessionSinks, StreamTransport,
};

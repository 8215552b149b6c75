//! Result frame types for the streaming recognition protocol.
//!
//! The server answers with JSON text frames shaped like:
//!
//! ```json
//! {
//!   "status": 0,
//!   "segment": 3,
//!   "result": {
//!     "hypotheses": [
//!       { "transcript": "labdien", "confidence": 0.93,
//!         "word-alignment": [{ "word": "labdien", "start": 0.4, "length": 0.6 }] }
//!     ],
//!     "final": true
//!   }
//! }
//! ```
//!
//! Frames are forwarded to the caller as decoded, whatever their status.
//! Unknown fields are kept in [`ResultFrame::extra`].

use serde::{Deserialize, Serialize};

use crate::core::stt::base::STTError;

/// Upper bound on hypotheses accepted in a single frame.
pub const MAX_HYPOTHESES: usize = 100;

// =============================================================================
// Response Status
// =============================================================================

/// Status code carried by every result frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseStatus {
    /// Recognition is proceeding normally
    Success,
    /// No speech was detected
    NoSpeech,
    /// Recognition was aborted by the server
    Aborted,
    /// The audio contained no decodable frames
    NoValidFrames,
    /// No recognition worker is available
    NotAvailable,
    /// A code this client does not know
    Other(i32),
}

impl ResponseStatus {
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Self::Success,
            1 => Self::NoSpeech,
            2 => Self::Aborted,
            5 => Self::NoValidFrames,
            9 => Self::NotAvailable,
            other => Self::Other(other),
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            Self::Success => 0,
            Self::NoSpeech => 1,
            Self::Aborted => 2,
            Self::NoValidFrames => 5,
            Self::NotAvailable => 9,
            Self::Other(code) => *code,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl std::fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::NoSpeech => write!(f, "no speech"),
            Self::Aborted => write!(f, "aborted"),
            Self::NoValidFrames => write!(f, "no valid frames"),
            Self::NotAvailable => write!(f, "not available"),
            Self::Other(code) => write!(f, "status {code}"),
        }
    }
}

// =============================================================================
// Result Frame
// =============================================================================

/// One JSON result frame received from the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultFrame {
    /// Numeric status, see [`ResponseStatus`].
    #[serde(default)]
    pub status: i32,

    /// Human readable message accompanying a non-success status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Segment index within the session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment: Option<u64>,

    /// Recognition payload, absent on pure status frames.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<RecognitionPayload>,

    /// Any other fields the server sent.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Transcript alternatives and finality for one segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognitionPayload {
    #[serde(default)]
    pub hypotheses: Vec<Hypothesis>,

    /// Whether this segment will not be revised further.
    #[serde(rename = "final", default)]
    pub is_final: bool,
}

/// A single transcript alternative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hypothesis {
    pub transcript: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub likelihood: Option<f64>,

    /// Per-word timing, present when timestamps were requested.
    #[serde(
        rename = "word-alignment",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub word_alignment: Option<Vec<WordAlignment>>,
}

/// Timing and confidence for one recognized word.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordAlignment {
    pub word: String,
    /// Offset from the segment start, in seconds
    pub start: f64,
    /// Duration in seconds
    pub length: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

impl ResultFrame {
    /// Decode a text frame.
    ///
    /// Anything that is not a JSON object of the expected shape is a
    /// [`STTError::DecodeError`].
    pub fn parse(text: &str) -> Result<Self, STTError> {
        let frame: ResultFrame = serde_json::from_str(text)
            .map_err(|e| STTError::DecodeError(format!("Invalid result frame: {e}")))?;

        if let Some(ref result) = frame.result
            && result.hypotheses.len() > MAX_HYPOTHESES
        {
            return Err(STTError::DecodeError(format!(
                "Result frame carries {} hypotheses (max {MAX_HYPOTHESES})",
                result.hypotheses.len()
            )));
        }

        Ok(frame)
    }

    /// Decoded status code.
    pub fn status(&self) -> ResponseStatus {
        ResponseStatus::from_code(self.status)
    }

    /// Whether the frame carries a final result.
    pub fn is_final(&self) -> bool {
        self.result.as_ref().is_some_and(|r| r.is_final)
    }

    /// The best (first) hypothesis, if any.
    pub fn best_hypothesis(&self) -> Option<&Hypothesis> {
        self.result.as_ref().and_then(|r| r.hypotheses.first())
    }

    /// Transcript of the best hypothesis.
    pub fn transcript(&self) -> Option<&str> {
        self.best_hypothesis().map(|h| h.transcript.as_str())
    }

    /// Confidence of the best hypothesis.
    pub fn confidence(&self) -> Option<f64> {
        self.best_hypothesis().and_then(|h| h.confidence)
    }
}

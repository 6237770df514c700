use serde::{Deserialize, Serialize};

/// Frames the client sends over the interview socket
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientFrame {
    /// One recorded answer, base64-encoded WAV
    #[serde(rename = "audio_data")]
    AudioData {
        audio: String,
        metadata: AudioMetadata,
    },

    /// Candidate started recording an answer
    #[serde(rename = "start_answer")]
    StartAnswer {},

    /// Candidate ended the interview early
    #[serde(rename = "end_interview")]
    EndInterview {},
}

/// Metadata accompanying an audio payload
#[derive(Debug, Serialize, Deserialize)]
pub struct AudioMetadata {
    /// Decoded payload size in bytes
    pub size: usize,

    /// MIME type of the encoded audio
    #[serde(rename = "type")]
    pub content_type: String,

    /// RFC3339 timestamp of when the answer finished recording
    pub timestamp: String,
}

/// Frames the backend sends over the interview socket
///
/// The transport hands callbacks the raw JSON value; this typed view is what
/// the session layer switches on. Unrecognized `type` tags map to `Unknown`
/// so protocol additions never break a running interview.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// Next interview question for the candidate
    #[serde(rename = "question")]
    Question {
        text: String,
        #[serde(default)]
        index: Option<u32>,
    },

    /// Transcription of the last submitted answer
    #[serde(rename = "transcript")]
    Transcript {
        text: String,
        #[serde(default)]
        partial: bool,
    },

    /// Session status update
    #[serde(rename = "status")]
    Status {
        status: String,
        #[serde(default)]
        message: Option<String>,
    },

    /// Interview finished; results can be fetched with the test id
    #[serde(rename = "interview_complete")]
    Complete {
        #[serde(default)]
        test_id: Option<String>,
    },

    /// Backend-reported error
    #[serde(rename = "error")]
    Error { message: String },

    #[serde(other)]
    Unknown,
}

impl ServerEvent {
    /// Parse a decoded frame, tolerating unknown shapes
    pub fn from_value(value: serde_json::Value) -> Self {
        serde_json::from_value(value).unwrap_or(ServerEvent::Unknown)
    }
}

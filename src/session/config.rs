use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for one interview attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Participant identity attached to the socket handshake
    pub participant_id: String,

    /// Hard cap on one answer's duration
    pub max_answer: Duration,

    /// MIME type reported in audio payload metadata
    pub audio_content_type: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            participant_id: format!("participant-{}", uuid::Uuid::new_v4()),
            max_answer: Duration::from_secs(120), // 2 minutes per answer
            audio_content_type: "audio/wav".to_string(),
        }
    }
}

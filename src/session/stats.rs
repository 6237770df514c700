use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Snapshot of one interview session's progress
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    pub session_id: String,

    /// Evaluation record key, used to fetch results after the session
    pub test_id: String,

    /// Current transport readiness ("open", "connecting", ...)
    pub connection_state: String,

    /// Frames waiting for the socket to (re)open
    pub queued_frames: usize,

    pub started_at: DateTime<Utc>,

    /// Total duration in seconds
    pub duration_secs: f64,

    /// Answers handed to the transport so far
    pub answers_submitted: usize,

    /// Inbound server events collected so far
    pub events_received: usize,
}

//! Interview session orchestration
//!
//! This module provides the `InterviewSession` abstraction that manages:
//! - Session bootstrap over HTTP (session and test identifiers)
//! - The session's WebSocket channel via the transport manager
//! - Encoding recorded answers into `audio_data` frames
//! - Collecting inbound server events (questions, transcripts, status)
//! - Session statistics and result retrieval

mod config;
mod session;
mod stats;

pub use config::SessionConfig;
pub use session::InterviewSession;
pub use stats::SessionStats;

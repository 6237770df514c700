//! Audio capture engine
//!
//! Produces exactly one WAV blob per recording, stopping automatically at a
//! natural conversational boundary: speech onset and trailing silence are
//! detected from ~32ms RMS level windows, with a minimum-speech floor that
//! keeps short noises from ending an answer and a hard duration cap that
//! always wins.

pub mod level;
pub mod microphone;
pub mod recorder;
pub mod source;

pub use level::LevelWindow;
pub use microphone::MicrophoneSource;
pub use recorder::{AnswerRecorder, Recording, RecorderConfig, RecordingHandle, StopReason};
pub use source::{AudioFrame, CaptureConfig, CaptureSource};

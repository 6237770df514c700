pub mod api;
pub mod audio;
pub mod config;
pub mod error;
pub mod session;
pub mod transport;

pub use api::{ApiClient, EvaluationReport, SessionTicket};
pub use audio::{
    AnswerRecorder, AudioFrame, CaptureConfig, CaptureSource, MicrophoneSource, Recording,
    RecorderConfig, RecordingHandle, StopReason,
};
pub use config::Config;
pub use error::{CaptureError, RequestError, TransportError};
pub use session::{InterviewSession, SessionConfig, SessionStats};
pub use transport::{
    AudioMetadata, ClientFrame, CloseInfo, ConnectionState, SendOutcome, ServerEvent,
    SessionCallbacks, TransportConfig, TransportManager,
};

//! Classified error types for the transport, capture, and request layers
//!
//! Each taxonomy maps one failure cause to one variant with a message that
//! can be shown to the candidate as-is. Orchestration code composes these
//! with `anyhow::Context` the same way the rest of the crate does.

use thiserror::Error;

/// Errors surfaced through the transport manager's `on_error` callback.
#[derive(Debug, Error)]
pub enum TransportError {
    /// TLS handshake failed. The usual cause on self-hosted backends is an
    /// untrusted certificate, so the message carries the remediation hint.
    #[error("secure connection failed: {0}. If the backend uses a self-signed certificate, visit the HTTPS origin in a browser and trust it first")]
    Tls(String),

    /// Any other socket-level failure, forwarded unchanged.
    #[error("websocket error: {0}")]
    Socket(String),

    /// An inbound frame was not valid JSON. The connection stays up.
    #[error("failed to decode inbound frame: {0}")]
    Decode(String),
}

/// Errors rejecting an audio capture attempt.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("microphone access was denied. Allow microphone access in your system settings and try again")]
    PermissionDenied,

    #[error("no microphone was found. Connect an input device and try again")]
    DeviceNotFound,

    #[error("the microphone is in use by another application. Close it and try again")]
    DeviceInUse,

    #[error("audio capture is not supported with the requested format: {0}")]
    Unsupported(String),

    #[error("the audio source stopped producing frames before recording finished")]
    SourceClosed,

    /// A recording is already in flight on this recorder.
    #[error("a recording is already in progress")]
    RecorderBusy,

    #[error("audio capture failed: {0}")]
    Stream(String),
}

/// Terminal errors from the HTTP request client, after retries are exhausted.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request to {url} timed out after {attempts} attempt(s)")]
    Timeout { url: String, attempts: u32 },

    #[error("secure connection to {url} failed: {message}. The server certificate may not be trusted")]
    Tls { url: String, message: String },

    #[error("network error reaching {url} after {attempts} attempt(s): {message}")]
    Network {
        url: String,
        attempts: u32,
        message: String,
    },

    /// Non-retryable HTTP status (4xx), or 5xx after retries ran out.
    #[error("server returned {status} for {url}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },

    /// The response decoded, but a field the session cannot exist without
    /// was absent.
    #[error("response from {url} is missing required field `{field}`")]
    MissingField { url: String, field: String },

    #[error("failed to decode response from {url}: {message}")]
    Decode { url: String, message: String },
}

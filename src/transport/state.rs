use crate::error::TransportError;
use serde_json::Value;

/// Readiness of one session's socket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection exists for this session
    NotConnected,
    /// Handshake in progress, or a reconnect is scheduled
    Connecting,
    /// Socket is open and flushing
    Open,
    /// Close frame sent, waiting for the peer
    Closing,
    /// Socket closed, entry about to be removed
    Closed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &str {
        match self {
            ConnectionState::NotConnected => "not_connected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
        }
    }
}

/// How a connection ended, delivered to `on_close`
#[derive(Debug, Clone)]
pub struct CloseInfo {
    /// WebSocket close code (1006 when the socket dropped without one)
    pub code: u16,
    pub reason: String,
    /// True for a normal 1000/1001 closure
    pub was_clean: bool,
}

impl CloseInfo {
    pub fn is_normal_code(code: u16) -> bool {
        code == 1000 || code == 1001
    }
}

type OpenHandler = Box<dyn Fn() + Send + Sync>;
type MessageHandler = Box<dyn Fn(Value) + Send + Sync>;
type ErrorHandler = Box<dyn Fn(TransportError) + Send + Sync>;
type CloseHandler = Box<dyn Fn(CloseInfo) + Send + Sync>;

/// Per-session event handlers, all optional
///
/// Registered with `TransportManager::connect`. A second `connect` for the
/// same session replaces the whole set.
#[derive(Default)]
pub struct SessionCallbacks {
    on_open: Option<OpenHandler>,
    on_message: Option<MessageHandler>,
    on_error: Option<ErrorHandler>,
    on_close: Option<CloseHandler>,
}

impl SessionCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_open(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_open = Some(Box::new(f));
        self
    }

    pub fn on_message(mut self, f: impl Fn(Value) + Send + Sync + 'static) -> Self {
        self.on_message = Some(Box::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(TransportError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }

    pub fn on_close(mut self, f: impl Fn(CloseInfo) + Send + Sync + 'static) -> Self {
        self.on_close = Some(Box::new(f));
        self
    }

    pub(crate) fn emit_open(&self) {
        if let Some(f) = &self.on_open {
            f();
        }
    }

    pub(crate) fn emit_message(&self, value: Value) {
        if let Some(f) = &self.on_message {
            f(value);
        }
    }

    pub(crate) fn emit_error(&self, err: TransportError) {
        if let Some(f) = &self.on_error {
            f(err);
        }
    }

    pub(crate) fn emit_close(&self, info: CloseInfo) {
        if let Some(f) = &self.on_close {
            f(info);
        }
    }
}

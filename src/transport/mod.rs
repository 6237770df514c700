//! WebSocket session transport
//!
//! Maintains one reliable logical channel per interview session on top of
//! single-shot sockets:
//! - outbound frames queue in FIFO order while disconnected and flush the
//!   instant the socket opens
//! - abnormal closures reconnect with bounded linear backoff (attempt × step,
//!   3 attempts), then surface a single close event
//! - per-session callbacks for open/message/error/close, with per-session
//!   state fully isolated

pub mod manager;
pub mod messages;
pub mod state;

pub use manager::{SendOutcome, TransportConfig, TransportManager};
pub use messages::{AudioMetadata, ClientFrame, ServerEvent};
pub use state::{CloseInfo, ConnectionState, SessionCallbacks};

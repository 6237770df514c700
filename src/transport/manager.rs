use super::state::{CloseInfo, ConnectionState, SessionCallbacks};
use crate::error::TransportError;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, info, warn};

/// Transport manager configuration, injected by the composition root
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// WebSocket origin, e.g. "wss://interview.example.com"
    pub ws_origin: String,

    /// Give up after this many reconnect attempts per session
    pub max_reconnect_attempts: u32,

    /// Linear backoff step: attempt N waits N * step
    pub reconnect_step: Duration,

    /// Optional participant identity attached to the handshake query
    pub participant_id: Option<String>,

    /// Optional bearer token attached to the handshake query
    pub token: Option<String>,
}

impl TransportConfig {
    pub fn new(ws_origin: impl Into<String>) -> Self {
        Self {
            ws_origin: ws_origin.into(),
            max_reconnect_attempts: 3,
            reconnect_step: Duration::from_secs(2),
            participant_id: None,
            token: None,
        }
    }
}

/// Result of a `send`: queued is not a failure, the frame goes out on open
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Delivered,
    Queued,
}

/// Per-session connection record
///
/// Everything the manager knows about one session lives here; no state is
/// shared between sessions. The `epoch` ties the entry to the socket and
/// reconnect tasks currently allowed to act on it: a task whose epoch no
/// longer matches the entry (superseded connect, explicit disconnect) must
/// not touch manager state or fire callbacks.
struct ConnectionEntry {
    state: ConnectionState,
    outbox: VecDeque<String>,
    attempts: u32,
    callbacks: Arc<SessionCallbacks>,
    writer: Option<mpsc::UnboundedSender<Message>>,
    epoch: u64,
    socket_task: Option<JoinHandle<()>>,
    reconnect_task: Option<JoinHandle<()>>,
}

impl ConnectionEntry {
    /// Queue-only entry for sessions that sent before connecting
    fn detached() -> Self {
        Self {
            state: ConnectionState::NotConnected,
            outbox: VecDeque::new(),
            attempts: 0,
            callbacks: Arc::new(SessionCallbacks::new()),
            writer: None,
            epoch: 0,
            socket_task: None,
            reconnect_task: None,
        }
    }
}

struct Inner {
    config: TransportConfig,
    sessions: RwLock<HashMap<String, ConnectionEntry>>,
    epoch: AtomicU64,
}

impl Inner {
    fn next_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn endpoint(&self, session_id: &str) -> Result<String, TransportError> {
        let raw = format!("{}/ws/{}", self.config.ws_origin, session_id);
        let mut url = url::Url::parse(&raw)
            .map_err(|e| TransportError::Socket(format!("invalid endpoint {}: {}", raw, e)))?;

        if self.config.participant_id.is_some() || self.config.token.is_some() {
            let mut pairs = url.query_pairs_mut();
            if let Some(participant) = &self.config.participant_id {
                pairs.append_pair("participant_id", participant);
            }
            if let Some(token) = &self.config.token {
                pairs.append_pair("token", token);
            }
        }

        Ok(url.to_string())
    }

    /// Current callbacks for a session, only while `epoch` is still live
    async fn callbacks_for(&self, session_id: &str, epoch: u64) -> Option<Arc<SessionCallbacks>> {
        let sessions = self.sessions.read().await;
        sessions
            .get(session_id)
            .filter(|entry| entry.epoch == epoch)
            .map(|entry| Arc::clone(&entry.callbacks))
    }
}

/// Owns one logical channel per interview session atop single-shot sockets
///
/// Cheap to clone; clones share the same connection registry. Constructed
/// once at the composition root and passed around explicitly; there is no
/// global instance.
#[derive(Clone)]
pub struct TransportManager {
    inner: Arc<Inner>,
}

impl TransportManager {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                sessions: RwLock::new(HashMap::new()),
                epoch: AtomicU64::new(0),
            }),
        }
    }

    /// Open (or reuse) the connection for a session
    ///
    /// Fire-and-forget: results arrive through the callbacks, never as a
    /// return value. If the session is already open or connecting, the
    /// callback set is replaced and no second socket is opened.
    pub async fn connect(&self, session_id: &str, callbacks: SessionCallbacks) {
        let callbacks = Arc::new(callbacks);
        let epoch = self.inner.next_epoch();

        {
            let mut sessions = self.inner.sessions.write().await;

            if let Some(entry) = sessions.get_mut(session_id) {
                match entry.state {
                    ConnectionState::Open | ConnectionState::Connecting => {
                        debug!("Reusing live connection for session {}", session_id);
                        entry.callbacks = callbacks;
                        return;
                    }
                    _ => {}
                }
            }

            // Discard any stale handle, keeping messages queued while offline
            let outbox = sessions
                .remove(session_id)
                .map(|mut stale| {
                    if let Some(task) = stale.reconnect_task.take() {
                        task.abort();
                    }
                    stale.outbox
                })
                .unwrap_or_default();

            let mut entry = ConnectionEntry::detached();
            entry.state = ConnectionState::Connecting;
            entry.outbox = outbox;
            entry.callbacks = Arc::clone(&callbacks);
            entry.epoch = epoch;
            sessions.insert(session_id.to_string(), entry);
        }

        self.spawn_connection(session_id.to_string(), epoch).await;
    }

    /// Send a frame, delivering immediately when open and queuing otherwise
    pub async fn send<T: Serialize>(&self, session_id: &str, message: &T) -> SendOutcome {
        match serde_json::to_string(message) {
            Ok(text) => self.send_text(session_id, text).await,
            Err(e) => {
                // Serialization of our own frame types cannot fail in
                // practice; queue nothing and log it.
                warn!("Dropping unserializable frame for {}: {}", session_id, e);
                SendOutcome::Queued
            }
        }
    }

    /// String pass-through variant of `send`
    pub async fn send_text(&self, session_id: &str, text: String) -> SendOutcome {
        let mut sessions = self.inner.sessions.write().await;
        let entry = sessions
            .entry(session_id.to_string())
            .or_insert_with(ConnectionEntry::detached);

        if entry.state == ConnectionState::Open {
            if let Some(writer) = &entry.writer {
                if writer.send(Message::Text(text.clone())).is_ok() {
                    return SendOutcome::Delivered;
                }
            }
        }

        entry.outbox.push_back(text);
        debug!(
            "Queued frame for session {} ({} pending)",
            session_id,
            entry.outbox.len()
        );
        SendOutcome::Queued
    }

    /// Close a session's socket and clear all its state
    ///
    /// Idempotent and silent on unknown sessions. Any pending reconnect is
    /// cancelled; no reconnect can fire after this returns.
    pub async fn disconnect(&self, session_id: &str) {
        let removed = {
            let mut sessions = self.inner.sessions.write().await;
            sessions.remove(session_id)
        };

        let Some(mut entry) = removed else {
            return;
        };

        if let Some(task) = entry.reconnect_task.take() {
            task.abort();
        }

        match entry.writer.take() {
            Some(writer) => {
                // Ask the pump to perform a clean 1000 close; the entry is
                // already gone so the close never schedules a reconnect.
                let _ = writer.send(Message::Close(Some(CloseFrame {
                    code: CloseCode::Normal,
                    reason: "client disconnect".into(),
                })));
            }
            None => {
                // Still connecting; nothing to flush
                if let Some(task) = entry.socket_task.take() {
                    task.abort();
                }
            }
        }

        info!("Disconnected session {}", session_id);
    }

    /// Current socket readiness for a session
    pub async fn connection_state(&self, session_id: &str) -> ConnectionState {
        let sessions = self.inner.sessions.read().await;
        sessions
            .get(session_id)
            .map(|entry| entry.state)
            .unwrap_or(ConnectionState::NotConnected)
    }

    /// Number of frames waiting for a session's socket to open
    pub async fn queued_len(&self, session_id: &str) -> usize {
        let sessions = self.inner.sessions.read().await;
        sessions
            .get(session_id)
            .map(|entry| entry.outbox.len())
            .unwrap_or(0)
    }

    /// Tear down every session
    pub async fn disconnect_all(&self) {
        let ids: Vec<String> = {
            let sessions = self.inner.sessions.read().await;
            sessions.keys().cloned().collect()
        };

        for id in ids {
            self.disconnect(&id).await;
        }
    }

    async fn spawn_connection(&self, session_id: String, epoch: u64) {
        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(run_connection(Arc::clone(&inner), session_id.clone(), epoch));

        let mut sessions = inner.sessions.write().await;
        if let Some(entry) = sessions.get_mut(&session_id) {
            if entry.epoch == epoch {
                entry.socket_task = Some(task);
            }
        }
    }
}

/// One socket lifetime: handshake, queue drain, pump, close handling
///
/// Boxed because the retry path recurses (`run_connection` →
/// `finish_connection` → `run_connection`); the indirection keeps the
/// future type finite and `Send` for `tokio::spawn`.
fn run_connection(
    inner: Arc<Inner>,
    session_id: String,
    epoch: u64,
) -> futures::future::BoxFuture<'static, ()> {
    Box::pin(run_connection_inner(inner, session_id, epoch))
}

async fn run_connection_inner(inner: Arc<Inner>, session_id: String, epoch: u64) {
    let url = match inner.endpoint(&session_id) {
        Ok(url) => url,
        Err(err) => {
            if let Some(callbacks) = inner.callbacks_for(&session_id, epoch).await {
                callbacks.emit_error(err);
            }
            finish_connection(inner, session_id, epoch, 1006, "invalid endpoint".into()).await;
            return;
        }
    };

    debug!("Connecting session {} to {}", session_id, url);

    let stream = match connect_async(url.as_str()).await {
        Ok((stream, _response)) => stream,
        Err(err) => {
            let classified = classify(err);
            warn!("Session {} connect failed: {}", session_id, classified);
            if let Some(callbacks) = inner.callbacks_for(&session_id, epoch).await {
                callbacks.emit_error(classified);
            }
            finish_connection(inner, session_id, epoch, 1006, "connect failed".into()).await;
            return;
        }
    };

    let (mut sink, mut source) = stream.split();
    let (writer_tx, mut writer_rx) = mpsc::unbounded_channel::<Message>();

    // Mark open, take the offline queue, and install the writer handle
    let queued: Vec<String> = {
        let mut sessions = inner.sessions.write().await;
        let live = sessions
            .get_mut(&session_id)
            .filter(|entry| entry.epoch == epoch);

        match live {
            Some(entry) => {
                entry.state = ConnectionState::Open;
                entry.attempts = 0;
                entry.writer = Some(writer_tx);
                entry.outbox.drain(..).collect()
            }
            None => {
                // Disconnected or superseded while handshaking
                drop(sessions);
                let _ = sink.close().await;
                return;
            }
        }
    };

    if !queued.is_empty() {
        info!(
            "Session {} open, flushing {} queued frame(s)",
            session_id,
            queued.len()
        );
    }
    for text in queued {
        if let Err(e) = sink.send(Message::Text(text)).await {
            warn!("Session {} failed flushing queue: {}", session_id, e);
            break;
        }
    }

    if let Some(callbacks) = inner.callbacks_for(&session_id, epoch).await {
        callbacks.emit_open();
    }

    // Pump until the socket dies or the entry asks for a close
    let (close_code, close_reason) = loop {
        tokio::select! {
            outbound = writer_rx.recv() => match outbound {
                Some(message) => {
                    let closing = matches!(message, Message::Close(_));
                    if closing {
                        mark_closing(&inner, &session_id, epoch).await;
                    }
                    if let Err(e) = sink.send(message).await {
                        warn!("Session {} send failed: {}", session_id, e);
                        break (1006, "send failed".to_string());
                    }
                    if closing {
                        let _ = sink.flush().await;
                        break (1000, "client disconnect".to_string());
                    }
                }
                // Entry removed; nothing left to flush
                None => break (1000, "client disconnect".to_string()),
            },
            inbound = source.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    let callbacks = inner.callbacks_for(&session_id, epoch).await;
                    let Some(callbacks) = callbacks else { continue };
                    match serde_json::from_str::<serde_json::Value>(&text) {
                        Ok(value) => callbacks.emit_message(value),
                        Err(e) => callbacks.emit_error(TransportError::Decode(e.to_string())),
                    }
                }
                Some(Ok(Message::Binary(data))) => {
                    debug!(
                        "Session {} ignoring {}-byte binary frame",
                        session_id,
                        data.len()
                    );
                }
                Some(Ok(Message::Ping(payload))) => {
                    let _ = sink.send(Message::Pong(payload)).await;
                }
                Some(Ok(Message::Pong(_))) => {}
                Some(Ok(Message::Close(frame))) => match frame {
                    Some(frame) => {
                        break (u16::from(frame.code), frame.reason.to_string());
                    }
                    None => break (1005, "closed without status".to_string()),
                },
                Some(Ok(Message::Frame(_))) => {}
                Some(Err(err)) => {
                    let classified = classify(err);
                    if let Some(callbacks) = inner.callbacks_for(&session_id, epoch).await {
                        callbacks.emit_error(classified);
                    }
                    break (1006, "socket error".to_string());
                }
                None => break (1006, "connection lost".to_string()),
            },
        }
    };

    finish_connection(inner, session_id, epoch, close_code, close_reason).await;
}

async fn mark_closing(inner: &Arc<Inner>, session_id: &str, epoch: u64) {
    let mut sessions = inner.sessions.write().await;
    if let Some(entry) = sessions.get_mut(session_id) {
        if entry.epoch == epoch {
            entry.state = ConnectionState::Closing;
        }
    }
}

/// Close bookkeeping: reconnect on abnormal closure, surface the rest
async fn finish_connection(
    inner: Arc<Inner>,
    session_id: String,
    epoch: u64,
    code: u16,
    reason: String,
) {
    let was_clean = CloseInfo::is_normal_code(code);

    enum Next {
        Done(Arc<SessionCallbacks>),
        Retry { attempt: u32, next_epoch: u64 },
        Stale,
    }

    let next = {
        let mut sessions = inner.sessions.write().await;

        let live = sessions
            .get(&session_id)
            .map(|entry| entry.epoch == epoch)
            .unwrap_or(false);

        if !live {
            Next::Stale
        } else if was_clean
            || sessions[&session_id].attempts >= inner.config.max_reconnect_attempts
        {
            let entry = sessions.remove(&session_id).expect("entry checked above");
            Next::Done(entry.callbacks)
        } else {
            let next_epoch = inner.next_epoch();
            let entry = sessions.get_mut(&session_id).expect("entry checked above");
            entry.attempts += 1;
            entry.state = ConnectionState::Connecting;
            entry.writer = None;
            entry.socket_task = None;
            entry.epoch = next_epoch;
            Next::Retry {
                attempt: entry.attempts,
                next_epoch,
            }
        }
    };

    match next {
        Next::Stale => {
            debug!("Session {} close for a superseded socket, ignoring", session_id);
        }
        Next::Done(callbacks) => {
            if was_clean {
                info!("Session {} closed normally ({})", session_id, code);
            } else {
                warn!(
                    "Session {} giving up after {} reconnect attempts",
                    session_id, inner.config.max_reconnect_attempts
                );
            }
            callbacks.emit_close(CloseInfo {
                code,
                reason,
                was_clean,
            });
        }
        Next::Retry {
            attempt,
            next_epoch,
        } => {
            // Linear backoff: attempt N waits N * step
            let delay = inner.config.reconnect_step * attempt;
            warn!(
                "Session {} closed abnormally (code {}), reconnect attempt {}/{} in {:?}",
                session_id, code, attempt, inner.config.max_reconnect_attempts, delay
            );

            let retry_inner = Arc::clone(&inner);
            let retry_id = session_id.clone();
            let handle = tokio::spawn(async move {
                tokio::time::sleep(delay).await;

                // Re-check: an explicit disconnect cancels the reconnect
                let still_wanted = {
                    let sessions = retry_inner.sessions.read().await;
                    sessions
                        .get(&retry_id)
                        .map(|entry| entry.epoch == next_epoch)
                        .unwrap_or(false)
                };
                if still_wanted {
                    run_connection(retry_inner, retry_id, next_epoch).await;
                }
            });

            let mut sessions = inner.sessions.write().await;
            if let Some(entry) = sessions.get_mut(&session_id) {
                if entry.epoch == next_epoch {
                    entry.reconnect_task = Some(handle);
                }
            }
        }
    }
}

/// Map tungstenite errors into the crate taxonomy
fn classify(err: tungstenite::Error) -> TransportError {
    match err {
        tungstenite::Error::Tls(e) => TransportError::Tls(e.to_string()),
        tungstenite::Error::Io(e) => {
            let text = e.to_string();
            if text.contains("certificate") {
                TransportError::Tls(text)
            } else {
                TransportError::Socket(text)
            }
        }
        other => TransportError::Socket(other.to_string()),
    }
}

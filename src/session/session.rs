use super::config::SessionConfig;
use super::stats::SessionStats;
use crate::api::ApiClient;
use crate::api::{EvaluationReport, SessionTicket};
use crate::audio::Recording;
use crate::transport::{
    AudioMetadata, ClientFrame, SendOutcome, ServerEvent, SessionCallbacks, TransportManager,
};
use anyhow::{Context, Result};
use base64::Engine;
use chrono::Utc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

/// One live interview attempt
///
/// Bootstraps identifiers over HTTP, holds the transport channel for the
/// session, encodes recorded answers into `audio_data` frames, and collects
/// inbound server events for the caller to consume.
pub struct InterviewSession {
    config: SessionConfig,
    api: ApiClient,
    transport: TransportManager,
    ticket: SessionTicket,
    started_at: chrono::DateTime<Utc>,
    answers_submitted: Arc<AtomicUsize>,
    events: Arc<std::sync::Mutex<Vec<ServerEvent>>>,
    event_rx: Mutex<mpsc::UnboundedReceiver<ServerEvent>>,
}

impl InterviewSession {
    /// Create the session on the backend and open its transport channel
    pub async fn begin(
        api: ApiClient,
        transport: TransportManager,
        config: SessionConfig,
    ) -> Result<Self> {
        let ticket = api
            .start_interview(Some(&config.participant_id))
            .await
            .context("Failed to create interview session")?;

        info!(
            "Starting interview session {} (test {})",
            ticket.session_id, ticket.test_id
        );

        let events: Arc<std::sync::Mutex<Vec<ServerEvent>>> =
            Arc::new(std::sync::Mutex::new(Vec::new()));
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let callbacks = {
            let session_id = ticket.session_id.clone();
            let collected = Arc::clone(&events);

            SessionCallbacks::new()
                .on_open({
                    let session_id = session_id.clone();
                    move || info!("Session {} transport open", session_id)
                })
                .on_message(move |value| {
                    let event = ServerEvent::from_value(value);
                    if matches!(event, ServerEvent::Unknown) {
                        debug!("Ignoring unrecognized server event");
                    }
                    if let Ok(mut collected) = collected.lock() {
                        collected.push(event.clone());
                    }
                    let _ = event_tx.send(event);
                })
                .on_error({
                    let session_id = session_id.clone();
                    move |err| warn!("Session {} transport error: {}", session_id, err)
                })
                .on_close({
                    let session_id = session_id.clone();
                    move |close| {
                        if close.was_clean {
                            info!("Session {} closed (code {})", session_id, close.code);
                        } else {
                            warn!(
                                "Session {} lost after reconnect attempts (code {}: {})",
                                session_id, close.code, close.reason
                            );
                        }
                    }
                })
        };

        transport.connect(&ticket.session_id, callbacks).await;

        Ok(Self {
            config,
            api,
            transport,
            ticket,
            started_at: Utc::now(),
            answers_submitted: Arc::new(AtomicUsize::new(0)),
            events,
            event_rx: Mutex::new(event_rx),
        })
    }

    pub fn session_id(&self) -> &str {
        &self.ticket.session_id
    }

    pub fn test_id(&self) -> &str {
        &self.ticket.test_id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Tell the backend recording has started, so it can reflect that the
    /// candidate is answering
    pub async fn begin_answer(&self) {
        self.transport
            .send(&self.ticket.session_id, &ClientFrame::StartAnswer {})
            .await;
    }

    /// Hand one recorded answer to the transport
    ///
    /// A `Queued` outcome is not a failure: the frame goes out the moment
    /// the socket (re)opens.
    pub async fn submit_answer(&self, recording: &Recording) -> Result<SendOutcome> {
        let frame = ClientFrame::AudioData {
            audio: base64::engine::general_purpose::STANDARD.encode(&recording.wav),
            metadata: AudioMetadata {
                size: recording.wav.len(),
                content_type: self.config.audio_content_type.clone(),
                timestamp: Utc::now().to_rfc3339(),
            },
        };

        let outcome = self.transport.send(&self.ticket.session_id, &frame).await;
        self.answers_submitted.fetch_add(1, Ordering::SeqCst);

        match outcome {
            SendOutcome::Delivered => {
                debug!(
                    "Answer delivered ({} bytes, stop={:?})",
                    recording.wav.len(),
                    recording.stop_reason
                );
            }
            SendOutcome::Queued => {
                info!(
                    "Answer queued until the socket reopens ({} bytes)",
                    recording.wav.len()
                );
            }
        }

        Ok(outcome)
    }

    /// Wait for the next inbound server event
    pub async fn next_event(&self) -> Option<ServerEvent> {
        self.event_rx.lock().await.recv().await
    }

    /// All events received so far
    pub fn events(&self) -> Vec<ServerEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Current session statistics
    pub async fn stats(&self) -> SessionStats {
        let duration = Utc::now().signed_duration_since(self.started_at);
        let events_received = self.events.lock().map(|e| e.len()).unwrap_or(0);

        SessionStats {
            session_id: self.ticket.session_id.clone(),
            test_id: self.ticket.test_id.clone(),
            connection_state: self
                .transport
                .connection_state(&self.ticket.session_id)
                .await
                .as_str()
                .to_string(),
            queued_frames: self.transport.queued_len(&self.ticket.session_id).await,
            started_at: self.started_at,
            duration_secs: duration.num_milliseconds() as f64 / 1000.0,
            answers_submitted: self.answers_submitted.load(Ordering::SeqCst),
            events_received,
        }
    }

    /// Tell the backend the interview is over, close the transport, and
    /// fetch the scored evaluation
    pub async fn finish(&self) -> Result<EvaluationReport> {
        info!("Finishing interview session {}", self.ticket.session_id);
        self.transport
            .send(&self.ticket.session_id, &ClientFrame::EndInterview {})
            .await;
        self.transport.disconnect(&self.ticket.session_id).await;

        self.api
            .evaluate(&self.ticket.test_id)
            .await
            .context("Failed to fetch evaluation")
    }

    /// Download the results PDF for this session's test
    pub async fn download_results(&self) -> Result<Vec<u8>> {
        self.api
            .download_results(&self.ticket.test_id)
            .await
            .context("Failed to download results")
    }
}

use super::models::{EvaluationReport, SessionTicket};
use crate::config::HttpSettings;
use crate::error::RequestError;
use anyhow::{Context, Result};
use tracing::{debug, info, warn};

/// HTTP client for session bootstrap and non-realtime data
///
/// Applies the crate-wide retry policy: 4xx responses surface immediately,
/// 5xx and network-level failures retry with linear backoff, and terminal
/// failures are classified (timeout, TLS, network) rather than reported as
/// a generic error.
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    settings: HttpSettings,
    token: Option<String>,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, settings: HttpSettings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            settings,
            token: None,
        })
    }

    /// Attach a bearer token to subsequent requests
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Create a new interview session
    ///
    /// Older backends only accept POST here and answer GET with 405; the
    /// fallback keeps both working.
    pub async fn start_interview(
        &self,
        participant_id: Option<&str>,
    ) -> Result<SessionTicket, RequestError> {
        let url = format!("{}/start_interview", self.base_url);

        let response = match self
            .execute_with_retry(&url, || {
                let mut request = self.http.get(&url).timeout(self.settings.request_timeout());
                if let Some(participant) = participant_id {
                    request = request.query(&[("participant_id", participant)]);
                }
                self.authorize(request)
            })
            .await
        {
            Ok(response) => response,
            Err(RequestError::Status { status: 405, .. }) => {
                debug!("GET {} not allowed, retrying as POST", url);
                self.execute_with_retry(&url, || {
                    let mut request =
                        self.http.post(&url).timeout(self.settings.request_timeout());
                    if let Some(participant) = participant_id {
                        request = request.query(&[("participant_id", participant)]);
                    }
                    self.authorize(request)
                })
                .await?
            }
            Err(err) => return Err(err),
        };

        let value: serde_json::Value =
            response.json().await.map_err(|e| RequestError::Decode {
                url: url.clone(),
                message: e.to_string(),
            })?;

        let ticket = SessionTicket::from_response(&value, &url)?;
        info!(
            "Interview session created: session={} test={}",
            ticket.session_id, ticket.test_id
        );
        Ok(ticket)
    }

    /// Fetch the scored evaluation for a completed session
    pub async fn evaluate(&self, test_id: &str) -> Result<EvaluationReport, RequestError> {
        let url = format!("{}/evaluate", self.base_url);

        let response = self
            .execute_with_retry(&url, || {
                self.authorize(
                    self.http
                        .get(&url)
                        .query(&[("test_id", test_id)])
                        .timeout(self.settings.request_timeout()),
                )
            })
            .await?;

        response
            .json::<EvaluationReport>()
            .await
            .map_err(|e| RequestError::Decode {
                url,
                message: e.to_string(),
            })
    }

    /// Download the results PDF for a completed session
    pub async fn download_results(&self, test_id: &str) -> Result<Vec<u8>, RequestError> {
        let url = format!("{}/download_results/{}", self.base_url, test_id);

        let response = self
            .execute_with_retry(&url, || {
                self.authorize(
                    self.http
                        .get(&url)
                        .header(reqwest::header::ACCEPT, "application/pdf")
                        // Binary transfers get the longer budget
                        .timeout(self.settings.transfer_timeout()),
                )
            })
            .await?;

        let bytes = response.bytes().await.map_err(|e| RequestError::Network {
            url: url.clone(),
            attempts: 1,
            message: e.to_string(),
        })?;

        info!("Downloaded results PDF: {} bytes", bytes.len());
        Ok(bytes.to_vec())
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Run a request, retrying 5xx and network failures with linear backoff
    async fn execute_with_retry<F>(
        &self,
        url: &str,
        build: F,
    ) -> Result<reqwest::Response, RequestError>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let max_attempts = self.settings.max_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            match build().send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }

                    let terminal = status.is_client_error() || attempt >= max_attempts;
                    if terminal {
                        let body = response.text().await.unwrap_or_default();
                        return Err(RequestError::Status {
                            url: url.to_string(),
                            status: status.as_u16(),
                            body,
                        });
                    }
                    warn!(
                        "Request to {} returned {} (attempt {}/{}), retrying",
                        url, status, attempt, max_attempts
                    );
                }
                Err(err) => {
                    if attempt >= max_attempts {
                        return Err(classify(err, url, attempt));
                    }
                    warn!(
                        "Request to {} failed (attempt {}/{}): {}",
                        url, attempt, max_attempts, err
                    );
                }
            }

            // Linear backoff: attempt N waits N * step
            let delay = std::time::Duration::from_millis(self.settings.retry_step_ms * attempt as u64);
            tokio::time::sleep(delay).await;
        }
    }
}

/// Map a terminal reqwest error into the crate taxonomy
fn classify(err: reqwest::Error, url: &str, attempts: u32) -> RequestError {
    if err.is_timeout() {
        return RequestError::Timeout {
            url: url.to_string(),
            attempts,
        };
    }

    let message = full_message(&err);
    let lower = message.to_lowercase();
    if lower.contains("certificate") || lower.contains("tls") || lower.contains("ssl") {
        return RequestError::Tls {
            url: url.to_string(),
            message,
        };
    }

    RequestError::Network {
        url: url.to_string(),
        attempts,
        message,
    }
}

/// Flatten the error source chain; reqwest hides the TLS cause one level down
fn full_message(err: &reqwest::Error) -> String {
    let mut message = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

use crate::error::RequestError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identifiers issued by `start_interview`; everything else hangs off these
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionTicket {
    /// Key for the WebSocket channel and the manager's connection registry
    pub session_id: String,
    /// Key for the persisted evaluation record, used after the session ends
    pub test_id: String,
}

impl SessionTicket {
    /// Extract the ticket from a bootstrap response
    ///
    /// The backend serializes ids as strings or numbers depending on
    /// version; both are accepted. A missing id is fatal for session
    /// creation.
    pub fn from_response(value: &Value, url: &str) -> Result<Self, RequestError> {
        let session_id = id_field(value, "session_id", url)?;
        let test_id = id_field(value, "test_id", url)?;
        Ok(Self {
            session_id,
            test_id,
        })
    }
}

fn id_field(value: &Value, field: &str, url: &str) -> Result<String, RequestError> {
    match value.get(field) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(RequestError::MissingField {
            url: url.to_string(),
            field: field.to_string(),
        }),
    }
}

/// Scored evaluation for a completed interview
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationReport {
    #[serde(default)]
    pub test_id: Option<String>,

    /// Overall score, when the backend has finished grading
    #[serde(default)]
    pub score: Option<f64>,

    #[serde(default)]
    pub feedback: Option<String>,

    /// Per-question details and any fields newer backends add
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

//! HTTP request client for session bootstrap and result retrieval

pub mod client;
pub mod models;

pub use client::ApiClient;
pub use models::{EvaluationReport, SessionTicket};

use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub transport: TransportSettings,
    pub audio: AudioSettings,
    pub http: HttpSettings,
}

/// Backend the client talks to. One base URL drives both the HTTP origin
/// and the derived WebSocket origin.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub base_url: String,
}

impl ServerConfig {
    /// Derive the WebSocket origin from the HTTP base URL
    /// (https → wss, http → ws).
    pub fn ws_origin(&self) -> Result<String> {
        let mut url = url::Url::parse(&self.base_url)
            .with_context(|| format!("Invalid base URL: {}", self.base_url))?;

        let scheme = match url.scheme() {
            "https" => "wss",
            "http" => "ws",
            other => anyhow::bail!("Unsupported base URL scheme: {}", other),
        };
        url.set_scheme(scheme)
            .map_err(|_| anyhow::anyhow!("Failed to derive WebSocket origin"))?;

        Ok(url.as_str().trim_end_matches('/').to_string())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransportSettings {
    /// Give up after this many reconnect attempts following an abnormal close
    pub max_reconnect_attempts: u32,

    /// Linear backoff step: attempt N waits N * this many milliseconds
    pub reconnect_step_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AudioSettings {
    pub sample_rate: u32,
    pub channels: u16,

    /// Normalized RMS level above which a window counts as speech
    pub speech_threshold: f32,

    /// Speech shorter than this never arms the trailing-silence timer
    pub min_speech_ms: u64,

    /// Continuous silence needed after speech to end an answer
    pub silence_ms: u64,

    /// Hard cap on one answer's duration
    pub max_answer_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpSettings {
    /// Timeout for plain JSON requests
    pub request_timeout_secs: u64,

    /// Timeout for PDF downloads and other large transfers
    pub transfer_timeout_secs: u64,

    /// Retry 5xx/network failures up to this many attempts
    pub max_attempts: u32,

    /// Linear backoff step between retries
    pub retry_step_ms: u64,
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                base_url: "http://localhost:8000".to_string(),
            },
            transport: TransportSettings::default(),
            audio: AudioSettings::default(),
            http: HttpSettings::default(),
        }
    }
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: 3,
            reconnect_step_ms: 2000, // attempt × 2s
        }
    }
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            sample_rate: 16000, // STT backends expect 16kHz
            channels: 1,        // Mono
            speech_threshold: 0.02,
            min_speech_ms: 600,
            silence_ms: 1500,
            max_answer_ms: 120_000, // 2 minutes per answer
        }
    }
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            request_timeout_secs: 10,
            transfer_timeout_secs: 60,
            max_attempts: 3,
            retry_step_ms: 1000,
        }
    }
}

impl HttpSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_secs(self.transfer_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ws_origin_upgrades_scheme() {
        let server = ServerConfig {
            base_url: "https://interview.example.com/".to_string(),
        };
        assert_eq!(server.ws_origin().unwrap(), "wss://interview.example.com");

        let server = ServerConfig {
            base_url: "http://localhost:8000".to_string(),
        };
        assert_eq!(server.ws_origin().unwrap(), "ws://localhost:8000");
    }

    #[test]
    fn load_reads_nested_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.toml");
        std::fs::write(
            &path,
            r#"
[server]
base_url = "https://interview.example.com"

[transport]
max_reconnect_attempts = 5
reconnect_step_ms = 500

[audio]
sample_rate = 16000
channels = 1
speech_threshold = 0.03
min_speech_ms = 400
silence_ms = 1200
max_answer_ms = 90000

[http]
request_timeout_secs = 8
transfer_timeout_secs = 30
max_attempts = 2
retry_step_ms = 250
"#,
        )
        .unwrap();

        let stem = dir.path().join("client");
        let config = Config::load(stem.to_str().unwrap()).unwrap();

        assert_eq!(config.server.base_url, "https://interview.example.com");
        assert_eq!(config.transport.max_reconnect_attempts, 5);
        assert_eq!(config.audio.silence_ms, 1200);
        assert_eq!(config.http.retry_step_ms, 250);
    }

    #[test]
    fn ws_origin_rejects_unknown_scheme() {
        let server = ServerConfig {
            base_url: "ftp://example.com".to_string(),
        };
        assert!(server.ws_origin().is_err());
    }
}

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use interview_client::{
    AnswerRecorder, ApiClient, CaptureConfig, CaptureSource, Config, InterviewSession,
    MicrophoneSource, RecorderConfig, ServerEvent, SessionConfig, StopReason, TransportConfig,
    TransportManager,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "interview-client", about = "Audio interview session client")]
struct Cli {
    /// Config file (without extension), loaded via the config crate
    #[arg(long, default_value = "config/interview-client")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one interview end to end: bootstrap, answer questions, evaluate
    Run {
        /// Participant identity; generated when omitted
        #[arg(long)]
        participant: Option<String>,

        /// Bearer token for the backend, if it requires one
        #[arg(long)]
        token: Option<String>,
    },

    /// Record a short clip and report levels, for checking the microphone
    CheckMic {
        #[arg(long, default_value_t = 5)]
        seconds: u64,
    },

    /// Download the results PDF for a finished test
    Results {
        test_id: String,

        #[arg(long, default_value = "results.pdf")]
        output: PathBuf,

        #[arg(long)]
        token: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let cfg = match Config::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            info!("No config file loaded ({}), using defaults", e);
            Config::default()
        }
    };

    match cli.command {
        Command::Run { participant, token } => run_interview(cfg, participant, token).await,
        Command::CheckMic { seconds } => check_mic(cfg, seconds).await,
        Command::Results {
            test_id,
            output,
            token,
        } => download_results(cfg, &test_id, &output, token).await,
    }
}

async fn run_interview(
    cfg: Config,
    participant: Option<String>,
    token: Option<String>,
) -> Result<()> {
    info!("interview-client v{}", env!("CARGO_PKG_VERSION"));
    info!("Backend: {}", cfg.server.base_url);

    let mut api = ApiClient::new(&cfg.server.base_url, cfg.http.clone())?;
    if let Some(token) = &token {
        api = api.with_token(token.clone());
    }

    let session_config = SessionConfig {
        participant_id: participant.unwrap_or_else(|| SessionConfig::default().participant_id),
        max_answer: Duration::from_millis(cfg.audio.max_answer_ms),
        ..SessionConfig::default()
    };

    let transport = TransportManager::new(TransportConfig {
        ws_origin: cfg.server.ws_origin()?,
        max_reconnect_attempts: cfg.transport.max_reconnect_attempts,
        reconnect_step: Duration::from_millis(cfg.transport.reconnect_step_ms),
        participant_id: Some(session_config.participant_id.clone()),
        token,
    });

    let session = InterviewSession::begin(api, transport.clone(), session_config).await?;
    let recorder = AnswerRecorder::new(RecorderConfig::from(&cfg.audio));

    while let Some(event) = session.next_event().await {
        match event {
            ServerEvent::Question { text, index } => {
                match index {
                    Some(index) => println!("\nQuestion {}: {}", index, text),
                    None => println!("\nQuestion: {}", text),
                }

                session.begin_answer().await;
                let recording = record_answer(&cfg, &recorder, session.config().max_answer).await?;
                if !recording.has_spoken {
                    warn!("No speech detected in this answer");
                }
                session.submit_answer(&recording).await?;
            }
            ServerEvent::Transcript { text, partial } => {
                if !partial {
                    println!("You said: {}", text);
                }
            }
            ServerEvent::Status { status, message } => {
                info!("Status: {} {}", status, message.unwrap_or_default());
            }
            ServerEvent::Complete { .. } => {
                println!("\nInterview complete.");
                break;
            }
            ServerEvent::Error { message } => {
                warn!("Backend error: {}", message);
            }
            ServerEvent::Unknown => {}
        }
    }

    let report = session.finish().await?;
    match report.score {
        Some(score) => println!("Score: {:.1}", score),
        None => println!("Evaluation pending; fetch later with test id {}", session.test_id()),
    }
    if let Some(feedback) = report.feedback {
        println!("Feedback: {}", feedback);
    }

    transport.disconnect_all().await;
    Ok(())
}

async fn record_answer(
    cfg: &Config,
    recorder: &AnswerRecorder,
    max_answer: Duration,
) -> Result<interview_client::Recording> {
    let mut mic = MicrophoneSource::new(CaptureConfig {
        sample_rate: cfg.audio.sample_rate,
        channels: cfg.audio.channels,
        ..CaptureConfig::default()
    });

    println!("Recording... (pause to finish)");
    let frames = mic.start().await.context("Failed to start the microphone")?;
    let result = recorder.record(frames, max_answer).await;
    mic.stop().await.ok();

    let recording = result.context("Recording failed")?;
    match recording.stop_reason {
        StopReason::NaturalPause => println!("Answer captured."),
        StopReason::MaxDuration => println!("Answer captured (time limit reached)."),
        StopReason::Stopped => println!("Answer captured (stopped)."),
    }
    Ok(recording)
}

async fn check_mic(cfg: Config, seconds: u64) -> Result<()> {
    let recorder = AnswerRecorder::new(RecorderConfig::from(&cfg.audio));
    let mut mic = MicrophoneSource::new(CaptureConfig {
        sample_rate: cfg.audio.sample_rate,
        channels: cfg.audio.channels,
        ..CaptureConfig::default()
    });

    println!("Speak for up to {} seconds...", seconds);
    let frames = mic.start().await.context("Failed to start the microphone")?;
    let recording = recorder
        .record(frames, Duration::from_secs(seconds))
        .await
        .context("Recording failed")?;
    mic.stop().await.ok();

    println!(
        "Captured {:.1}s ({} bytes WAV), speech detected: {}",
        recording.duration_ms as f64 / 1000.0,
        recording.wav.len(),
        recording.has_spoken
    );
    Ok(())
}

async fn download_results(
    cfg: Config,
    test_id: &str,
    output: &PathBuf,
    token: Option<String>,
) -> Result<()> {
    let mut api = ApiClient::new(&cfg.server.base_url, cfg.http.clone())?;
    if let Some(token) = token {
        api = api.with_token(token);
    }

    let pdf = api.download_results(test_id).await?;
    std::fs::write(output, &pdf)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    println!("Saved {} bytes to {}", pdf.len(), output.display());
    Ok(())
}

use super::source::{AudioFrame, CaptureConfig, CaptureSource};
use crate::error::CaptureError;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};

/// Microphone capture via cpal
///
/// The cpal stream is not `Send`, so it lives on a dedicated thread for the
/// whole capture; frames cross into async land over a bounded channel and
/// `stop` signals the thread to release the device.
pub struct MicrophoneSource {
    config: CaptureConfig,
    stop_flag: Option<Arc<AtomicBool>>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl MicrophoneSource {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            stop_flag: None,
            thread: None,
        }
    }
}

#[async_trait::async_trait]
impl CaptureSource for MicrophoneSource {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>, CaptureError> {
        if self.is_capturing() {
            return Err(CaptureError::RecorderBusy);
        }

        let config = self.config.clone();
        let stop_flag = Arc::new(AtomicBool::new(false));
        let (frame_tx, frame_rx) = mpsc::channel::<AudioFrame>(64);
        let (ready_tx, ready_rx) = oneshot::channel::<Result<(), CaptureError>>();

        let thread_stop = Arc::clone(&stop_flag);
        let thread = std::thread::spawn(move || {
            capture_thread(config, frame_tx, ready_tx, thread_stop);
        });

        match ready_rx.await {
            Ok(Ok(())) => {
                info!("Microphone capture started");
                self.stop_flag = Some(stop_flag);
                self.thread = Some(thread);
                Ok(frame_rx)
            }
            Ok(Err(err)) => {
                let _ = thread.join();
                Err(err)
            }
            Err(_) => {
                let _ = thread.join();
                Err(CaptureError::Stream(
                    "capture thread exited before the device opened".to_string(),
                ))
            }
        }
    }

    async fn stop(&mut self) -> Result<(), CaptureError> {
        if let Some(flag) = self.stop_flag.take() {
            flag.store(true, Ordering::SeqCst);
        }
        if let Some(thread) = self.thread.take() {
            let _ = tokio::task::spawn_blocking(move || thread.join()).await;
        }
        info!("Microphone capture stopped");
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.stop_flag
            .as_ref()
            .map(|flag| !flag.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    fn name(&self) -> &str {
        "microphone"
    }
}

impl Drop for MicrophoneSource {
    fn drop(&mut self) {
        if let Some(flag) = self.stop_flag.take() {
            flag.store(true, Ordering::SeqCst);
        }
    }
}

/// Owns the cpal stream for the duration of one capture
fn capture_thread(
    config: CaptureConfig,
    frame_tx: mpsc::Sender<AudioFrame>,
    ready_tx: oneshot::Sender<Result<(), CaptureError>>,
    stop_flag: Arc<AtomicBool>,
) {
    let stream = match open_input_stream(&config, frame_tx, Arc::clone(&stop_flag)) {
        Ok(stream) => stream,
        Err(err) => {
            let _ = ready_tx.send(Err(err));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(CaptureError::Stream(e.to_string())));
        return;
    }

    let _ = ready_tx.send(Ok(()));

    while !stop_flag.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(50));
    }

    // Dropping the stream releases the device and closes the frame channel
    drop(stream);
}

fn open_input_stream(
    config: &CaptureConfig,
    frame_tx: mpsc::Sender<AudioFrame>,
    stop_flag: Arc<AtomicBool>,
) -> Result<cpal::Stream, CaptureError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or(CaptureError::DeviceNotFound)?;

    if let Ok(name) = device.name() {
        info!("Using input device: {}", name);
    }

    let stream_config = cpal::StreamConfig {
        channels: config.channels,
        sample_rate: cpal::SampleRate(config.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let sample_format = device
        .default_input_config()
        .map_err(classify_config_error)?
        .sample_format();

    let sample_rate = config.sample_rate;
    let channels = config.channels;
    let frame_samples =
        (sample_rate as usize * channels as usize * config.buffer_duration_ms as usize) / 1000;

    let mut pending: Vec<i16> = Vec::with_capacity(frame_samples);
    let mut samples_sent: u64 = 0;

    let err_stop = Arc::clone(&stop_flag);
    let err_fn = move |e: cpal::StreamError| {
        error!("Input stream error: {}", e);
        err_stop.store(true, Ordering::SeqCst);
    };

    let mut push = move |converted: &mut dyn Iterator<Item = i16>| {
        pending.extend(converted);
        while pending.len() >= frame_samples {
            let samples: Vec<i16> = pending.drain(..frame_samples).collect();
            let timestamp_ms = samples_sent * 1000 / (sample_rate as u64 * channels as u64);
            samples_sent += samples.len() as u64;

            let frame = AudioFrame {
                samples,
                sample_rate,
                channels,
                timestamp_ms,
            };
            // Never block the audio thread; a full channel means the
            // recorder stopped consuming.
            if frame_tx.try_send(frame).is_err() {
                warn!("Dropping audio frame, recorder is not consuming");
            }
        }
    };

    let stream = match sample_format {
        cpal::SampleFormat::I16 => device
            .build_input_stream(
                &stream_config,
                move |data: &[i16], _| push(&mut data.iter().copied()),
                err_fn,
                None,
            )
            .map_err(classify_build_error)?,
        cpal::SampleFormat::F32 => device
            .build_input_stream(
                &stream_config,
                move |data: &[f32], _| {
                    push(&mut data.iter().map(|&s| {
                        (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
                    }))
                },
                err_fn,
                None,
            )
            .map_err(classify_build_error)?,
        other => {
            return Err(CaptureError::Unsupported(format!(
                "sample format {:?}",
                other
            )))
        }
    };

    Ok(stream)
}

fn classify_build_error(err: cpal::BuildStreamError) -> CaptureError {
    match err {
        cpal::BuildStreamError::DeviceNotAvailable => CaptureError::DeviceInUse,
        cpal::BuildStreamError::StreamConfigNotSupported => {
            CaptureError::Unsupported("requested sample rate/channel count".to_string())
        }
        cpal::BuildStreamError::InvalidArgument => {
            CaptureError::Unsupported("invalid stream configuration".to_string())
        }
        cpal::BuildStreamError::BackendSpecific { err } => classify_backend_message(err.description),
        other => CaptureError::Stream(other.to_string()),
    }
}

fn classify_config_error(err: cpal::DefaultStreamConfigError) -> CaptureError {
    match err {
        cpal::DefaultStreamConfigError::DeviceNotAvailable => CaptureError::DeviceInUse,
        cpal::DefaultStreamConfigError::StreamTypeNotSupported => {
            CaptureError::Unsupported("no supported input stream type".to_string())
        }
        cpal::DefaultStreamConfigError::BackendSpecific { err } => {
            classify_backend_message(err.description)
        }
    }
}

/// OS permission failures only surface as backend-specific messages
fn classify_backend_message(description: String) -> CaptureError {
    let lower = description.to_lowercase();
    if lower.contains("permission") || lower.contains("denied") || lower.contains("access") {
        CaptureError::PermissionDenied
    } else {
        CaptureError::Stream(description)
    }
}

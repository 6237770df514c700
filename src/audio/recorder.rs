use super::level::LevelWindow;
use super::source::AudioFrame;
use crate::config::AudioSettings;
use crate::error::CaptureError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Why a recording stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Trailing silence after speech ended the answer
    NaturalPause,
    /// The hard per-answer duration cap elapsed
    MaxDuration,
    /// The caller stopped the recording through its handle
    Stopped,
}

/// One captured answer
#[derive(Debug, Clone)]
pub struct Recording {
    /// WAV-encoded audio (16-bit PCM)
    pub wav: Vec<u8>,
    pub sample_rate: u32,
    pub channels: u16,
    /// Stream-clock duration of the capture
    pub duration_ms: u64,
    pub stop_reason: StopReason,
    /// Whether speech was ever detected
    pub has_spoken: bool,
}

impl Recording {
    /// True when no samples were captured (WAV header only)
    pub fn is_empty(&self) -> bool {
        self.duration_ms == 0
    }
}

/// Recorder tuning, usually taken from the `[audio]` config section
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    pub sample_rate: u32,
    pub channels: u16,
    /// Normalized RMS level above which a window counts as speech
    pub speech_threshold: f32,
    /// Speech shorter than this never arms the trailing-silence timer
    pub min_speech_ms: u64,
    /// Continuous silence needed after speech to end an answer
    pub silence_ms: u64,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self::from(&AudioSettings::default())
    }
}

impl From<&AudioSettings> for RecorderConfig {
    fn from(audio: &AudioSettings) -> Self {
        Self {
            sample_rate: audio.sample_rate,
            channels: audio.channels,
            speech_threshold: audio.speech_threshold,
            min_speech_ms: audio.min_speech_ms,
            silence_ms: audio.silence_ms,
        }
    }
}

/// Speech-boundary state machine
///
/// Transitions on every level window: silent ⇄ speaking freely; the trailing
/// silence timer only arms once speech has lasted past the minimum floor, so
/// a cough or keyboard click never ends an answer on its own.
struct SpeechGate {
    threshold: f32,
    min_speech_ms: u64,
    silence_ms: u64,
    has_spoken: bool,
    speech_start_ms: u64,
    last_speech_ms: u64,
    silence_start_ms: Option<u64>,
}

impl SpeechGate {
    fn new(config: &RecorderConfig) -> Self {
        Self {
            threshold: config.speech_threshold,
            min_speech_ms: config.min_speech_ms,
            silence_ms: config.silence_ms,
            has_spoken: false,
            speech_start_ms: 0,
            last_speech_ms: 0,
            silence_start_ms: None,
        }
    }

    /// Observe one level window; returns true when a natural pause completes
    fn observe(&mut self, level: f32, at_ms: u64) -> bool {
        if level > self.threshold {
            if !self.has_spoken {
                self.has_spoken = true;
                self.speech_start_ms = at_ms;
                debug!("Speech onset at {}ms (level {:.3})", at_ms, level);
            }
            self.last_speech_ms = at_ms;
            // Any speech resets an in-progress silence timer
            self.silence_start_ms = None;
            return false;
        }

        // The floor is measured over actual speech, onset to falling silent:
        // a short blip must never arm the silence timer, no matter how long
        // the recording runs afterwards.
        if !self.has_spoken
            || self
                .last_speech_ms
                .saturating_sub(self.speech_start_ms)
                < self.min_speech_ms
        {
            return false;
        }

        let silence_began = *self.silence_start_ms.get_or_insert(at_ms);
        at_ms.saturating_sub(silence_began) >= self.silence_ms
    }
}

/// Records one spoken answer from a frame stream, stopping at a natural
/// conversational boundary, at a hard duration cap, or on caller request
///
/// One recorder supports one recording at a time; overlapping `start` calls
/// are rejected with `CaptureError::RecorderBusy`.
pub struct AnswerRecorder {
    config: RecorderConfig,
    in_flight: Arc<AtomicBool>,
}

impl AnswerRecorder {
    pub fn new(config: RecorderConfig) -> Self {
        Self {
            config,
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Record until one of the three stop triggers fires
    pub async fn record(
        &self,
        frames: mpsc::Receiver<AudioFrame>,
        max_duration: Duration,
    ) -> Result<Recording, CaptureError> {
        self.start(frames, max_duration)?.finish().await
    }

    /// Start recording and return a handle with an explicit stop control
    pub fn start(
        &self,
        frames: mpsc::Receiver<AudioFrame>,
        max_duration: Duration,
    ) -> Result<RecordingHandle, CaptureError> {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            return Err(CaptureError::RecorderBusy);
        }

        let (stop_tx, stop_rx) = mpsc::channel(1);
        let (level_tx, level_rx) = watch::channel(0.0f32);

        let task = tokio::spawn(run_capture(
            self.config.clone(),
            frames,
            max_duration,
            stop_rx,
            level_tx,
            InFlightGuard(Arc::clone(&self.in_flight)),
        ));

        Ok(RecordingHandle {
            stop_tx,
            level_rx,
            task,
        })
    }
}

/// Control handle for an in-flight recording
pub struct RecordingHandle {
    stop_tx: mpsc::Sender<()>,
    level_rx: watch::Receiver<f32>,
    task: JoinHandle<Result<Recording, CaptureError>>,
}

impl RecordingHandle {
    /// Stop now; idempotent, a second call is a no-op
    pub fn stop(&self) {
        let _ = self.stop_tx.try_send(());
    }

    /// Live normalized level for metering UIs
    pub fn level(&self) -> watch::Receiver<f32> {
        self.level_rx.clone()
    }

    /// Wait for the recording to resolve
    pub async fn finish(self) -> Result<Recording, CaptureError> {
        self.task
            .await
            .map_err(|e| CaptureError::Stream(format!("capture task failed: {}", e)))?
    }
}

/// Clears the recorder's busy flag on every exit path
struct InFlightGuard(Arc<AtomicBool>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

async fn run_capture(
    config: RecorderConfig,
    mut frames: mpsc::Receiver<AudioFrame>,
    max_duration: Duration,
    mut stop_rx: mpsc::Receiver<()>,
    level_tx: watch::Sender<f32>,
    _guard: InFlightGuard,
) -> Result<Recording, CaptureError> {
    let max_ms = max_duration.as_millis() as u64;

    let mut samples: Vec<i16> = Vec::new();
    let mut format: Option<(u32, u16)> = None;
    let mut window: Option<LevelWindow> = None;
    let mut gate = SpeechGate::new(&config);
    let mut start_offset: Option<u64> = None;
    let mut clock_ms: u64 = 0;

    // Wall-clock backstop in case the source stalls without closing
    let backstop = tokio::time::sleep(max_duration + Duration::from_secs(2));
    tokio::pin!(backstop);

    let stop_reason = 'capture: loop {
        tokio::select! {
            _ = stop_rx.recv() => break 'capture StopReason::Stopped,
            _ = &mut backstop => break 'capture StopReason::MaxDuration,
            frame = frames.recv() => {
                let Some(frame) = frame else {
                    // Source died mid-answer; tear down and reject
                    return Err(CaptureError::SourceClosed);
                };

                let (sample_rate, channels) = *format.get_or_insert((frame.sample_rate, frame.channels));
                let window = window.get_or_insert_with(|| LevelWindow::new(sample_rate, channels));
                let base = *start_offset.get_or_insert(frame.timestamp_ms);

                let frame_start = frame.timestamp_ms.saturating_sub(base);
                let per_ms = (sample_rate as u64 * channels.max(1) as u64) / 1000;

                for (i, &sample) in frame.samples.iter().enumerate() {
                    samples.push(sample);

                    if let Some(level) = window.push(sample) {
                        let at_ms = frame_start + (i as u64 + 1) / per_ms.max(1);
                        let _ = level_tx.send(level);
                        if gate.observe(level, at_ms) {
                            info!("Natural pause detected at {}ms", at_ms);
                            break 'capture StopReason::NaturalPause;
                        }
                    }
                }

                clock_ms = frame_start + frame.duration_ms();
                if clock_ms >= max_ms {
                    break 'capture StopReason::MaxDuration;
                }
            }
        }
    };

    // No further sampling after a stop trigger; dropping the frame receiver
    // is the backpressure signal that lets the source shut down.
    drop(frames);
    drop(level_tx);

    let (sample_rate, channels) = format.unwrap_or((config.sample_rate, config.channels));
    let wav = encode_wav(&samples, sample_rate, channels)?;

    info!(
        "Recording stopped ({:?}): {}ms, {} samples, spoke={}",
        stop_reason,
        clock_ms,
        samples.len(),
        gate.has_spoken
    );

    Ok(Recording {
        wav,
        sample_rate,
        channels,
        duration_ms: clock_ms,
        stop_reason,
        has_spoken: gate.has_spoken,
    })
}

/// Encode accumulated PCM into an in-memory WAV blob
fn encode_wav(samples: &[i16], sample_rate: u32, channels: u16) -> Result<Vec<u8>, CaptureError> {
    let spec = hound::WavSpec {
        channels: channels.max(1),
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| CaptureError::Stream(format!("WAV encoding failed: {}", e)))?;
        for &sample in samples {
            writer
                .write_sample(sample)
                .map_err(|e| CaptureError::Stream(format!("WAV encoding failed: {}", e)))?;
        }
        writer
            .finalize()
            .map_err(|e| CaptureError::Stream(format!("WAV encoding failed: {}", e)))?;
    }

    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RecorderConfig {
        RecorderConfig {
            sample_rate: 16000,
            channels: 1,
            speech_threshold: 0.02,
            min_speech_ms: 600,
            silence_ms: 1500,
        }
    }

    #[test]
    fn gate_ignores_silence_before_speech() {
        let mut gate = SpeechGate::new(&config());
        for ms in (0..10_000).step_by(32) {
            assert!(!gate.observe(0.0, ms));
        }
        assert!(!gate.has_spoken);
    }

    #[test]
    fn gate_completes_after_speech_and_silence() {
        let mut gate = SpeechGate::new(&config());
        // 1s of speech
        for ms in (0..1000).step_by(32) {
            assert!(!gate.observe(0.5, ms));
        }
        // Silence: fires once 1500ms have elapsed below threshold
        let mut fired_at = None;
        for ms in (1000..4000).step_by(32) {
            if gate.observe(0.0, ms) {
                fired_at = Some(ms);
                break;
            }
        }
        let fired_at = fired_at.expect("natural pause should fire");
        assert!(fired_at >= 2500, "fired too early at {}ms", fired_at);
    }

    #[test]
    fn gate_resets_silence_timer_on_new_speech() {
        let mut gate = SpeechGate::new(&config());
        for ms in (0..1000).step_by(32) {
            gate.observe(0.5, ms);
        }
        // 1s silence (below the 1500ms window), then speech again
        for ms in (1000..2000).step_by(32) {
            assert!(!gate.observe(0.0, ms));
        }
        assert!(!gate.observe(0.5, 2000));
        // Timer restarted: another 1s of silence is still not enough
        for ms in (2032..3000).step_by(32) {
            assert!(!gate.observe(0.0, ms));
        }
    }

    #[test]
    fn gate_never_arms_for_sub_floor_speech() {
        let mut gate = SpeechGate::new(&config());
        // 300ms of speech, below the 600ms floor
        for ms in (0..300).step_by(32) {
            gate.observe(0.5, ms);
        }
        for ms in (300..10_000).step_by(32) {
            assert!(!gate.observe(0.0, ms), "silence timer must not arm at {}ms", ms);
        }
    }

    #[test]
    fn empty_recording_encodes_header_only_wav() {
        let wav = encode_wav(&[], 16000, 1).unwrap();
        assert_eq!(&wav[..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
    }
}

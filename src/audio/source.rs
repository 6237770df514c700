use crate::error::CaptureError;
use tokio::sync::mpsc;

/// Audio sample data (16-bit PCM, interleaved)
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Raw audio samples (i16 PCM, interleaved)
    pub samples: Vec<i16>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
    /// Timestamp in milliseconds since capture started
    pub timestamp_ms: u64,
}

impl AudioFrame {
    /// Duration this frame covers on the stream clock
    pub fn duration_ms(&self) -> u64 {
        let samples_per_sec = self.sample_rate as u64 * self.channels.max(1) as u64;
        if samples_per_sec == 0 {
            return 0;
        }
        self.samples.len() as u64 * 1000 / samples_per_sec
    }

    /// Stream-clock timestamp of the frame's last sample
    pub fn end_ms(&self) -> u64 {
        self.timestamp_ms + self.duration_ms()
    }
}

/// Configuration for a capture source
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Requested sample rate
    pub sample_rate: u32,
    /// Requested channel count (1 = mono)
    pub channels: u16,
    /// Frame size in milliseconds (affects latency)
    pub buffer_duration_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000, // STT backends expect 16kHz
            channels: 1,
            buffer_duration_ms: 100,
        }
    }
}

/// Source of raw audio frames
///
/// The microphone implementation lives in `microphone.rs`; tests feed the
/// recorder from a plain channel instead, so the silence state machine never
/// needs real capture hardware.
#[async_trait::async_trait]
pub trait CaptureSource: Send {
    /// Start capturing; frames arrive on the returned channel
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>, CaptureError>;

    /// Stop capturing and release the device
    async fn stop(&mut self) -> Result<(), CaptureError>;

    /// Whether the source is currently capturing
    fn is_capturing(&self) -> bool;

    /// Source name for logging
    fn name(&self) -> &str;
}

/// Aggregates interleaved samples over a fixed ~32ms time window and emits
/// an RMS level normalized to [0, 1]
///
/// Window size adapts to the effective sample rate (rate × channels) so the
/// emission cadence stays constant across formats.
pub struct LevelWindow {
    window_samples: usize,
    sum_sq: f32,
    count: usize,
}

impl LevelWindow {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        let effective = sample_rate as f32 * channels.max(1) as f32;
        let window_samples = ((effective * 0.032).round() as usize).max(128);
        Self {
            window_samples,
            sum_sq: 0.0,
            count: 0,
        }
    }

    /// Push one i16 sample; yields the window's RMS level every ~32ms
    pub fn push(&mut self, sample: i16) -> Option<f32> {
        let normalized = sample as f32 / i16::MAX as f32;
        self.sum_sq += normalized * normalized;
        self.count += 1;

        if self.count < self.window_samples {
            return None;
        }

        let rms = (self.sum_sq / self.count as f32).sqrt();
        self.sum_sq = 0.0;
        self.count = 0;

        Some(rms.clamp(0.0, 1.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(window: &mut LevelWindow, samples: impl Iterator<Item = i16>) -> Vec<f32> {
        samples.filter_map(|s| window.push(s)).collect()
    }

    #[test]
    fn silence_reads_near_zero() {
        let mut window = LevelWindow::new(16000, 1);
        let levels = drain(&mut window, std::iter::repeat(0i16).take(2048));
        assert!(!levels.is_empty());
        assert!(levels.iter().all(|&l| l < 0.001));
    }

    #[test]
    fn loud_tone_reads_high() {
        let mut window = LevelWindow::new(16000, 1);
        // Square wave at half amplitude has RMS 0.5
        let tone = (0..2048).map(|i| if i % 2 == 0 { 16384 } else { -16384 });
        let levels = drain(&mut window, tone);
        assert!(!levels.is_empty());
        assert!(levels.iter().all(|&l| (l - 0.5).abs() < 0.01));
    }

    #[test]
    fn window_adapts_to_sample_rate() {
        // 16kHz mono: 512 samples per 32ms window
        let mut window = LevelWindow::new(16000, 1);
        let emitted = drain(&mut window, std::iter::repeat(0i16).take(512));
        assert_eq!(emitted.len(), 1);
    }
}

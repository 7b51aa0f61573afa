//! Amplitude sampling for voice activity detection
//!
//! The meter keeps a short window of the most recent captured audio and
//! reports its level in decibels relative to full scale.

use crate::audio::buffer::SampleWindow;

/// Level reported for digital silence
pub const SILENCE_FLOOR_DB: f32 = -100.0;

/// Convert a normalized RMS amplitude (0.0..=1.0) to dBFS
pub fn amplitude_to_db(rms: f32) -> f32 {
    if rms <= 0.0 || rms.is_nan() {
        return SILENCE_FLOOR_DB;
    }
    (20.0 * rms.log10()).max(SILENCE_FLOOR_DB)
}

/// Energy meter over the latest captured samples
#[derive(Clone)]
pub struct LevelMeter {
    window: SampleWindow,
}

impl LevelMeter {
    /// Create a meter averaging over `window_ms` of audio at `sample_rate`
    pub fn new(sample_rate: u32, window_ms: u64) -> Self {
        let capacity = (sample_rate as u64 * window_ms / 1000).max(1) as usize;
        Self {
            window: SampleWindow::new(capacity),
        }
    }

    /// Feed captured mono samples
    pub fn push(&self, samples: &[f32]) {
        self.window.push(samples);
    }

    /// Current RMS amplitude
    pub fn rms(&self) -> f32 {
        self.window.rms()
    }

    /// Current level in dBFS
    pub fn level_db(&self) -> f32 {
        amplitude_to_db(self.window.rms())
    }

    /// Forget buffered audio
    pub fn reset(&self) {
        self.window.clear();
    }

    /// Number of samples the level is computed over
    pub fn window_len(&self) -> usize {
        self.window.capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_amplitude_to_db() {
        assert!((amplitude_to_db(1.0) - 0.0).abs() < 1e-4);
        assert!((amplitude_to_db(0.1) + 20.0).abs() < 1e-4);
        assert_eq!(amplitude_to_db(0.0), SILENCE_FLOOR_DB);
        assert_eq!(amplitude_to_db(1e-9), SILENCE_FLOOR_DB);
    }

    #[test]
    fn test_window_size() {
        let meter = LevelMeter::new(16_000, 50);
        assert_eq!(meter.window_len(), 800);
    }

    #[test]
    fn test_level_follows_latest_audio() {
        let meter = LevelMeter::new(1_000, 10);
        assert_eq!(meter.level_db(), SILENCE_FLOOR_DB);

        meter.push(&[0.1; 10]);
        assert!((meter.level_db() + 20.0).abs() < 1e-3);

        // Quiet audio fully replaces the loud window
        meter.push(&[0.001; 10]);
        assert!((meter.level_db() + 60.0).abs() < 1e-2);

        meter.reset();
        assert_eq!(meter.level_db(), SILENCE_FLOOR_DB);
    }
}

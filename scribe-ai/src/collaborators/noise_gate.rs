//! Stationary noise gate
//!
//! The noise floor is the RMS of the opening half second. Windows whose RMS
//! stays close to that floor are attenuated; louder windows pass untouched.

use super::Denoiser;
use tracing::debug;

/// Tuning for [`NoiseGate`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoiseGateSettings {
    /// Length of the noise profile taken from the start (seconds)
    pub profile_seconds: f64,
    /// Analysis window (samples)
    pub window: usize,
    /// Windows below `floor * threshold_ratio` are gated
    pub threshold_ratio: f32,
    /// Fraction of gated energy removed (0.0-1.0)
    pub reduction: f32,
}

impl Default for NoiseGateSettings {
    fn default() -> Self {
        Self {
            profile_seconds: 0.5,
            window: 1024,
            threshold_ratio: 2.0,
            reduction: 0.75,
        }
    }
}

/// RMS-window noise gate
#[derive(Debug, Clone, Default)]
pub struct NoiseGate {
    settings: NoiseGateSettings,
}

fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
}

impl NoiseGate {
    pub fn new(settings: NoiseGateSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &NoiseGateSettings {
        &self.settings
    }

    /// RMS of the noise profile
    pub fn noise_floor(&self, samples: &[f32], sample_rate: u32) -> f32 {
        let profile_len = (self.settings.profile_seconds * f64::from(sample_rate)) as usize;
        rms(&samples[..profile_len.min(samples.len())])
    }
}

impl Denoiser for NoiseGate {
    fn denoise(&self, samples: &[f32], sample_rate: u32) -> Vec<f32> {
        let floor = self.noise_floor(samples, sample_rate);
        if self.settings.window == 0 || !floor.is_finite() || floor <= 0.0 {
            debug!("Noise gate skipped (floor {})", floor);
            return samples.to_vec();
        }

        let threshold = floor * self.settings.threshold_ratio;
        let gain = (1.0 - self.settings.reduction).clamp(0.0, 1.0);
        let mut gated = 0usize;

        let mut output = Vec::with_capacity(samples.len());
        for window in samples.chunks(self.settings.window) {
            if rms(window) < threshold {
                gated += 1;
                output.extend(window.iter().map(|s| s * gain));
            } else {
                output.extend_from_slice(window);
            }
        }

        debug!(floor, threshold, gated, "Noise gate applied");
        output
    }
}

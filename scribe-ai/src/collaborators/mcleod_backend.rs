//! Frame-level pitch tracking with the McLeod pitch method

use super::{FrameBackend, PitchFrames};
use anyhow::{ensure, Result};
use pitch_detection::detector::mcleod::McLeodDetector;
use pitch_detection::detector::PitchDetector;
use tracing::debug;

/// Tuning for [`McLeodFrameBackend`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct McLeodSettings {
    /// Analysis window (samples)
    pub window: usize,
    /// Distance between window starts (samples)
    pub hop: usize,
    /// Minimum window energy (sum of squares) to attempt detection
    pub power_threshold: f64,
    /// Peak-picking clarity threshold inside the detector
    pub clarity_threshold: f64,
    /// Frames below this clarity are reported unvoiced
    pub voicing_threshold: f64,
    /// Plausible melody range (Hz)
    pub min_frequency: f64,
    pub max_frequency: f64,
}

impl Default for McLeodSettings {
    fn default() -> Self {
        Self {
            window: 2048,
            hop: 128,
            power_threshold: 1.0,
            clarity_threshold: 0.6,
            voicing_threshold: 0.5,
            min_frequency: 50.0,
            max_frequency: 2000.0,
        }
    }
}

/// [`FrameBackend`] built on `pitch-detection`'s McLeod detector
#[derive(Debug, Clone, Default)]
pub struct McLeodFrameBackend {
    settings: McLeodSettings,
}

impl McLeodFrameBackend {
    pub fn new(settings: McLeodSettings) -> Self {
        Self { settings }
    }

    pub fn with_hop(hop: usize) -> Self {
        Self::new(McLeodSettings {
            hop,
            ..McLeodSettings::default()
        })
    }

    pub fn settings(&self) -> &McLeodSettings {
        &self.settings
    }
}

impl FrameBackend for McLeodFrameBackend {
    fn predict_frames(&self, samples: &[f32], sample_rate: u32) -> Result<PitchFrames> {
        let s = &self.settings;
        ensure!(sample_rate > 0, "Sample rate must be positive");
        ensure!(s.window >= 4 && s.hop > 0, "Invalid McLeod window/hop: {}/{}", s.window, s.hop);

        let mut frames = PitchFrames::default();
        if samples.is_empty() {
            return Ok(frames);
        }

        let mut detector = McLeodDetector::<f64>::new(s.window, s.window / 2);
        let rate = sample_rate as usize;
        let frame_count = if samples.len() <= s.window {
            1
        } else {
            1 + (samples.len() - s.window) / s.hop
        };

        let mut buffer = vec![0.0f64; s.window];
        for index in 0..frame_count {
            let start = index * s.hop;
            let end = (start + s.window).min(samples.len());
            buffer.fill(0.0);
            for (slot, sample) in buffer.iter_mut().zip(&samples[start..end]) {
                *slot = f64::from(*sample);
            }

            let pitch = detector.get_pitch(&buffer, rate, s.power_threshold, s.clarity_threshold);
            let (frequency, clarity) = match pitch {
                Some(p) if p.frequency >= s.min_frequency && p.frequency <= s.max_frequency => {
                    (p.frequency, p.clarity.clamp(0.0, 1.0))
                }
                _ => (f64::NAN, 0.0),
            };

            frames.frequencies.push(frequency);
            frames.voiced.push(frequency.is_finite() && clarity >= s.voicing_threshold);
            frames.confidences.push(clarity);
            frames
                .times
                .push((start + s.window / 2) as f64 / f64::from(sample_rate));
        }

        debug!(
            frames = frames.len(),
            voiced = frames.voiced.iter().filter(|v| **v).count(),
            "McLeod pitch track"
        );
        Ok(frames)
    }
}

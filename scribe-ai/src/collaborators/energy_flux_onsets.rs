//! Onset and tempo estimation from energy flux
//!
//! The onset envelope is the half-wave rectified frame-to-frame change in
//! RMS energy over centred frames. Onsets are its local peaks above an
//! adaptive threshold; tempo is the envelope autocorrelation lag with the
//! most energy, weighted towards 120 BPM.

use super::{OnsetAnalysis, OnsetTempoEstimator};
use anyhow::{ensure, Result};
use tracing::debug;

/// Tuning for [`EnergyFluxOnsets`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OnsetSettings {
    /// RMS frame length (samples)
    pub window: usize,
    /// Envelope hop (samples)
    pub hop: usize,
    /// Peak must exceed envelope mean by this fraction of the maximum
    pub delta: f64,
    /// Minimum spacing between onsets (seconds)
    pub min_gap_seconds: f64,
    /// Tempo search range and prior centre (BPM)
    pub min_bpm: f64,
    pub max_bpm: f64,
    pub prior_bpm: f64,
}

impl Default for OnsetSettings {
    fn default() -> Self {
        Self {
            window: 2048,
            hop: 512,
            delta: 0.1,
            min_gap_seconds: 0.05,
            min_bpm: 40.0,
            max_bpm: 280.0,
            prior_bpm: 120.0,
        }
    }
}

/// Used when the envelope carries no periodicity
const DEFAULT_TEMPO_BPM: f64 = 120.0;

/// Energy-flux onset detector and tempo estimator
#[derive(Debug, Clone, Default)]
pub struct EnergyFluxOnsets {
    settings: OnsetSettings,
}

impl EnergyFluxOnsets {
    pub fn new(settings: OnsetSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &OnsetSettings {
        &self.settings
    }

    /// Rectified RMS energy flux, normalized to a peak of 1
    pub fn onset_envelope(&self, samples: &[f32]) -> Vec<f64> {
        let s = &self.settings;
        if samples.is_empty() {
            return Vec::new();
        }

        let half = s.window / 2;
        let frames = samples.len() / s.hop + 1;
        let energies: Vec<f64> = (0..frames)
            .map(|i| {
                let centre = i * s.hop;
                let lo = centre.saturating_sub(half);
                let hi = (centre + half).min(samples.len());
                if lo >= hi {
                    return 0.0;
                }
                let sum: f64 = samples[lo..hi].iter().map(|x| f64::from(*x).powi(2)).sum();
                (sum / s.window as f64).sqrt()
            })
            .collect();

        let mut envelope: Vec<f64> = std::iter::once(0.0)
            .chain(energies.windows(2).map(|w| (w[1] - w[0]).max(0.0)))
            .collect();

        let peak = envelope.iter().copied().fold(0.0, f64::max);
        if peak > 0.0 {
            envelope.iter_mut().for_each(|v| *v /= peak);
        }
        envelope
    }

    /// Frame indices of envelope peaks
    pub fn pick_peaks(&self, envelope: &[f64], frame_rate: f64) -> Vec<usize> {
        if envelope.len() < 3 {
            return Vec::new();
        }
        let mean = envelope.iter().sum::<f64>() / envelope.len() as f64;
        let threshold = mean + self.settings.delta;
        let min_gap = (self.settings.min_gap_seconds * frame_rate).ceil() as usize;

        let mut peaks: Vec<usize> = Vec::new();
        for i in 1..envelope.len() - 1 {
            let v = envelope[i];
            if v < threshold || v < envelope[i - 1] || v <= envelope[i + 1] {
                continue;
            }
            if peaks.last().map_or(true, |&last| i - last >= min_gap) {
                peaks.push(i);
            }
        }
        peaks
    }

    /// Tempo from envelope autocorrelation with a log-normal prior
    pub fn estimate_tempo(&self, envelope: &[f64], frame_rate: f64) -> f64 {
        let s = &self.settings;
        let min_lag = (frame_rate * 60.0 / s.max_bpm).floor().max(1.0) as usize;
        let max_lag = (frame_rate * 60.0 / s.min_bpm).ceil() as usize;
        if envelope.len() <= min_lag {
            return DEFAULT_TEMPO_BPM;
        }

        // widen peaks so beats that straddle frame boundaries still line up
        let smoothed = smooth(envelope);
        let mut best: Option<(usize, f64)> = None;
        for lag in min_lag..=max_lag.min(smoothed.len() - 1) {
            let ac: f64 = smoothed[..smoothed.len() - lag]
                .iter()
                .zip(&smoothed[lag..])
                .map(|(a, b)| a * b)
                .sum();
            let bpm = frame_rate * 60.0 / lag as f64;
            let octaves = (bpm / s.prior_bpm).log2();
            let score = ac * (-0.5 * octaves * octaves).exp();
            if score > 0.0 && best.map_or(true, |(_, b)| score > b) {
                best = Some((lag, score));
            }
        }

        match best {
            Some((lag, _)) => frame_rate * 60.0 / lag as f64,
            None => DEFAULT_TEMPO_BPM,
        }
    }
}

/// Three-tap [0.25, 0.5, 0.25] smoothing with edge clamping
fn smooth(signal: &[f64]) -> Vec<f64> {
    let last = signal.len().saturating_sub(1);
    (0..signal.len())
        .map(|i| {
            0.25 * signal[i.saturating_sub(1)] + 0.5 * signal[i] + 0.25 * signal[(i + 1).min(last)]
        })
        .collect()
}

impl OnsetTempoEstimator for EnergyFluxOnsets {
    fn estimate(&self, samples: &[f32], sample_rate: u32) -> Result<OnsetAnalysis> {
        ensure!(sample_rate > 0, "Sample rate must be positive");
        ensure!(
            self.settings.hop > 0 && self.settings.window > 0,
            "Invalid onset window/hop"
        );

        let frame_rate = f64::from(sample_rate) / self.settings.hop as f64;
        let envelope = self.onset_envelope(samples);
        let onset_times: Vec<f64> = self
            .pick_peaks(&envelope, frame_rate)
            .into_iter()
            .map(|i| i as f64 / frame_rate)
            .collect();
        let tempo_bpm = self.estimate_tempo(&envelope, frame_rate);

        debug!(
            tempo_bpm,
            onsets = onset_times.len(),
            frames = envelope.len(),
            "Onset analysis"
        );

        Ok(OnsetAnalysis {
            tempo_bpm,
            onset_envelope: envelope,
            frame_rate,
            onset_times,
        })
    }
}

//! Meter detection from onset-strength autocorrelation
//!
//! Periodicity in the onset envelope at 3, 4 and 6 beats decides between
//! 3/4, 4/4 and 6/8. The detector never fails: anything numerically
//! unusable falls back to 4/4.

use crate::collaborators::OnsetAnalysis;
use crate::models::music::TimeSignature;
use thiserror::Error;
use tracing::{debug, warn};

/// Autocorrelation is computed up to this many beats of lag
const MAX_LAG_BEATS: f64 = 8.0;
/// Half-width of the search window around each period, in beats
const DRIFT_TOLERANCE_BEATS: f64 = 0.25;

/// Reasons the meter could not be measured
#[derive(Debug, Error, PartialEq)]
pub enum MeterError {
    #[error("Onset envelope is empty")]
    EmptyEnvelope,

    #[error("Invalid tempo: {0}")]
    InvalidTempo(f64),

    #[error("Invalid envelope frame rate: {0}")]
    InvalidFrameRate(f64),

    #[error("Non-finite value in onset envelope")]
    NonFinite,
}

/// Autocorrelation energy at the candidate periods
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeterEnergies {
    pub three: f64,
    pub four: f64,
    pub six: f64,
}

impl MeterEnergies {
    /// Apply the decision rule
    ///
    /// Triple when 3 beats beat 4 beats by more than 15% and reach 85% of
    /// 6 beats; compound duple when 6 beats beat 4 by 25% and 3 by 10%;
    /// duple otherwise.
    pub fn classify(&self) -> TimeSignature {
        if self.three > self.four * 1.15 && self.three >= self.six * 0.85 {
            TimeSignature::ThreeFour
        } else if self.six > self.four * 1.25 && self.six > self.three * 1.1 {
            TimeSignature::SixEight
        } else {
            TimeSignature::FourFour
        }
    }
}

/// Raw (unnormalized) autocorrelation for lags `0..max_lag`
pub fn autocorrelate(signal: &[f64], max_lag: usize) -> Vec<f64> {
    let lags = max_lag.min(signal.len());
    (0..lags)
        .map(|lag| {
            signal[..signal.len() - lag]
                .iter()
                .zip(&signal[lag..])
                .map(|(a, b)| a * b)
                .sum()
        })
        .collect()
}

/// Measure periodicity energies for an envelope at a given tempo
pub fn meter_energies(
    envelope: &[f64],
    frame_rate: f64,
    tempo_bpm: f64,
) -> Result<MeterEnergies, MeterError> {
    if envelope.is_empty() {
        return Err(MeterError::EmptyEnvelope);
    }
    if !tempo_bpm.is_finite() || tempo_bpm <= 0.0 {
        return Err(MeterError::InvalidTempo(tempo_bpm));
    }
    if !frame_rate.is_finite() || frame_rate <= 0.0 {
        return Err(MeterError::InvalidFrameRate(frame_rate));
    }
    if envelope.iter().any(|v| !v.is_finite()) {
        return Err(MeterError::NonFinite);
    }

    let beat_frames = frame_rate * 60.0 / tempo_bpm;
    let max_lag = (beat_frames * MAX_LAG_BEATS).round_ties_even() as usize + 1;
    let ac = autocorrelate(envelope, max_lag);
    let window = ((beat_frames * DRIFT_TOLERANCE_BEATS).round_ties_even() as usize).max(1);

    let energy_at = |period_beats: f64| -> f64 {
        let period = (beat_frames * period_beats).round_ties_even();
        if period <= 0.0 || period >= ac.len() as f64 {
            return 0.0;
        }
        let period = period as usize;
        let lo = period.saturating_sub(window);
        let hi = (period + window + 1).min(ac.len());
        ac[lo..hi].iter().copied().fold(f64::NEG_INFINITY, f64::max)
    };

    let energies = MeterEnergies {
        three: energy_at(3.0),
        four: energy_at(4.0),
        six: energy_at(6.0),
    };
    if !(energies.three.is_finite() && energies.four.is_finite() && energies.six.is_finite()) {
        return Err(MeterError::NonFinite);
    }
    Ok(energies)
}

/// Detect the time signature of a recording
///
/// Always returns one of 4/4, 3/4 or 6/8; failures are logged and give 4/4.
pub fn detect_time_signature(analysis: &OnsetAnalysis, tempo_bpm: f64) -> TimeSignature {
    match meter_energies(&analysis.onset_envelope, analysis.frame_rate, tempo_bpm) {
        Ok(energies) => {
            let signature = energies.classify();
            debug!(
                three = energies.three,
                four = energies.four,
                six = energies.six,
                %signature,
                "Meter energies"
            );
            signature
        }
        Err(e) => {
            warn!("Time signature detection failed ({}); assuming 4/4", e);
            TimeSignature::FourFour
        }
    }
}

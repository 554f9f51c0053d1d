//! Key-signature estimation (Krumhansl-Kessler profile correlation)
//!
//! A duration-weighted pitch-class histogram is correlated against the
//! major and minor tonal-hierarchy profiles in all 12 transpositions; the
//! best-correlated transposition names the key.

use crate::models::music::{KeyMode, MusicalNote, PitchClass};

/// Krumhansl-Kessler major profile, tonic first
const KK_MAJOR: [f64; 12] = [
    6.35, 2.23, 3.48, 2.33, 4.38, 4.09, 2.52, 5.19, 2.39, 3.66, 2.29, 2.88,
];

/// Krumhansl-Kessler minor profile, tonic first
const KK_MINOR: [f64; 12] = [
    6.33, 2.68, 3.52, 5.38, 2.60, 3.53, 2.54, 4.75, 3.98, 2.69, 3.34, 3.17,
];

/// Winning key hypothesis
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyEstimate {
    pub tonic: PitchClass,
    pub mode: KeyMode,
    /// Pearson correlation of the winner (0 for degenerate input)
    pub correlation: f64,
}

impl KeyEstimate {
    /// Estimate used when there is nothing to correlate
    pub fn fallback() -> Self {
        Self {
            tonic: PitchClass::C,
            mode: KeyMode::Major,
            correlation: 0.0,
        }
    }

    /// Key signature name ("C", "Eb", "F#", ...)
    pub fn name(&self) -> &'static str {
        self.tonic.key_name()
    }
}

/// Duration-weighted pitch-class histogram of the pitched notes
pub fn pitch_class_histogram(notes: &[MusicalNote]) -> [f64; 12] {
    let mut histogram = [0.0; 12];
    for note in notes.iter().filter(|n| !n.is_rest) {
        histogram[note.pitch.index()] += note.beats();
    }
    histogram
}

/// Pearson correlation; `None` when either side has zero variance
fn pearson(x: &[f64; 12], y: &[f64; 12]) -> Option<f64> {
    let mean_x = x.iter().sum::<f64>() / 12.0;
    let mean_y = y.iter().sum::<f64>() / 12.0;

    let (mut cov, mut var_x, mut var_y) = (0.0, 0.0, 0.0);
    for (a, b) in x.iter().zip(y.iter()) {
        let dx = a - mean_x;
        let dy = b - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }

    let denom = (var_x * var_y).sqrt();
    if denom > 0.0 && denom.is_finite() {
        Some(cov / denom)
    } else {
        None
    }
}

/// Profile transposed so its tonic weight sits on `tonic`
fn transpose(profile: &[f64; 12], tonic: usize) -> [f64; 12] {
    let mut rotated = [0.0; 12];
    for (pc, slot) in rotated.iter_mut().enumerate() {
        *slot = profile[(pc + 12 - tonic) % 12];
    }
    rotated
}

/// Estimate the key of a note sequence
///
/// Rests are ignored. Empty, all-rest and flat histograms give
/// [`KeyEstimate::fallback`] (C). Ties keep the first hypothesis checked:
/// tonics ascending from C, major before minor.
pub fn estimate_key(notes: &[MusicalNote]) -> KeyEstimate {
    let histogram = pitch_class_histogram(notes);
    if histogram.iter().sum::<f64>() <= 0.0 {
        return KeyEstimate::fallback();
    }

    let mut best: Option<KeyEstimate> = None;
    for tonic in 0..12 {
        for (mode, profile) in [(KeyMode::Major, &KK_MAJOR), (KeyMode::Minor, &KK_MINOR)] {
            let Some(correlation) = pearson(&histogram, &transpose(profile, tonic)) else {
                // flat histogram: no hypothesis is better than another
                return KeyEstimate::fallback();
            };
            if best.map_or(true, |b| correlation > b.correlation) {
                best = Some(KeyEstimate {
                    tonic: PitchClass::from_index(tonic),
                    mode,
                    correlation,
                });
            }
        }
    }

    best.unwrap_or_else(KeyEstimate::fallback)
}

//! Measure assembly and VexFlow output

use crate::models::music::{MusicalNote, TimeSignature};
use crate::models::responses::{MusicMetadata, VexFlowData, VexFlowMeasure, VexFlowNote};
use crate::services::key_estimator::{estimate_key, KeyEstimate};
use tracing::debug;

/// Floating-point slack when filling a measure
const MEASURE_TOLERANCE: f64 = 1e-6;
/// Mean octave at or below which the bass clef is used
const BASS_CLEF_MAX_OCTAVE: f64 = 2.0;

/// Notation plus summary for one transcription
#[derive(Debug, Clone, PartialEq)]
pub struct Notation {
    pub vexflow: VexFlowData,
    pub metadata: MusicMetadata,
    pub key: KeyEstimate,
}

/// Builds VexFlow measures from a finished note sequence
#[derive(Debug, Clone, Copy)]
pub struct NotationGenerator {
    time_signature: TimeSignature,
}

impl NotationGenerator {
    pub fn new(time_signature: TimeSignature) -> Self {
        Self { time_signature }
    }

    /// Generate notation and metadata
    ///
    /// `tempo_bpm` is the integer tempo reported in metadata and used to
    /// convert beats to seconds.
    pub fn generate(&self, notes: &[MusicalNote], tempo_bpm: u32) -> Notation {
        let key = estimate_key(notes);
        let beat_seconds = 60.0 / f64::from(tempo_bpm.max(1));

        let measures: Vec<VexFlowMeasure> = self
            .group_into_measures(notes)
            .into_iter()
            .map(|measure| VexFlowMeasure {
                notes: measure
                    .into_iter()
                    .map(|note| VexFlowNote {
                        keys: vec![note.vexflow_key()],
                        duration: note.duration_code(),
                    })
                    .collect(),
                time_signature: None,
            })
            .collect();

        let total_duration = notes
            .iter()
            .map(|n| n.end_time(beat_seconds))
            .fold(0.0, f64::max);
        let note_count = notes.iter().filter(|n| !n.is_rest).count();

        debug!(
            measures = measures.len(),
            notes = note_count,
            key = key.name(),
            "Notation assembled"
        );

        Notation {
            vexflow: VexFlowData {
                measures,
                clef: choose_clef(notes).to_string(),
                key: key.name().to_string(),
            },
            metadata: MusicMetadata {
                tempo: tempo_bpm,
                time_signature: self.time_signature.name().to_string(),
                key_signature: key.name().to_string(),
                total_duration,
                note_count,
            },
            key,
        }
    }

    /// Split notes into measures
    ///
    /// A note that would overflow the current measure starts the next one.
    /// Always returns at least one (possibly empty) measure.
    pub fn group_into_measures<'a>(&self, notes: &'a [MusicalNote]) -> Vec<Vec<&'a MusicalNote>> {
        let capacity = self.time_signature.beats_per_measure();
        let mut measures: Vec<Vec<&MusicalNote>> = Vec::new();
        let mut current: Vec<&MusicalNote> = Vec::new();
        let mut filled = 0.0;

        for note in notes {
            let beats = note.beats();
            if filled + beats > capacity + MEASURE_TOLERANCE {
                if !current.is_empty() {
                    measures.push(std::mem::take(&mut current));
                }
                filled = 0.0;
            }
            current.push(note);
            filled += beats;
        }

        if !current.is_empty() || measures.is_empty() {
            measures.push(current);
        }
        measures
    }
}

/// Bass clef when the mean octave of pitched notes is 2 or lower
pub fn choose_clef(notes: &[MusicalNote]) -> &'static str {
    let octaves: Vec<f64> = notes
        .iter()
        .filter(|n| !n.is_rest)
        .map(|n| f64::from(n.octave))
        .collect();
    if octaves.is_empty() {
        return "treble";
    }
    let mean = octaves.iter().sum::<f64>() / octaves.len() as f64;
    if mean <= BASS_CLEF_MAX_OCTAVE {
        "bass"
    } else {
        "treble"
    }
}

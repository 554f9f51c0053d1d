//! Pitch snapping, rest insertion and melodic smoothing
//!
//! Pass 1 quantizes all durations at once with [`DurationQuantizer`].
//! Pass 2 walks the events, snapping each pitch to the allowed set and
//! inserting a rest wherever the gap after the previous note is at least a
//! 16th at the current tempo. A final pass folds implausible octave leaps
//! back toward the previous note.

use crate::error::{PipelineResult, TranscriptionError};
use crate::models::music::{MusicalNote, NoteDuration, PitchClass, PitchEvent, TimeSignature};
use crate::music_theory::{
    allowed_midi_notes, chromatic_midi_notes, frequency_to_midi, midi_to_note, nearest_allowed,
};
use crate::services::duration_quantizer::DurationQuantizer;
use tracing::debug;

/// Gaps shorter than this fraction of a beat are absorbed
const MIN_REST_BEATS: f64 = 0.25;
/// Larger leaps between neighbouring pitched notes are treated as octave errors
const MAX_JUMP_SEMITONES: i32 = 12;

/// Turns pitch events into notes and rests
#[derive(Debug, Clone)]
pub struct NoteQuantizer {
    allowed_midi: Vec<i32>,
    tempo: f64,
    time_signature: TimeSignature,
}

impl NoteQuantizer {
    /// Create a quantizer
    ///
    /// `allowed_notes` of `None` allows all 12 pitch classes.
    ///
    /// # Errors
    /// `Quantization` if the allowed list names no valid note or the tempo
    /// is not a positive number.
    pub fn new(
        allowed_notes: Option<&[String]>,
        tempo: f64,
        time_signature: TimeSignature,
    ) -> PipelineResult<Self> {
        let allowed_midi = match allowed_notes {
            Some(names) => allowed_midi_notes(names),
            None => chromatic_midi_notes(),
        };
        if allowed_midi.is_empty() {
            return Err(TranscriptionError::Quantization(
                "No valid allowed notes provided".to_string(),
            ));
        }
        if !tempo.is_finite() || tempo <= 0.0 {
            return Err(TranscriptionError::Quantization(format!(
                "Invalid tempo: {}",
                tempo
            )));
        }

        Ok(Self {
            allowed_midi,
            tempo,
            time_signature,
        })
    }

    pub fn allowed_midi(&self) -> &[i32] {
        &self.allowed_midi
    }

    /// Seconds per quarter-note beat
    pub fn beat_seconds(&self) -> f64 {
        60.0 / self.tempo
    }

    /// Nearest allowed pitch for a frequency
    pub fn snap_pitch(&self, frequency: f64) -> (PitchClass, i32) {
        let midi = nearest_allowed(frequency_to_midi(frequency), &self.allowed_midi);
        midi_to_note(midi)
    }

    /// Quantize events into a note sequence with rests
    ///
    /// Events are processed in start-time order. Empty input gives an empty
    /// sequence.
    pub fn quantize(&self, events: &[PitchEvent]) -> Vec<MusicalNote> {
        if events.is_empty() {
            return Vec::new();
        }

        let mut events = events.to_vec();
        events.sort_by(|a, b| a.start_time.total_cmp(&b.start_time));

        let beat = self.beat_seconds();
        let min_rest_seconds = MIN_REST_BEATS * beat;

        let durations_beats: Vec<f64> = events.iter().map(|e| e.duration / beat).collect();
        let assignment =
            DurationQuantizer::new(self.time_signature.beats_per_measure()).quantize(&durations_beats);
        debug!(
            notes = events.len(),
            cost = assignment.total_cost,
            "Durations quantized"
        );

        let mut notes: Vec<MusicalNote> = Vec::with_capacity(events.len() * 2);
        for (event, duration) in events.iter().zip(assignment.durations) {
            if let Some(prev) = notes.last() {
                let prev_end = prev.end_time(beat);
                let gap = event.start_time - prev_end;
                if gap >= min_rest_seconds {
                    notes.push(MusicalNote::rest(NoteDuration::nearest(gap / beat), prev_end));
                }
            }

            let (pitch, octave) = self.snap_pitch(event.frequency);
            notes.push(MusicalNote::pitched(
                pitch,
                octave,
                duration,
                event.start_time,
                event.frequency,
            ));
        }

        self.smooth(notes)
    }

    /// Pull notes that leap more than an octave from the previous pitched
    /// note back to the same pitch class in the nearest allowed octave
    ///
    /// Leaps are measured between detected frequencies, so a corrected note
    /// does not shift the reference for the next one. Rests are passed
    /// through untouched.
    pub fn smooth(&self, notes: Vec<MusicalNote>) -> Vec<MusicalNote> {
        if notes.len() <= 1 {
            return notes;
        }

        let mut last_midi: Option<i32> = None;
        notes
            .into_iter()
            .map(|mut note| {
                let Some(frequency) = note.original_frequency.filter(|_| !note.is_rest) else {
                    return note;
                };
                let current = frequency_to_midi(frequency);

                if let Some(last) = last_midi {
                    if (current - last).abs() > MAX_JUMP_SEMITONES {
                        if let Some(closest) = self.closest_with_class(note.pitch, last) {
                            let (pitch, octave) = midi_to_note(closest);
                            debug!(
                                from = %note.quantized_note(),
                                to = %format!("{}{}", pitch, octave),
                                "Octave leap smoothed"
                            );
                            note.pitch = pitch;
                            note.octave = octave;
                        }
                    }
                }

                last_midi = Some(current);
                note
            })
            .collect()
    }

    /// Allowed MIDI number of `pitch` closest to `target` (lower wins ties)
    fn closest_with_class(&self, pitch: PitchClass, target: i32) -> Option<i32> {
        let mut best: Option<(i32, i32)> = None;
        for &m in self
            .allowed_midi
            .iter()
            .filter(|&&m| midi_to_note(m).0 == pitch)
        {
            let distance = (m - target).abs();
            if best.map_or(true, |(_, d)| distance < d) {
                best = Some((m, distance));
            }
        }
        best.map(|(m, _)| m)
    }
}

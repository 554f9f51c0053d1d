//! Pitch arithmetic: Hz ⇄ MIDI ⇄ note names, allowed-note sets

use crate::models::music::PitchClass;

/// Frequency of MIDI note 69 (A4)
pub const A4_HZ: f64 = 440.0;

/// Lowest and highest octave considered when expanding allowed notes
const MIN_OCTAVE: i32 = 0;
const MAX_OCTAVE: i32 = 8;

/// Nearest MIDI number for a frequency in Hz
///
/// Non-positive (or non-finite) frequencies map to 0. Halfway values round to
/// the even neighbour.
pub fn frequency_to_midi(frequency: f64) -> i32 {
    if !frequency.is_finite() || frequency <= 0.0 {
        return 0;
    }
    (69.0 + 12.0 * (frequency / A4_HZ).log2()).round_ties_even() as i32
}

/// Equal-tempered frequency of a (fractional) MIDI number
pub fn midi_to_frequency(midi: f64) -> f64 {
    A4_HZ * 2f64.powf((midi - 69.0) / 12.0)
}

/// Split a MIDI number into pitch class and octave (60 → C4)
pub fn midi_to_note(midi: i32) -> (PitchClass, i32) {
    let pc = midi.rem_euclid(12) as usize;
    let octave = midi.div_euclid(12) - 1;
    (PitchClass::from_index(pc), octave)
}

/// MIDI number for a pitch class in a given octave
pub fn note_to_midi(pitch: PitchClass, octave: i32) -> i32 {
    (octave + 1) * 12 + pitch.index() as i32
}

/// Expand note names into every MIDI number they name across octaves 0-8
///
/// Unrecognized names are skipped. The result is sorted and deduplicated and
/// only contains values in 0..=127.
pub fn allowed_midi_notes<S: AsRef<str>>(names: &[S]) -> Vec<i32> {
    let classes: Vec<PitchClass> = names
        .iter()
        .filter_map(|n| PitchClass::parse(n.as_ref()))
        .collect();

    let mut midi: Vec<i32> = (MIN_OCTAVE..=MAX_OCTAVE)
        .flat_map(|octave| classes.iter().map(move |&pc| note_to_midi(pc, octave)))
        .filter(|m| (0..=127).contains(m))
        .collect();
    midi.sort_unstable();
    midi.dedup();
    midi
}

/// Every chromatic note across the supported octave range
pub fn chromatic_midi_notes() -> Vec<i32> {
    let names: Vec<&str> = PitchClass::ALL.iter().map(|pc| pc.name()).collect();
    allowed_midi_notes(&names)
}

/// Closest member of `allowed` to `midi`
///
/// `allowed` must be sorted ascending; on a tie the lower note wins. An empty
/// set leaves the input unchanged.
pub fn nearest_allowed(midi: i32, allowed: &[i32]) -> i32 {
    let mut best = midi;
    let mut best_distance = i32::MAX;
    for &candidate in allowed {
        let distance = (midi - candidate).abs();
        if distance < best_distance {
            best_distance = distance;
            best = candidate;
        }
    }
    best
}

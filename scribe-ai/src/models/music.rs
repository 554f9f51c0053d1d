//! Musical domain types shared by the pipeline stages

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Chromatic pitch class (sharp spelling)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PitchClass {
    C,
    CSharp,
    D,
    DSharp,
    E,
    F,
    FSharp,
    G,
    GSharp,
    A,
    ASharp,
    B,
}

impl PitchClass {
    /// All pitch classes in ascending chromatic order
    pub const ALL: [PitchClass; 12] = [
        PitchClass::C,
        PitchClass::CSharp,
        PitchClass::D,
        PitchClass::DSharp,
        PitchClass::E,
        PitchClass::F,
        PitchClass::FSharp,
        PitchClass::G,
        PitchClass::GSharp,
        PitchClass::A,
        PitchClass::ASharp,
        PitchClass::B,
    ];

    /// Semitones above C (0-11)
    pub fn index(self) -> usize {
        self as usize
    }

    /// Pitch class for a semitone offset (wraps modulo 12)
    pub fn from_index(index: usize) -> Self {
        Self::ALL[index % 12]
    }

    /// Note name with sharp spelling, e.g. "C#"
    pub fn name(self) -> &'static str {
        match self {
            PitchClass::C => "C",
            PitchClass::CSharp => "C#",
            PitchClass::D => "D",
            PitchClass::DSharp => "D#",
            PitchClass::E => "E",
            PitchClass::F => "F",
            PitchClass::FSharp => "F#",
            PitchClass::G => "G",
            PitchClass::GSharp => "G#",
            PitchClass::A => "A",
            PitchClass::ASharp => "A#",
            PitchClass::B => "B",
        }
    }

    /// Preferred key-signature spelling for this tonic, e.g. "Eb"
    pub fn key_name(self) -> &'static str {
        const KEY_NAMES: [&str; 12] = [
            "C", "Db", "D", "Eb", "E", "F", "F#", "G", "Ab", "A", "Bb", "B",
        ];
        KEY_NAMES[self.index()]
    }

    /// Parse a note name; accepts sharp and flat spellings
    pub fn parse(name: &str) -> Option<Self> {
        let pc = match name.trim() {
            "C" => PitchClass::C,
            "C#" | "Db" => PitchClass::CSharp,
            "D" => PitchClass::D,
            "D#" | "Eb" => PitchClass::DSharp,
            "E" => PitchClass::E,
            "F" => PitchClass::F,
            "F#" | "Gb" => PitchClass::FSharp,
            "G" => PitchClass::G,
            "G#" | "Ab" => PitchClass::GSharp,
            "A" => PitchClass::A,
            "A#" | "Bb" => PitchClass::ASharp,
            "B" => PitchClass::B,
            _ => return None,
        };
        Some(pc)
    }
}

impl fmt::Display for PitchClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Symbolic note duration on the 16th-note grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NoteDuration {
    Sixteenth,
    Eighth,
    DottedEighth,
    Quarter,
    DottedQuarter,
    Half,
    DottedHalf,
    Whole,
}

impl NoteDuration {
    /// Duration grid in ascending order
    pub const GRID: [NoteDuration; 8] = [
        NoteDuration::Sixteenth,
        NoteDuration::Eighth,
        NoteDuration::DottedEighth,
        NoteDuration::Quarter,
        NoteDuration::DottedQuarter,
        NoteDuration::Half,
        NoteDuration::DottedHalf,
        NoteDuration::Whole,
    ];

    /// Length in quarter-note beats
    pub fn beats(self) -> f64 {
        match self {
            NoteDuration::Sixteenth => 0.25,
            NoteDuration::Eighth => 0.5,
            NoteDuration::DottedEighth => 0.75,
            NoteDuration::Quarter => 1.0,
            NoteDuration::DottedQuarter => 1.5,
            NoteDuration::Half => 2.0,
            NoteDuration::DottedHalf => 3.0,
            NoteDuration::Whole => 4.0,
        }
    }

    /// Length in 16th-note grid cells
    pub fn cells(self) -> usize {
        (self.beats() / 0.25).round() as usize
    }

    /// VexFlow duration code ("16", "8", "8d", "q", "qd", "h", "hd", "w")
    pub fn code(self) -> &'static str {
        match self {
            NoteDuration::Sixteenth => "16",
            NoteDuration::Eighth => "8",
            NoteDuration::DottedEighth => "8d",
            NoteDuration::Quarter => "q",
            NoteDuration::DottedQuarter => "qd",
            NoteDuration::Half => "h",
            NoteDuration::DottedHalf => "hd",
            NoteDuration::Whole => "w",
        }
    }

    /// Parse a duration code, ignoring a trailing rest marker
    pub fn from_code(code: &str) -> Option<Self> {
        let code = code.strip_suffix('r').unwrap_or(code);
        Self::GRID.into_iter().find(|d| d.code() == code)
    }

    /// Single closest grid value to `beats`
    ///
    /// Candidates are scanned longest first, so an exact tie resolves to the
    /// longer value.
    pub fn nearest(beats: f64) -> Self {
        let mut best = NoteDuration::Quarter;
        let mut min_diff = f64::INFINITY;
        for candidate in Self::GRID.into_iter().rev() {
            let diff = (beats - candidate.beats()).abs();
            if diff < min_diff {
                min_diff = diff;
                best = candidate;
            }
        }
        best
    }
}

/// Detected pitch with timing information
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PitchEvent {
    /// Fundamental frequency in Hz (> 0)
    pub frequency: f64,
    /// Onset in seconds from the start of the recording
    pub start_time: f64,
    /// Length in seconds (> 0)
    pub duration: f64,
    /// Detection confidence (0.0-1.0)
    pub confidence: f64,
}

impl PitchEvent {
    pub fn new(frequency: f64, start_time: f64, duration: f64, confidence: f64) -> Self {
        Self {
            frequency,
            start_time,
            duration,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }

    /// End of the event in seconds
    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration
    }
}

/// Quantized note or rest
#[derive(Debug, Clone, PartialEq)]
pub struct MusicalNote {
    pub pitch: PitchClass,
    pub octave: i32,
    pub duration: NoteDuration,
    pub is_rest: bool,
    /// Start time in seconds
    pub start_time: f64,
    /// Detected frequency before quantization (None for rests)
    pub original_frequency: Option<f64>,
}

impl MusicalNote {
    pub fn pitched(
        pitch: PitchClass,
        octave: i32,
        duration: NoteDuration,
        start_time: f64,
        original_frequency: f64,
    ) -> Self {
        Self {
            pitch,
            octave,
            duration,
            is_rest: false,
            start_time,
            original_frequency: Some(original_frequency),
        }
    }

    /// Rests are placed on B4 so renderers center them on the staff
    pub fn rest(duration: NoteDuration, start_time: f64) -> Self {
        Self {
            pitch: PitchClass::B,
            octave: 4,
            duration,
            is_rest: true,
            start_time,
            original_frequency: None,
        }
    }

    /// Duration code with `r` suffix for rests ("q", "8r", ...)
    pub fn duration_code(&self) -> String {
        if self.is_rest {
            format!("{}r", self.duration.code())
        } else {
            self.duration.code().to_string()
        }
    }

    /// "C#4" for pitched notes, "rest" for rests
    pub fn quantized_note(&self) -> String {
        if self.is_rest {
            "rest".to_string()
        } else {
            format!("{}{}", self.pitch, self.octave)
        }
    }

    /// VexFlow key string ("C#/4"; rests render as "b/4")
    pub fn vexflow_key(&self) -> String {
        if self.is_rest {
            "b/4".to_string()
        } else {
            format!("{}/{}", self.pitch, self.octave)
        }
    }

    /// MIDI number of the quantized pitch
    pub fn midi(&self) -> i32 {
        (self.octave + 1) * 12 + self.pitch.index() as i32
    }

    pub fn beats(&self) -> f64 {
        self.duration.beats()
    }

    /// End time in seconds for a given beat length
    pub fn end_time(&self, beat_seconds: f64) -> f64 {
        self.start_time + self.beats() * beat_seconds
    }
}

/// Supported time signatures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TimeSignature {
    /// Common time (duple)
    #[default]
    FourFour,
    /// Waltz time (triple)
    ThreeFour,
    /// Compound duple
    SixEight,
}

impl TimeSignature {
    /// Display name, e.g. "6/8"
    pub fn name(self) -> &'static str {
        match self {
            TimeSignature::FourFour => "4/4",
            TimeSignature::ThreeFour => "3/4",
            TimeSignature::SixEight => "6/8",
        }
    }

    /// Measure capacity in quarter-note beats
    pub fn beats_per_measure(self) -> f64 {
        match self {
            TimeSignature::FourFour => 4.0,
            TimeSignature::ThreeFour => 3.0,
            TimeSignature::SixEight => 3.0,
        }
    }
}

impl fmt::Display for TimeSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TimeSignature {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "4/4" => Ok(TimeSignature::FourFour),
            "3/4" => Ok(TimeSignature::ThreeFour),
            "6/8" => Ok(TimeSignature::SixEight),
            other => Err(format!("Unsupported time signature: {}", other)),
        }
    }
}

/// Tonal mode of an estimated key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyMode {
    Major,
    Minor,
}

//! Data models for scribe-ai

pub mod music;
pub mod requests;
pub mod responses;

pub use music::{KeyMode, MusicalNote, NoteDuration, PitchClass, PitchEvent, TimeSignature};
pub use requests::{AudioSource, SourceType, TranscribeUrlRequest, TranscriptionRequest};
pub use responses::{
    JobPayload, MusicMetadata, NoteData, TranscribeResponse, TranscriptionJobResult,
    TranscriptionResult, VexFlowData, VexFlowMeasure, VexFlowNote,
};

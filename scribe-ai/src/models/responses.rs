//! Response payloads and notation output types

use crate::models::music::MusicalNote;
use scribe_common::events::JobStatus;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Returned when a job is accepted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscribeResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    /// Path of the SSE progress stream for this job
    pub sse_endpoint: String,
}

impl TranscribeResponse {
    pub fn queued(job_id: Uuid) -> Self {
        Self {
            job_id,
            status: JobStatus::Queued,
            sse_endpoint: format!("/api/transcribe/status/{}", job_id),
        }
    }
}

/// One note (or rest) of a finished transcription
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteData {
    /// Note name ("C", "D#", ...)
    pub pitch: String,
    pub octave: i32,
    /// Duration code ("q", "8", "hr", ...)
    pub duration: String,
    /// Start time in seconds
    pub start_time: f64,
    pub original_frequency: Option<f64>,
    /// Name with octave ("C#4") or "rest"
    pub quantized_note: Option<String>,
}

impl From<&MusicalNote> for NoteData {
    fn from(note: &MusicalNote) -> Self {
        Self {
            pitch: note.pitch.name().to_string(),
            octave: note.octave,
            duration: note.duration_code(),
            start_time: note.start_time,
            original_frequency: note.original_frequency,
            quantized_note: Some(note.quantized_note()),
        }
    }
}

/// Summary of the transcribed piece
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MusicMetadata {
    /// Tempo in BPM
    pub tempo: u32,
    pub time_signature: String,
    pub key_signature: String,
    /// Seconds from zero to the end of the latest-ending note
    pub total_duration: f64,
    /// Pitched notes only
    pub note_count: usize,
}

/// Renderable note record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VexFlowNote {
    pub keys: Vec<String>,
    pub duration: String,
}

/// A single measure in VexFlow format
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VexFlowMeasure {
    pub notes: Vec<VexFlowNote>,
    /// Only set when the meter changes at this measure
    pub time_signature: Option<String>,
}

/// Sheet music data in VexFlow format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VexFlowData {
    pub measures: Vec<VexFlowMeasure>,
    pub clef: String,
    pub key: String,
}

/// Notes plus metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionResult {
    pub notes: Vec<NoteData>,
    pub metadata: MusicMetadata,
}

/// Payload retained on a completed job and sent with the `complete` event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPayload {
    pub result: TranscriptionResult,
    pub vexflow_data: VexFlowData,
}

/// Body of `GET /api/transcribe/result/:job_id`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionJobResult {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub result: Option<TranscriptionResult>,
    pub vexflow_data: Option<VexFlowData>,
    pub error: Option<String>,
}

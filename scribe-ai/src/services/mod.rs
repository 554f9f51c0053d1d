//! Transcription pipeline services
//!
//! Pure stages (extraction, quantization, key/meter estimation, notation)
//! plus the job registry and the orchestrator that drives them.

pub mod duration_quantizer;
pub mod job_registry;
pub mod key_estimator;
pub mod notation_generator;
pub mod note_quantizer;
pub mod pitch_extractor;
pub mod time_signature;
pub mod transcription_orchestrator;

pub use duration_quantizer::{DurationAssignment, DurationQuantizer};
pub use job_registry::{JobRegistry, JobSnapshot, JobSubscription};
pub use key_estimator::{estimate_key, KeyEstimate};
pub use notation_generator::{Notation, NotationGenerator};
pub use note_quantizer::NoteQuantizer;
pub use pitch_extractor::{ExtractorSettings, PitchExtractor};
pub use time_signature::detect_time_signature;
pub use transcription_orchestrator::{
    JobArtifacts, PipelineBackends, PipelineSettings, TranscriptionOrchestrator,
};

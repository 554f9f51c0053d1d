//! Collaborator seams consumed by the transcription pipeline
//!
//! Each external concern (fetching audio, decoding, cleanup DSP, pitch
//! inference, onset analysis) sits behind a narrow trait so the pipeline can
//! be driven by the bundled reference adapters, by heavier model-backed
//! implementations, or by fakes in tests. Everything here is `Send + Sync`
//! and shared as `Arc<dyn ...>`.
//!
//! Only acquisition is async. The remaining traits are CPU-bound and the
//! orchestrator calls them from `spawn_blocking`.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

pub mod energy_flux_onsets;
pub mod factory;
pub mod http_acquisition;
pub mod mcleod_backend;
pub mod noise_gate;
pub mod symphonia_decoder;
pub mod ytdlp_acquisition;

pub use energy_flux_onsets::EnergyFluxOnsets;
pub use factory::BackendFactory;
pub use http_acquisition::HttpAcquisition;
pub use mcleod_backend::McLeodFrameBackend;
pub use noise_gate::NoiseGate;
pub use symphonia_decoder::SymphoniaDecoder;
pub use ytdlp_acquisition::YtDlpAcquisition;

/// Local audio file produced by acquisition
#[derive(Debug, Clone, PartialEq)]
pub struct AudioHandle {
    pub path: PathBuf,
}

impl AudioHandle {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

/// Mono PCM at a known rate
#[derive(Debug, Clone, Default)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl DecodedAudio {
    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Note boundary from a boundary-oriented (note-level) model
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoteBoundary {
    /// Seconds
    pub start: f64,
    /// Seconds
    pub end: f64,
    /// MIDI number, possibly fractional
    pub pitch: f64,
    /// Model activation (0.0-1.0)
    pub amplitude: f64,
}

/// Column-oriented frame-level pitch track
///
/// All four columns must have the same length.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PitchFrames {
    /// Hz; NaN or <= 0 where nothing was found
    pub frequencies: Vec<f64>,
    pub voiced: Vec<bool>,
    pub confidences: Vec<f64>,
    /// Frame centre times in seconds, ascending
    pub times: Vec<f64>,
}

impl PitchFrames {
    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// Whether every column has the same length
    pub fn is_consistent(&self) -> bool {
        let n = self.times.len();
        self.frequencies.len() == n && self.voiced.len() == n && self.confidences.len() == n
    }
}

/// Tempo and onset information for a recording
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OnsetAnalysis {
    /// Estimated tempo (unclamped)
    pub tempo_bpm: f64,
    /// Onset strength per analysis frame
    pub onset_envelope: Vec<f64>,
    /// Envelope frames per second
    pub frame_rate: f64,
    /// Detected onsets in seconds, ascending
    pub onset_times: Vec<f64>,
}

/// Fetches remote audio into a local file
#[async_trait]
pub trait Acquisition: Send + Sync {
    /// Short identifier for logs
    fn name(&self) -> &'static str;

    /// Download `source` for `job_id`; the returned file belongs to the job
    async fn acquire(&self, source: &str, job_id: Uuid) -> anyhow::Result<AudioHandle>;
}

/// Remove every `<job_id>.*` file in `dir`
///
/// Acquisition writes its output and any partial downloads (`.part`,
/// intermediate containers) under that prefix. Returns how many files were
/// removed; a missing directory counts as nothing to remove.
pub fn remove_job_files(dir: &Path, job_id: Uuid) -> usize {
    let prefix = format!("{}.", job_id);
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return 0,
    };

    let mut removed = 0;
    for entry in entries.filter_map(|e| e.ok()) {
        if !entry.file_name().to_string_lossy().starts_with(&prefix) {
            continue;
        }
        let path = entry.path();
        match std::fs::remove_file(&path) {
            Ok(()) => {
                debug!(job_id = %job_id, "Removed {}", path.display());
                removed += 1;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(job_id = %job_id, "Failed to remove {}: {}", path.display(), e),
        }
    }
    removed
}

/// Decodes any supported container to mono samples at `target_rate`
pub trait AudioDecoder: Send + Sync {
    fn decode(&self, path: &Path, target_rate: u32) -> anyhow::Result<DecodedAudio>;
}

/// Noise reduction
///
/// Must never fail: on any internal problem return the input unchanged.
pub trait Denoiser: Send + Sync {
    fn denoise(&self, samples: &[f32], sample_rate: u32) -> Vec<f32>;
}

/// Melody isolation from a full mix
///
/// Same fail-soft contract as [`Denoiser`].
pub trait SourceSeparator: Send + Sync {
    fn separate(&self, samples: &[f32], sample_rate: u32) -> Vec<f32>;
}

/// Note-level pitch model
pub trait BoundaryBackend: Send + Sync {
    fn predict_boundaries(&self, samples: &[f32], sample_rate: u32)
        -> anyhow::Result<Vec<NoteBoundary>>;
}

/// Frame-level pitch tracker
pub trait FrameBackend: Send + Sync {
    fn predict_frames(&self, samples: &[f32], sample_rate: u32) -> anyhow::Result<PitchFrames>;
}

/// Tempo, onset envelope and onset times
pub trait OnsetTempoEstimator: Send + Sync {
    fn estimate(&self, samples: &[f32], sample_rate: u32) -> anyhow::Result<OnsetAnalysis>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_column_consistency() {
        let mut frames = PitchFrames {
            frequencies: vec![440.0, 441.0],
            voiced: vec![true, true],
            confidences: vec![0.9, 0.8],
            times: vec![0.0, 0.01],
        };
        assert!(frames.is_consistent());
        assert_eq!(frames.len(), 2);

        frames.voiced.pop();
        assert!(!frames.is_consistent());
    }

    #[test]
    fn test_decoded_duration() {
        let audio = DecodedAudio {
            samples: vec![0.0; 22050],
            sample_rate: 44100,
        };
        assert!((audio.duration_seconds() - 0.5).abs() < 1e-9);
        assert_eq!(DecodedAudio::default().duration_seconds(), 0.0);
    }

    #[test]
    fn test_remove_job_files_matches_prefix_only() {
        let dir = tempfile::tempdir().unwrap();
        let job_id = Uuid::new_v4();
        let other = Uuid::new_v4();
        for name in [
            format!("{}.wav", job_id),
            format!("{}.webm.part", job_id),
            format!("{}.wav", other),
            format!("{}_upload.mp3", job_id),
        ] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }

        assert_eq!(remove_job_files(dir.path(), job_id), 2);
        let mut left: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        left.sort();
        let mut expected = vec![format!("{}.wav", other), format!("{}_upload.mp3", job_id)];
        expected.sort();
        assert_eq!(left, expected);

        assert_eq!(remove_job_files(&dir.path().join("absent"), job_id), 0);
    }
}

//! Fake collaborators and app wiring shared by the integration tests

#![allow(dead_code)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use scribe_ai::collaborators::{
    Acquisition, AudioDecoder, AudioHandle, DecodedAudio, FrameBackend, OnsetAnalysis,
    OnsetTempoEstimator, PitchFrames,
};
use scribe_ai::config::ServiceConfig;
use scribe_ai::services::job_registry::JobRegistry;
use scribe_ai::services::pitch_extractor::PitchExtractor;
use scribe_ai::services::transcription_orchestrator::{
    PipelineBackends, PipelineSettings, TranscriptionOrchestrator,
};
use scribe_ai::AppState;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use uuid::Uuid;

/// Writes a placeholder file into `dir` and hands it back
pub struct FakeAcquisition {
    pub dir: PathBuf,
}

#[async_trait]
impl Acquisition for FakeAcquisition {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn acquire(&self, _source: &str, job_id: Uuid) -> Result<AudioHandle> {
        let path = self.dir.join(format!("{}.wav", job_id));
        tokio::fs::write(&path, b"RIFF").await?;
        Ok(AudioHandle::new(path))
    }
}

/// Always fails like an unreachable host
pub struct FailingAcquisition;

#[async_trait]
impl Acquisition for FailingAcquisition {
    fn name(&self) -> &'static str {
        "failing"
    }

    async fn acquire(&self, _source: &str, _job_id: Uuid) -> Result<AudioHandle> {
        bail!("network unreachable")
    }
}

/// Never finishes within a test
pub struct StalledAcquisition;

#[async_trait]
impl Acquisition for StalledAcquisition {
    fn name(&self) -> &'static str {
        "stalled"
    }

    async fn acquire(&self, _source: &str, _job_id: Uuid) -> Result<AudioHandle> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        bail!("unreachable")
    }
}

/// Writes a partial download for the job, then never finishes
pub struct PartialDownloadAcquisition {
    pub dir: PathBuf,
}

impl PartialDownloadAcquisition {
    pub fn partial_path(&self, job_id: Uuid) -> PathBuf {
        self.dir.join(format!("{}.webm.part", job_id))
    }
}

#[async_trait]
impl Acquisition for PartialDownloadAcquisition {
    fn name(&self) -> &'static str {
        "partial"
    }

    async fn acquire(&self, _source: &str, job_id: Uuid) -> Result<AudioHandle> {
        tokio::fs::write(self.partial_path(job_id), vec![0u8; 1000]).await?;
        tokio::time::sleep(Duration::from_secs(3600)).await;
        bail!("unreachable")
    }
}

/// Holds the download until the test opens the gate
pub struct GatedAcquisition {
    pub dir: PathBuf,
    pub gate: Arc<Notify>,
}

#[async_trait]
impl Acquisition for GatedAcquisition {
    fn name(&self) -> &'static str {
        "gated"
    }

    async fn acquire(&self, _source: &str, job_id: Uuid) -> Result<AudioHandle> {
        self.gate.notified().await;
        let path = self.dir.join(format!("{}.wav", job_id));
        tokio::fs::write(&path, b"RIFF").await?;
        Ok(AudioHandle::new(path))
    }
}

/// Two seconds of silence at whatever rate is asked for
pub struct SilentDecoder;

impl AudioDecoder for SilentDecoder {
    fn decode(&self, _path: &Path, target_rate: u32) -> Result<DecodedAudio> {
        Ok(DecodedAudio {
            samples: vec![0.0; target_rate as usize * 2],
            sample_rate: target_rate,
        })
    }
}

/// One second of A4 followed by one second of C5, 10 ms frames
pub struct MelodyFrames;

impl FrameBackend for MelodyFrames {
    fn predict_frames(&self, _samples: &[f32], _sample_rate: u32) -> Result<PitchFrames> {
        let mut frames = PitchFrames::default();
        for i in 0..200 {
            frames.times.push(i as f64 * 0.01);
            frames.frequencies.push(if i < 100 { 440.0 } else { 523.25 });
            frames.voiced.push(true);
            frames.confidences.push(0.9);
        }
        Ok(frames)
    }
}

/// Nothing voiced anywhere
pub struct SilentFrames;

impl FrameBackend for SilentFrames {
    fn predict_frames(&self, _samples: &[f32], _sample_rate: u32) -> Result<PitchFrames> {
        Ok(PitchFrames {
            frequencies: vec![f64::NAN; 50],
            voiced: vec![false; 50],
            confidences: vec![0.0; 50],
            times: (0..50).map(|i| i as f64 * 0.01).collect(),
        })
    }
}

/// 120 BPM with onsets at each note start
pub struct FixedOnsets;

impl OnsetTempoEstimator for FixedOnsets {
    fn estimate(&self, _samples: &[f32], _sample_rate: u32) -> Result<OnsetAnalysis> {
        Ok(OnsetAnalysis {
            tempo_bpm: 120.0,
            onset_envelope: (0..1000).map(|i| if i % 50 == 0 { 1.0 } else { 0.0 }).collect(),
            frame_rate: 100.0,
            onset_times: vec![0.0, 1.0],
        })
    }
}

pub fn backends(acquisition: Arc<dyn Acquisition>, frames: Arc<dyn FrameBackend>) -> PipelineBackends {
    PipelineBackends {
        acquisition,
        decoder: Arc::new(SilentDecoder),
        denoiser: None,
        separator: None,
        onsets: Arc::new(FixedOnsets),
        extractor: PitchExtractor::frame_only(frames),
    }
}

pub fn melody_backends(dir: &Path) -> PipelineBackends {
    backends(
        Arc::new(FakeAcquisition {
            dir: dir.to_path_buf(),
        }),
        Arc::new(MelodyFrames),
    )
}

pub fn test_config(temp_dir: &Path) -> ServiceConfig {
    ServiceConfig {
        temp_dir: temp_dir.to_path_buf(),
        sample_rate: 8000,
        keepalive_secs: 1,
        ..ServiceConfig::default()
    }
}

pub fn orchestrator(backends: PipelineBackends, timeout: Duration) -> TranscriptionOrchestrator {
    orchestrator_in(&std::env::temp_dir(), backends, timeout)
}

/// Orchestrator whose jobs write (and clean up) under `temp_dir`
pub fn orchestrator_in(
    temp_dir: &Path,
    backends: PipelineBackends,
    timeout: Duration,
) -> TranscriptionOrchestrator {
    let settings = PipelineSettings {
        sample_rate: 8000,
        enable_preprocessing: false,
        enable_source_separation: false,
        job_timeout: timeout,
        temp_dir: temp_dir.to_path_buf(),
    };
    TranscriptionOrchestrator::new(JobRegistry::new(64), backends, settings)
}

pub fn app_state(config: ServiceConfig, backends: PipelineBackends) -> AppState {
    AppState::with_backends(config, backends)
}

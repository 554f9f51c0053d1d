//! Backend construction from configuration
//!
//! Built once in `main`; owns every collaborator and hands out `Arc` clones
//! to the pipeline.

use super::{
    Acquisition, AudioDecoder, BoundaryBackend, Denoiser, EnergyFluxOnsets, FrameBackend,
    HttpAcquisition, McLeodFrameBackend, NoiseGate, OnsetTempoEstimator, SourceSeparator,
    SymphoniaDecoder, YtDlpAcquisition,
};
use crate::config::{AcquisitionKind, ExtractorKind, ServiceConfig};
use crate::services::pitch_extractor::PitchExtractor;
use crate::services::transcription_orchestrator::PipelineBackends;
use anyhow::{bail, Result};
use std::sync::Arc;
use tracing::info;

/// Owns the configured collaborators
#[derive(Clone)]
pub struct BackendFactory {
    extractor_kind: ExtractorKind,
    acquisition: Arc<dyn Acquisition>,
    decoder: Arc<dyn AudioDecoder>,
    denoiser: Option<Arc<dyn Denoiser>>,
    separator: Option<Arc<dyn SourceSeparator>>,
    frame: Arc<dyn FrameBackend>,
    boundary: Option<Arc<dyn BoundaryBackend>>,
    onsets: Arc<dyn OnsetTempoEstimator>,
}

impl BackendFactory {
    /// Build the bundled adapters for `config`
    pub fn from_config(config: &ServiceConfig) -> Result<Self> {
        let acquisition: Arc<dyn Acquisition> = match config.acquisition {
            AcquisitionKind::YtDlp => Arc::new(YtDlpAcquisition::new(&config.temp_dir)),
            AcquisitionKind::Http => {
                Arc::new(HttpAcquisition::new(&config.temp_dir, config.max_file_size)?)
            }
        };

        info!(
            acquisition = acquisition.name(),
            extractor = %config.extractor,
            hop_length = config.hop_length,
            "Backends configured"
        );

        Ok(Self {
            extractor_kind: config.extractor,
            acquisition,
            decoder: Arc::new(SymphoniaDecoder::new()),
            denoiser: Some(Arc::new(NoiseGate::default())),
            separator: None,
            frame: Arc::new(McLeodFrameBackend::with_hop(config.hop_length)),
            boundary: None,
            onsets: Arc::new(EnergyFluxOnsets::default()),
        })
    }

    /// Supply a note-level model (enables `boundary` and `hybrid`)
    pub fn with_boundary_backend(mut self, boundary: Arc<dyn BoundaryBackend>) -> Self {
        self.boundary = Some(boundary);
        self
    }

    pub fn with_separator(mut self, separator: Arc<dyn SourceSeparator>) -> Self {
        self.separator = Some(separator);
        self
    }

    pub fn with_acquisition(mut self, acquisition: Arc<dyn Acquisition>) -> Self {
        self.acquisition = acquisition;
        self
    }

    /// The extractor variant selected by configuration
    ///
    /// # Errors
    /// When `boundary` or `hybrid` is selected without a note-level model.
    pub fn pitch_extractor(&self) -> Result<PitchExtractor> {
        match (self.extractor_kind, &self.boundary) {
            (ExtractorKind::Frame, _) => Ok(PitchExtractor::frame_only(self.frame.clone())),
            (ExtractorKind::Boundary, Some(boundary)) => {
                Ok(PitchExtractor::boundary_only(boundary.clone()))
            }
            (ExtractorKind::Hybrid, Some(boundary)) => {
                Ok(PitchExtractor::hybrid(boundary.clone(), self.frame.clone()))
            }
            (kind, None) => bail!(
                "The '{}' extractor needs a note-level pitch model and none is installed; use extractor = \"frame\"",
                kind
            ),
        }
    }

    /// Collaborators for the orchestrator
    pub fn pipeline_backends(&self) -> Result<PipelineBackends> {
        Ok(PipelineBackends {
            acquisition: self.acquisition.clone(),
            decoder: self.decoder.clone(),
            denoiser: self.denoiser.clone(),
            separator: self.separator.clone(),
            onsets: self.onsets.clone(),
            extractor: self.pitch_extractor()?,
        })
    }
}

//! Transcription job orchestration
//!
//! One `tokio::spawn`ed task per job drives the pipeline:
//! acquire → decode → (separate) → (denoise) → analyze → quantize → notate.
//! CPU-bound stages run on the blocking pool. The task races the pipeline
//! against its cancellation token and the per-job timeout; every exit path
//! ends in exactly one `complete_job` or `fail_job`, and the job's temporary
//! files are removed when its [`JobArtifacts`] guard drops.

use crate::collaborators::{
    remove_job_files, Acquisition, AudioDecoder, DecodedAudio, Denoiser, OnsetTempoEstimator,
    SourceSeparator,
};
use crate::config::ServiceConfig;
use crate::error::{PipelineResult, TranscriptionError};
use crate::models::requests::{AudioSource, TranscriptionRequest};
use crate::models::responses::{JobPayload, NoteData, TranscriptionResult};
use crate::services::job_registry::JobRegistry;
use crate::services::notation_generator::NotationGenerator;
use crate::services::note_quantizer::NoteQuantizer;
use crate::services::pitch_extractor::PitchExtractor;
use crate::services::time_signature::detect_time_signature;
use scribe_common::events::JobStatus;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Allowed tempo range (BPM)
pub const MIN_TEMPO_BPM: f64 = 40.0;
pub const MAX_TEMPO_BPM: f64 = 280.0;
/// Used when the estimator returns something unusable
const FALLBACK_TEMPO_BPM: f64 = 120.0;

/// Progress checkpoint: stage, percent, message
#[derive(Debug, Clone, Copy)]
pub struct Stage {
    pub status: JobStatus,
    pub percent: u8,
    pub message: &'static str,
}

pub const DOWNLOADING: Stage = Stage {
    status: JobStatus::Downloading,
    percent: 10,
    message: "Extracting audio from URL",
};
pub const SEPARATING: Stage = Stage {
    status: JobStatus::Separating,
    percent: 20,
    message: "Separating melody from accompaniment",
};
pub const PREPROCESSING: Stage = Stage {
    status: JobStatus::Preprocessing,
    percent: 25,
    message: "Reducing background noise",
};
pub const ANALYZING: Stage = Stage {
    status: JobStatus::Analyzing,
    percent: 30,
    message: "Detecting pitches from audio",
};
pub const QUANTIZING: Stage = Stage {
    status: JobStatus::Quantizing,
    percent: 60,
    message: "Extracting melody notes",
};
pub const GENERATING: Stage = Stage {
    status: JobStatus::Generating,
    percent: 80,
    message: "Generating sheet music notation",
};

/// Collaborators the pipeline runs on
#[derive(Clone)]
pub struct PipelineBackends {
    pub acquisition: Arc<dyn Acquisition>,
    pub decoder: Arc<dyn AudioDecoder>,
    pub denoiser: Option<Arc<dyn Denoiser>>,
    pub separator: Option<Arc<dyn SourceSeparator>>,
    pub onsets: Arc<dyn OnsetTempoEstimator>,
    pub extractor: PitchExtractor,
}

/// Pipeline knobs taken from the service configuration
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Rate audio is decoded to before analysis
    pub sample_rate: u32,
    pub enable_preprocessing: bool,
    /// Default when a request does not say
    pub enable_source_separation: bool,
    pub job_timeout: Duration,
    /// Where acquisition writes `<job_id>.*` files
    pub temp_dir: PathBuf,
}

impl PipelineSettings {
    pub fn from_config(config: &ServiceConfig) -> Self {
        Self {
            sample_rate: config.sample_rate,
            enable_preprocessing: config.enable_preprocessing,
            enable_source_separation: config.enable_source_separation,
            job_timeout: Duration::from_secs(config.job_timeout_secs),
            temp_dir: config.temp_dir.clone(),
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from_config(&ServiceConfig::default())
    }
}

/// Temporary files owned by one job; removed on drop
///
/// Besides explicitly tracked paths, a guard with a sweep directory also
/// removes every `<job_id>.*` file there. That covers partial downloads
/// from an acquisition that failed or was dropped mid-flight.
#[derive(Debug, Default)]
pub struct JobArtifacts {
    job_id: Uuid,
    paths: Vec<PathBuf>,
    sweep_dir: Option<PathBuf>,
}

impl JobArtifacts {
    pub fn new(job_id: Uuid) -> Self {
        Self {
            job_id,
            paths: Vec::new(),
            sweep_dir: None,
        }
    }

    /// Also remove `<job_id>.*` files in `dir` on drop
    pub fn sweeping(mut self, dir: impl Into<PathBuf>) -> Self {
        self.sweep_dir = Some(dir.into());
        self
    }

    /// Take ownership of a file
    pub fn track(&mut self, path: impl Into<PathBuf>) {
        self.paths.push(path.into());
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }
}

impl Drop for JobArtifacts {
    fn drop(&mut self) {
        for path in self.paths.drain(..) {
            match std::fs::remove_file(&path) {
                Ok(()) => debug!(job_id = %self.job_id, "Removed {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(
                    job_id = %self.job_id,
                    "Failed to remove {}: {}",
                    path.display(),
                    e
                ),
            }
        }
        if let Some(dir) = &self.sweep_dir {
            remove_job_files(dir, self.job_id);
        }
    }
}

struct JobHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

/// Cheap-to-clone pipeline runner shared with job tasks
#[derive(Clone)]
struct Pipeline {
    registry: JobRegistry,
    backends: PipelineBackends,
    settings: PipelineSettings,
}

/// Submits, tracks and cancels transcription jobs
#[derive(Clone)]
pub struct TranscriptionOrchestrator {
    pipeline: Pipeline,
    handles: Arc<Mutex<HashMap<Uuid, JobHandle>>>,
}

impl TranscriptionOrchestrator {
    pub fn new(registry: JobRegistry, backends: PipelineBackends, settings: PipelineSettings) -> Self {
        Self {
            pipeline: Pipeline {
                registry,
                backends,
                settings,
            },
            handles: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.pipeline.registry
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.pipeline.settings
    }

    /// Create a QUEUED job and start it in the background
    ///
    /// For file sources the file becomes the job's artifact and is deleted
    /// when the job ends.
    pub async fn submit(&self, request: TranscriptionRequest) -> Uuid {
        let job_id = self.pipeline.registry.create_job().await;
        let cancel = CancellationToken::new();

        let mut artifacts = JobArtifacts::new(job_id).sweeping(&self.pipeline.settings.temp_dir);
        if let AudioSource::File(path) = &request.source {
            artifacts.track(path.clone());
        }

        // Hold the table lock across spawn so the handle is visible before
        // the task can look for it
        let mut handles = self.handles.lock().await;
        let pipeline = self.pipeline.clone();
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            pipeline.run(job_id, request, artifacts, token).await;
        });
        handles.insert(
            job_id,
            JobHandle {
                cancel,
                task: Some(task),
            },
        );

        info!(job_id = %job_id, "Transcription job submitted");
        job_id
    }

    /// Request cancellation of a running job
    ///
    /// # Errors
    /// `NotFound` for unknown jobs, `InvalidInput` when the job already
    /// finished.
    pub async fn cancel(&self, job_id: Uuid) -> scribe_common::Result<()> {
        let snapshot = self.pipeline.registry.get_status(job_id).await?;
        if snapshot.is_terminal() {
            return Err(scribe_common::Error::InvalidInput(format!(
                "Job {} already {}",
                job_id, snapshot.status
            )));
        }

        if let Some(handle) = self.handles.lock().await.get(&job_id) {
            handle.cancel.cancel();
            info!(job_id = %job_id, "Cancellation requested");
        }
        Ok(())
    }

    /// Wait for a job's task to finish
    ///
    /// # Errors
    /// `NotFound` if the job has no task (unknown, cleaned up or already
    /// joined), `Internal` if the task panicked.
    pub async fn join(&self, job_id: Uuid) -> scribe_common::Result<()> {
        let task = self
            .handles
            .lock()
            .await
            .get_mut(&job_id)
            .and_then(|h| h.task.take())
            .ok_or_else(|| scribe_common::Error::NotFound(format!("No task for job {}", job_id)))?;

        task.await
            .map_err(|e| scribe_common::Error::Internal(format!("Job task failed: {}", e)))
    }

    /// Cancel if running, forget the task and remove the job
    ///
    /// Returns whether the job existed.
    pub async fn cleanup(&self, job_id: Uuid) -> bool {
        if let Some(handle) = self.handles.lock().await.remove(&job_id) {
            handle.cancel.cancel();
        }
        let removed = self.pipeline.registry.cleanup_job(job_id).await;
        if removed {
            info!(job_id = %job_id, "Job cleaned up");
        }
        removed
    }

    /// Cancel every job still running
    pub async fn shutdown(&self) {
        let handles = self.handles.lock().await;
        for (job_id, handle) in handles.iter() {
            if handle.task.as_ref().map_or(false, |t| !t.is_finished()) {
                debug!(job_id = %job_id, "Cancelling job for shutdown");
                handle.cancel.cancel();
            }
        }
    }
}

impl Pipeline {
    async fn run(
        self,
        job_id: Uuid,
        request: TranscriptionRequest,
        mut artifacts: JobArtifacts,
        cancel: CancellationToken,
    ) {
        let timeout = self.settings.job_timeout;

        let outcome = tokio::select! {
            _ = cancel.cancelled() => Err(TranscriptionError::Cancelled),
            result = tokio::time::timeout(timeout, self.execute(job_id, &request, &mut artifacts)) => {
                result.unwrap_or(Err(TranscriptionError::Timeout(timeout)))
            }
        };

        let recorded = match outcome {
            Ok(payload) => self.registry.complete_job(job_id, payload).await,
            Err(e) => self.registry.fail_job(job_id, e.failure_message()).await,
        };
        if let Err(e) = recorded {
            // the job was removed while running
            debug!(job_id = %job_id, "Final status not recorded: {}", e);
        }

        drop(artifacts);
    }

    async fn advance(&self, job_id: Uuid, stage: Stage) -> PipelineResult<()> {
        self.registry
            .update_progress(job_id, stage.status, stage.percent, stage.message)
            .await
            .map_err(|_| TranscriptionError::Cancelled)
    }

    async fn execute(
        &self,
        job_id: Uuid,
        request: &TranscriptionRequest,
        artifacts: &mut JobArtifacts,
    ) -> PipelineResult<JobPayload> {
        let backends = &self.backends;

        // Acquire
        let source_path = match &request.source {
            AudioSource::Url(url) => {
                self.advance(job_id, DOWNLOADING).await?;
                let handle = backends
                    .acquisition
                    .acquire(url, job_id)
                    .await
                    .map_err(|e| TranscriptionError::Acquisition(format!("{:#}", e)))?;
                artifacts.track(handle.path.clone());
                handle.path
            }
            AudioSource::File(path) => path.clone(),
        };

        // Decode
        let audio = decode(backends.decoder.clone(), &source_path, self.settings.sample_rate).await?;
        info!(
            job_id = %job_id,
            seconds = audio.duration_seconds(),
            sample_rate = audio.sample_rate,
            "Audio decoded"
        );
        let sample_rate = audio.sample_rate;
        let mut samples = audio.samples;

        // Optional cleanup
        if request.enable_source_separation {
            self.advance(job_id, SEPARATING).await?;
            match backends.separator.clone() {
                Some(separator) => {
                    samples = tokio::task::spawn_blocking(move || {
                        separator.separate(&samples, sample_rate)
                    })
                    .await?;
                }
                None => warn!(job_id = %job_id, "No source separator configured; using unmodified audio"),
            }
        }

        if self.settings.enable_preprocessing {
            if let Some(denoiser) = backends.denoiser.clone() {
                self.advance(job_id, PREPROCESSING).await?;
                samples = tokio::task::spawn_blocking(move || denoiser.denoise(&samples, sample_rate))
                    .await?;
            }
        }

        // Analyze
        self.advance(job_id, ANALYZING).await?;
        let onsets = backends.onsets.clone();
        let extractor = backends.extractor.clone();
        let (events, tempo, time_signature) = tokio::task::spawn_blocking(move || {
            let analysis = onsets
                .estimate(&samples, sample_rate)
                .map_err(|e| TranscriptionError::Detection(format!("Onset analysis failed: {:#}", e)))?;
            let tempo = clamp_tempo(analysis.tempo_bpm);
            let time_signature = detect_time_signature(&analysis, tempo);
            let events = extractor.extract(&samples, sample_rate, &analysis.onset_times)?;
            Ok::<_, TranscriptionError>((events, tempo, time_signature))
        })
        .await??;
        info!(
            job_id = %job_id,
            events = events.len(),
            tempo,
            %time_signature,
            "Pitch analysis finished"
        );

        // Quantize
        self.advance(job_id, QUANTIZING).await?;
        let quantizer =
            NoteQuantizer::new(request.allowed_notes.as_deref(), tempo, time_signature)?;
        let notes = quantizer.quantize(&events);

        // Notate
        self.advance(job_id, GENERATING).await?;
        let notation = NotationGenerator::new(time_signature).generate(&notes, tempo.round() as u32);
        debug!(
            job_id = %job_id,
            key = notation.key.name(),
            mode = ?notation.key.mode,
            correlation = notation.key.correlation,
            "Key estimated"
        );

        Ok(JobPayload {
            result: TranscriptionResult {
                notes: notes.iter().map(NoteData::from).collect(),
                metadata: notation.metadata,
            },
            vexflow_data: notation.vexflow,
        })
    }
}

async fn decode(
    decoder: Arc<dyn AudioDecoder>,
    path: &Path,
    sample_rate: u32,
) -> PipelineResult<DecodedAudio> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || decoder.decode(&path, sample_rate))
        .await?
        .map_err(|e| TranscriptionError::Decode(format!("{:#}", e)))
}

/// Clamp a tempo estimate into the supported range
pub fn clamp_tempo(tempo_bpm: f64) -> f64 {
    if tempo_bpm.is_finite() && tempo_bpm > 0.0 {
        tempo_bpm.clamp(MIN_TEMPO_BPM, MAX_TEMPO_BPM)
    } else {
        warn!("Unusable tempo estimate {}; using {} BPM", tempo_bpm, FALLBACK_TEMPO_BPM);
        FALLBACK_TEMPO_BPM
    }
}

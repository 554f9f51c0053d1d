//! In-memory job registry and progress fan-out
//!
//! Each job owns a [`JobEventBus`]. Status writes happen under the registry
//! lock; the bus sender is cloned out before sending so no lock is held
//! while events are delivered. Only the task running a job writes to its
//! entry; any number of observers read snapshots or subscribe.

use crate::models::responses::JobPayload;
use chrono::{DateTime, Utc};
use scribe_common::events::{JobEventBus, JobStatus, ProgressEvent, TranscriptionEvent};
use scribe_common::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const QUEUED_MESSAGE: &str = "Job queued";
pub const COMPLETED_MESSAGE: &str = "Transcription completed";

/// Point-in-time copy of a job record
#[derive(Debug, Clone)]
pub struct JobSnapshot {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub percent: u8,
    pub message: String,
    pub result: Option<JobPayload>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobSnapshot {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Terminal event rebuilt from the retained result or error
    fn terminal_event(&self) -> Option<TranscriptionEvent> {
        match self.status {
            JobStatus::Completed => {
                let payload = self
                    .result
                    .as_ref()
                    .and_then(|r| serde_json::to_value(r).ok())
                    .unwrap_or(serde_json::Value::Null);
                Some(TranscriptionEvent::Complete {
                    job_id: self.job_id,
                    payload,
                    timestamp: self.updated_at,
                })
            }
            JobStatus::Failed => Some(TranscriptionEvent::Error {
                job_id: self.job_id,
                error: self.error.clone().unwrap_or_default(),
                timestamp: self.updated_at,
            }),
            _ => None,
        }
    }
}

struct JobEntry {
    snapshot: JobSnapshot,
    bus: JobEventBus,
}

/// Observer handle for one job's events
///
/// Yields a replayed terminal event first when the job had already finished
/// at subscription time. Dropping the subscription detaches it.
pub struct JobSubscription {
    job_id: Uuid,
    replay: Option<TranscriptionEvent>,
    receiver: Option<broadcast::Receiver<TranscriptionEvent>>,
}

impl JobSubscription {
    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    /// Next event, or `None` once the job's bus is gone or a replay was
    /// delivered
    ///
    /// Falling behind the channel capacity skips the oldest events.
    pub async fn recv(&mut self) -> Option<TranscriptionEvent> {
        if let Some(event) = self.replay.take() {
            return Some(event);
        }
        let receiver = self.receiver.as_mut()?;
        loop {
            match receiver.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(job_id = %self.job_id, skipped, "Subscriber lagged; events dropped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

/// Shared job table
#[derive(Clone)]
pub struct JobRegistry {
    jobs: Arc<RwLock<HashMap<Uuid, JobEntry>>>,
    event_capacity: usize,
}

impl JobRegistry {
    /// Create an empty registry; each job's bus holds `event_capacity` events
    pub fn new(event_capacity: usize) -> Self {
        Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
            event_capacity,
        }
    }

    /// Register a new job in QUEUED state
    pub async fn create_job(&self) -> Uuid {
        let job_id = Uuid::new_v4();
        let now = Utc::now();
        let entry = JobEntry {
            snapshot: JobSnapshot {
                job_id,
                status: JobStatus::Queued,
                percent: 0,
                message: QUEUED_MESSAGE.to_string(),
                result: None,
                error: None,
                created_at: now,
                updated_at: now,
            },
            bus: JobEventBus::new(self.event_capacity),
        };
        self.jobs.write().await.insert(job_id, entry);
        debug!(job_id = %job_id, "Job created");
        job_id
    }

    /// Subscribe to a job's events from now on
    ///
    /// # Errors
    /// `NotFound` for unknown jobs.
    pub async fn subscribe(&self, job_id: Uuid) -> Result<JobSubscription> {
        let jobs = self.jobs.read().await;
        let entry = jobs
            .get(&job_id)
            .ok_or_else(|| Error::NotFound(format!("Job not found: {}", job_id)))?;

        let subscription = if let Some(event) = entry.snapshot.terminal_event() {
            JobSubscription {
                job_id,
                replay: Some(event),
                receiver: None,
            }
        } else {
            JobSubscription {
                job_id,
                replay: None,
                receiver: Some(entry.bus.subscribe()),
            }
        };
        debug!(
            job_id = %job_id,
            subscribers = entry.bus.subscriber_count(),
            "Observer subscribed"
        );
        Ok(subscription)
    }

    /// Detach an observer
    pub async fn unsubscribe(&self, subscription: JobSubscription) {
        let job_id = subscription.job_id;
        drop(subscription);
        if let Some(entry) = self.jobs.read().await.get(&job_id) {
            debug!(
                job_id = %job_id,
                subscribers = entry.bus.subscriber_count(),
                "Observer unsubscribed"
            );
        }
    }

    /// Record a stage transition and broadcast it
    ///
    /// Writes to terminal jobs and backward transitions are ignored with a
    /// warning; a lower percent is raised to the current one.
    ///
    /// # Errors
    /// `NotFound` for unknown jobs, `InvalidInput` for terminal stages (use
    /// [`complete_job`](Self::complete_job) or [`fail_job`](Self::fail_job)).
    pub async fn update_progress(
        &self,
        job_id: Uuid,
        stage: JobStatus,
        percent: u8,
        message: impl Into<String>,
    ) -> Result<()> {
        if stage.is_terminal() {
            return Err(Error::InvalidInput(format!(
                "{} is not a progress stage",
                stage
            )));
        }
        let message = message.into();

        let (bus, progress) = {
            let mut jobs = self.jobs.write().await;
            let entry = jobs
                .get_mut(&job_id)
                .ok_or_else(|| Error::NotFound(format!("Job not found: {}", job_id)))?;
            let snapshot = &mut entry.snapshot;

            if snapshot.status.is_terminal() {
                warn!(job_id = %job_id, %stage, "Ignoring progress for finished job");
                return Ok(());
            }
            if stage.rank() < snapshot.status.rank() {
                warn!(
                    job_id = %job_id,
                    from = %snapshot.status,
                    to = %stage,
                    "Ignoring backward stage transition"
                );
                return Ok(());
            }

            snapshot.status = stage;
            snapshot.percent = percent.min(100).max(snapshot.percent);
            snapshot.message = message;
            snapshot.updated_at = Utc::now();

            let progress = ProgressEvent {
                stage,
                percent: snapshot.percent,
                message: snapshot.message.clone(),
            };
            (entry.bus.clone(), progress)
        };

        info!(
            job_id = %job_id,
            stage = %progress.stage,
            percent = progress.percent,
            "{}",
            progress.message
        );
        let delivered = bus.emit_lossy(TranscriptionEvent::Progress {
            job_id,
            progress,
            timestamp: Utc::now(),
        });
        debug!(job_id = %job_id, delivered, "Progress broadcast");
        Ok(())
    }

    /// Mark a job COMPLETED, retain its payload and broadcast it once
    pub async fn complete_job(&self, job_id: Uuid, payload: JobPayload) -> Result<()> {
        let value = serde_json::to_value(&payload)
            .map_err(|e| Error::Internal(format!("Serialize job payload failed: {}", e)))?;

        let bus = {
            let mut jobs = self.jobs.write().await;
            let entry = jobs
                .get_mut(&job_id)
                .ok_or_else(|| Error::NotFound(format!("Job not found: {}", job_id)))?;
            let snapshot = &mut entry.snapshot;

            if snapshot.status.is_terminal() {
                warn!(job_id = %job_id, status = %snapshot.status, "Ignoring completion of finished job");
                return Ok(());
            }

            snapshot.status = JobStatus::Completed;
            snapshot.percent = 100;
            snapshot.message = COMPLETED_MESSAGE.to_string();
            snapshot.result = Some(payload);
            snapshot.updated_at = Utc::now();
            entry.bus.clone()
        };

        info!(job_id = %job_id, "{}", COMPLETED_MESSAGE);
        bus.emit_lossy(TranscriptionEvent::Complete {
            job_id,
            payload: value,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Mark a job FAILED, retain the error and broadcast it once
    ///
    /// Percent is left where the job stopped.
    pub async fn fail_job(&self, job_id: Uuid, error: impl Into<String>) -> Result<()> {
        let error = error.into();

        let bus = {
            let mut jobs = self.jobs.write().await;
            let entry = jobs
                .get_mut(&job_id)
                .ok_or_else(|| Error::NotFound(format!("Job not found: {}", job_id)))?;
            let snapshot = &mut entry.snapshot;

            if snapshot.status.is_terminal() {
                warn!(job_id = %job_id, status = %snapshot.status, "Ignoring failure of finished job");
                return Ok(());
            }

            snapshot.status = JobStatus::Failed;
            snapshot.message = format!("Failed: {}", error);
            snapshot.error = Some(error.clone());
            snapshot.updated_at = Utc::now();
            entry.bus.clone()
        };

        tracing::error!(job_id = %job_id, "Job failed: {}", error);
        bus.emit_lossy(TranscriptionEvent::Error {
            job_id,
            error,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Snapshot of a job
    ///
    /// # Errors
    /// `NotFound` for unknown jobs.
    pub async fn get_status(&self, job_id: Uuid) -> Result<JobSnapshot> {
        self.jobs
            .read()
            .await
            .get(&job_id)
            .map(|entry| entry.snapshot.clone())
            .ok_or_else(|| Error::NotFound(format!("Job not found: {}", job_id)))
    }

    /// Remove a job; open subscriptions see the stream end
    ///
    /// Returns whether the job existed.
    pub async fn cleanup_job(&self, job_id: Uuid) -> bool {
        let removed = self.jobs.write().await.remove(&job_id).is_some();
        if removed {
            debug!(job_id = %job_id, "Job removed from registry");
        }
        removed
    }

    /// Number of registered jobs
    pub async fn job_count(&self) -> usize {
        self.jobs.read().await.len()
    }

    /// Number of registered jobs not yet finished
    pub async fn active_count(&self) -> usize {
        self.jobs
            .read()
            .await
            .values()
            .filter(|entry| !entry.snapshot.status.is_terminal())
            .count()
    }
}

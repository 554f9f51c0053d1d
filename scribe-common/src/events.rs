//! Event types for the transcription event system
//!
//! Provides the job status state machine, the progress/terminal event enum
//! and `JobEventBus`, the per-job broadcast channel observers subscribe to.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Transcription job status
///
/// Jobs move strictly forward through these states:
/// QUEUED → DOWNLOADING|SEPARATING|PREPROCESSING → ANALYZING → QUANTIZING → GENERATING → COMPLETED|FAILED
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Accepted, waiting for its task to start
    Queued,
    /// Fetching audio from a remote source
    Downloading,
    /// Melody source separation
    Separating,
    /// Noise reduction
    Preprocessing,
    /// Tempo, meter and pitch detection
    Analyzing,
    /// Pitch snapping, duration quantization, rests and smoothing
    Quantizing,
    /// Key estimation and notation assembly
    Generating,
    /// Finished successfully, result retained
    Completed,
    /// Finished with an error, message retained
    Failed,
}

impl JobStatus {
    /// Position in the forward-only state order
    ///
    /// Terminal states share the highest rank.
    pub fn rank(&self) -> u8 {
        match self {
            JobStatus::Queued => 0,
            JobStatus::Downloading => 1,
            JobStatus::Separating => 2,
            JobStatus::Preprocessing => 3,
            JobStatus::Analyzing => 4,
            JobStatus::Quantizing => 5,
            JobStatus::Generating => 6,
            JobStatus::Completed | JobStatus::Failed => 7,
        }
    }

    /// Whether no further transitions are allowed
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Lowercase stage name used on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Downloading => "downloading",
            JobStatus::Separating => "separating",
            JobStatus::Preprocessing => "preprocessing",
            JobStatus::Analyzing => "analyzing",
            JobStatus::Quantizing => "quantizing",
            JobStatus::Generating => "generating",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress update delivered to observers (not persisted)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Current processing stage
    pub stage: JobStatus,
    /// Progress percentage (0-100)
    pub percent: u8,
    /// Human-readable progress message
    pub message: String,
}

/// Transcription job events
///
/// Every event stream for a job is a sequence of `Progress` events
/// terminated by exactly one `Complete` or `Error`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TranscriptionEvent {
    /// Stage transition or progress update
    Progress {
        /// Job the event belongs to
        job_id: Uuid,
        /// Stage, percent and message
        progress: ProgressEvent,
        /// When the update was emitted
        timestamp: DateTime<Utc>,
    },

    /// Job finished; carries the full result payload
    Complete {
        /// Job the event belongs to
        job_id: Uuid,
        /// Serialized job payload (notes, metadata, notation)
        payload: serde_json::Value,
        /// When the job completed
        timestamp: DateTime<Utc>,
    },

    /// Job failed; carries the error message
    Error {
        /// Job the event belongs to
        job_id: Uuid,
        /// Human-readable error
        error: String,
        /// When the job failed
        timestamp: DateTime<Utc>,
    },
}

impl TranscriptionEvent {
    /// SSE event name
    pub fn event_type(&self) -> &'static str {
        match self {
            TranscriptionEvent::Progress { .. } => "progress",
            TranscriptionEvent::Complete { .. } => "complete",
            TranscriptionEvent::Error { .. } => "error",
        }
    }

    /// Job id carried by any variant
    pub fn job_id(&self) -> Uuid {
        match self {
            TranscriptionEvent::Progress { job_id, .. }
            | TranscriptionEvent::Complete { job_id, .. }
            | TranscriptionEvent::Error { job_id, .. } => *job_id,
        }
    }

    /// Whether this event ends an observer session
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TranscriptionEvent::Progress { .. })
    }

    /// JSON body sent as SSE `data`
    ///
    /// Progress → `{stage, percent, message}`, complete → payload,
    /// error → `{"error": message}`.
    pub fn data_json(&self) -> serde_json::Result<String> {
        match self {
            TranscriptionEvent::Progress { progress, .. } => serde_json::to_string(progress),
            TranscriptionEvent::Complete { payload, .. } => serde_json::to_string(payload),
            TranscriptionEvent::Error { error, .. } => {
                serde_json::to_string(&serde_json::json!({ "error": error }))
            }
        }
    }
}

/// Per-job event bus
///
/// Thin wrapper over a `tokio::sync::broadcast` channel. Sending never
/// blocks; receivers that fall behind lose the oldest events instead of
/// stalling the job.
#[derive(Clone)]
pub struct JobEventBus {
    tx: broadcast::Sender<TranscriptionEvent>,
    capacity: usize,
}

impl JobEventBus {
    /// Creates a new bus with the given channel capacity
    ///
    /// # Examples
    ///
    /// ```
    /// use scribe_common::events::JobEventBus;
    ///
    /// let bus = JobEventBus::new(64);
    /// assert_eq!(bus.subscriber_count(), 0);
    /// ```
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            capacity: capacity.max(1),
        }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<TranscriptionEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring if no subscribers are listening
    ///
    /// Returns the number of receivers the event reached.
    pub fn emit_lossy(&self, event: TranscriptionEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress(job_id: Uuid, stage: JobStatus, percent: u8) -> TranscriptionEvent {
        TranscriptionEvent::Progress {
            job_id,
            progress: ProgressEvent {
                stage,
                percent,
                message: format!("{} step", stage),
            },
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_status_ranks_are_forward_ordered() {
        let order = [
            JobStatus::Queued,
            JobStatus::Downloading,
            JobStatus::Separating,
            JobStatus::Preprocessing,
            JobStatus::Analyzing,
            JobStatus::Quantizing,
            JobStatus::Generating,
            JobStatus::Completed,
        ];
        for pair in order.windows(2) {
            assert!(pair[0].rank() < pair[1].rank(), "{:?} !< {:?}", pair[0], pair[1]);
        }
        assert_eq!(JobStatus::Completed.rank(), JobStatus::Failed.rank());
    }

    #[test]
    fn test_terminal_states() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Generating.is_terminal());
        assert!(!JobStatus::Queued.is_terminal());
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&JobStatus::Preprocessing).unwrap();
        assert_eq!(json, "\"preprocessing\"");
    }

    #[test]
    fn test_event_type_names() {
        let id = Uuid::new_v4();
        assert_eq!(progress(id, JobStatus::Analyzing, 30).event_type(), "progress");

        let complete = TranscriptionEvent::Complete {
            job_id: id,
            payload: serde_json::json!({"result": {}}),
            timestamp: Utc::now(),
        };
        assert_eq!(complete.event_type(), "complete");
        assert!(complete.is_terminal());

        let error = TranscriptionEvent::Error {
            job_id: id,
            error: "boom".to_string(),
            timestamp: Utc::now(),
        };
        assert_eq!(error.event_type(), "error");
        assert_eq!(error.job_id(), id);
    }

    #[test]
    fn test_data_json_shapes() {
        let id = Uuid::new_v4();
        let data = progress(id, JobStatus::Quantizing, 60).data_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&data).unwrap();
        assert_eq!(value["stage"], "quantizing");
        assert_eq!(value["percent"], 60);

        let error = TranscriptionEvent::Error {
            job_id: id,
            error: "no pitches".to_string(),
            timestamp: Utc::now(),
        };
        let value: serde_json::Value = serde_json::from_str(&error.data_json().unwrap()).unwrap();
        assert_eq!(value["error"], "no pitches");
    }

    #[tokio::test]
    async fn test_bus_delivers_to_all_subscribers() {
        let bus = JobEventBus::new(8);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        let id = Uuid::new_v4();
        assert_eq!(bus.emit_lossy(progress(id, JobStatus::Analyzing, 30)), 2);

        assert_eq!(rx1.recv().await.unwrap().job_id(), id);
        assert_eq!(rx2.recv().await.unwrap().job_id(), id);
    }

    #[test]
    fn test_emit_without_subscribers_is_lossy() {
        let bus = JobEventBus::new(4);
        assert_eq!(bus.emit_lossy(progress(Uuid::new_v4(), JobStatus::Queued, 0)), 0);
        assert_eq!(bus.capacity(), 4);
    }
}

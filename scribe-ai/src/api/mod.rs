//! HTTP API handlers for scribe-ai
//!
//! REST endpoints for submitting and inspecting jobs, SSE for progress.

pub mod health;
pub mod sse;
pub mod transcription;

pub use health::health_routes;
pub use sse::{event_stream, job_event_stream};
pub use transcription::transcription_routes;

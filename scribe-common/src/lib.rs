//! # Scribe Common Library
//!
//! Shared code for the scribe transcription services including:
//! - Job status and event types (TranscriptionEvent enum)
//! - Per-job event bus for progress fan-out
//! - Configuration loading (TOML + environment)
//! - Server-Sent Events helpers

pub mod config;
pub mod error;
pub mod events;
pub mod sse;

pub use error::{Error, Result};

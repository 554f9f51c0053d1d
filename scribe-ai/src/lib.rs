//! scribe-ai library interface
//!
//! Audio-to-notation transcription: pipeline stages, job orchestration and
//! the HTTP API. Exposed as a library for integration testing and for
//! embedding with custom collaborators.

pub mod api;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod models;
pub mod music_theory;
pub mod services;

pub use crate::error::{ApiError, ApiResult, PipelineResult, TranscriptionError};

use crate::config::ServiceConfig;
use crate::services::job_registry::JobRegistry;
use crate::services::transcription_orchestrator::{
    PipelineBackends, PipelineSettings, TranscriptionOrchestrator,
};
use axum::http::HeaderValue;
use axum::Router;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: TranscriptionOrchestrator,
    pub config: Arc<ServiceConfig>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(config: ServiceConfig, orchestrator: TranscriptionOrchestrator) -> Self {
        Self {
            orchestrator,
            config: Arc::new(config),
            startup_time: Utc::now(),
        }
    }

    /// Wire a registry and orchestrator around `backends`
    pub fn with_backends(config: ServiceConfig, backends: PipelineBackends) -> Self {
        let registry = JobRegistry::new(config.event_capacity);
        let orchestrator =
            TranscriptionOrchestrator::new(registry, backends, PipelineSettings::from_config(&config));
        Self::new(config, orchestrator)
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let base = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.iter().any(|origin| origin == "*") {
        return base.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();

    base.allow_origin(allowed)
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    let cors = cors_layer(&state.config.cors_origins);

    Router::new()
        .merge(api::transcription_routes(state.config.max_file_size))
        .merge(api::health_routes())
        .route("/events", get(api::event_stream))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

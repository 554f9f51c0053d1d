//! scribe-ai - audio to sheet music transcription service
//!
//! Accepts a URL or an uploaded recording, transcribes the melody in the
//! background and serves progress over SSE and the result as VexFlow data.

use anyhow::{Context, Result};
use clap::Parser;
use scribe_ai::collaborators::BackendFactory;
use scribe_ai::config::{Cli, ServiceConfig};
use scribe_ai::AppState;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Config first so its log level can seed the filter; RUST_LOG still wins
    let config = ServiceConfig::resolve(&cli);
    let level = match &config {
        Ok(c) => c.logging.level.clone(),
        Err(_) => "info".to_string(),
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("scribe_ai={},tower_http={}", level, level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config.context("Failed to resolve configuration")?;

    info!("Starting scribe-ai (transcription) service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    tokio::fs::create_dir_all(&config.temp_dir)
        .await
        .with_context(|| format!("Failed to create temp dir {}", config.temp_dir.display()))?;
    info!("Temp dir: {}", config.temp_dir.display());

    let backends = BackendFactory::from_config(&config)
        .and_then(|factory| factory.pipeline_backends())
        .context("Failed to initialize backends")?;
    info!("Pitch extractor: {}", backends.extractor.kind());

    let addr = config.bind_address();
    let state = AppState::with_backends(config, backends);
    let orchestrator = state.orchestrator.clone();
    let app = scribe_ai::build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    orchestrator.shutdown().await;
    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}

//! Transcription endpoints
//!
//! Submission validates synchronously (URL present, upload size and type)
//! and returns as soon as the job is queued; the work runs in the
//! background and is observed via SSE or the result endpoint.

use crate::error::{ApiError, ApiResult};
use crate::models::requests::{SourceType, TranscribeUrlRequest, TranscriptionRequest};
use crate::models::responses::{TranscribeResponse, TranscriptionJobResult};
use crate::AppState;
use axum::{
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

/// Content types accepted by the upload endpoint
pub const ACCEPTED_CONTENT_TYPES: &[&str] = &[
    "audio/mpeg",
    "audio/wav",
    "audio/mp3",
    "audio/x-wav",
    "video/mp4",
    "video/quicktime",
];

/// Multipart framing allowance on top of `max_file_size`
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Reply to cancel requests
#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub job_id: Uuid,
    pub message: String,
}

/// POST /api/transcribe/url
pub async fn transcribe_url(
    State(state): State<AppState>,
    Json(request): Json<TranscribeUrlRequest>,
) -> ApiResult<Json<TranscribeResponse>> {
    let url = request.url.trim();
    if url.is_empty() {
        return Err(ApiError::BadRequest("url must not be empty".to_string()));
    }
    if request.source_type == SourceType::FileUpload {
        return Err(ApiError::BadRequest(
            "file_upload sources go through /api/transcribe/upload".to_string(),
        ));
    }

    let separation = request
        .enable_source_separation
        .unwrap_or(state.orchestrator.settings().enable_source_separation);
    let job = TranscriptionRequest::from_url(url)
        .with_allowed_notes(request.allowed_notes)
        .with_source_separation(separation);

    let job_id = state.orchestrator.submit(job).await;
    info!(job_id = %job_id, source_type = ?request.source_type, "URL transcription queued");
    Ok(Json(TranscribeResponse::queued(job_id)))
}

/// Upload received in a multipart body
struct UploadedFile {
    extension: String,
    bytes: Vec<u8>,
}

fn multipart_error(err: MultipartError) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(err.body_text())
    } else {
        ApiError::BadRequest(err.body_text())
    }
}

/// File extension for an upload: the filename's, else one implied by the type
fn upload_extension(file_name: Option<&str>, content_type: &str) -> String {
    let from_name = file_name
        .and_then(|name| std::path::Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|ext| ext.to_ascii_lowercase());
    from_name.unwrap_or_else(|| {
        match content_type {
            "audio/mpeg" | "audio/mp3" => "mp3",
            "audio/wav" | "audio/x-wav" => "wav",
            "video/mp4" => "mp4",
            _ => "mov",
        }
        .to_string()
    })
}

/// Parse the JSON-array form field; malformed values are ignored
fn parse_allowed_notes(raw: &str) -> Option<Vec<String>> {
    if raw.trim().is_empty() {
        return None;
    }
    match serde_json::from_str::<Vec<String>>(raw) {
        Ok(notes) => Some(notes),
        Err(e) => {
            warn!("Ignoring malformed allowed_notes field ({}): {}", e, raw);
            None
        }
    }
}

/// POST /api/transcribe/upload
///
/// Multipart fields: `file` (required), `allowed_notes` (JSON array string),
/// `enable_source_separation` ("true"/"false").
pub async fn transcribe_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<Json<TranscribeResponse>> {
    let max_size = state.config.max_file_size;
    let mut upload: Option<UploadedFile> = None;
    let mut allowed_notes: Option<Vec<String>> = None;
    let mut separation = state.orchestrator.settings().enable_source_separation;

    while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let content_type = field.content_type().unwrap_or_default().to_ascii_lowercase();
                if !ACCEPTED_CONTENT_TYPES.contains(&content_type.as_str()) {
                    return Err(ApiError::BadRequest(format!(
                        "Invalid file type '{}'. Allowed types: {}",
                        content_type,
                        ACCEPTED_CONTENT_TYPES.join(", ")
                    )));
                }
                let extension = upload_extension(field.file_name(), &content_type);

                let mut bytes = Vec::new();
                while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
                    if (bytes.len() + chunk.len()) as u64 > max_size {
                        return Err(ApiError::PayloadTooLarge(format!(
                            "File too large. Maximum size is {} bytes",
                            max_size
                        )));
                    }
                    bytes.extend_from_slice(&chunk);
                }
                upload = Some(UploadedFile { extension, bytes });
            }
            "allowed_notes" => {
                let raw = field.text().await.map_err(multipart_error)?;
                allowed_notes = parse_allowed_notes(&raw);
            }
            "enable_source_separation" => {
                let raw = field.text().await.map_err(multipart_error)?;
                separation = raw.trim().parse::<bool>().map_err(|_| {
                    ApiError::BadRequest(format!(
                        "enable_source_separation must be true or false, got '{}'",
                        raw
                    ))
                })?;
            }
            other => warn!("Ignoring unexpected multipart field '{}'", other),
        }
    }

    let upload = upload.ok_or_else(|| ApiError::BadRequest("No file provided".to_string()))?;

    tokio::fs::create_dir_all(&state.config.temp_dir).await?;
    let path = state
        .config
        .temp_dir
        .join(format!("{}_upload.{}", Uuid::new_v4(), upload.extension));
    tokio::fs::write(&path, &upload.bytes).await?;

    let job = TranscriptionRequest::from_file(&path)
        .with_allowed_notes(allowed_notes)
        .with_source_separation(separation);
    let job_id = state.orchestrator.submit(job).await;

    info!(job_id = %job_id, bytes = upload.bytes.len(), "Upload transcription queued");
    Ok(Json(TranscribeResponse::queued(job_id)))
}

/// GET /api/transcribe/result/:job_id
pub async fn get_result(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Json<TranscriptionJobResult>> {
    let snapshot = state.orchestrator.registry().get_status(job_id).await?;
    let (result, vexflow_data) = match snapshot.result {
        Some(payload) => (Some(payload.result), Some(payload.vexflow_data)),
        None => (None, None),
    };

    Ok(Json(TranscriptionJobResult {
        job_id,
        status: snapshot.status,
        result,
        vexflow_data,
        error: snapshot.error,
    }))
}

/// POST /api/transcribe/cancel/:job_id
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<CancelResponse>)> {
    state.orchestrator.cancel(job_id).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(CancelResponse {
            job_id,
            message: "Cancellation requested".to_string(),
        }),
    ))
}

/// DELETE /api/transcribe/jobs/:job_id
pub async fn delete_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    if state.orchestrator.cleanup(job_id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("Job {} not found", job_id)))
    }
}

/// Build transcription routes
///
/// `max_file_size` sizes the upload body limit.
pub fn transcription_routes(max_file_size: u64) -> Router<AppState> {
    let body_limit = usize::try_from(max_file_size)
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_OVERHEAD);

    Router::new()
        .route("/api/transcribe/url", post(transcribe_url))
        .route(
            "/api/transcribe/upload",
            post(transcribe_upload).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/api/transcribe/status/:job_id", get(super::job_event_stream))
        .route("/api/transcribe/result/:job_id", get(get_result))
        .route("/api/transcribe/cancel/:job_id", post(cancel_job))
        .route("/api/transcribe/jobs/:job_id", delete(delete_job))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_extension() {
        assert_eq!(upload_extension(Some("Song.WAV"), "audio/wav"), "wav");
        assert_eq!(upload_extension(Some("noext"), "audio/mpeg"), "mp3");
        assert_eq!(upload_extension(None, "video/quicktime"), "mov");
        assert_eq!(upload_extension(Some("evil.w/v"), "video/mp4"), "mp4");
    }

    #[test]
    fn test_parse_allowed_notes() {
        assert_eq!(
            parse_allowed_notes(r#"["C", "E", "G"]"#),
            Some(vec!["C".to_string(), "E".to_string(), "G".to_string()])
        );
        assert_eq!(parse_allowed_notes("not json"), None);
        assert_eq!(parse_allowed_notes("  "), None);
    }
}

//! HTTP API tests against the full router
//!
//! Requests go through `tower::ServiceExt::oneshot`; collaborators are fakes.

mod common;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use common::*;
use http_body_util::BodyExt;
use scribe_ai::AppState;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use uuid::Uuid;

const BOUNDARY: &str = "scribe-test-boundary";

fn setup(temp_dir: &Path) -> (AppState, Router) {
    let state = app_state(test_config(temp_dir), melody_backends(temp_dir));
    let router = scribe_ai::build_router(state.clone());
    (state, router)
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn json_post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// Multipart body with an optional file part and extra text fields
fn multipart_request(file: Option<(&str, &str, &[u8])>, fields: &[(&str, &str)]) -> Request<Body> {
    let mut body: Vec<u8> = Vec::new();
    if let Some((file_name, content_type, bytes)) = file {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
                BOUNDARY, file_name, content_type
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                BOUNDARY, name, value
            )
            .as_bytes(),
        );
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());

    Request::builder()
        .method("POST")
        .uri("/api/transcribe/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
async fn test_health() {
    let dir = tempfile::tempdir().unwrap();
    let (_, router) = setup(dir.path());

    let response = router
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["module"], "scribe-ai");
    assert_eq!(json["active_jobs"], 0);
    assert!(json["uptime_seconds"].is_u64());
}

#[tokio::test]
async fn test_url_submission_then_result() {
    let dir = tempfile::tempdir().unwrap();
    let (state, router) = setup(dir.path());

    let response = router
        .clone()
        .oneshot(json_post(
            "/api/transcribe/url",
            serde_json::json!({"url": "https://youtu.be/abc", "allowed_notes": ["A", "C"]}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "queued");
    let job_id: Uuid = json["job_id"].as_str().unwrap().parse().unwrap();
    assert_eq!(json["sse_endpoint"], format!("/api/transcribe/status/{}", job_id));

    state.orchestrator.join(job_id).await.unwrap();

    let response = router
        .oneshot(
            Request::get(format!("/api/transcribe/result/{}", job_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "completed");
    assert!(json["error"].is_null());
    assert!(!json["result"]["notes"].as_array().unwrap().is_empty());
    assert_eq!(json["result"]["metadata"]["tempo"], 120);
    assert!(json["vexflow_data"]["measures"].is_array());
    assert_eq!(json["vexflow_data"]["clef"], "treble");
}

#[tokio::test]
async fn test_empty_url_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let (_, router) = setup(dir.path());

    let response = router
        .oneshot(json_post("/api/transcribe/url", serde_json::json!({"url": "  "})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error"]["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_unknown_and_malformed_job_ids() {
    let dir = tempfile::tempdir().unwrap();
    let (_, router) = setup(dir.path());
    let unknown = Uuid::new_v4();

    for (method, uri) in [
        ("GET", format!("/api/transcribe/result/{}", unknown)),
        ("GET", format!("/api/transcribe/status/{}", unknown)),
        ("POST", format!("/api/transcribe/cancel/{}", unknown)),
        ("DELETE", format!("/api/transcribe/jobs/{}", unknown)),
    ] {
        let response = router
            .clone()
            .oneshot(Request::builder().method(method).uri(&uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{} {}", method, uri);
    }

    let response = router
        .oneshot(
            Request::get("/api/transcribe/result/not-a-uuid")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_upload_accepted_and_file_cleaned_up() {
    let dir = tempfile::tempdir().unwrap();
    let (state, router) = setup(dir.path());

    let response = router
        .oneshot(multipart_request(
            Some(("take1.wav", "audio/wav", &b"RIFF....WAVE"[..])),
            &[("allowed_notes", r#"["A","C"]"#), ("enable_source_separation", "false")],
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    let job_id: Uuid = json["job_id"].as_str().unwrap().parse().unwrap();

    state.orchestrator.join(job_id).await.unwrap();
    let snapshot = state.orchestrator.registry().get_status(job_id).await.unwrap();
    assert!(snapshot.is_terminal());

    // the saved upload is owned by the job
    let leftovers: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().contains("_upload"))
        .collect();
    assert!(leftovers.is_empty());
}

#[tokio::test]
async fn test_upload_rejects_wrong_type() {
    let dir = tempfile::tempdir().unwrap();
    let (state, router) = setup(dir.path());

    let response = router
        .oneshot(multipart_request(Some(("notes.txt", "text/plain", &b"hello"[..])), &[]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(state.orchestrator.registry().job_count().await, 0);
}

#[tokio::test]
async fn test_upload_rejects_oversized_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = scribe_ai::config::ServiceConfig {
        max_file_size: 16,
        ..test_config(dir.path())
    };
    let state = app_state(config, melody_backends(dir.path()));
    let router = scribe_ai::build_router(state.clone());

    let response = router
        .oneshot(multipart_request(Some(("big.wav", "audio/wav", &[0u8; 64][..])), &[]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    let json = body_json(response).await;
    assert_eq!(json["error"]["code"], "PAYLOAD_TOO_LARGE");
    assert_eq!(state.orchestrator.registry().job_count().await, 0);
}

#[tokio::test]
async fn test_upload_without_file() {
    let dir = tempfile::tempdir().unwrap();
    let (_, router) = setup(dir.path());

    let response = router
        .oneshot(multipart_request(None, &[("allowed_notes", r#"["C"]"#)]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_status_stream_replays_terminal_event() {
    let dir = tempfile::tempdir().unwrap();
    let (state, router) = setup(dir.path());

    let job_id = state
        .orchestrator
        .submit(scribe_ai::models::requests::TranscriptionRequest::from_url("https://example.com/x"))
        .await;
    state.orchestrator.join(job_id).await.unwrap();

    let response = router
        .oneshot(
            Request::get(format!("/api/transcribe/status/{}", job_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()[header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    // the stream ends after the terminal event
    let text = tokio::time::timeout(Duration::from_secs(10), body_text(response))
        .await
        .unwrap();
    assert!(text.contains("event: complete"));
    assert!(!text.contains("event: progress"));
}

#[tokio::test]
async fn test_cancel_then_cancel_again() {
    let dir = tempfile::tempdir().unwrap();
    let state = app_state(
        test_config(dir.path()),
        backends(Arc::new(StalledAcquisition), Arc::new(MelodyFrames)),
    );
    let router = scribe_ai::build_router(state.clone());

    let job_id = state
        .orchestrator
        .submit(scribe_ai::models::requests::TranscriptionRequest::from_url("https://example.com/x"))
        .await;

    let cancel = |router: Router| async move {
        router
            .oneshot(
                Request::post(format!("/api/transcribe/cancel/{}", job_id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap()
    };

    assert_eq!(cancel(router.clone()).await.status(), StatusCode::ACCEPTED);
    state.orchestrator.join(job_id).await.unwrap();
    assert_eq!(cancel(router.clone()).await.status(), StatusCode::BAD_REQUEST);

    let response = router
        .oneshot(
            Request::delete(format!("/api/transcribe/jobs/{}", job_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

/// Split an SSE body into (event name, data) blocks; comments come back as ("", text)
fn sse_blocks(text: &str) -> Vec<(String, String)> {
    text.split("\n\n")
        .filter(|block| !block.trim().is_empty())
        .map(|block| {
            let mut name = String::new();
            let mut data = String::new();
            for line in block.lines() {
                if let Some(comment) = line.strip_prefix(':') {
                    data = comment.trim().to_string();
                } else if let Some(value) = line.strip_prefix("event:") {
                    name = value.trim().to_string();
                } else if let Some(value) = line.strip_prefix("data:") {
                    data = value.trim().to_string();
                }
            }
            (name, data)
        })
        .collect()
}

#[tokio::test]
async fn test_live_status_stream_keepalive_then_progress_then_complete() {
    let dir = tempfile::tempdir().unwrap();
    let gate = Arc::new(tokio::sync::Notify::new());
    let acquisition = Arc::new(GatedAcquisition {
        dir: dir.path().to_path_buf(),
        gate: gate.clone(),
    });
    let state = app_state(test_config(dir.path()), backends(acquisition, Arc::new(MelodyFrames)));
    let router = scribe_ai::build_router(state.clone());

    let job_id = state
        .orchestrator
        .submit(scribe_ai::models::requests::TranscriptionRequest::from_url("https://example.com/x"))
        .await;

    let response = router
        .oneshot(
            Request::get(format!("/api/transcribe/status/{}", job_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let mut body = response.into_body();

    let text = tokio::time::timeout(Duration::from_secs(10), async {
        let mut text = String::new();
        let mut released = false;
        while let Some(frame) = body.frame().await {
            if let Ok(data) = frame.unwrap().into_data() {
                text.push_str(std::str::from_utf8(&data).unwrap());
            }
            // the job is parked in download; only a keepalive can arrive until the gate opens
            if !released && text.contains(": keepalive") {
                released = true;
                gate.notify_one();
            }
        }
        text
    })
    .await
    .expect("stream should end after the terminal event");

    let blocks = sse_blocks(&text);
    let keepalive = blocks.iter().position(|(name, data)| name.is_empty() && data == "keepalive");
    let complete: Vec<usize> = blocks
        .iter()
        .enumerate()
        .filter(|(_, (name, _))| name == "complete")
        .map(|(i, _)| i)
        .collect();
    assert_eq!(complete.len(), 1, "{}", text);
    assert!(!blocks.iter().any(|(name, _)| name == "error"));
    assert!(keepalive.unwrap() < complete[0]);

    // complete is the last event and progress never goes backwards
    let mut last_percent = 0;
    let mut progress_count = 0;
    for (i, (name, data)) in blocks.iter().enumerate() {
        if name == "progress" {
            assert!(i < complete[0]);
            let json: Value = serde_json::from_str(data).unwrap();
            let percent = json["percent"].as_u64().unwrap();
            assert!(percent >= last_percent, "{} after {}", percent, last_percent);
            assert!(json["stage"].is_string());
            last_percent = percent;
            progress_count += 1;
        }
    }
    assert!(progress_count >= 3, "{}", text);
    assert!(blocks.iter().skip(complete[0] + 1).all(|(name, _)| name.is_empty()));

    let payload: Value = serde_json::from_str(&blocks[complete[0]].1).unwrap();
    assert!(payload["result"]["notes"].is_array());
    assert!(payload["vexflow_data"]["measures"].is_array());
}

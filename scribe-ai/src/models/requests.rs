//! Request payloads and the internal job request

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Supported audio source platforms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    #[default]
    Youtube,
    YoutubeMusic,
    FileUpload,
}

/// Body of `POST /api/transcribe/url`
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TranscribeUrlRequest {
    /// Page or media URL to fetch audio from
    pub url: String,
    #[serde(default)]
    pub source_type: SourceType,
    /// Restrict output to these note names; `None` allows all 12
    #[serde(default)]
    pub allowed_notes: Option<Vec<String>>,
    /// Overrides the service default when present
    #[serde(default)]
    pub enable_source_separation: Option<bool>,
}

/// Where a job's audio comes from
#[derive(Debug, Clone, PartialEq)]
pub enum AudioSource {
    /// Remote URL; fetched by the acquisition collaborator
    Url(String),
    /// File already on disk (an upload saved to the temp dir)
    File(PathBuf),
}

impl AudioSource {
    pub fn is_remote(&self) -> bool {
        matches!(self, AudioSource::Url(_))
    }
}

/// Fully-resolved work order handed to the orchestrator
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptionRequest {
    pub source: AudioSource,
    pub allowed_notes: Option<Vec<String>>,
    pub enable_source_separation: bool,
}

impl TranscriptionRequest {
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            source: AudioSource::Url(url.into()),
            allowed_notes: None,
            enable_source_separation: false,
        }
    }

    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        Self {
            source: AudioSource::File(path.into()),
            allowed_notes: None,
            enable_source_separation: false,
        }
    }

    pub fn with_allowed_notes(mut self, notes: Option<Vec<String>>) -> Self {
        self.allowed_notes = notes;
        self
    }

    pub fn with_source_separation(mut self, enabled: bool) -> Self {
        self.enable_source_separation = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_request_defaults() {
        let req: TranscribeUrlRequest =
            serde_json::from_str(r#"{"url": "https://example.com/v"}"#).unwrap();
        assert_eq!(req.source_type, SourceType::Youtube);
        assert!(req.allowed_notes.is_none());
        assert!(req.enable_source_separation.is_none());
    }

    #[test]
    fn test_url_request_full() {
        let req: TranscribeUrlRequest = serde_json::from_str(
            r#"{"url": "u", "source_type": "youtube_music", "allowed_notes": ["C", "G"], "enable_source_separation": true}"#,
        )
        .unwrap();
        assert_eq!(req.source_type, SourceType::YoutubeMusic);
        assert_eq!(req.allowed_notes.unwrap(), vec!["C", "G"]);
        assert_eq!(req.enable_source_separation, Some(true));
    }
}

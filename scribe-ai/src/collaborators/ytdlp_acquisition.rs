//! Remote audio acquisition through the `yt-dlp` binary
//!
//! Downloads the best audio stream and has yt-dlp (via ffmpeg) convert it
//! to WAV at `<temp_dir>/<job_id>.wav`. The child is killed if the acquire
//! future is dropped (job cancelled or timed out), and a failed run leaves
//! no `<job_id>.*` files behind.

use super::{remove_job_files, Acquisition, AudioHandle};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};
use uuid::Uuid;

/// Default binary name looked up in PATH
pub const YTDLP_BINARY: &str = "yt-dlp";

/// `yt-dlp` subprocess acquisition
#[derive(Debug, Clone)]
pub struct YtDlpAcquisition {
    binary: String,
    output_dir: PathBuf,
}

impl YtDlpAcquisition {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            binary: YTDLP_BINARY.to_string(),
            output_dir: output_dir.into(),
        }
    }

    /// Use a specific executable instead of the one in PATH
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Where the converted WAV for `job_id` ends up
    pub fn output_path(&self, job_id: Uuid) -> PathBuf {
        self.output_dir.join(format!("{}.wav", job_id))
    }

    /// Arguments passed to yt-dlp
    ///
    /// The URL follows `--` so it can never be read as an option.
    pub fn command_args(&self, url: &str, job_id: Uuid) -> Vec<OsString> {
        let template = self.output_dir.join(format!("{}.%(ext)s", job_id));
        let mut args: Vec<OsString> = [
            "--format",
            "bestaudio/best",
            "--extract-audio",
            "--audio-format",
            "wav",
            "--no-playlist",
            "--quiet",
            "--no-warnings",
            "--output",
        ]
        .iter()
        .map(OsString::from)
        .collect();
        args.push(template.into_os_string());
        args.push(OsString::from("--"));
        args.push(OsString::from(url));
        args
    }

    async fn run(&self, source: &str, job_id: Uuid) -> Result<()> {
        let output = Command::new(&self.binary)
            .args(self.command_args(source, job_id))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await;

        let output = match output {
            Ok(output) => output,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                bail!("{} binary not found in PATH", self.binary)
            }
            Err(e) => return Err(e).with_context(|| format!("Failed to execute {}", self.binary)),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("yt-dlp exited with {}: {}", output.status, stderr.trim());
        }
        Ok(())
    }
}

#[async_trait]
impl Acquisition for YtDlpAcquisition {
    fn name(&self) -> &'static str {
        "yt-dlp"
    }

    async fn acquire(&self, source: &str, job_id: Uuid) -> Result<AudioHandle> {
        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .with_context(|| format!("Failed to create {}", self.output_dir.display()))?;

        let output_path = self.output_path(job_id);
        debug!(job_id = %job_id, url = source, "Running yt-dlp");

        if let Err(e) = self.run(source, job_id).await {
            remove_job_files(&self.output_dir, job_id);
            return Err(e);
        }
        if !output_path.exists() {
            remove_job_files(&self.output_dir, job_id);
            bail!("Audio file not created: {}", output_path.display());
        }

        info!(job_id = %job_id, "Audio extracted to {}", output_path.display());
        Ok(AudioHandle::new(output_path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_args() {
        let job_id = Uuid::new_v4();
        let acquisition = YtDlpAcquisition::new("/tmp/scribe");
        let args = acquisition.command_args("https://youtu.be/x", job_id);

        let rendered: Vec<String> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();
        assert!(rendered.contains(&"bestaudio/best".to_string()));
        assert!(rendered.contains(&format!("/tmp/scribe/{}.%(ext)s", job_id)));
        assert_eq!(rendered[rendered.len() - 2], "--");
        assert_eq!(rendered[rendered.len() - 1], "https://youtu.be/x");
        assert_eq!(acquisition.output_path(job_id), PathBuf::from(format!("/tmp/scribe/{}.wav", job_id)));
    }

    #[tokio::test]
    async fn test_missing_binary_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let acquisition =
            YtDlpAcquisition::new(dir.path()).with_binary("scribe-test-no-such-binary");
        let err = acquisition
            .acquire("https://example.com/v", Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    /// Executable shell script standing in for yt-dlp
    #[cfg(unix)]
    fn fake_binary(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("fake-yt-dlp.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_run_removes_job_files() {
        let bin_dir = tempfile::tempdir().unwrap();
        let out_dir = tempfile::tempdir().unwrap();
        let job_id = Uuid::new_v4();
        let partial = out_dir.path().join(format!("{}.webm.part", job_id));
        let binary = fake_binary(
            bin_dir.path(),
            &format!("touch '{}'\necho 'HTTP Error 403' >&2\nexit 1", partial.display()),
        );

        let acquisition = YtDlpAcquisition::new(out_dir.path()).with_binary(binary.to_string_lossy());
        let err = acquisition.acquire("https://example.com/v", job_id).await.unwrap_err();

        assert!(err.to_string().contains("HTTP Error 403"));
        assert!(!partial.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_dropped_acquire_kills_child() {
        let bin_dir = tempfile::tempdir().unwrap();
        let out_dir = tempfile::tempdir().unwrap();
        let job_id = Uuid::new_v4();
        let late = out_dir.path().join(format!("{}.wav", job_id));
        let binary = fake_binary(bin_dir.path(), &format!("sleep 1\ntouch '{}'", late.display()));

        let acquisition = YtDlpAcquisition::new(out_dir.path()).with_binary(binary.to_string_lossy());
        let attempt = tokio::time::timeout(
            std::time::Duration::from_millis(200),
            acquisition.acquire("https://example.com/v", job_id),
        )
        .await;
        assert!(attempt.is_err());

        tokio::time::sleep(std::time::Duration::from_millis(1500)).await;
        assert!(!late.exists());
    }
}

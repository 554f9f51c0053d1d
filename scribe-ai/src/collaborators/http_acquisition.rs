//! Direct HTTP download of an audio file

use super::{Acquisition, AudioHandle};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

const USER_AGENT: &str = concat!("scribe-ai/", env!("CARGO_PKG_VERSION"));

/// Extensions kept as-is from the URL path
const KNOWN_EXTENSIONS: &[&str] = &["wav", "mp3", "m4a", "aac", "ogg", "flac", "mp4", "mov", "webm"];

/// Downloads `http(s)` URLs into the temp dir
#[derive(Debug, Clone)]
pub struct HttpAcquisition {
    client: reqwest::Client,
    output_dir: PathBuf,
    max_bytes: u64,
}

impl HttpAcquisition {
    pub fn new(output_dir: impl Into<PathBuf>, max_bytes: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(300))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            output_dir: output_dir.into(),
            max_bytes,
        })
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Stream the response body into `path`, enforcing the size cap
    async fn write_body(&self, response: &mut reqwest::Response, path: &Path) -> Result<u64> {
        let mut file = tokio::fs::File::create(path)
            .await
            .with_context(|| format!("Failed to create {}", path.display()))?;

        let mut written: u64 = 0;
        while let Some(chunk) = response.chunk().await.context("Download interrupted")? {
            written += chunk.len() as u64;
            if written > self.max_bytes {
                bail!("Download exceeded {} bytes", self.max_bytes);
            }
            file.write_all(&chunk).await.context("Failed to write audio")?;
        }
        file.flush().await.context("Failed to write audio")?;
        Ok(written)
    }
}

/// File extension for a download, from the URL path or the content type
pub fn extension_for(url: &reqwest::Url, content_type: Option<&str>) -> &'static str {
    let from_path = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase());
    if let Some(ext) = from_path {
        if let Some(known) = KNOWN_EXTENSIONS.iter().find(|k| **k == ext) {
            return known;
        }
    }

    let mime = content_type
        .and_then(|c| c.split(';').next())
        .map(|c| c.trim().to_ascii_lowercase());
    match mime.as_deref() {
        Some("audio/wav") | Some("audio/x-wav") | Some("audio/wave") => "wav",
        Some("audio/mpeg") | Some("audio/mp3") => "mp3",
        Some("audio/ogg") => "ogg",
        Some("audio/flac") => "flac",
        Some("audio/mp4") | Some("video/mp4") => "mp4",
        Some("video/quicktime") => "mov",
        _ => "audio",
    }
}

#[async_trait]
impl Acquisition for HttpAcquisition {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn acquire(&self, source: &str, job_id: Uuid) -> Result<AudioHandle> {
        let url = reqwest::Url::parse(source).with_context(|| format!("Invalid URL: {}", source))?;
        if !matches!(url.scheme(), "http" | "https") {
            bail!("Unsupported URL scheme: {}", url.scheme());
        }

        debug!(job_id = %job_id, %url, "Downloading audio");
        let mut response = self
            .client
            .get(url.clone())
            .send()
            .await
            .context("Request failed")?
            .error_for_status()
            .context("Server returned an error")?;

        if let Some(length) = response.content_length() {
            if length > self.max_bytes {
                bail!("Remote file is {} bytes; limit is {}", length, self.max_bytes);
            }
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let extension = extension_for(&url, content_type.as_deref());

        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .with_context(|| format!("Failed to create {}", self.output_dir.display()))?;
        let path = self.output_dir.join(format!("{}.{}", job_id, extension));
        let written = match self.write_body(&mut response, &path).await {
            Ok(written) => written,
            Err(e) => {
                // never leave a partial file behind
                if let Err(remove_err) = tokio::fs::remove_file(&path).await {
                    if remove_err.kind() != std::io::ErrorKind::NotFound {
                        warn!(job_id = %job_id, "Failed to remove {}: {}", path.display(), remove_err);
                    }
                }
                return Err(e);
            }
        };

        info!(job_id = %job_id, bytes = written, "Audio downloaded to {}", path.display());
        Ok(AudioHandle::new(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::header, routing::get, Router};

    fn url(s: &str) -> reqwest::Url {
        reqwest::Url::parse(s).unwrap()
    }

    #[test]
    fn test_extension_inference() {
        assert_eq!(extension_for(&url("https://x.test/a/song.MP3"), None), "mp3");
        assert_eq!(extension_for(&url("https://x.test/stream"), Some("audio/x-wav")), "wav");
        assert_eq!(
            extension_for(&url("https://x.test/get.php"), Some("audio/mpeg; charset=binary")),
            "mp3"
        );
        assert_eq!(extension_for(&url("https://x.test/"), None), "audio");
    }

    async fn serve(router: Router) -> std::net::SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn test_download_to_job_file() {
        let router = Router::new().route(
            "/clip",
            get(|| async { ([(header::CONTENT_TYPE, "audio/wav")], vec![1u8, 2, 3, 4]) }),
        );
        let addr = serve(router).await;
        let dir = tempfile::tempdir().unwrap();
        let job_id = Uuid::new_v4();

        let acquisition = HttpAcquisition::new(dir.path(), 1024).unwrap();
        let handle = acquisition
            .acquire(&format!("http://{}/clip", addr), job_id)
            .await
            .unwrap();

        assert_eq!(handle.path, dir.path().join(format!("{}.wav", job_id)));
        assert_eq!(std::fs::read(&handle.path).unwrap(), vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_size_limit_and_errors() {
        let router = Router::new().route("/big.wav", get(|| async { vec![0u8; 4096] }));
        let addr = serve(router).await;
        let dir = tempfile::tempdir().unwrap();
        let acquisition = HttpAcquisition::new(dir.path(), 100).unwrap();

        let big = acquisition
            .acquire(&format!("http://{}/big.wav", addr), Uuid::new_v4())
            .await;
        assert!(big.is_err());

        let missing = acquisition
            .acquire(&format!("http://{}/missing.wav", addr), Uuid::new_v4())
            .await;
        assert!(missing.is_err());

        let scheme = acquisition.acquire("ftp://example.com/a.wav", Uuid::new_v4()).await;
        assert!(scheme.unwrap_err().to_string().contains("scheme"));

        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_interrupted_download_removes_partial_file() {
        use tokio::io::AsyncReadExt;

        // promises 100000 bytes, sends 1000, then hangs up
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request: Vec<u8> = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    return;
                }
                request.extend_from_slice(&buf[..n]);
            }
            socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Type: audio/wav\r\nContent-Length: 100000\r\n\r\n")
                .await
                .unwrap();
            socket.write_all(&[0u8; 1000]).await.unwrap();
            socket.flush().await.unwrap();
        });

        let dir = tempfile::tempdir().unwrap();
        let acquisition = HttpAcquisition::new(dir.path(), 1_000_000).unwrap();
        let err = acquisition
            .acquire(&format!("http://{}/clip.wav", addr), Uuid::new_v4())
            .await
            .unwrap_err();

        assert!(format!("{:#}", err).contains("Download interrupted"));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}

//! Service configuration for scribe-ai
//!
//! Each setting resolves with the priority CLI → environment (`SCRIBE_*`)
//! → TOML file → compiled default.

use clap::{Parser, ValueEnum};
use scribe_common::config::{default_config_path, default_temp_dir, env_override, load_toml_config, LoggingConfig};
use scribe_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::info;

/// Module name used for the config file and logs
pub const MODULE_NAME: &str = "scribe-ai";

/// Which pitch extractor variant to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ExtractorKind {
    /// Frame-level tracker only
    #[default]
    Frame,
    /// Note-level model only
    Boundary,
    /// Note-level boundaries refined by frame-level pitch
    Hybrid,
}

impl fmt::Display for ExtractorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExtractorKind::Frame => "frame",
            ExtractorKind::Boundary => "boundary",
            ExtractorKind::Hybrid => "hybrid",
        })
    }
}

impl FromStr for ExtractorKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "frame" => Ok(ExtractorKind::Frame),
            "boundary" => Ok(ExtractorKind::Boundary),
            "hybrid" => Ok(ExtractorKind::Hybrid),
            other => Err(format!("unknown extractor '{}'", other)),
        }
    }
}

/// How remote audio is fetched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
pub enum AcquisitionKind {
    /// `yt-dlp` subprocess (YouTube and friends)
    #[default]
    #[serde(rename = "yt-dlp")]
    #[value(name = "yt-dlp")]
    YtDlp,
    /// Plain HTTP download of a direct audio URL
    #[serde(rename = "http")]
    Http,
}

impl fmt::Display for AcquisitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AcquisitionKind::YtDlp => "yt-dlp",
            AcquisitionKind::Http => "http",
        })
    }
}

impl FromStr for AcquisitionKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "yt-dlp" | "ytdlp" => Ok(AcquisitionKind::YtDlp),
            "http" => Ok(AcquisitionKind::Http),
            other => Err(format!("unknown acquisition '{}'", other)),
        }
    }
}

/// Resolved service configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,
    /// Scratch directory for downloads and uploads
    pub temp_dir: PathBuf,
    /// Upload size limit in bytes
    pub max_file_size: u64,
    /// Analysis sample rate (Hz)
    pub sample_rate: u32,
    /// Frame hop for pitch and onset analysis (samples)
    pub hop_length: usize,
    pub job_timeout_secs: u64,
    /// SSE keepalive period
    pub keepalive_secs: u64,
    /// Per-job event channel capacity
    pub event_capacity: usize,
    pub enable_preprocessing: bool,
    pub enable_source_separation: bool,
    pub extractor: ExtractorKind,
    pub acquisition: AcquisitionKind,
    /// Browser origins allowed by CORS
    pub cors_origins: Vec<String>,
    pub logging: LoggingConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5731,
            temp_dir: default_temp_dir(),
            max_file_size: 100 * 1024 * 1024,
            sample_rate: 44100,
            hop_length: 128,
            job_timeout_secs: 600,
            keepalive_secs: 30,
            event_capacity: 64,
            enable_preprocessing: true,
            enable_source_separation: false,
            extractor: ExtractorKind::Frame,
            acquisition: AcquisitionKind::YtDlp,
            cors_origins: vec!["http://localhost:3000".to_string()],
            logging: LoggingConfig::default(),
        }
    }
}

/// Command-line arguments
#[derive(Debug, Clone, Default, Parser)]
#[command(name = "scribe-ai", version, about = "Audio to sheet music transcription service")]
pub struct Cli {
    /// TOML config file (default: ~/.config/scribe/scribe-ai.toml)
    #[arg(short, long, env = "SCRIBE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Bind address
    #[arg(long)]
    pub host: Option<String>,

    /// Listen port
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Scratch directory for audio files
    #[arg(long)]
    pub temp_dir: Option<PathBuf>,

    /// Pitch extractor variant
    #[arg(long, value_enum)]
    pub extractor: Option<ExtractorKind>,

    /// Remote audio acquisition method
    #[arg(long, value_enum)]
    pub acquisition: Option<AcquisitionKind>,

    /// Per-job timeout in seconds
    #[arg(long)]
    pub job_timeout_secs: Option<u64>,

    /// Default log level when RUST_LOG is unset
    #[arg(long)]
    pub log_level: Option<String>,
}

/// Overwrite `target` when the variable is set
fn env_into<T>(target: &mut T, name: &str) -> Result<()>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    if let Some(value) = env_override(name)? {
        *target = value;
    }
    Ok(())
}

impl ServiceConfig {
    /// Resolve the configuration from all sources
    ///
    /// # Errors
    /// `Config` for unreadable/invalid TOML, unparsable environment values
    /// or settings that fail validation.
    pub fn resolve(cli: &Cli) -> Result<Self> {
        let mut config = match cli.config.clone().or_else(|| default_config_path(MODULE_NAME)) {
            Some(path) => load_toml_config::<ServiceConfig>(&path)?,
            None => ServiceConfig::default(),
        };
        config.apply_env()?;
        config.apply_cli(cli);
        config.validate()?;

        info!(
            host = %config.host,
            port = config.port,
            extractor = %config.extractor,
            acquisition = %config.acquisition,
            "Configuration resolved"
        );
        Ok(config)
    }

    /// Apply `SCRIBE_*` environment overrides
    pub fn apply_env(&mut self) -> Result<()> {
        env_into(&mut self.host, "SCRIBE_HOST")?;
        env_into(&mut self.port, "SCRIBE_PORT")?;
        env_into(&mut self.temp_dir, "SCRIBE_TEMP_DIR")?;
        env_into(&mut self.max_file_size, "SCRIBE_MAX_FILE_SIZE")?;
        env_into(&mut self.sample_rate, "SCRIBE_SAMPLE_RATE")?;
        env_into(&mut self.hop_length, "SCRIBE_HOP_LENGTH")?;
        env_into(&mut self.job_timeout_secs, "SCRIBE_JOB_TIMEOUT_SECS")?;
        env_into(&mut self.keepalive_secs, "SCRIBE_KEEPALIVE_SECS")?;
        env_into(&mut self.event_capacity, "SCRIBE_EVENT_CAPACITY")?;
        env_into(&mut self.enable_preprocessing, "SCRIBE_ENABLE_PREPROCESSING")?;
        env_into(&mut self.enable_source_separation, "SCRIBE_ENABLE_SOURCE_SEPARATION")?;
        env_into(&mut self.extractor, "SCRIBE_EXTRACTOR")?;
        env_into(&mut self.acquisition, "SCRIBE_ACQUISITION")?;
        env_into(&mut self.logging.level, "SCRIBE_LOG_LEVEL")?;
        if let Some(origins) = env_override::<String>("SCRIBE_CORS_ORIGINS")? {
            self.cors_origins = origins
                .split(',')
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect();
        }
        Ok(())
    }

    /// Apply command-line overrides
    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(host) = &cli.host {
            self.host = host.clone();
        }
        if let Some(port) = cli.port {
            self.port = port;
        }
        if let Some(dir) = &cli.temp_dir {
            self.temp_dir = dir.clone();
        }
        if let Some(extractor) = cli.extractor {
            self.extractor = extractor;
        }
        if let Some(acquisition) = cli.acquisition {
            self.acquisition = acquisition;
        }
        if let Some(secs) = cli.job_timeout_secs {
            self.job_timeout_secs = secs;
        }
        if let Some(level) = &cli.log_level {
            self.logging.level = level.clone();
        }
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        let checks = [
            (self.sample_rate == 0, "sample_rate must be positive"),
            (self.hop_length == 0, "hop_length must be positive"),
            (self.job_timeout_secs == 0, "job_timeout_secs must be positive"),
            (self.keepalive_secs == 0, "keepalive_secs must be positive"),
            (self.event_capacity == 0, "event_capacity must be positive"),
            (self.max_file_size == 0, "max_file_size must be positive"),
        ];
        match checks.iter().find(|(failed, _)| *failed) {
            Some((_, message)) => Err(Error::Config(message.to_string())),
            None => Ok(()),
        }
    }

    /// `host:port` for the listener
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

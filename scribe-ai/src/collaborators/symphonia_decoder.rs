//! Audio decoding with symphonia, mixdown to mono and rubato resampling

use super::{AudioDecoder, DecodedAudio};
use anyhow::{Context, Result};
use rubato::{Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction};
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, warn};

/// Decodes any container symphonia can probe
#[derive(Debug, Clone, Copy, Default)]
pub struct SymphoniaDecoder;

impl SymphoniaDecoder {
    pub fn new() -> Self {
        Self
    }

    /// Decode the first audio track to interleaved f32
    ///
    /// Returns `(samples, channels, native_rate)`.
    fn decode_interleaved(path: &Path) -> Result<(Vec<f32>, usize, u32)> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("Failed to open audio file: {}", path.display()))?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .context("Failed to probe audio format")?;
        let mut format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .context("No audio tracks found in file")?;
        let track_id = track.id;
        let codec_params = track.codec_params.clone();
        let native_rate = codec_params
            .sample_rate
            .context("Sample rate not specified in codec params")?;

        let mut decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .context("Failed to create decoder")?;

        let mut samples = Vec::new();
        let mut channels = codec_params.channels.map(|c| c.count()).unwrap_or(1);

        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(SymphoniaError::ResetRequired) => break,
                Err(e) => return Err(e).context("Failed to read packet"),
            };
            if packet.track_id() != track_id {
                continue;
            }

            let decoded = match decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(e)) => {
                    // corrupt packet; skip it
                    warn!("Skipping undecodable packet: {}", e);
                    continue;
                }
                Err(e) => return Err(e).context("Failed to decode packet"),
            };

            let spec = *decoded.spec();
            channels = spec.channels.count().max(1);
            let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
            buf.copy_interleaved_ref(decoded);
            samples.extend_from_slice(buf.samples());
        }

        Ok((samples, channels, native_rate))
    }
}

/// Average interleaved channels into one
pub fn mixdown(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Resample mono audio with a 256-tap sinc filter
pub fn resample_mono(samples: Vec<f32>, source_rate: u32, target_rate: u32) -> Result<Vec<f32>> {
    if samples.is_empty() || source_rate == target_rate {
        return Ok(samples);
    }

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };
    let ratio = target_rate as f64 / source_rate as f64;
    let frames = samples.len();

    // Whole signal as one chunk
    let mut resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, frames, 1)
        .context("Failed to create rubato resampler")?;
    let mut output = resampler
        .process(&[samples], None)
        .context("Rubato resampling failed")?;

    let resampled = output.pop().unwrap_or_default();
    debug!(
        "Resampled {} frames ({} Hz) → {} frames ({} Hz)",
        frames,
        source_rate,
        resampled.len(),
        target_rate
    );
    Ok(resampled)
}

impl AudioDecoder for SymphoniaDecoder {
    fn decode(&self, path: &Path, target_rate: u32) -> Result<DecodedAudio> {
        let (interleaved, channels, native_rate) = Self::decode_interleaved(path)?;
        debug!(
            "Decoded {} samples, {} channel(s) at {} Hz from {}",
            interleaved.len(),
            channels,
            native_rate,
            path.display()
        );

        let mono = mixdown(&interleaved, channels);
        let samples = resample_mono(mono, native_rate, target_rate)?;

        Ok(DecodedAudio {
            samples,
            sample_rate: target_rate,
        })
    }
}

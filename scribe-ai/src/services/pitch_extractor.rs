//! Frame-to-event extraction
//!
//! Turns backend pitch output into discrete, time-ordered [`PitchEvent`]s.
//! Note-level boundaries are gated and converted directly; frame-level
//! tracks are segmented on voicing, onsets and pitch jumps; the hybrid
//! variant keeps boundary timing and re-estimates each note's frequency
//! from the frame track.

use crate::collaborators::{BoundaryBackend, FrameBackend, NoteBoundary, PitchFrames};
use crate::error::{PipelineResult, TranscriptionError};
use crate::models::music::PitchEvent;
use crate::music_theory::midi_to_frequency;
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{debug, warn};

/// Extraction thresholds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExtractorSettings {
    /// Boundary events quieter than this are dropped
    pub min_amplitude: f64,
    /// Events shorter than this (seconds) are dropped as artifacts
    pub min_duration: f64,
    /// Frames below this confidence count as unvoiced
    pub confidence_threshold: f64,
    /// Pitch change (semitones) that splits a frame segment
    pub max_jump_semitones: f64,
}

impl Default for ExtractorSettings {
    fn default() -> Self {
        Self {
            min_amplitude: 0.35,
            min_duration: 0.05,
            confidence_threshold: 0.5,
            max_jump_semitones: 2.0,
        }
    }
}

/// Pitch extraction strategy, fixed at startup
#[derive(Clone)]
pub enum PitchExtractor {
    /// Boundary timing refined by frame-level pitch
    Hybrid {
        boundary: Arc<dyn BoundaryBackend>,
        frame: Arc<dyn FrameBackend>,
        settings: ExtractorSettings,
    },
    /// Note-level model only
    BoundaryOnly {
        boundary: Arc<dyn BoundaryBackend>,
        settings: ExtractorSettings,
    },
    /// Frame-level tracker segmented with external onsets
    FrameOnly {
        frame: Arc<dyn FrameBackend>,
        settings: ExtractorSettings,
    },
}

impl std::fmt::Debug for PitchExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PitchExtractor")
            .field("kind", &self.kind())
            .field("settings", self.settings())
            .finish()
    }
}

impl PitchExtractor {
    pub fn frame_only(frame: Arc<dyn FrameBackend>) -> Self {
        PitchExtractor::FrameOnly {
            frame,
            settings: ExtractorSettings::default(),
        }
    }

    pub fn boundary_only(boundary: Arc<dyn BoundaryBackend>) -> Self {
        PitchExtractor::BoundaryOnly {
            boundary,
            settings: ExtractorSettings::default(),
        }
    }

    pub fn hybrid(boundary: Arc<dyn BoundaryBackend>, frame: Arc<dyn FrameBackend>) -> Self {
        PitchExtractor::Hybrid {
            boundary,
            frame,
            settings: ExtractorSettings::default(),
        }
    }

    /// Replace the thresholds
    pub fn with_settings(mut self, new_settings: ExtractorSettings) -> Self {
        match &mut self {
            PitchExtractor::Hybrid { settings, .. }
            | PitchExtractor::BoundaryOnly { settings, .. }
            | PitchExtractor::FrameOnly { settings, .. } => *settings = new_settings,
        }
        self
    }

    pub fn settings(&self) -> &ExtractorSettings {
        match self {
            PitchExtractor::Hybrid { settings, .. }
            | PitchExtractor::BoundaryOnly { settings, .. }
            | PitchExtractor::FrameOnly { settings, .. } => settings,
        }
    }

    /// Config name of the variant
    pub fn kind(&self) -> &'static str {
        match self {
            PitchExtractor::Hybrid { .. } => "hybrid",
            PitchExtractor::BoundaryOnly { .. } => "boundary",
            PitchExtractor::FrameOnly { .. } => "frame",
        }
    }

    /// Whether boundary events get frame-level pitch refinement
    pub fn refines_pitch(&self) -> bool {
        matches!(self, PitchExtractor::Hybrid { .. })
    }

    /// Extract pitch events from mono samples
    ///
    /// `onset_times` is only consulted by the frame-only variant.
    ///
    /// # Errors
    /// `Detection` when the backend fails, returns malformed frames, or no
    /// event survives gating.
    pub fn extract(
        &self,
        samples: &[f32],
        sample_rate: u32,
        onset_times: &[f64],
    ) -> PipelineResult<Vec<PitchEvent>> {
        let events = match self {
            PitchExtractor::BoundaryOnly { boundary, settings } => {
                let boundaries = boundary
                    .predict_boundaries(samples, sample_rate)
                    .map_err(|e| detection_error("Boundary model failed", e))?;
                events_from_boundaries(&boundaries, settings)
            }
            PitchExtractor::FrameOnly { frame, settings } => {
                let frames = frame
                    .predict_frames(samples, sample_rate)
                    .map_err(|e| detection_error("Frame tracker failed", e))?;
                segment_frames(&frames, onset_times, settings)?
            }
            PitchExtractor::Hybrid {
                boundary,
                frame,
                settings,
            } => {
                let boundaries = boundary
                    .predict_boundaries(samples, sample_rate)
                    .map_err(|e| detection_error("Boundary model failed", e))?;
                let events = events_from_boundaries(&boundaries, settings);
                if events.is_empty() {
                    events
                } else {
                    match frame.predict_frames(samples, sample_rate) {
                        Ok(frames) if frames.is_consistent() => refine_with_frames(&events, &frames),
                        Ok(_) => {
                            warn!("Frame tracker returned mismatched columns; keeping boundary pitches");
                            events
                        }
                        Err(e) => {
                            warn!("Frame tracker failed ({}); keeping boundary pitches", e);
                            events
                        }
                    }
                }
            }
        };

        if events.is_empty() {
            return Err(TranscriptionError::Detection(
                "No pitches detected in audio".to_string(),
            ));
        }

        debug!(
            extractor = self.kind(),
            events = events.len(),
            "Pitch extraction finished"
        );
        Ok(events)
    }
}

fn detection_error(context: &str, err: anyhow::Error) -> TranscriptionError {
    TranscriptionError::Detection(format!("{}: {:#}", context, err))
}

fn by_start_time(a: &PitchEvent, b: &PitchEvent) -> Ordering {
    a.start_time.total_cmp(&b.start_time)
}

/// Gate and convert note-level boundaries
///
/// Drops events below the amplitude gate or shorter than the duration gate;
/// frequency comes from the rounded MIDI pitch.
pub fn events_from_boundaries(
    boundaries: &[NoteBoundary],
    settings: &ExtractorSettings,
) -> Vec<PitchEvent> {
    let mut events: Vec<PitchEvent> = boundaries
        .iter()
        .filter(|b| b.amplitude >= settings.min_amplitude)
        .filter_map(|b| {
            let duration = b.end - b.start;
            if duration < settings.min_duration {
                return None;
            }
            let frequency = midi_to_frequency(b.pitch.round_ties_even());
            Some(PitchEvent::new(frequency, b.start, duration, b.amplitude))
        })
        .collect();
    events.sort_by(by_start_time);
    events
}

/// Open segment while walking frames
struct Segment {
    /// First frame's frequency; jumps are measured against it
    anchor: f64,
    start: f64,
    frequencies: Vec<f64>,
}

/// Segment a frame-level track into events
///
/// A segment closes when a frame is unvoiced (flag false, confidence below
/// threshold, or no finite positive frequency), when an onset is crossed
/// (closing at the onset time), or when pitch moves more than
/// `max_jump_semitones` from the segment's first frame. Whatever is still
/// open after the last frame closes at the last frame time.
pub fn segment_frames(
    frames: &PitchFrames,
    onset_times: &[f64],
    settings: &ExtractorSettings,
) -> PipelineResult<Vec<PitchEvent>> {
    if !frames.is_consistent() {
        return Err(TranscriptionError::Detection(format!(
            "Malformed frame track: {} times, {} frequencies, {} voiced flags, {} confidences",
            frames.times.len(),
            frames.frequencies.len(),
            frames.voiced.len(),
            frames.confidences.len()
        )));
    }

    let last_time = frames.times.last().copied().unwrap_or(0.0);
    // Trailing sentinel so the last real onset is always crossable
    let mut onsets: Vec<f64> = onset_times.to_vec();
    onsets.push(last_time);
    let mut onset_idx = 0usize;

    let mut events = Vec::new();
    let mut current: Option<Segment> = None;

    for (i, &time) in frames.times.iter().enumerate() {
        let freq = frames.frequencies[i];
        let confidence = frames.confidences[i];
        let voiced = frames.voiced[i]
            && confidence >= settings.confidence_threshold
            && freq.is_finite()
            && freq > 0.0;

        if !voiced {
            if let Some(seg) = current.take() {
                commit(&mut events, seg, time, i, frames, settings);
            }
            continue;
        }

        while onset_idx + 1 < onsets.len() && time >= onsets[onset_idx + 1] {
            if let Some(seg) = current.take() {
                commit(&mut events, seg, onsets[onset_idx + 1], i, frames, settings);
            }
            onset_idx += 1;
        }

        current = match current.take() {
            None => Some(Segment {
                anchor: freq,
                start: time,
                frequencies: vec![freq],
            }),
            Some(mut seg) => {
                let jump = (12.0 * (freq / seg.anchor).log2()).abs();
                if jump > settings.max_jump_semitones {
                    commit(&mut events, seg, time, i, frames, settings);
                    Some(Segment {
                        anchor: freq,
                        start: time,
                        frequencies: vec![freq],
                    })
                } else {
                    seg.frequencies.push(freq);
                    Some(seg)
                }
            }
        };
    }

    if let Some(seg) = current.take() {
        commit(&mut events, seg, last_time, frames.len(), frames, settings);
    }

    events.sort_by(by_start_time);
    Ok(events)
}

/// Close a segment ending (exclusively) at frame index `end_idx`
fn commit(
    events: &mut Vec<PitchEvent>,
    segment: Segment,
    end_time: f64,
    end_idx: usize,
    frames: &PitchFrames,
    settings: &ExtractorSettings,
) {
    let duration = end_time - segment.start;
    if duration < settings.min_duration || segment.frequencies.is_empty() {
        return;
    }

    let first_idx = end_idx.saturating_sub(segment.frequencies.len());
    let last_idx = end_idx.min(frames.confidences.len());
    let confident: Vec<f64> = frames.confidences[first_idx..last_idx]
        .iter()
        .copied()
        .filter(|&c| c >= settings.confidence_threshold)
        .collect();
    let confidence = if confident.is_empty() {
        0.0
    } else {
        confident.iter().sum::<f64>() / confident.len() as f64
    };

    events.push(PitchEvent::new(
        median(&segment.frequencies),
        segment.start,
        duration,
        confidence,
    ));
}

/// Median; the mean of the middle pair for even counts
pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Confidence-weighted median of `(frequency, weight)` pairs
///
/// Returns the first frequency (ascending) whose cumulative weight reaches
/// half the total, or `None` if the total weight is not positive.
pub fn weighted_median(samples: &[(f64, f64)]) -> Option<f64> {
    let total: f64 = samples.iter().map(|&(_, w)| w).sum();
    if samples.is_empty() || total.is_nan() || total <= 0.0 {
        return None;
    }

    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.0.total_cmp(&b.0));

    let half = total / 2.0;
    let mut cumulative = 0.0;
    for &(freq, weight) in &sorted {
        cumulative += weight;
        if cumulative >= half {
            return Some(freq);
        }
    }
    sorted.last().map(|&(freq, _)| freq)
}

/// Replace each event's frequency with the weighted median of the frames
/// inside `[start, start + duration]`
///
/// Events whose window holds no finite positive frequency with positive
/// confidence mass keep their original frequency. Timing and confidence are
/// never changed.
pub fn refine_with_frames(events: &[PitchEvent], frames: &PitchFrames) -> Vec<PitchEvent> {
    events
        .iter()
        .map(|event| {
            let window_end = event.start_time + event.duration;
            let samples: Vec<(f64, f64)> = frames
                .times
                .iter()
                .zip(frames.frequencies.iter().zip(frames.confidences.iter()))
                .filter(|(&t, _)| t >= event.start_time && t <= window_end)
                .filter(|(_, (&f, _))| f.is_finite() && f > 0.0)
                .map(|(_, (&f, &c))| (f, c))
                .collect();

            match weighted_median(&samples) {
                Some(freq) if freq > 0.0 => PitchEvent { frequency: freq, ..*event },
                _ => *event,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames_from(rows: &[(f64, bool, f64, f64)]) -> PitchFrames {
        PitchFrames {
            frequencies: rows.iter().map(|r| r.0).collect(),
            voiced: rows.iter().map(|r| r.1).collect(),
            confidences: rows.iter().map(|r| r.2).collect(),
            times: rows.iter().map(|r| r.3).collect(),
        }
    }

    /// Steady voiced frames every 10 ms
    fn steady(freq: f64, start: f64, count: usize) -> Vec<(f64, bool, f64, f64)> {
        (0..count)
            .map(|i| (freq, true, 0.9, start + i as f64 * 0.01))
            .collect()
    }

    struct FixedBoundaries(Vec<NoteBoundary>);

    impl BoundaryBackend for FixedBoundaries {
        fn predict_boundaries(&self, _: &[f32], _: u32) -> anyhow::Result<Vec<NoteBoundary>> {
            Ok(self.0.clone())
        }
    }

    struct FixedFrames(PitchFrames);

    impl FrameBackend for FixedFrames {
        fn predict_frames(&self, _: &[f32], _: u32) -> anyhow::Result<PitchFrames> {
            Ok(self.0.clone())
        }
    }

    struct BrokenFrames;

    impl FrameBackend for BrokenFrames {
        fn predict_frames(&self, _: &[f32], _: u32) -> anyhow::Result<PitchFrames> {
            anyhow::bail!("model unavailable")
        }
    }

    fn boundary(start: f64, end: f64, pitch: f64, amplitude: f64) -> NoteBoundary {
        NoteBoundary {
            start,
            end,
            pitch,
            amplitude,
        }
    }

    #[test]
    fn test_boundary_gates() {
        let settings = ExtractorSettings::default();
        let events = events_from_boundaries(
            &[
                boundary(1.0, 1.5, 69.0, 0.8),
                boundary(0.0, 0.5, 60.0, 0.2),  // too quiet
                boundary(2.0, 2.03, 62.0, 0.9), // too short
                boundary(0.5, 0.9, 60.4, 0.35),
            ],
            &settings,
        );
        assert_eq!(events.len(), 2);
        assert!((events[0].start_time - 0.5).abs() < 1e-12);
        assert!((events[0].frequency - 261.6255653).abs() < 1e-6);
        assert!((events[1].frequency - 440.0).abs() < 1e-9);
        assert!((events[1].confidence - 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_segment_steady_tone() {
        let frames = frames_from(&steady(440.0, 0.0, 21));
        let events = segment_frames(&frames, &[], &ExtractorSettings::default()).unwrap();
        assert_eq!(events.len(), 1);
        assert!((events[0].frequency - 440.0).abs() < 1e-9);
        assert!((events[0].duration - 0.2).abs() < 1e-9);
        assert!((events[0].confidence - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_segment_splits_on_unvoiced_gap() {
        let mut rows = steady(440.0, 0.0, 10);
        rows.push((f64::NAN, false, 0.1, 0.10));
        rows.push((0.0, true, 0.9, 0.11)); // non-positive frequency is unvoiced
        rows.extend(steady(440.0, 0.12, 10));
        let frames = frames_from(&rows);

        let events = segment_frames(&frames, &[], &ExtractorSettings::default()).unwrap();
        assert_eq!(events.len(), 2);
        assert!((events[0].duration - 0.10).abs() < 1e-9);
        assert!((events[1].start_time - 0.12).abs() < 1e-9);
    }

    #[test]
    fn test_segment_splits_on_pitch_jump() {
        let mut rows = steady(440.0, 0.0, 10);
        rows.extend(steady(523.25, 0.10, 10)); // three semitones up
        let frames = frames_from(&rows);

        let events = segment_frames(&frames, &[], &ExtractorSettings::default()).unwrap();
        assert_eq!(events.len(), 2);
        assert!((events[0].frequency - 440.0).abs() < 1e-9);
        assert!((events[0].duration - 0.10).abs() < 1e-9);
        assert!((events[1].frequency - 523.25).abs() < 1e-9);
    }

    #[test]
    fn test_small_drift_stays_in_one_segment() {
        let rows: Vec<_> = (0..20)
            .map(|i| (440.0 + i as f64, true, 0.9, i as f64 * 0.01))
            .collect();
        let events =
            segment_frames(&frames_from(&rows), &[], &ExtractorSettings::default()).unwrap();
        assert_eq!(events.len(), 1);
        // even count: mean of frames 9 and 10
        assert!((events[0].frequency - 449.5).abs() < 1e-9);
    }

    #[test]
    fn test_segment_closes_at_onset() {
        let frames = frames_from(&steady(440.0, 0.0, 20));
        let events = segment_frames(&frames, &[0.0, 0.1], &ExtractorSettings::default()).unwrap();
        assert_eq!(events.len(), 2);
        assert!((events[0].start_time - 0.0).abs() < 1e-12);
        assert!((events[0].duration - 0.1).abs() < 1e-9);
        assert!((events[1].start_time - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_short_segments_are_dropped() {
        let mut rows = steady(440.0, 0.0, 3);
        rows.push((f64::NAN, false, 0.0, 0.03));
        let events =
            segment_frames(&frames_from(&rows), &[], &ExtractorSettings::default()).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn test_low_confidence_frames_close_segment() {
        let mut rows = steady(440.0, 0.0, 10);
        rows.push((440.0, true, 0.3, 0.10));
        rows.extend(steady(440.0, 0.11, 10));
        let events =
            segment_frames(&frames_from(&rows), &[], &ExtractorSettings::default()).unwrap();
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn test_mismatched_columns_are_detection_error() {
        let mut frames = frames_from(&steady(440.0, 0.0, 5));
        frames.confidences.pop();
        let result = segment_frames(&frames, &[], &ExtractorSettings::default());
        assert!(matches!(result, Err(TranscriptionError::Detection(_))));
    }

    #[test]
    fn test_weighted_median() {
        assert_eq!(weighted_median(&[(100.0, 1.0), (200.0, 1.0), (300.0, 1.0)]), Some(200.0));
        assert_eq!(weighted_median(&[(300.0, 5.0), (100.0, 1.0), (200.0, 1.0)]), Some(300.0));
        // cumulative mass hits exactly half at the first element
        assert_eq!(weighted_median(&[(100.0, 1.0), (200.0, 1.0)]), Some(100.0));
        assert_eq!(weighted_median(&[(100.0, 0.0)]), None);
        assert_eq!(weighted_median(&[]), None);
    }

    #[test]
    fn test_refinement_replaces_frequency_inside_window() {
        let events = vec![
            PitchEvent::new(440.0, 0.0, 0.1, 0.8),
            PitchEvent::new(440.0, 1.0, 0.1, 0.8),
        ];
        let frames = frames_from(&[
            (445.0, true, 0.9, 0.02),
            (446.0, true, 0.9, 0.05),
            (f64::NAN, false, 0.9, 0.06),
            (900.0, true, 0.9, 0.5), // outside both windows
        ]);
        let refined = refine_with_frames(&events, &frames);
        assert_eq!(refined[0].frequency, 445.0);
        assert_eq!(refined[0].start_time, 0.0);
        assert_eq!(refined[0].confidence, 0.8);
        // no frames in the second window
        assert_eq!(refined[1].frequency, 440.0);
    }

    #[test]
    fn test_extract_frame_only_rejects_silence() {
        let extractor = PitchExtractor::frame_only(Arc::new(FixedFrames(PitchFrames::default())));
        let result = extractor.extract(&[], 44100, &[]);
        assert!(matches!(result, Err(TranscriptionError::Detection(msg)) if msg == "No pitches detected in audio"));
    }

    #[test]
    fn test_hybrid_falls_back_when_frame_backend_fails() {
        let extractor = PitchExtractor::hybrid(
            Arc::new(FixedBoundaries(vec![boundary(0.0, 0.5, 69.0, 0.9)])),
            Arc::new(BrokenFrames),
        );
        assert!(extractor.refines_pitch());
        let events = extractor.extract(&[0.0; 16], 44100, &[]).unwrap();
        assert_eq!(events.len(), 1);
        assert!((events[0].frequency - 440.0).abs() < 1e-9);
    }

    #[test]
    fn test_hybrid_refines_boundary_pitch() {
        let frames = frames_from(&steady(452.0, 0.0, 10));
        let extractor = PitchExtractor::hybrid(
            Arc::new(FixedBoundaries(vec![boundary(0.0, 0.5, 69.0, 0.9)])),
            Arc::new(FixedFrames(frames)),
        );
        let events = extractor.extract(&[0.0; 16], 44100, &[]).unwrap();
        assert_eq!(events[0].frequency, 452.0);
    }

    #[test]
    fn test_output_sorted_and_gated() {
        let extractor = PitchExtractor::boundary_only(Arc::new(FixedBoundaries(vec![
            boundary(2.0, 2.5, 64.0, 0.9),
            boundary(0.0, 0.5, 60.0, 0.9),
            boundary(1.0, 1.2, 62.0, 0.9),
        ])));
        let events = extractor.extract(&[], 44100, &[]).unwrap();
        let settings = extractor.settings();
        assert!(events.windows(2).all(|w| w[0].start_time <= w[1].start_time));
        assert!(events.iter().all(|e| e.duration >= settings.min_duration));
        assert_eq!(extractor.kind(), "boundary");
    }
}

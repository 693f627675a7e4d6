// src/speech/mod.rs — Speech-to-text layer

pub mod compress;
pub mod whisper;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::Segment;
use crate::infra::errors::DeskError;

pub use whisper::WhisperClient;

#[derive(Debug, Clone)]
pub struct TranscribeRequest {
    pub audio: Vec<u8>,
    pub filename: String,
    pub content_type: String,
    /// ISO-639-1 hint, e.g. `ja`.
    pub language: String,
    pub temperature: f32,
}

/// A segment as returned by the API, before confidence is normalised.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawSegment {
    #[serde(default)]
    pub id: u32,
    pub start: f64,
    pub end: f64,
    pub text: String,
    #[serde(default)]
    pub avg_logprob: Option<f64>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub text: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub segments: Vec<RawSegment>,
}

#[async_trait]
pub trait SpeechToText: Send + Sync {
    fn id(&self) -> &str;

    async fn transcribe(&self, request: TranscribeRequest) -> Result<Transcript, DeskError>;
}

/// Explicit confidence when present, otherwise `exp(avg_logprob)`; clamped to [0, 1].
pub fn segment_confidence(seg: &RawSegment) -> f64 {
    let raw = match (seg.confidence, seg.avg_logprob) {
        (Some(c), _) => c,
        (None, Some(lp)) => lp.exp(),
        (None, None) => 0.0,
    };
    if raw.is_finite() {
        raw.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

pub fn to_segments(raw: &[RawSegment]) -> Vec<Segment> {
    raw.iter()
        .enumerate()
        .map(|(i, s)| Segment {
            id: i as u32,
            start: s.start,
            end: s.end,
            text: s.text.trim().to_string(),
            confidence: segment_confidence(s),
        })
        .collect()
}

/// Duration-weighted mean of segment confidences. Falls back to the plain
/// mean when every segment has zero length, and to 0 without segments.
pub fn overall_confidence(segments: &[Segment]) -> f64 {
    if segments.is_empty() {
        return 0.0;
    }
    let total: f64 = segments.iter().map(|s| (s.end - s.start).max(0.0)).sum();
    let value = if total > 0.0 {
        segments
            .iter()
            .map(|s| s.confidence * (s.end - s.start).max(0.0))
            .sum::<f64>()
            / total
    } else {
        segments.iter().map(|s| s.confidence).sum::<f64>() / segments.len() as f64
    };
    value.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(start: f64, end: f64, conf: Option<f64>, lp: Option<f64>) -> RawSegment {
        RawSegment {
            id: 0,
            start,
            end,
            text: " hi ".into(),
            avg_logprob: lp,
            confidence: conf,
        }
    }

    #[test]
    fn test_segment_confidence_sources() {
        assert_eq!(segment_confidence(&raw(0.0, 1.0, Some(0.9), Some(-5.0))), 0.9);
        let from_lp = segment_confidence(&raw(0.0, 1.0, None, Some(-0.1)));
        assert!((from_lp - (-0.1f64).exp()).abs() < 1e-12);
        assert_eq!(segment_confidence(&raw(0.0, 1.0, Some(1.7), None)), 1.0);
        assert_eq!(segment_confidence(&raw(0.0, 1.0, None, None)), 0.0);
        assert_eq!(segment_confidence(&raw(0.0, 1.0, None, Some(f64::NAN))), 0.0);
    }

    #[test]
    fn test_overall_confidence_weighted() {
        let segs = to_segments(&[raw(0.0, 3.0, Some(1.0), None), raw(3.0, 4.0, Some(0.0), None)]);
        assert_eq!(segs[1].id, 1);
        assert_eq!(segs[0].text, "hi");
        assert!((overall_confidence(&segs) - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_overall_confidence_degenerate() {
        assert_eq!(overall_confidence(&[]), 0.0);
        let zero_len = to_segments(&[raw(1.0, 1.0, Some(0.4), None), raw(2.0, 2.0, Some(0.8), None)]);
        assert!((overall_confidence(&zero_len) - 0.6).abs() < 1e-12);
    }
}

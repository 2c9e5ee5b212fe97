//! # Analysis Result
//!
//! The record sent back to the client for every inbound event. Fields that
//! were not produced are omitted from the JSON rather than sent as `null`.
//!
//! ## Status invariant:
//! `depression_status` and `anxiety_status` are private and can only be set by
//! `derive_statuses`, which looks at the score fields. A status therefore never
//! exists without a present, finite, non-negative score next to it.

use crate::analysis::scoring::{AnxietyLevel, AudioScores, DepressionLevel};
use serde::Serialize;

/// Sentinel placed in `anxiety_score` when the audio chunk could not be decoded.
pub const AUDIO_DECODE_FAILURE: &str = "Failed to decode audio";

/// A score slot: either a measurement or a failure sentinel string.
///
/// Clients of the original protocol check the type of `anxiety_score` to tell
/// a measured value from a decode failure, so the sentinel is kept on the wire.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ScoreField {
    Value(f64),
    Failed(String),
}

impl ScoreField {
    /// The score as a measurement usable for categorisation.
    pub fn measurement(&self) -> Option<f64> {
        match self {
            ScoreField::Value(v) if v.is_finite() && *v >= 0.0 => Some(*v),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AnalysisResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emotion: Option<String>,

    /// Classifier failure, surfaced instead of silently dropping `emotion`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub depression_score: Option<ScoreField>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub anxiety_score: Option<ScoreField>,

    #[serde(skip_serializing_if = "Option::is_none")]
    depression_status: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    anxiety_status: Option<String>,
}

impl AnalysisResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy audio scores into the result; absent scores stay absent.
    pub fn set_audio_scores(&mut self, scores: AudioScores) {
        self.depression_score = scores.depression.map(ScoreField::Value);
        self.anxiety_score = scores.anxiety.map(ScoreField::Value);
    }

    /// Mark the audio modality as failed for this event.
    pub fn set_audio_failure(&mut self) {
        self.depression_score = None;
        self.anxiety_score = Some(ScoreField::Failed(AUDIO_DECODE_FAILURE.to_string()));
    }

    /// Recompute both status fields from the current scores.
    pub fn derive_statuses(&mut self) {
        self.depression_status = self
            .depression_score
            .as_ref()
            .and_then(ScoreField::measurement)
            .map(|score| DepressionLevel::from_score(score).status());

        self.anxiety_status = self
            .anxiety_score
            .as_ref()
            .and_then(ScoreField::measurement)
            .map(|score| AnxietyLevel::from_score(score).status());
    }

    pub fn depression_status(&self) -> Option<&str> {
        self.depression_status.as_deref()
    }

    pub fn anxiety_status(&self) -> Option<&str> {
        self.anxiety_status.as_deref()
    }

    /// Numeric depression score, if one was measured.
    pub fn depression_value(&self) -> Option<f64> {
        self.depression_score.as_ref().and_then(ScoreField::measurement)
    }

    /// Numeric anxiety score, if one was measured.
    pub fn anxiety_value(&self) -> Option<f64> {
        self.anxiety_score.as_ref().and_then(ScoreField::measurement)
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_result_serializes_to_empty_object() {
        let result = AnalysisResult::new();
        assert!(result.is_empty());
        assert_eq!(serde_json::to_value(&result).unwrap(), json!({}));
    }

    #[test]
    fn test_statuses_follow_scores() {
        let mut result = AnalysisResult::new();
        result.set_audio_scores(AudioScores { depression: Some(0.2), anxiety: Some(0.5) });
        result.derive_statuses();

        assert_eq!(
            result.depression_status(),
            Some("No Depression: No significant depression detected.")
        );
        assert_eq!(
            result.anxiety_status(),
            Some("Moderate Anxiety: Moderate anxiety level detected.")
        );
    }

    #[test]
    fn test_zero_score_is_a_measurement() {
        let mut result = AnalysisResult::new();
        result.set_audio_scores(AudioScores { depression: Some(0.0), anxiety: None });
        result.derive_statuses();

        assert!(result.depression_status().is_some());
        assert_eq!(result.anxiety_status(), None);
        assert_eq!(result.anxiety_score, None);
    }

    #[test]
    fn test_absent_scores_never_get_statuses() {
        let mut result = AnalysisResult::new();
        result.derive_statuses();
        assert_eq!(result.depression_status(), None);
        assert_eq!(result.anxiety_status(), None);

        // Invalid measurements are not categorised either
        result.depression_score = Some(ScoreField::Value(-1.0));
        result.anxiety_score = Some(ScoreField::Value(f64::NAN));
        result.derive_statuses();
        assert_eq!(result.depression_status(), None);
        assert_eq!(result.anxiety_status(), None);
    }

    #[test]
    fn test_audio_failure_sentinel() {
        let mut result = AnalysisResult::new();
        result.emotion = Some("happy".to_string());
        result.set_audio_failure();
        result.derive_statuses();

        assert_eq!(result.anxiety_status(), None);
        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            json!({"emotion": "happy", "anxiety_score": "Failed to decode audio"})
        );
    }

    #[test]
    fn test_statuses_are_cleared_when_scores_go_away() {
        let mut result = AnalysisResult::new();
        result.set_audio_scores(AudioScores { depression: Some(0.9), anxiety: Some(0.9) });
        result.derive_statuses();
        assert!(result.depression_status().is_some());

        result.set_audio_failure();
        result.derive_statuses();
        assert_eq!(result.depression_status(), None);
        assert_eq!(result.anxiety_status(), None);
    }
}

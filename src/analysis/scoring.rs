//! # Scoring Engine
//!
//! Maps acoustic features to bounded [0, 1] scores and scores to discrete
//! categories. These are fixed linear heuristics, not learned models:
//!
//! | score       | precondition        | formula                      |
//! |-------------|---------------------|------------------------------|
//! | depression  | avg pitch < 150 Hz  | `clamp(1 - pitch / 150, 0, 1)` |
//! | anxiety     | rms > 0.01          | `clamp(rms * 10, 0, 1)`        |
//!
//! When a precondition does not hold the score is `None`. It is never
//! replaced by 0.0, because 0.0 is a real "no risk" measurement downstream.

use crate::audio::features::AcousticFeatures;

/// Pitch (Hz) at and above which no depression score is produced.
pub const DEPRESSION_PITCH_CEILING_HZ: f64 = 150.0;

/// RMS at and below which no anxiety score is produced.
pub const ANXIETY_RMS_FLOOR: f64 = 0.01;

/// RMS multiplier for the anxiety score.
pub const ANXIETY_RMS_GAIN: f64 = 10.0;

/// Lower pitch is treated as a proxy for flatter affect.
pub fn depression_score(avg_pitch: Option<f64>) -> Option<f64> {
    let pitch = avg_pitch.filter(|p| p.is_finite())?;
    if pitch < DEPRESSION_PITCH_CEILING_HZ {
        Some((1.0 - pitch / DEPRESSION_PITCH_CEILING_HZ).clamp(0.0, 1.0))
    } else {
        None
    }
}

/// Higher energy is treated as a proxy for heightened arousal.
pub fn anxiety_score(rms: f64) -> Option<f64> {
    if rms.is_finite() && rms > ANXIETY_RMS_FLOOR {
        Some((rms * ANXIETY_RMS_GAIN).clamp(0.0, 1.0))
    } else {
        None
    }
}

/// Both scores for one chunk's features.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AudioScores {
    pub depression: Option<f64>,
    pub anxiety: Option<f64>,
}

impl From<AcousticFeatures> for AudioScores {
    fn from(features: AcousticFeatures) -> Self {
        Self {
            depression: depression_score(features.avg_pitch),
            anxiety: anxiety_score(features.rms),
        }
    }
}

/// Depression category. Upper bounds are inclusive: 0.2 is still `Absent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepressionLevel {
    Absent,
    Mild,
    Moderate,
    Severe,
}

impl DepressionLevel {
    pub fn from_score(score: f64) -> Self {
        if score <= 0.2 {
            DepressionLevel::Absent
        } else if score <= 0.5 {
            DepressionLevel::Mild
        } else if score <= 0.8 {
            DepressionLevel::Moderate
        } else {
            DepressionLevel::Severe
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            DepressionLevel::Absent => "No Depression",
            DepressionLevel::Mild => "Mild Depression",
            DepressionLevel::Moderate => "Moderate Depression",
            DepressionLevel::Severe => "Severe Depression",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            DepressionLevel::Absent => "No significant depression detected.",
            DepressionLevel::Mild => "Mild depression detected.",
            DepressionLevel::Moderate => "Moderate depression detected.",
            DepressionLevel::Severe => "Severe depression detected.",
        }
    }

    /// Wire form: `"<label>: <description>"`.
    pub fn status(&self) -> String {
        format!("{}: {}", self.label(), self.description())
    }
}

/// Anxiety category. Upper bounds are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnxietyLevel {
    Low,
    Moderate,
    High,
}

impl AnxietyLevel {
    pub fn from_score(score: f64) -> Self {
        if score <= 0.2 {
            AnxietyLevel::Low
        } else if score <= 0.5 {
            AnxietyLevel::Moderate
        } else {
            AnxietyLevel::High
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            AnxietyLevel::Low => "Low Anxiety",
            AnxietyLevel::Moderate => "Moderate Anxiety",
            AnxietyLevel::High => "High Anxiety",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            AnxietyLevel::Low => "No significant anxiety detected.",
            AnxietyLevel::Moderate => "Moderate anxiety level detected.",
            AnxietyLevel::High => "High anxiety level detected.",
        }
    }

    pub fn status(&self) -> String {
        format!("{}: {}", self.label(), self.description())
    }
}

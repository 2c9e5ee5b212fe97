//! # Per-Event Analysis Pipeline
//!
//! One inbound event carries an optional video frame and an optional audio
//! chunk. The two modalities are independent, so they run concurrently and a
//! failure in one never stops the other:
//!
//! ```text
//! image ──► normalize ──► classify ─────────────────┐
//!                                                   ├──► ProcessedEvent
//! audio ──► base64 ──► transcode ──► extract ──► score ┘
//! ```
//!
//! ## Rust Concepts:
//! - **`tokio::join!`**: drives both branches on the same task; neither is spawned
//! - **`spawn_blocking`**: image decoding and feature math are CPU-bound and
//!   would otherwise stall every other connection on the worker thread
//! - **`Arc<dyn Trait>`**: the transcoder and classifier are swappable collaborators

use crate::analysis::result::AnalysisResult;
use crate::analysis::scoring::AudioScores;
use crate::audio::features::FeatureExtractor;
use crate::audio::processor::AudioProcessor;
use crate::audio::transcoder::{decode_audio_payload, AudioTranscoder, FfmpegTranscoder};
use crate::config::AppConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::vision::classifier::{DeepFaceClassifier, EmotionClassifier};
use crate::vision::normalizer::{normalize_image, DecodedFrame};
use serde::Deserialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// A text frame from the client.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InboundEvent {
    /// Data URL, `"<prefix>,<base64>"`
    #[serde(default)]
    pub image: Option<String>,
    /// Base64 of a compressed audio chunk, padding optional
    #[serde(default)]
    pub audio_chunk: Option<String>,
}

impl InboundEvent {
    /// Only a JSON object is an event. The derived visitor would also take a
    /// two-element array positionally, so the shape is checked first.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        if !value.is_object() {
            return Err(serde::de::Error::custom("event must be a JSON object"));
        }
        serde_json::from_value(value)
    }
}

/// Per-stage deadlines for one event.
///
/// Taken from the live configuration each time an event arrives, so a
/// `PUT /api/v1/config` applies to the next event on every connection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageLimits {
    pub decode: Duration,
    pub classify: Duration,
}

impl From<&AppConfig> for StageLimits {
    fn from(config: &AppConfig) -> Self {
        Self {
            decode: config.decode_timeout(),
            classify: config.classify_timeout(),
        }
    }
}

/// What happened to the image half of an event.
#[derive(Debug)]
pub enum ImageOutcome {
    Absent,
    Undecodable,
    Decoded {
        frame: Arc<DecodedFrame>,
        emotion: PipelineResult<String>,
    },
}

/// What happened to the audio half of an event.
#[derive(Debug)]
pub enum AudioOutcome {
    Absent,
    Failed,
    Scored(AudioScores),
}

/// Both modality outcomes for one event, before they are merged.
#[derive(Debug)]
pub struct ProcessedEvent {
    pub image: ImageOutcome,
    pub audio: AudioOutcome,
}

impl ProcessedEvent {
    /// The frame that decoded successfully in this event, if any.
    pub fn decoded_frame(&self) -> Option<Arc<DecodedFrame>> {
        match &self.image {
            ImageOutcome::Decoded { frame, .. } => Some(Arc::clone(frame)),
            _ => None,
        }
    }

    pub fn image_failed(&self) -> bool {
        matches!(
            self.image,
            ImageOutcome::Undecodable | ImageOutcome::Decoded { emotion: Err(_), .. }
        )
    }

    pub fn audio_failed(&self) -> bool {
        matches!(self.audio, AudioOutcome::Failed)
    }

    /// Merge both outcomes into the outbound record.
    ///
    /// ## Merge rules:
    /// - undecodable image: no image fields (the failure is only logged)
    /// - classifier failure: `error: "Error: <description>"`
    /// - audio failure: the decode-failure sentinel in `anxiety_score`
    /// - statuses are derived last, from whatever scores survived
    pub fn to_result(&self) -> AnalysisResult {
        let mut result = AnalysisResult::new();

        if let ImageOutcome::Decoded { emotion, .. } = &self.image {
            match emotion {
                Ok(label) => result.emotion = Some(label.clone()),
                Err(e) => result.error = Some(format!("Error: {}", failure_description(e))),
            }
        }

        match &self.audio {
            AudioOutcome::Absent => {}
            AudioOutcome::Failed => result.set_audio_failure(),
            AudioOutcome::Scored(scores) => result.set_audio_scores(*scores),
        }

        result.derive_statuses();
        result
    }
}

/// Client-facing text for a stage failure. Stage-kind prefixes stay in the logs.
pub fn failure_description(error: &PipelineError) -> String {
    match error {
        PipelineError::DecodeFailure(msg) | PipelineError::ClassifierFailure(msg) => msg.clone(),
        timeout @ PipelineError::Timeout { .. } => timeout.to_string(),
    }
}

/// Run `future` with a deadline; on expiry the stage fails with `Timeout`.
async fn bounded<T>(
    stage: &'static str,
    limit: Duration,
    future: impl Future<Output = PipelineResult<T>>,
) -> PipelineResult<T> {
    match tokio::time::timeout(limit, future).await {
        Ok(result) => result,
        Err(_) => Err(PipelineError::Timeout { stage, after: limit }),
    }
}

/// Shared, stateless analysis machinery. One instance serves every connection;
/// per-connection state lives in `AnalysisSession`.
pub struct AnalysisPipeline {
    transcoder: Arc<dyn AudioTranscoder>,
    classifier: Arc<dyn EmotionClassifier>,
    processor: AudioProcessor,
    extractor: FeatureExtractor,
}

impl AnalysisPipeline {
    pub fn new(
        transcoder: Arc<dyn AudioTranscoder>,
        classifier: Arc<dyn EmotionClassifier>,
        config: &AppConfig,
    ) -> Self {
        Self {
            transcoder,
            classifier,
            processor: AudioProcessor::new(config.audio.sample_rate),
            extractor: FeatureExtractor::new(config.features.clone()),
        }
    }

    /// Wire the production collaborators: ffmpeg and the HTTP emotion service.
    pub fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let transcoder = Arc::new(FfmpegTranscoder::new(&config.audio));
        let classifier = Arc::new(DeepFaceClassifier::new(&config.classifier)?);
        Ok(Self::new(transcoder, classifier, config))
    }

    /// Process both modalities of one event concurrently.
    pub async fn process(&self, event: InboundEvent, limits: StageLimits) -> ProcessedEvent {
        let (image, audio) = tokio::join!(
            self.analyze_image(event.image, limits.classify),
            self.analyze_audio(event.audio_chunk, limits.decode)
        );
        ProcessedEvent { image, audio }
    }

    async fn analyze_image(&self, payload: Option<String>, classify_timeout: Duration) -> ImageOutcome {
        let Some(payload) = payload else {
            return ImageOutcome::Absent;
        };

        let decoded = tokio::task::spawn_blocking(move || normalize_image(&payload))
            .await
            .map_err(|e| PipelineError::decode(format!("image decoding task failed: {}", e)))
            .and_then(|result| result);

        let frame = match decoded {
            Ok(frame) => Arc::new(frame),
            Err(e) => {
                warn!(error = %e, "Image payload could not be decoded, skipping image analysis");
                return ImageOutcome::Undecodable;
            }
        };

        debug!(width = frame.width(), height = frame.height(), "Frame decoded");

        let emotion = bounded(
            "emotion classification",
            classify_timeout,
            self.classifier.classify(Arc::clone(&frame)),
        )
        .await;

        if let Err(e) = &emotion {
            warn!(error = %e, "Emotion classification failed");
        }

        ImageOutcome::Decoded { frame, emotion }
    }

    async fn analyze_audio(&self, payload: Option<String>, decode_timeout: Duration) -> AudioOutcome {
        let Some(payload) = payload else {
            return AudioOutcome::Absent;
        };

        match self.score_audio(&payload, decode_timeout).await {
            Ok(scores) => AudioOutcome::Scored(scores),
            Err(e) => {
                warn!(error = %e, "Audio chunk could not be analysed");
                AudioOutcome::Failed
            }
        }
    }

    async fn score_audio(&self, payload: &str, decode_timeout: Duration) -> PipelineResult<AudioScores> {
        let encoded = decode_audio_payload(payload)?;
        let pcm = bounded("audio decoding", decode_timeout, self.transcoder.transcode(encoded)).await?;

        let processor = self.processor.clone();
        let extractor = self.extractor.clone();
        let features = tokio::task::spawn_blocking(move || {
            let waveform = processor.waveform_from_pcm(&pcm)?;
            Ok::<_, PipelineError>(extractor.extract(&waveform))
        })
        .await
        .map_err(|e| PipelineError::decode(format!("feature extraction task failed: {}", e)))??;

        let scores = AudioScores::from(features);
        debug!(
            rms = features.rms,
            avg_pitch = ?features.avg_pitch,
            depression = ?scores.depression,
            anxiety = ?scores.anxiety,
            "Audio chunk scored"
        );
        Ok(scores)
    }
}

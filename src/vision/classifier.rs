//! # Emotion Classifier Adapter
//!
//! The facial-emotion model is an external capability. The pipeline only
//! knows the narrow `EmotionClassifier` trait: give it a frame, get back a
//! dominant emotion label or a `ClassifierFailure`.
//!
//! `DeepFaceClassifier` talks to a DeepFace-compatible HTTP service
//! (`POST /analyze`). Face detection enforcement is always disabled so a frame
//! without a clear face degrades to a best-effort label instead of an error.

use crate::config::ClassifierConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::vision::normalizer::DecodedFrame;
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

#[async_trait]
pub trait EmotionClassifier: Send + Sync {
    /// Dominant emotion for the (most prominent) face in the frame.
    async fn classify(&self, frame: Arc<DecodedFrame>) -> PipelineResult<String>;
}

#[derive(Debug, Serialize)]
struct AnalyzeRequest<'a> {
    img: String,
    actions: [&'a str; 1],
    enforce_detection: bool,
}

#[derive(Debug, Deserialize)]
struct FaceAnalysis {
    dominant_emotion: String,
}

/// Newer service versions wrap results in an object, older ones return the list.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AnalyzeResponse {
    Wrapped { results: Vec<FaceAnalysis> },
    Bare(Vec<FaceAnalysis>),
}

impl AnalyzeResponse {
    fn into_faces(self) -> Vec<FaceAnalysis> {
        match self {
            AnalyzeResponse::Wrapped { results } => results,
            AnalyzeResponse::Bare(faces) => faces,
        }
    }
}

/// Pull the first face's dominant emotion out of a service response body.
fn parse_dominant_emotion(body: &str) -> PipelineResult<String> {
    let response: AnalyzeResponse = serde_json::from_str(body).map_err(|e| {
        warn!(error = %e, "Emotion service response did not match the expected shape");
        PipelineError::classifier("unexpected response from emotion service")
    })?;

    response
        .into_faces()
        .into_iter()
        .next()
        .map(|face| face.dominant_emotion)
        .ok_or_else(|| PipelineError::classifier("emotion service returned no faces"))
}

/// HTTP client for a DeepFace-style analysis endpoint.
///
/// The client itself has no request timeout: the pipeline bounds every call
/// with the classification limit that is live when the event arrives.
pub struct DeepFaceClassifier {
    client: reqwest::Client,
    endpoint: String,
}

impl DeepFaceClassifier {
    pub fn new(config: &ClassifierConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
        })
    }
}

#[async_trait]
impl EmotionClassifier for DeepFaceClassifier {
    async fn classify(&self, frame: Arc<DecodedFrame>) -> PipelineResult<String> {
        // JPEG encoding is CPU work; keep it off the connection's thread
        let jpeg = tokio::task::spawn_blocking(move || frame.encode_jpeg())
            .await
            .map_err(|e| {
                warn!(error = %e, "Frame encoding task failed");
                PipelineError::classifier("frame could not be prepared for the emotion service")
            })?
            .map_err(|e| {
                warn!(error = %e, "Frame could not be encoded as JPEG");
                PipelineError::classifier("frame could not be prepared for the emotion service")
            })?;

        let request = AnalyzeRequest {
            img: format!("data:image/jpeg;base64,{}", general_purpose::STANDARD.encode(&jpeg)),
            actions: ["emotion"],
            enforce_detection: false,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                warn!(endpoint = %self.endpoint, error = %e, "Emotion service request failed");
                PipelineError::classifier("emotion service unreachable")
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| {
                warn!(endpoint = %self.endpoint, error = %e, "Failed to read emotion service response");
                PipelineError::classifier("emotion service response could not be read")
            })?;

        if !status.is_success() {
            warn!(endpoint = %self.endpoint, status = %status, body = %body, "Emotion service returned an error");
            return Err(PipelineError::classifier(format!(
                "emotion service returned {}",
                status.as_u16()
            )));
        }

        let emotion = parse_dominant_emotion(&body)?;
        debug!(emotion = %emotion, jpeg_bytes = jpeg.len(), "Frame classified");
        Ok(emotion)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use actix_web::{web, App, HttpResponse, HttpServer};
    use image::RgbImage;

    fn frame() -> Arc<DecodedFrame> {
        Arc::new(DecodedFrame::from(RgbImage::from_pixel(8, 8, image::Rgb([120, 110, 100]))))
    }

    #[test]
    fn test_parse_wrapped_and_bare_responses() {
        let wrapped = r#"{"results": [{"dominant_emotion": "neutral", "emotion": {"neutral": 91.2}}]}"#;
        assert_eq!(parse_dominant_emotion(wrapped).unwrap(), "neutral");

        let bare = r#"[{"dominant_emotion": "happy"}, {"dominant_emotion": "sad"}]"#;
        assert_eq!(parse_dominant_emotion(bare).unwrap(), "happy");
    }

    #[test]
    fn test_parse_failures() {
        assert!(matches!(
            parse_dominant_emotion(r#"{"results": []}"#),
            Err(PipelineError::ClassifierFailure(_))
        ));
        assert!(parse_dominant_emotion(r#"{"error": "Face could not be detected"}"#).is_err());
        assert_eq!(
            parse_dominant_emotion("<html>"),
            Err(PipelineError::classifier("unexpected response from emotion service"))
        );
    }

    #[test]
    fn test_request_disables_face_enforcement() {
        let request = AnalyzeRequest {
            img: "data:image/jpeg;base64,AAAA".to_string(),
            actions: ["emotion"],
            enforce_detection: false,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["enforce_detection"], false);
        assert_eq!(json["actions"][0], "emotion");
    }

    #[actix_web::test]
    async fn test_classify_against_service() {
        async fn analyze(body: web::Json<serde_json::Value>) -> HttpResponse {
            let img = body["img"].as_str().unwrap_or_default();
            if img.starts_with("data:image/jpeg;base64,") && body["enforce_detection"] == false {
                HttpResponse::Ok().json(serde_json::json!({"results": [{"dominant_emotion": "neutral"}]}))
            } else {
                HttpResponse::BadRequest().finish()
            }
        }

        let server = HttpServer::new(|| App::new().route("/analyze", web::post().to(analyze)))
            .workers(1)
            .disable_signals()
            .bind(("127.0.0.1", 0))
            .unwrap();
        let addr = server.addrs()[0];
        let server = server.run();
        let handle = server.handle();
        actix_web::rt::spawn(server);

        let mut config = AppConfig::default().classifier;
        config.endpoint = format!("http://{}/analyze", addr);
        let classifier = DeepFaceClassifier::new(&config).unwrap();

        assert_eq!(classifier.classify(frame()).await.unwrap(), "neutral");
        handle.stop(false).await;
    }

    #[actix_web::test]
    async fn test_unreachable_service_is_classifier_failure() {
        let mut config = AppConfig::default().classifier;
        config.endpoint = "http://127.0.0.1:1/analyze".to_string();
        let classifier = DeepFaceClassifier::new(&config).unwrap();

        assert!(matches!(
            classifier.classify(frame()).await,
            Err(PipelineError::ClassifierFailure(_))
        ));
    }
}

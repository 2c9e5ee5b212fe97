//! # Error Handling
//!
//! Two error families live here:
//!
//! - **AppError**: failures of the HTTP management surface (config, health).
//!   These become JSON error responses through actix's `ResponseError`.
//! - **PipelineError**: failures of a single analysis stage (decoding a frame,
//!   transcoding audio, calling the emotion service). These never leave the
//!   WebSocket session as errors; the orchestrator turns them into omitted
//!   fields or explicit error strings inside the analysis result.
//!
//! ## Key Rust Concepts for Error Handling:
//! - **Enums for error types**: each variant is one kind of failure, carrying its message
//! - **From trait**: lets `?` convert library errors into our own types
//! - **Display trait**: defines how errors are formatted as strings

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;
use std::time::Duration;

/// Custom error types for the HTTP management endpoints.
///
/// ## Error Categories:
/// - **Internal**: Server-side problems (500 errors)
/// - **BadRequest**: Client sent invalid data (400 errors)
/// - **ConfigError**: Configuration problems (500 errors)
/// - **ValidationError**: Data validation failed (400 errors)
/// - **Unavailable**: The server is at its connection limit (503 errors)
#[derive(Debug)]
pub enum AppError {
    Internal(String),
    BadRequest(String),
    ConfigError(String),
    ValidationError(String),
    Unavailable(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AppError::Unavailable(msg) => write!(f, "Service unavailable: {}", msg),
        }
    }
}

/// Converts our errors into HTTP responses with a consistent JSON body:
///
/// ```json
/// {
///   "error": {
///     "type": "validation_error",
///     "message": "Server port cannot be 0",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Internal(_) | AppError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::BadRequest(_) | AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let (error_type, message) = match self {
            AppError::Internal(msg) => ("internal_error", msg),
            AppError::BadRequest(msg) => ("bad_request", msg),
            AppError::ConfigError(msg) => ("config_error", msg),
            AppError::ValidationError(msg) => ("validation_error", msg),
            AppError::Unavailable(msg) => ("unavailable", msg),
        };

        HttpResponse::build(self.status_code()).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// JSON parsing errors are almost always the client's fault, so they map to 400.
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

/// Failure of one analysis stage for one event.
///
/// ## Variants:
/// - **DecodeFailure**: the image or audio payload could not be turned into
///   pixels/samples (bad base64, truncated bytes, unsupported format, ffmpeg exit code)
/// - **ClassifierFailure**: the emotion service could not produce a label
/// - **Timeout**: a stage exceeded its configured deadline
///
/// Missing features (no voiced frames) and inapplicable scores are *not*
/// errors; they are represented with `Option::None`.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineError {
    DecodeFailure(String),
    ClassifierFailure(String),
    Timeout { stage: &'static str, after: Duration },
}

impl PipelineError {
    pub fn decode(msg: impl Into<String>) -> Self {
        PipelineError::DecodeFailure(msg.into())
    }

    pub fn classifier(msg: impl Into<String>) -> Self {
        PipelineError::ClassifierFailure(msg.into())
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::DecodeFailure(msg) => write!(f, "decode failure: {}", msg),
            PipelineError::ClassifierFailure(msg) => write!(f, "classifier failure: {}", msg),
            PipelineError::Timeout { stage, after } => {
                write!(f, "{} timed out after {}ms", stage, after.as_millis())
            }
        }
    }
}

impl std::error::Error for PipelineError {}

/// Shorthand for stage results.
pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::StatusCode;

    #[test]
    fn test_app_error_status_codes() {
        assert_eq!(
            AppError::ValidationError("bad".into()).error_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::Unavailable("full".into()).error_response().status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            AppError::from(anyhow::anyhow!("boom")).error_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_pipeline_error_display() {
        let err = PipelineError::Timeout { stage: "audio transcoding", after: Duration::from_millis(250) };
        assert_eq!(err.to_string(), "audio transcoding timed out after 250ms");
        assert_eq!(
            PipelineError::decode("empty input").to_string(),
            "decode failure: empty input"
        );
    }
}

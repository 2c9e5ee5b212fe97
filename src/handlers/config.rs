use crate::{config::AppConfig, error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

/// Public view of the configuration. All sections are reported; only the
/// ones `update_from_json` understands can be changed at runtime.
fn config_view(config: &AppConfig) -> serde_json::Value {
    json!({
        "server": {
            "host": config.server.host,
            "port": config.server.port
        },
        "performance": {
            "max_concurrent_sessions": config.performance.max_concurrent_sessions
        },
        "audio": {
            "ffmpeg_path": config.audio.ffmpeg_path,
            "input_format": config.audio.input_format,
            "sample_rate": config.audio.sample_rate,
            "decode_timeout_ms": config.audio.decode_timeout_ms
        },
        "features": {
            "frame_length": config.features.frame_length,
            "hop_length": config.features.hop_length,
            "pitch_fmin": config.features.pitch_fmin,
            "pitch_fmax": config.features.pitch_fmax,
            "yin_threshold": config.features.yin_threshold
        },
        "classifier": {
            "endpoint": config.classifier.endpoint,
            "timeout_ms": config.classifier.timeout_ms
        },
        "websocket": {
            "heartbeat_interval_secs": config.websocket.heartbeat_interval_secs,
            "client_timeout_secs": config.websocket.client_timeout_secs
        }
    })
}

pub async fn get_config(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let config = state.get_config();

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": config_view(&config)
    })))
}

/// Apply a partial JSON update. The session limit applies to the next upgrade
/// and stage timeouts to the next event; the server address needs a restart.
pub async fn update_config(
    state: web::Data<AppState>,
    body: web::Json<serde_json::Value>,
) -> Result<HttpResponse, AppError> {
    let json_str = serde_json::to_string(&body.into_inner())?;

    let mut updated = state.get_config();
    updated
        .update_from_json(&json_str)
        .map_err(|e| AppError::ValidationError(e.to_string()))?;

    state.update_config(updated.clone()).map_err(AppError::ValidationError)?;

    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "message": "Configuration updated successfully",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "updated_config": config_view(&updated)
    })))
}

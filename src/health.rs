use crate::config::AppConfig;
use crate::state::{AppMetrics, AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;
use std::process;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let config = state.get_config();
    let uptime_seconds = state.get_uptime_seconds();

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "service": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "metrics": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": ratio(metrics.error_count, metrics.request_count),
            "active_sessions": metrics.active_sessions,
            "events_processed": metrics.analysis.events_processed
        },
        "memory": get_memory_info(),
        "collaborators": collaborators(&config),
        "system": get_system_status(&config, &metrics)
    }))
}

pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let config = state.get_config();
    let uptime_seconds = state.get_uptime_seconds();

    let endpoint_stats: Vec<_> = metrics
        .endpoint_metrics
        .iter()
        .map(|(endpoint, metric)| {
            json!({
                "endpoint": endpoint,
                "request_count": metric.request_count,
                "error_count": metric.error_count,
                "error_rate": metric.error_rate(),
                "average_duration_ms": metric.average_duration_ms(),
                "total_duration_ms": metric.total_duration_ms
            })
        })
        .collect();

    let analysis = &metrics.analysis;

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "overall": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": ratio(metrics.error_count, metrics.request_count),
            "active_sessions": metrics.active_sessions,
            "rejected_sessions": metrics.rejected_sessions,
            "requests_per_second": ratio(metrics.request_count, uptime_seconds)
        },
        "analysis": {
            "sessions_opened": analysis.sessions_opened,
            "events_processed": analysis.events_processed,
            "invalid_events": analysis.invalid_events,
            "image_failures": analysis.image_failures,
            "audio_failures": analysis.audio_failures,
            "image_failure_rate": ratio(analysis.image_failures, analysis.events_processed),
            "audio_failure_rate": ratio(analysis.audio_failures, analysis.events_processed),
            "average_processing_ms": analysis.average_processing_ms()
        },
        "endpoints": endpoint_stats,
        "memory": get_memory_info(),
        "performance": {
            "max_concurrent_sessions": config.performance.max_concurrent_sessions,
            "decode_timeout_ms": config.audio.decode_timeout_ms,
            "classifier_timeout_ms": config.classifier.timeout_ms
        }
    }))
}

fn ratio(part: u64, whole: u64) -> f64 {
    if whole > 0 {
        part as f64 / whole as f64
    } else {
        0.0
    }
}

/// External tools the pipeline depends on. Reachability is not probed here;
/// failures surface per event instead.
fn collaborators(config: &AppConfig) -> serde_json::Value {
    json!({
        "transcoder": {
            "kind": "ffmpeg",
            "path": config.audio.ffmpeg_path,
            "input_format": config.audio.input_format,
            "sample_rate": config.audio.sample_rate
        },
        "emotion_classifier": {
            "kind": "deepface_http",
            "endpoint": config.classifier.endpoint
        }
    })
}

fn get_memory_info() -> serde_json::Value {
    let pid = process::id();

    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string(format!("/proc/{}/status", pid)) {
            let field_bytes = |name: &str| {
                status
                    .lines()
                    .find(|line| line.starts_with(name))
                    .and_then(|line| line.split_whitespace().nth(1))
                    .and_then(|kb| kb.parse::<u64>().ok())
                    .map(|kb| kb * 1024)
                    .unwrap_or(0)
            };

            return json!({
                "resident_memory_bytes": field_bytes("VmRSS:"),
                "virtual_memory_bytes": field_bytes("VmSize:"),
                "available": true
            });
        }
    }

    let _ = pid;
    json!({
        "resident_memory_bytes": 0,
        "virtual_memory_bytes": 0,
        "available": false,
        "note": "Memory info not available on this platform"
    })
}

fn get_system_status(config: &AppConfig, metrics: &AppMetrics) -> serde_json::Value {
    let session_usage = if config.performance.max_concurrent_sessions > 0 {
        metrics.active_sessions as f64 / config.performance.max_concurrent_sessions as f64
    } else {
        0.0
    };

    let status = if session_usage >= 1.0 {
        "at_capacity"
    } else if session_usage > 0.7 {
        "high_load"
    } else {
        "normal"
    };

    json!({
        "status": status,
        "session_usage_percent": (session_usage * 100.0).round(),
        "max_sessions": config.performance.max_concurrent_sessions,
        "current_sessions": metrics.active_sessions,
        "rejected_sessions": metrics.rejected_sessions,
        "load_warnings": if session_usage > 0.8 {
            vec!["Session usage above 80% - new connections may be refused"]
        } else {
            vec![]
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::{call_and_read_body_json, init_service, TestRequest};
    use actix_web::App;

    #[actix_web::test]
    async fn test_health_reports_collaborators() {
        let state = AppState::new(AppConfig::default());
        state.try_acquire_session(4);

        let app = init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/health", web::get().to(health_check)),
        )
        .await;

        let body: serde_json::Value =
            call_and_read_body_json(&app, TestRequest::get().uri("/health").to_request()).await;

        assert_eq!(body["status"], "healthy");
        assert_eq!(body["metrics"]["active_sessions"], 1);
        assert_eq!(body["collaborators"]["transcoder"]["path"], "ffmpeg");
    }

    #[actix_web::test]
    async fn test_metrics_include_analysis_counters() {
        let state = AppState::new(AppConfig::default());
        state.record_invalid_event();

        let app = init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/metrics", web::get().to(detailed_metrics)),
        )
        .await;

        let body: serde_json::Value =
            call_and_read_body_json(&app, TestRequest::get().uri("/metrics").to_request()).await;

        assert_eq!(body["analysis"]["invalid_events"], 1);
        assert_eq!(body["analysis"]["image_failure_rate"], 0.0);
    }

    #[test]
    fn test_system_status_at_capacity() {
        let mut config = AppConfig::default();
        config.performance.max_concurrent_sessions = 2;
        let metrics = AppMetrics { active_sessions: 2, ..Default::default() };
        assert_eq!(get_system_status(&config, &metrics)["status"], "at_capacity");
    }
}

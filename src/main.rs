//! # Affect Stream Backend - Main Application Entry Point
//!
//! Real-time multimodal analysis server. Browsers stream webcam frames and
//! microphone chunks over a WebSocket; every event is answered with a facial
//! emotion label and voice-derived depression/anxiety indicators.
//!
//! ## Key Rust Concepts Used:
//! - **async/await**: the whole server is asynchronous
//! - **modules**: each concern lives in its own file or directory
//! - **Result<T, E>**: startup errors propagate with `?` and end the process
//! - **web::Data**: `Arc`-backed shared state handed to every handler and actor
//!
//! ## Application Architecture:
//! - **config**: layered configuration (defaults, config.toml, environment)
//! - **state**: shared metrics and runtime-updatable config
//! - **audio**: payload decoding, ffmpeg transcoding, acoustic features
//! - **vision**: frame normalization and the emotion classifier adapter
//! - **analysis**: per-event pipeline, scoring, per-connection session
//! - **websocket**: the connection actor and upgrade handler
//! - **health / handlers / middleware**: the HTTP management surface

mod analysis;
mod audio;
mod config;
mod error;
mod handlers;
mod health;
mod middleware;
mod state;
mod vision;
mod websocket;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use analysis::pipeline::AnalysisPipeline;
use anyhow::Result;
use config::AppConfig;
use state::AppState;
use tracing::{error, info};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// The main application entry point.
///
/// ## What this function does:
/// 1. **Sets up logging** and loads `.env`
/// 2. **Loads and validates configuration**
/// 3. **Builds the analysis pipeline** (ffmpeg transcoder + emotion service client)
/// 4. **Configures the HTTP server** with middleware and routes
/// 5. **Handles graceful shutdown** on Ctrl+C or SIGTERM
#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting {} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    info!(
        ffmpeg = %config.audio.ffmpeg_path,
        classifier = %config.classifier.endpoint,
        max_sessions = config.performance.max_concurrent_sessions,
        "Configuration loaded"
    );

    let pipeline = web::Data::new(AnalysisPipeline::from_config(&config)?);
    let app_state = web::Data::new(AppState::new(config.clone()));
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(app_state.clone())
            .app_data(pipeline.clone())
            // Middleware runs in reverse registration order for requests
            .wrap(middleware::RequestMetrics)
            .wrap(cors)
            .wrap(TracingLogger::default())
            .configure(websocket::configure)
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/config", web::get().to(handlers::get_config))
                    .route("/config", web::put().to(handlers::update_config)),
            )
            .route("/health", web::get().to(health::health_check))
    })
    .disable_signals()
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
                Ok(Ok(())) => {}
            }
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Initialize the tracing (logging) system.
///
/// ## Environment Variables:
/// - `RUST_LOG`: filter directives, e.g. `affect_stream_backend=trace`
/// - If not set, defaults to `affect_stream_backend=debug,actix_web=info`
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "affect_stream_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}

/// Resolve when Ctrl+C or (on Unix) SIGTERM arrives.
///
/// ## Rust Concepts:
/// - **tokio::select!**: waits for whichever signal comes first
/// - **#[cfg(unix)]**: SIGTERM only exists on Unix; elsewhere that branch never resolves
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

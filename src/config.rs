//! # Configuration Management
//!
//! This module handles loading and managing application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix, `__` between nested keys)
//! - Default values (built into the code)
//!
//! ## Key Rust Concepts Used:
//! - **Serde**: Serialization/deserialization library for converting between Rust structs and data formats
//! - **derive macros**: Automatically generate code for common traits (Debug, Clone, Serialize, Deserialize)
//! - **impl blocks**: Add methods to structs
//! - **Result<T, E>**: Error handling that forces you to handle potential failures
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Environment variables (APP_SERVER__PORT, APP_AUDIO__FFMPEG_PATH, etc.)
//! 2. Configuration file (config.toml)
//! 3. Default values (defined in the Default impl)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Main application configuration that contains all settings.
///
/// ## Why separate config structs:
/// Each section maps to one stage of the analysis pipeline (audio decoding,
/// feature extraction, emotion classification) or to the transport around it,
/// so an operator can tune one stage without reading about the others.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub performance: PerformanceConfig,
    pub audio: AudioConfig,
    pub features: FeatureConfig,
    pub classifier: ClassifierConfig,
    pub websocket: WebSocketConfig,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any IP address (production)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Connection limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    /// Upgrades beyond this many open analysis sockets are refused with 503
    pub max_concurrent_sessions: usize,
}

/// Settings for the external audio transcoder (ffmpeg).
///
/// ## Fields:
/// - `ffmpeg_path`: Binary to spawn; a bare name is resolved through `PATH`
/// - `input_format`: Container the browser records in (the pipeline only accepts one)
/// - `sample_rate`: Output rate of the decoded mono PCM stream
/// - `decode_timeout_ms`: Upper bound for a single transcoding call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    pub ffmpeg_path: String,
    pub input_format: String,
    pub sample_rate: u32,
    pub decode_timeout_ms: u64,
}

/// Framing and pitch-tracking parameters for acoustic feature extraction.
///
/// `pitch_fmin`/`pitch_fmax` bound the fundamental frequency search to the
/// human voice range. `yin_threshold` is the absolute threshold on the
/// cumulative-mean-normalised difference below which a frame counts as voiced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureConfig {
    pub frame_length: usize,
    pub hop_length: usize,
    pub pitch_fmin: f64,
    pub pitch_fmax: f64,
    pub yin_threshold: f64,
}

/// Facial emotion service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// DeepFace-compatible `/analyze` endpoint
    pub endpoint: String,
    pub timeout_ms: u64,
}

/// WebSocket keep-alive settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSocketConfig {
    pub heartbeat_interval_secs: u64,
    pub client_timeout_secs: u64,
}

/// Provides default configuration values.
///
/// ## Why defaults matter:
/// Default values ensure the application can start even if no configuration file exists.
/// They also serve as documentation of reasonable starting values.
impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            performance: PerformanceConfig {
                max_concurrent_sessions: 32,
            },
            audio: AudioConfig {
                ffmpeg_path: "ffmpeg".to_string(),
                input_format: "webm".to_string(),  // MediaRecorder default in Chromium/Firefox
                sample_rate: 16000,
                decode_timeout_ms: 5000,
            },
            features: FeatureConfig {
                frame_length: 2048,
                hop_length: 512,
                pitch_fmin: 50.0,
                pitch_fmax: 300.0,
                yin_threshold: 0.1,
            },
            classifier: ClassifierConfig {
                endpoint: "http://127.0.0.1:5005/analyze".to_string(),
                timeout_ms: 10000,
            },
            websocket: WebSocketConfig {
                heartbeat_interval_secs: 15,
                client_timeout_secs: 60,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Configuration Loading Process:
    /// 1. Start with built-in defaults
    /// 2. Override with values from config.toml (if it exists)
    /// 3. Override with environment variables prefixed with APP_
    /// 4. Handle special cases for HOST and PORT environment variables
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__PORT=3000`: Override server port
    /// - `APP_AUDIO__FFMPEG_PATH=/usr/local/bin/ffmpeg`: Use a specific ffmpeg build
    /// - `APP_CLASSIFIER__ENDPOINT=http://deepface:5005/analyze`: Point at another emotion service
    /// - `HOST=0.0.0.0` / `PORT=3000`: Special cases for deployment platforms
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            // Nested keys are split on `__` so that field names with single
            // underscores (ffmpeg_path, max_concurrent_sessions) stay intact
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## What this checks:
    /// - Server port is not 0
    /// - At least one concurrent session is allowed
    /// - The PCM sample rate is positive and the pitch search range fits under Nyquist
    /// - Frames are long enough to hold two periods of the lowest searchable pitch
    /// - Timeouts are non-zero
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.performance.max_concurrent_sessions == 0 {
            return Err(anyhow::anyhow!("Max concurrent sessions must be greater than 0"));
        }

        if self.audio.sample_rate == 0 {
            return Err(anyhow::anyhow!("Audio sample rate must be greater than 0"));
        }

        if self.audio.input_format.trim().is_empty() {
            return Err(anyhow::anyhow!("Audio input format cannot be empty"));
        }

        if self.features.hop_length == 0 || self.features.frame_length == 0 {
            return Err(anyhow::anyhow!("Frame and hop length must be greater than 0"));
        }

        if !(self.features.pitch_fmin > 0.0 && self.features.pitch_fmin < self.features.pitch_fmax) {
            return Err(anyhow::anyhow!(
                "Pitch range must satisfy 0 < fmin < fmax (got {}..{})",
                self.features.pitch_fmin, self.features.pitch_fmax
            ));
        }

        if self.features.pitch_fmax * 2.0 > self.audio.sample_rate as f64 {
            return Err(anyhow::anyhow!("Pitch fmax must be below the Nyquist frequency"));
        }

        let max_period = (self.audio.sample_rate as f64 / self.features.pitch_fmin).ceil() as usize;
        if self.features.frame_length < 2 * max_period {
            return Err(anyhow::anyhow!(
                "Frame length {} is too short for fmin {} Hz (needs at least {} samples)",
                self.features.frame_length, self.features.pitch_fmin, 2 * max_period
            ));
        }

        if !(self.features.yin_threshold > 0.0 && self.features.yin_threshold < 1.0) {
            return Err(anyhow::anyhow!("YIN threshold must be in (0, 1)"));
        }

        if self.audio.decode_timeout_ms == 0 || self.classifier.timeout_ms == 0 {
            return Err(anyhow::anyhow!("Stage timeouts must be greater than 0"));
        }

        if self.websocket.heartbeat_interval_secs == 0
            || self.websocket.client_timeout_secs <= self.websocket.heartbeat_interval_secs
        {
            return Err(anyhow::anyhow!(
                "Client timeout must be longer than the heartbeat interval"
            ));
        }

        Ok(())
    }

    pub fn decode_timeout(&self) -> Duration {
        Duration::from_millis(self.audio.decode_timeout_ms)
    }

    pub fn classify_timeout(&self) -> Duration {
        Duration::from_millis(self.classifier.timeout_ms)
    }

    /// Update configuration from a JSON string (used for runtime config updates).
    ///
    /// ## Partial updates:
    /// Only fields that are safe to change while sockets are open can be updated:
    /// server address (takes effect on restart), the session limit (next
    /// upgrade), and the stage timeouts (next event on every connection).
    /// For example `{"audio": {"decode_timeout_ms": 8000}}`.
    ///
    /// ## Rust Concepts:
    /// - **serde_json::Value**: Generic JSON value that can hold any JSON data
    /// - **and_then()**: Chain operations that might fail
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial_config: serde_json::Value = serde_json::from_str(json_str)?;

        if let Some(server) = partial_config.get("server") {
            if let Some(host) = server.get("host").and_then(|v| v.as_str()) {
                self.server.host = host.to_string();
            }
            if let Some(port) = server.get("port").and_then(|v| v.as_u64()) {
                self.server.port = u16::try_from(port)
                    .map_err(|_| anyhow::anyhow!("Port {} is out of range", port))?;
            }
        }

        if let Some(performance) = partial_config.get("performance") {
            if let Some(sessions) = performance.get("max_concurrent_sessions").and_then(|v| v.as_u64()) {
                self.performance.max_concurrent_sessions = sessions as usize;
            }
        }

        if let Some(audio) = partial_config.get("audio") {
            if let Some(timeout) = audio.get("decode_timeout_ms").and_then(|v| v.as_u64()) {
                self.audio.decode_timeout_ms = timeout;
            }
        }

        if let Some(classifier) = partial_config.get("classifier") {
            if let Some(timeout) = classifier.get("timeout_ms").and_then(|v| v.as_u64()) {
                self.classifier.timeout_ms = timeout;
            }
        }

        self.validate()?;
        Ok(())
    }
}

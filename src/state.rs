//! # Application State Management
//!
//! Shared state that every HTTP handler and WebSocket actor can reach. Only
//! cross-session data lives here: configuration and counters. Analysis state
//! (the last-known-good frame, per-connection stats) belongs to each
//! connection's `AnalysisSession` and is never put in `AppState`.
//!
//! ## Key Rust Concepts:
//!
//! ### Arc<RwLock<T>> Pattern
//! - **Arc**: many handlers and actors hold a reference to the same data
//! - **RwLock**: many readers or one writer at a time
//! - **T**: the data being protected
//!
//! ### Poisoned locks
//! A lock is poisoned when a thread panics while holding it. The counters
//! and config here stay consistent after any single write, so a poisoned
//! lock is recovered with `into_inner()` instead of taking the server down.

use crate::config::AppConfig;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

/// State shared by all handlers and connection actors.
///
/// ## Rust Concepts:
/// - **#[derive(Clone)]**: cloning copies the `Arc`s, not the data
/// - **Instant**: never changes after startup, so it needs no lock
#[derive(Debug, Clone)]
pub struct AppState {
    /// Application configuration (can be updated at runtime)
    pub config: Arc<RwLock<AppConfig>>,

    /// Request and analysis counters
    pub metrics: Arc<RwLock<AppMetrics>>,

    pub start_time: Instant,
}

/// Counters collected across all requests and connections.
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    /// Total HTTP requests processed since start
    pub request_count: u64,

    /// Total HTTP requests that ended in a 4xx/5xx
    pub error_count: u64,

    /// Currently open analysis connections
    pub active_sessions: u32,

    /// Connections turned away because the session limit was reached
    pub rejected_sessions: u64,

    /// Per-connection-lifetime analysis counters
    pub analysis: AnalysisMetrics,

    /// Key: `"<METHOD> <path>"`
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Event counters summed over all connections.
#[derive(Debug, Default, Clone)]
pub struct AnalysisMetrics {
    pub sessions_opened: u64,
    pub events_processed: u64,
    pub invalid_events: u64,
    pub image_failures: u64,
    pub audio_failures: u64,
    /// Sum of per-event processing time, for the average
    pub total_processing_ms: u64,
}

impl AnalysisMetrics {
    pub fn average_processing_ms(&self) -> f64 {
        if self.events_processed > 0 {
            self.total_processing_ms as f64 / self.events_processed as f64
        } else {
            0.0
        }
    }
}

/// Per-endpoint request statistics.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

/// Outcome of one analysed event, as seen by the metrics.
#[derive(Debug, Clone, Copy, Default)]
pub struct EventOutcome {
    pub duration_ms: u64,
    pub image_failed: bool,
    pub audio_failed: bool,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
        }
    }

    fn metrics_read(&self) -> RwLockReadGuard<'_, AppMetrics> {
        self.metrics.read().unwrap_or_else(|e| e.into_inner())
    }

    fn metrics_write(&self) -> RwLockWriteGuard<'_, AppMetrics> {
        self.metrics.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Copy of the current configuration.
    ///
    /// ## Why clone:
    /// Cloning releases the lock immediately, so other threads aren't blocked.
    pub fn get_config(&self) -> AppConfig {
        self.config.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Replace the configuration if it validates.
    pub fn update_config(&self, new_config: AppConfig) -> Result<(), String> {
        new_config.validate().map_err(|e| e.to_string())?;
        *self.config.write().unwrap_or_else(|e| e.into_inner()) = new_config;
        Ok(())
    }

    pub fn increment_request_count(&self) {
        self.metrics_write().request_count += 1;
    }

    pub fn increment_error_count(&self) {
        self.metrics_write().error_count += 1;
    }

    /// Record one request against its endpoint.
    ///
    /// ## HashMap operations:
    /// `.entry().or_default()` creates the metric the first time an endpoint is seen.
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics_write();
        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Reserve a connection slot.
    ///
    /// ## Atomicity:
    /// The check and the increment happen under one write lock, so two
    /// concurrent upgrades can never both take the last slot.
    ///
    /// Returns `false` (and counts a rejection) when `max` sessions are open.
    pub fn try_acquire_session(&self, max: usize) -> bool {
        let mut metrics = self.metrics_write();
        if metrics.active_sessions as usize >= max {
            metrics.rejected_sessions += 1;
            return false;
        }
        metrics.active_sessions += 1;
        metrics.analysis.sessions_opened += 1;
        true
    }

    /// Give a connection slot back. Never underflows.
    pub fn release_session(&self) {
        let mut metrics = self.metrics_write();
        metrics.active_sessions = metrics.active_sessions.saturating_sub(1);
    }

    pub fn active_sessions(&self) -> u32 {
        self.metrics_read().active_sessions
    }

    pub fn record_analysis_event(&self, outcome: EventOutcome) {
        let mut metrics = self.metrics_write();
        let analysis = &mut metrics.analysis;
        analysis.events_processed += 1;
        analysis.total_processing_ms += outcome.duration_ms;
        if outcome.image_failed {
            analysis.image_failures += 1;
        }
        if outcome.audio_failed {
            analysis.audio_failures += 1;
        }
    }

    pub fn record_invalid_event(&self) {
        self.metrics_write().analysis.invalid_events += 1;
    }

    /// Point-in-time copy, so handlers don't hold the lock while serializing.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics_read().clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Error rate in [0.0, 1.0].
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

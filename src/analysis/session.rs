//! # Analysis Session
//!
//! Per-connection state. Every WebSocket connection owns exactly one
//! `AnalysisSession`; nothing in here is shared with other connections.
//!
//! ## Lifecycle:
//! ```text
//! Connecting ──open()──► Open ──close()──► Closed
//! ```
//! Events are only absorbed while the session is `Open`.
//!
//! ## Last-known-good frame:
//! The most recent frame that decoded successfully is kept in a single slot.
//! It is overwritten by every newer successful decode, kept when a later
//! image fails to decode, and released when the session closes.

use crate::analysis::pipeline::{AudioOutcome, ProcessedEvent};
use crate::analysis::result::AnalysisResult;
use crate::vision::normalizer::DecodedFrame;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Connecting,
    Open,
    Closed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Connecting => "connecting",
            SessionState::Open => "open",
            SessionState::Closed => "closed",
        }
    }
}

/// Counters for one connection, logged when it closes.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionStats {
    pub events: u64,
    pub frames_decoded: u64,
    pub image_failures: u64,
    pub audio_chunks_scored: u64,
    pub audio_failures: u64,
}

/// Summary returned by `close()`.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub opened_at: Option<DateTime<Utc>>,
    pub closed_at: DateTime<Utc>,
    pub stats: SessionStats,
}

#[derive(Debug)]
pub struct AnalysisSession {
    id: Uuid,
    state: SessionState,
    last_frame: Option<Arc<DecodedFrame>>,
    opened_at: Option<DateTime<Utc>>,
    stats: SessionStats,
}

impl Default for AnalysisSession {
    fn default() -> Self {
        Self::new()
    }
}

impl AnalysisSession {
    /// Fresh session in `Connecting` state with empty attributes.
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            state: SessionState::Connecting,
            last_frame: None,
            opened_at: None,
            stats: SessionStats::default(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == SessionState::Open
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn last_frame(&self) -> Option<&Arc<DecodedFrame>> {
        self.last_frame.as_ref()
    }

    /// `Connecting → Open`. Returns `false` if the session was not connecting.
    pub fn open(&mut self) -> bool {
        if self.state != SessionState::Connecting {
            return false;
        }
        self.state = SessionState::Open;
        self.opened_at = Some(Utc::now());
        true
    }

    /// Fold one processed event into the session and produce its outbound result.
    ///
    /// ## Errors:
    /// Returns `Err` with the current state name when the session is not open;
    /// results are never produced for a closed connection.
    pub fn absorb(&mut self, event: ProcessedEvent) -> Result<AnalysisResult, &'static str> {
        if !self.is_open() {
            return Err(self.state.as_str());
        }

        self.stats.events += 1;

        if let Some(frame) = event.decoded_frame() {
            self.last_frame = Some(frame);
            self.stats.frames_decoded += 1;
        }
        if event.image_failed() {
            self.stats.image_failures += 1;
        }
        if event.audio_failed() {
            self.stats.audio_failures += 1;
        } else if matches!(event.audio, AudioOutcome::Scored(_)) {
            self.stats.audio_chunks_scored += 1;
        }

        Ok(event.to_result())
    }

    /// `Open → Closed`. Releases the cached frame. Closing twice is harmless and
    /// returns `None` the second time.
    pub fn close(&mut self) -> Option<SessionSummary> {
        if self.state == SessionState::Closed {
            return None;
        }
        self.state = SessionState::Closed;
        self.last_frame = None;

        Some(SessionSummary {
            session_id: self.id,
            opened_at: self.opened_at,
            closed_at: Utc::now(),
            stats: self.stats.clone(),
        })
    }
}

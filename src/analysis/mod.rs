//! # Analysis Module
//!
//! Everything between a parsed client event and the outbound result:
//!
//! - **pipeline**: runs the image and audio branches of one event concurrently
//! - **scoring**: feature → score → category heuristics
//! - **result**: the outbound record and its status-derivation rule
//! - **session**: per-connection state machine and last-known-good frame

pub mod pipeline;
pub mod result;
pub mod scoring;
pub mod session;

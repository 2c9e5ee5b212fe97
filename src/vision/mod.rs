//! # Vision Module
//!
//! - **normalizer**: data-URL image payloads → RGB `DecodedFrame`
//! - **classifier**: `EmotionClassifier` trait and the HTTP adapter for the
//!   external facial-emotion service

pub mod classifier;
pub mod normalizer;

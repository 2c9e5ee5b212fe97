//! # Audio Analysis Module
//!
//! Everything between a base64 `audio_chunk` and the two acoustic features:
//!
//! - **transcoder**: base64 repair/decode and WebM → s16le mono PCM via ffmpeg
//! - **processor**: PCM bytes → `DecodedWaveform` (f32 samples in [-1, 1])
//! - **features**: RMS energy and voiced pitch from a waveform
//!
//! ## Audio Format after transcoding:
//! - **Sample Rate**: 16kHz (16,000 Hz)
//! - **Bit Depth**: 16-bit PCM, little-endian signed integers
//! - **Channels**: Mono (1 channel)

pub mod features;
pub mod processor;
pub mod transcoder;

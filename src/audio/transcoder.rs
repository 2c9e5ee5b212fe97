//! # Audio Transcoding
//!
//! Browsers stream microphone audio as compressed WebM chunks. The analysis
//! pipeline needs plain mono PCM at a fixed rate, so every chunk is piped
//! through an external `ffmpeg` process:
//!
//! ```text
//! ffmpeg -f webm -i pipe:0 -f s16le -acodec pcm_s16le -ac 1 -ar 16000 pipe:1
//! ```
//!
//! The transcoder sits behind the `AudioTranscoder` trait so the session
//! pipeline can be exercised without an ffmpeg binary.

use crate::config::AudioConfig;
use crate::error::{PipelineError, PipelineResult};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// Decode-and-resample capability: compressed chunk in, s16le mono PCM out.
#[async_trait]
pub trait AudioTranscoder: Send + Sync {
    async fn transcode(&self, encoded: Vec<u8>) -> PipelineResult<Vec<u8>>;
}

/// `AudioTranscoder` backed by an `ffmpeg` child process per chunk.
///
/// ## Failure handling:
/// Spawn errors, non-zero exit codes and empty output are all reported as
/// `DecodeFailure`. ffmpeg's stderr is logged here and never returned, so
/// tool diagnostics stay on the server. The child is killed if the calling
/// future is dropped (e.g. by a timeout).
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    ffmpeg_path: String,
    input_format: String,
    sample_rate: u32,
}

impl FfmpegTranscoder {
    pub fn new(config: &AudioConfig) -> Self {
        Self {
            ffmpeg_path: config.ffmpeg_path.clone(),
            input_format: config.input_format.clone(),
            sample_rate: config.sample_rate,
        }
    }

    /// Argument list for one invocation (stdin → stdout).
    pub fn command_args(&self) -> Vec<String> {
        vec![
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-f".to_string(),
            self.input_format.clone(),
            "-i".to_string(),
            "pipe:0".to_string(),
            "-f".to_string(),
            "s16le".to_string(),
            "-acodec".to_string(),
            "pcm_s16le".to_string(),
            "-ac".to_string(),
            "1".to_string(),
            "-ar".to_string(),
            self.sample_rate.to_string(),
            "pipe:1".to_string(),
        ]
    }
}

#[async_trait]
impl AudioTranscoder for FfmpegTranscoder {
    async fn transcode(&self, encoded: Vec<u8>) -> PipelineResult<Vec<u8>> {
        if encoded.is_empty() {
            return Err(PipelineError::decode("audio chunk is empty"));
        }

        let mut child = Command::new(&self.ffmpeg_path)
            .args(self.command_args())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                warn!(ffmpeg = %self.ffmpeg_path, error = %e, "Failed to spawn ffmpeg");
                PipelineError::decode(format!("failed to spawn {}: {}", self.ffmpeg_path, e))
            })?;

        // Feed stdin from its own task so a large chunk cannot deadlock
        // against ffmpeg filling its stdout pipe
        let input_len = encoded.len();
        if let Some(mut stdin) = child.stdin.take() {
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(&encoded).await {
                    debug!(error = %e, "ffmpeg closed stdin early");
                }
            });
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| PipelineError::decode(format!("failed to wait for ffmpeg: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(
                status = %output.status,
                input_bytes = input_len,
                stderr = %stderr.trim(),
                "ffmpeg could not decode audio chunk"
            );
            return Err(PipelineError::decode(format!("ffmpeg exited with {}", output.status)));
        }

        if output.stdout.is_empty() {
            warn!(input_bytes = input_len, "ffmpeg produced no audio samples");
            return Err(PipelineError::decode("ffmpeg produced no audio samples"));
        }

        debug!(input_bytes = input_len, pcm_bytes = output.stdout.len(), "Audio chunk transcoded");
        Ok(output.stdout)
    }
}

/// Re-pad a base64 string with `=` up to a multiple of 4 characters.
///
/// Some recorders strip trailing padding when slicing data URLs into chunks.
/// Strings that are already a multiple of 4 are returned unchanged.
pub fn repair_base64_padding(payload: &str) -> String {
    match payload.len() % 4 {
        0 => payload.to_string(),
        rem => format!("{}{}", payload, "=".repeat(4 - rem)),
    }
}

/// Decode the `audio_chunk` field of an inbound event into container bytes.
pub fn decode_audio_payload(payload: &str) -> PipelineResult<Vec<u8>> {
    let padded = repair_base64_padding(payload.trim());
    general_purpose::STANDARD
        .decode(padded.as_bytes())
        .map_err(|e| PipelineError::decode(format!("invalid base64 audio: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    #[test]
    fn test_padding_repair() {
        assert_eq!(repair_base64_padding("YQ"), "YQ==");
        assert_eq!(repair_base64_padding("YWI"), "YWI=");
        assert_eq!(repair_base64_padding("Y"), "Y===");
        // Already aligned payloads are left alone
        assert_eq!(repair_base64_padding("YWJj"), "YWJj");
        assert_eq!(repair_base64_padding("YQ=="), "YQ==");
        assert_eq!(repair_base64_padding(""), "");
    }

    #[test]
    fn test_decode_audio_payload() {
        assert_eq!(decode_audio_payload("YQ").unwrap(), b"a");
        assert_eq!(decode_audio_payload("YWI").unwrap(), b"ab");
        assert_eq!(decode_audio_payload("YWJj").unwrap(), b"abc");
        // A single dangling character cannot be repaired into valid base64
        assert!(matches!(decode_audio_payload("YWJjZ"), Err(PipelineError::DecodeFailure(_))));
        assert!(decode_audio_payload("not base64!").is_err());
    }

    #[test]
    fn test_command_args() {
        let transcoder = FfmpegTranscoder::new(&AppConfig::default().audio);
        let args = transcoder.command_args().join(" ");
        assert!(args.contains("-f webm -i pipe:0"));
        assert!(args.contains("-ac 1 -ar 16000 pipe:1"));
        assert!(args.contains("pcm_s16le"));
    }

    #[tokio::test]
    async fn test_empty_chunk_is_decode_failure() {
        let transcoder = FfmpegTranscoder::new(&AppConfig::default().audio);
        assert!(matches!(
            transcoder.transcode(Vec::new()).await,
            Err(PipelineError::DecodeFailure(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_binary_is_decode_failure() {
        let mut config = AppConfig::default().audio;
        config.ffmpeg_path = "/nonexistent/bin/ffmpeg".to_string();
        let transcoder = FfmpegTranscoder::new(&config);

        let result = transcoder.transcode(vec![0x1a, 0x45, 0xdf, 0xa3]).await;
        assert!(matches!(result, Err(PipelineError::DecodeFailure(_))));
    }
}

//! # PCM Conversion
//!
//! Turns the raw output of the transcoder (16-bit signed little-endian mono PCM)
//! into a `DecodedWaveform` of floating point samples, the representation the
//! feature extractor works on.
//!
//! ## Key Functions:
//! - **Structure validation**: PCM byte streams must hold whole 16-bit samples
//! - **Format conversion**: i16 → f32 scaling from [-32768, 32767] to [-1.0, 1.0]

use crate::error::{PipelineError, PipelineResult};
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

/// Canonical mono waveform produced from one audio chunk.
///
/// ## Lifetime:
/// Scoped to a single audio-processing call; it is never stored on the session.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedWaveform {
    /// Amplitudes in [-1.0, 1.0]
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl DecodedWaveform {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self { samples, sample_rate }
    }
}

/// PCM validation and conversion utilities.
///
/// ## Purpose:
/// The transcoder guarantees the sample format, but not that the byte stream
/// is whole: a killed or crashing ffmpeg can leave half a sample at the end.
/// This struct checks the structure before any feature math runs.
#[derive(Debug, Clone)]
pub struct AudioProcessor {
    sample_rate: u32,
}

impl AudioProcessor {
    pub fn new(sample_rate: u32) -> Self {
        Self { sample_rate }
    }

    /// Decode s16le bytes into a float waveform.
    ///
    /// ## Returns:
    /// - **Ok(DecodedWaveform)**: samples scaled to [-1.0, 1.0]
    /// - **Err(DecodeFailure)**: empty stream or odd number of bytes
    ///
    /// ## Rust Concepts:
    /// - **Cursor**: Allows reading from a byte array as if it were a file
    /// - **while let Ok(...)**: Continue reading until we reach the end
    pub fn waveform_from_pcm(&self, data: &[u8]) -> PipelineResult<DecodedWaveform> {
        if data.is_empty() {
            return Err(PipelineError::decode("transcoder produced no samples"));
        }

        if data.len() % 2 != 0 {
            return Err(PipelineError::decode(format!(
                "PCM stream has {} bytes, expected whole 16-bit samples",
                data.len()
            )));
        }

        let mut cursor = Cursor::new(data);
        let mut samples = Vec::with_capacity(data.len() / 2);
        while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
            samples.push(sample);
        }

        Ok(DecodedWaveform::new(self.pcm_to_float(&samples), self.sample_rate))
    }

    /// Convert 16-bit PCM samples to 32-bit float format.
    ///
    /// Scales from the 16-bit integer range [-32768, 32767] to [-1.0, 1.0].
    pub fn pcm_to_float(&self, samples: &[i16]) -> Vec<f32> {
        samples.iter().map(|&sample| sample as f32 / 32768.0).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_waveform_from_pcm() {
        let processor = AudioProcessor::new(16000);

        let mut pcm = Vec::new();
        for sample in [0i16, 16384, -16384, 32767, -32768] {
            pcm.extend_from_slice(&sample.to_le_bytes());
        }

        let waveform = processor.waveform_from_pcm(&pcm).unwrap();
        assert_eq!(waveform.sample_rate, 16000);
        assert_eq!(waveform.samples.len(), 5);
        assert_eq!(waveform.samples[1], 0.5);
        assert_eq!(waveform.samples[2], -0.5);
        assert_eq!(waveform.samples[4], -1.0);
        assert!(waveform.samples.iter().all(|s| (-1.0..=1.0).contains(s)));
    }

    #[test]
    fn test_rejects_partial_samples() {
        let processor = AudioProcessor::new(16000);
        assert!(matches!(
            processor.waveform_from_pcm(&[0u8; 15]),
            Err(PipelineError::DecodeFailure(_))
        ));
        assert!(processor.waveform_from_pcm(&[]).is_err());
    }

    #[test]
    fn test_pcm_scaling_bounds() {
        let processor = AudioProcessor::new(16000);
        let floats = processor.pcm_to_float(&[i16::MIN, 0, i16::MAX]);
        assert_eq!(floats[0], -1.0);
        assert_eq!(floats[1], 0.0);
        assert!(floats[2] < 1.0 && floats[2] > 0.999);
    }
}

//! # Image Normalization
//!
//! Video frames arrive as data URLs (`data:image/jpeg;base64,/9j/...`). This
//! module strips the prefix, decodes the base64 body, rasterises the image and
//! forces it to 8-bit RGB regardless of the source color model.

use crate::error::{PipelineError, PipelineResult};
use base64::{engine::general_purpose, Engine as _};
use image::{DynamicImage, ImageFormat, RgbImage};
use std::io::Cursor;

/// Canonical RGB pixel buffer (height × width × 3, row-major).
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedFrame {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl DecodedFrame {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Interleaved RGB bytes, `width * height * 3` long.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Re-encode the frame for transport to an external service.
    pub fn encode_jpeg(&self) -> PipelineResult<Vec<u8>> {
        let image = RgbImage::from_raw(self.width, self.height, self.pixels().to_vec())
            .ok_or_else(|| PipelineError::decode("frame buffer does not match its dimensions"))?;

        let mut encoded = Vec::new();
        DynamicImage::ImageRgb8(image)
            .write_to(&mut Cursor::new(&mut encoded), ImageFormat::Jpeg)
            .map_err(|e| PipelineError::decode(format!("failed to encode frame as JPEG: {}", e)))?;
        Ok(encoded)
    }
}

impl From<RgbImage> for DecodedFrame {
    fn from(image: RgbImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            width,
            height,
            pixels: image.into_raw(),
        }
    }
}

/// Drop one leading `<prefix>,` segment if the payload carries one.
pub fn strip_data_url_prefix(payload: &str) -> &str {
    match payload.split_once(',') {
        Some((_, body)) => body,
        None => payload,
    }
}

/// Decode an `image` field into an RGB frame.
///
/// ## Steps:
/// 1. Strip exactly one prefix segment (`data:image/png;base64`)
/// 2. Base64-decode the remainder
/// 3. Raster-decode with the format guessed from the magic bytes
/// 4. Convert to RGB8: alpha is discarded and grayscale is expanded
///
/// Any failure is a `DecodeFailure`; the caller treats the image as absent.
pub fn normalize_image(payload: &str) -> PipelineResult<DecodedFrame> {
    let body = strip_data_url_prefix(payload).trim();
    if body.is_empty() {
        return Err(PipelineError::decode("image payload is empty"));
    }

    let bytes = general_purpose::STANDARD
        .decode(body.as_bytes())
        .map_err(|e| PipelineError::decode(format!("invalid base64 image: {}", e)))?;

    let image = image::load_from_memory(&bytes)
        .map_err(|e| PipelineError::decode(format!("unreadable image: {}", e)))?;

    Ok(DecodedFrame::from(image.to_rgb8()))
}

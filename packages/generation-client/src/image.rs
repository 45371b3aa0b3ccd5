//! Image preparation for multimodal requests.
//!
//! Every attached image is decoded, downscaled so its longest side fits
//! `max_dimension`, flattened to RGB and re-encoded as JPEG. This bounds the
//! payload size (and upstream cost) regardless of what the user uploaded.

use base64::Engine as _;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::GenericImageView;
use tracing::debug;

use crate::error::{GenerationError, Result};

/// Hard cap on raw input size before decoding is attempted.
const MAX_SOURCE_BYTES: usize = 40 * 1024 * 1024;

/// Limits applied to every attached image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageOptions {
    /// Longest side after downscaling, in pixels.
    pub max_dimension: u32,
    /// JPEG quality, 1..=100.
    pub jpeg_quality: u8,
}

impl Default for ImageOptions {
    fn default() -> Self {
        Self {
            max_dimension: 1024,
            jpeg_quality: 85,
        }
    }
}

/// An image ready for transmission.
#[derive(Debug, Clone)]
pub struct PreparedImage {
    pub mime_type: &'static str,
    pub width: u32,
    pub height: u32,
    pub bytes: Vec<u8>,
}

impl PreparedImage {
    /// Base64 payload without the data-URI prefix.
    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.bytes)
    }

    /// `data:<mime>;base64,<payload>` form used in image content parts.
    pub fn to_data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.to_base64())
    }
}

/// Decode, downscale and re-encode an image.
pub fn prepare_image(source: &[u8], options: ImageOptions) -> Result<PreparedImage> {
    if source.is_empty() {
        return Err(GenerationError::InvalidImage("image is empty".into()));
    }
    if source.len() > MAX_SOURCE_BYTES {
        return Err(GenerationError::InvalidImage(format!(
            "image is {} bytes, limit is {}",
            source.len(),
            MAX_SOURCE_BYTES
        )));
    }

    let decoded = image::load_from_memory(source)
        .map_err(|e| GenerationError::InvalidImage(format!("failed to decode image: {}", e)))?;

    let (width, height) = decoded.dimensions();
    let max = options.max_dimension.max(1);
    let resized = if width > max || height > max {
        decoded.resize(max, max, FilterType::Triangle)
    } else {
        decoded
    };

    let rgb = resized.to_rgb8();
    let mut bytes = Vec::new();
    let quality = options.jpeg_quality.clamp(1, 100);
    JpegEncoder::new_with_quality(&mut bytes, quality)
        .encode_image(&rgb)
        .map_err(|e| GenerationError::InvalidImage(format!("failed to encode image: {}", e)))?;

    debug!(
        original_width = width,
        original_height = height,
        width = rgb.width(),
        height = rgb.height(),
        original_bytes = source.len(),
        encoded_bytes = bytes.len(),
        "Prepared image for generation request"
    );

    Ok(PreparedImage {
        mime_type: "image/jpeg",
        width: rgb.width(),
        height: rgb.height(),
        bytes,
    })
}

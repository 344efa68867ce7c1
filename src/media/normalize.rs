//! Image normalization before storage
//!
//! Decodes an uploaded image once, shrinks it so its longest edge fits the
//! configured maximum, and re-encodes it as JPEG at a fixed quality.
//! Images that already fit keep their pixel dimensions.

use image::codecs::jpeg::JpegEncoder;
use image::{imageops::FilterType, DynamicImage, GenericImageView};

/// MIME type of every normalized image
pub const NORMALIZED_MIME_TYPE: &str = "image/jpeg";

/// File extension of every normalized image
pub const NORMALIZED_EXTENSION: &str = "jpg";

/// A re-encoded image ready for storage
#[derive(Debug, Clone)]
pub struct NormalizedImage {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub original_width: u32,
    pub original_height: u32,
}

/// Target dimensions so the longer edge is at most `max_edge`.
///
/// Aspect ratio is preserved with round-to-nearest on the shorter edge,
/// which never drops below one pixel.
pub fn scale_dimensions(width: u32, height: u32, max_edge: u32) -> (u32, u32) {
    let longest = width.max(height);
    if longest <= max_edge || longest == 0 {
        return (width, height);
    }

    let scale = |edge: u32| -> u32 {
        let scaled = (edge as u64 * max_edge as u64 + longest as u64 / 2) / longest as u64;
        (scaled as u32).max(1)
    };

    if width >= height {
        (max_edge, scale(height))
    } else {
        (scale(width), max_edge)
    }
}

/// Normalize on the blocking pool; decoding and resizing are CPU-bound
pub async fn normalize(bytes: Vec<u8>, max_edge: u32, quality: u8) -> Result<NormalizedImage, String> {
    tokio::task::spawn_blocking(move || normalize_blocking(&bytes, max_edge, quality))
        .await
        .map_err(|e| format!("Task join error: {}", e))?
}

/// Blocking version of normalization
pub fn normalize_blocking(bytes: &[u8], max_edge: u32, quality: u8) -> Result<NormalizedImage, String> {
    // Step 1: Decode, whatever the source format
    let img = image::load_from_memory(bytes).map_err(|e| format!("Failed to decode image: {}", e))?;
    let (original_width, original_height) = img.dimensions();

    // Step 2: Downscale only when an edge exceeds the maximum
    let (width, height) = scale_dimensions(original_width, original_height, max_edge);
    let img = if (width, height) == (original_width, original_height) {
        img
    } else {
        img.resize_exact(width, height, FilterType::Lanczos3)
    };

    tracing::debug!(
        original_width,
        original_height,
        width,
        height,
        "normalizing image"
    );

    // Step 3: Re-encode as JPEG (no alpha channel)
    let bytes = encode_jpeg(&img, quality)?;

    Ok(NormalizedImage {
        bytes,
        width,
        height,
        original_width,
        original_height,
    })
}

fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>, String> {
    let rgb = img.to_rgb8();
    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100))
        .encode_image(&rgb)
        .map_err(|e| format!("Failed to encode JPEG: {}", e))?;
    Ok(buffer)
}

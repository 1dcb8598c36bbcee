//! Frame ingestion: base64 payloads in, RGB pixel buffers out.
//!
//! Clients send each frame either as a `data:image/jpeg;base64,…` URL or
//! as the bare base64 payload. Anything that fails to decode becomes a
//! face-absent frame downstream rather than an error — the pipeline is
//! judged on how much usable signal survives, not on any single frame.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::imageops::FilterType;
use thiserror::Error;

/// A decoded frame ready for landmark extraction. RGB888, row-major.
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    pub rgb: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

#[derive(Error, Debug)]
enum DecodeError {
    #[error("base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("image: {0}")]
    Image(#[from] image::ImageError),
}

/// Decode one frame payload, downscaling to `target_width` when wider.
///
/// Returns `None` on any decode failure.
pub fn decode_frame(payload: &str, target_width: u32) -> Option<DecodedFrame> {
    match try_decode(payload, target_width) {
        Ok(frame) => Some(frame),
        Err(e) => {
            tracing::debug!(error = %e, "frame decode failed");
            None
        }
    }
}

fn try_decode(payload: &str, target_width: u32) -> Result<DecodedFrame, DecodeError> {
    // Strip a data-URL prefix if present.
    let b64 = match payload.split_once(',') {
        Some((_, rest)) => rest,
        None => payload,
    };

    let bytes = STANDARD.decode(b64.trim())?;
    let img = image::load_from_memory(&bytes)?;

    let img = if img.width() > target_width && target_width > 0 {
        let scale = target_width as f32 / img.width() as f32;
        let height = ((img.height() as f32 * scale).round() as u32).max(1);
        img.resize_exact(target_width, height, FilterType::Triangle)
    } else {
        img
    };

    let rgb = img.to_rgb8();
    Ok(DecodedFrame {
        width: rgb.width(),
        height: rgb.height(),
        rgb: rgb.into_raw(),
    })
}

/// Encode a solid-color JPEG of the given size, as bare base64. Shared by
/// the pipeline and HTTP test suites.
#[cfg(test)]
pub(crate) fn jpeg_base64(width: u32, height: u32) -> String {
    use std::io::Cursor;

    let img = image::RgbImage::from_pixel(width, height, image::Rgb([120, 110, 100]));
    let mut buf = Vec::new();
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Jpeg)
        .unwrap();
    STANDARD.encode(&buf)
}

//! Still-image codec wrappers.
//!
//! Thin layer over the `image` crate: JPEG encoding for snapshots, the raw
//! clip stream and the live endpoint, and JPEG decoding for HTTP camera
//! ingest.

use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, GenericImageView};

use crate::frame::{Frame, PixelFormat};

/// Encode a frame as JPEG at the given quality (1..=100).
pub fn encode_jpeg(frame: &Frame, quality: u8) -> Result<Vec<u8>> {
    let mut bytes = Vec::with_capacity(frame.byte_len() / 8);
    let mut encoder = JpegEncoder::new_with_quality(&mut bytes, quality);
    match frame.format {
        PixelFormat::Rgb24 => encoder
            .encode(
                frame.pixels(),
                frame.width,
                frame.height,
                ExtendedColorType::Rgb8,
            )
            .context("encode frame as jpeg")?,
    }
    Ok(bytes)
}

/// Decode a JPEG image into raw RGB pixels.
pub fn decode_jpeg(bytes: &[u8]) -> Result<(Vec<u8>, u32, u32)> {
    let image = image::load_from_memory(bytes).context("decode jpeg")?;
    let (width, height) = image.dimensions();
    let rgb = image.into_rgb8();
    Ok((rgb.into_raw(), width, height))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoded_frame_is_a_jpeg() {
        let frame = Frame::new(vec![128u8; 16 * 16 * 3], 16, 16, PixelFormat::Rgb24, 0);
        let bytes = encode_jpeg(&frame, 80).unwrap();
        assert!(bytes.len() > 4);
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
        assert_eq!(&bytes[bytes.len() - 2..], &[0xFF, 0xD9]);
    }

    #[test]
    fn decode_recovers_dimensions() {
        let frame = Frame::new(vec![40u8; 32 * 8 * 3], 32, 8, PixelFormat::Rgb24, 0);
        let bytes = encode_jpeg(&frame, 90).unwrap();
        let (pixels, width, height) = decode_jpeg(&bytes).unwrap();
        assert_eq!((width, height), (32, 8));
        assert_eq!(pixels.len(), 32 * 8 * 3);
    }
}

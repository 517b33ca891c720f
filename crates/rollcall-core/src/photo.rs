//! Enrollment photos stored on the identity record as PNG data URLs.

use crate::types::Frame;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{GrayImage, ImageFormat};
use std::io::Cursor;
use thiserror::Error;

const PNG_PREFIX: &str = "data:image/png;base64,";

#[derive(Error, Debug)]
pub enum PhotoError {
    #[error("frame buffer does not cover {width}x{height}")]
    MalformedFrame { width: u32, height: u32 },
    #[error("not a base64 data URL")]
    NotADataUrl,
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("image codec error: {0}")]
    Image(#[from] image::ImageError),
}

/// Encode a grayscale frame as `data:image/png;base64,...`.
pub fn encode_data_url(frame: &Frame) -> Result<String, PhotoError> {
    let malformed = || PhotoError::MalformedFrame {
        width: frame.width,
        height: frame.height,
    };
    if !frame.is_well_formed() {
        return Err(malformed());
    }
    let pixels = frame.width as usize * frame.height as usize;
    let image = GrayImage::from_raw(frame.width, frame.height, frame.data[..pixels].to_vec())
        .ok_or_else(malformed)?;

    let mut png = Vec::new();
    image.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;
    Ok(format!("{PNG_PREFIX}{}", STANDARD.encode(png)))
}

/// Decode any base64 image data URL back into a grayscale frame.
pub fn decode_data_url(url: &str) -> Result<Frame, PhotoError> {
    let (header, payload) = url
        .strip_prefix("data:")
        .and_then(|rest| rest.split_once(','))
        .ok_or(PhotoError::NotADataUrl)?;
    if !header.ends_with(";base64") {
        return Err(PhotoError::NotADataUrl);
    }
    let bytes = STANDARD.decode(payload.trim())?;
    let image = image::load_from_memory(&bytes)?;
    Ok(Frame::from_image(&image))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> Frame {
        let data = (0..width * height).map(|i| (i % 251) as u8).collect();
        Frame::new(data, width, height)
    }

    #[test]
    fn test_encoded_photo_decodes_to_same_pixels() {
        let frame = gradient(16, 9);
        let url = encode_data_url(&frame).unwrap();
        assert!(url.starts_with("data:image/png;base64,"));

        let decoded = decode_data_url(&url).unwrap();
        assert_eq!((decoded.width, decoded.height), (16, 9));
        assert_eq!(decoded.data, frame.data);
    }

    #[test]
    fn test_malformed_frame_is_not_encoded() {
        let frame = Frame::new(vec![0; 10], 16, 9);
        assert!(matches!(
            encode_data_url(&frame),
            Err(PhotoError::MalformedFrame { width: 16, height: 9 })
        ));
    }

    #[test]
    fn test_rejects_non_data_urls() {
        assert!(matches!(
            decode_data_url("https://example.com/a.png"),
            Err(PhotoError::NotADataUrl)
        ));
        assert!(matches!(
            decode_data_url("data:image/png,rawbytes"),
            Err(PhotoError::NotADataUrl)
        ));
        assert!(matches!(
            decode_data_url("data:image/png;base64,***"),
            Err(PhotoError::Base64(_))
        ));
    }
}

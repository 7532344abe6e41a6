//! Decoding of untrusted image uploads.

use std::io::Cursor;

use image::{ImageError, ImageReader, RgbImage};

/// Failure to turn uploaded bytes into pixels. No partial image is ever produced.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("image is empty")]
    Empty,
    #[error("unrecognized image format")]
    UnknownFormat,
    #[error("unsupported image format: {0}")]
    Unsupported(String),
    #[error("malformed image data: {0}")]
    Malformed(String),
    #[error("image too large: {0}")]
    TooLarge(String),
}

/// A fully decoded 8-bit RGB raster.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pixels: RgbImage,
}

impl DecodedImage {
    pub const CHANNELS: u8 = 3;

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn channels(&self) -> u8 {
        Self::CHANNELS
    }

    /// Row-major interleaved RGB pixels.
    pub fn pixels(&self) -> &RgbImage {
        &self.pixels
    }
}

impl From<RgbImage> for DecodedImage {
    fn from(pixels: RgbImage) -> Self {
        Self { pixels }
    }
}

/// Decode an encoded raster image (JPEG, PNG, ...) from memory.
///
/// Pure: no I/O besides allocation. Either the whole image decodes or an
/// error is returned.
pub fn decode(bytes: &[u8]) -> Result<DecodedImage, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }

    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| DecodeError::Malformed(e.to_string()))?;
    if reader.format().is_none() {
        return Err(DecodeError::UnknownFormat);
    }

    let image = reader.decode().map_err(|e| match e {
        ImageError::Unsupported(e) => DecodeError::Unsupported(e.to_string()),
        ImageError::Limits(e) => DecodeError::TooLarge(e.to_string()),
        other => DecodeError::Malformed(other.to_string()),
    })?;

    if image.width() == 0 || image.height() == 0 {
        return Err(DecodeError::Malformed("image has no pixels".to_string()));
    }

    Ok(DecodedImage {
        pixels: image.into_rgb8(),
    })
}

#[cfg(test)]
pub(crate) fn encode_for_test(image: &RgbImage, format: image::ImageFormat) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, format).unwrap();
    out.into_inner()
}

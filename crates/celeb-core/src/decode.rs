//! Image decoding boundary: browser data URLs and files on disk.

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use image::{DynamicImage, ImageDecoder, ImageError, ImageReader, RgbImage};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Standard alphabet; accepts payloads with or without `=` padding.
const PAYLOAD_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("image payload is empty")]
    EmptyPayload,
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("failed to read image {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("not a decodable image: {0}")]
    Image(#[from] image::ImageError),
    #[error("decoded image has no pixels")]
    EmptyImage,
}

/// Where a request's image comes from.
#[derive(Debug, Clone)]
pub enum ImageSource {
    /// `data:image/...;base64,<data>` or bare base64.
    Base64(String),
    /// An encoded image file.
    Path(PathBuf),
}

impl ImageSource {
    pub fn decode(&self) -> Result<RgbImage, DecodeError> {
        match self {
            ImageSource::Base64(payload) => decode_base64_image(payload),
            ImageSource::Path(path) => load_image(path),
        }
    }
}

/// Drop everything up to and including the first comma.
///
/// Payloads without a comma are returned unchanged.
pub fn strip_data_url_prefix(payload: &str) -> &str {
    match payload.split_once(',') {
        Some((_, data)) => data,
        None => payload,
    }
}

/// Decode a data URL (or bare base64) into an RGB raster.
pub fn decode_base64_image(payload: &str) -> Result<RgbImage, DecodeError> {
    let data: String = strip_data_url_prefix(payload)
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    if data.is_empty() {
        return Err(DecodeError::EmptyPayload);
    }

    let bytes = PAYLOAD_ENGINE.decode(data.as_bytes())?;
    decode_bytes(&bytes)
}

/// Read and decode an image file.
pub fn load_image(path: &Path) -> Result<RgbImage, DecodeError> {
    let bytes = std::fs::read(path).map_err(|source| DecodeError::Io {
        path: path.display().to_string(),
        source,
    })?;
    decode_bytes(&bytes)
}

/// Decode encoded bytes (format sniffed from content).
///
/// An EXIF orientation tag is applied, so camera photos come out upright.
pub fn decode_bytes(bytes: &[u8]) -> Result<RgbImage, DecodeError> {
    let mut decoder = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(ImageError::IoError)?
        .into_decoder()?;
    let orientation = decoder.orientation()?;
    let mut img = DynamicImage::from_decoder(decoder)?;
    img.apply_orientation(orientation);

    let img = img.to_rgb8();
    if img.width() == 0 || img.height() == 0 {
        return Err(DecodeError::EmptyImage);
    }
    tracing::debug!(width = img.width(), height = img.height(), "decoded image");
    Ok(img)
}

//! Feature builder: raw colour thumbnail + wavelet thumbnail, concatenated.

use crate::imgproc;
use crate::types::{FeatureVector, FEATURE_LEN, FEATURE_SIDE};
use crate::wavelet;
use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FeatureError {
    #[error("face crop is empty ({width}x{height})")]
    EmptyCrop { width: u32, height: u32 },
    #[error("wavelet image is empty")]
    EmptyWavelet,
    #[error("feature vector has {0} entries, expected {FEATURE_LEN}")]
    Length(usize),
}

/// Build the 4096-entry classifier input for one face crop.
///
/// Layout: 32×32 raw pixels flattened row-major with interleaved
/// B, G, R channels (3072 values), then the 32×32 wavelet image
/// flattened row-major (1024 values).
pub fn build_features(crop: &RgbImage) -> Result<FeatureVector, FeatureError> {
    let (width, height) = crop.dimensions();
    if width == 0 || height == 0 {
        return Err(FeatureError::EmptyCrop { width, height });
    }

    let mut values = Vec::with_capacity(FEATURE_LEN);

    let raw = imgproc::resize_bilinear(crop, FEATURE_SIDE, FEATURE_SIDE);
    for pixel in raw.pixels() {
        let [r, g, b] = pixel.0;
        values.extend([b as f32, g as f32, r as f32]);
    }

    let har = wavelet::wavelet_image(crop);
    if har.width() == 0 || har.height() == 0 {
        return Err(FeatureError::EmptyWavelet);
    }
    let har = imgproc::resize_bilinear(&har, FEATURE_SIDE, FEATURE_SIDE);
    values.extend(har.as_raw().iter().map(|&p| p as f32));

    let len = values.len();
    FeatureVector::from_values(values).ok_or(FeatureError::Length(len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RAW_FEATURE_LEN;
    use image::Rgb;

    fn textured(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x * 7 % 256) as u8, (y * 13 % 256) as u8, ((x + y) * 3 % 256) as u8])
        })
    }

    #[test]
    fn test_length_is_constant_across_sizes() {
        for (w, h) in [(1, 1), (7, 3), (32, 32), (33, 31), (120, 90), (401, 257)] {
            let v = build_features(&textured(w, h)).unwrap();
            assert_eq!(v.len(), FEATURE_LEN, "crop {w}x{h}");
        }
    }

    #[test]
    fn test_deterministic() {
        let crop = textured(87, 95);
        let a = build_features(&crop).unwrap();
        let b = build_features(&crop).unwrap();
        assert_eq!(a.as_slice(), b.as_slice());
    }

    #[test]
    fn test_raw_block_is_bgr_interleaved() {
        let crop = RgbImage::from_pixel(64, 48, Rgb([10, 20, 30]));
        let v = build_features(&crop).unwrap();
        assert_eq!(&v.as_slice()[..6], &[30.0, 20.0, 10.0, 30.0, 20.0, 10.0]);
        assert!(v.raw_block().chunks(3).all(|c| c == [30.0, 20.0, 10.0]));
    }

    #[test]
    fn test_flat_crop_has_zero_wavelet_block() {
        let crop = RgbImage::from_pixel(50, 50, Rgb([200, 100, 50]));
        let v = build_features(&crop).unwrap();
        assert_eq!(v.raw_block().len(), RAW_FEATURE_LEN);
        assert!(v.wavelet_block().iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_values_are_pixel_range() {
        let v = build_features(&textured(70, 40)).unwrap();
        assert!(v.as_slice().iter().all(|&x| (0.0..=255.0).contains(&x)));
    }

    #[test]
    fn test_empty_crop_is_error() {
        let err = build_features(&RgbImage::new(0, 10)).unwrap_err();
        assert!(matches!(err, FeatureError::EmptyCrop { width: 0, height: 10 }));
    }
}

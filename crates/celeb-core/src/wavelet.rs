//! Haar (`db1`) multilevel 2D wavelet transform and the high-pass
//! "wavelet image" used as the second feature plane.
//!
//! Odd-length lanes are extended symmetrically, so every level halves a
//! dimension rounding up. Reconstruction trims each intermediate
//! approximation to the next detail shape and returns the full final
//! size, which may exceed the input by one pixel per odd dimension.

use crate::imgproc;
use image::{GrayImage, RgbImage};
use std::f32::consts::FRAC_1_SQRT_2;

/// Decomposition depth used for feature extraction.
pub const WAVELET_LEVEL: usize = 5;

/// Row-major single-channel `f32` plane.
#[derive(Debug, Clone, PartialEq)]
pub struct Plane {
    pub width: usize,
    pub height: usize,
    pub data: Vec<f32>,
}

impl Plane {
    pub fn zeros(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![0.0; width * height],
        }
    }

    fn at(&self, x: usize, y: usize) -> f32 {
        self.data[y * self.width + x]
    }

    fn set(&mut self, x: usize, y: usize, v: f32) {
        self.data[y * self.width + x] = v;
    }

    fn shape(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    /// Top-left `width × height` window.
    fn trimmed(&self, width: usize, height: usize) -> Plane {
        if self.shape() == (width, height) {
            return self.clone();
        }
        let mut out = Plane::zeros(width, height);
        for y in 0..height {
            let src = &self.data[y * self.width..y * self.width + width];
            out.data[y * width..(y + 1) * width].copy_from_slice(src);
        }
        out
    }
}

/// Detail sub-bands of one decomposition level.
#[derive(Debug, Clone)]
pub struct Details {
    pub horizontal: Plane,
    pub vertical: Plane,
    pub diagonal: Plane,
}

/// Result of a multilevel decomposition.
#[derive(Debug, Clone)]
pub struct Decomposition {
    /// Coarsest approximation band.
    pub approximation: Plane,
    /// Detail bands, coarsest level first.
    pub details: Vec<Details>,
}

fn half(len: usize) -> usize {
    len.div_ceil(2)
}

/// One forward level: vertical split, then horizontal split of each half.
fn dwt2(input: &Plane) -> (Plane, Details) {
    let (w, h) = input.shape();
    let (hw, hh) = (half(w), half(h));

    let mut low = Plane::zeros(w, hh);
    let mut high = Plane::zeros(w, hh);
    for x in 0..w {
        for i in 0..hh {
            let a = input.at(x, 2 * i);
            let b = input.at(x, (2 * i + 1).min(h - 1));
            low.set(x, i, (a + b) * FRAC_1_SQRT_2);
            high.set(x, i, (a - b) * FRAC_1_SQRT_2);
        }
    }

    let split_rows = |src: &Plane| -> (Plane, Plane) {
        let mut lo = Plane::zeros(hw, hh);
        let mut hi = Plane::zeros(hw, hh);
        for y in 0..hh {
            for i in 0..hw {
                let a = src.at(2 * i, y);
                let b = src.at((2 * i + 1).min(w - 1), y);
                lo.set(i, y, (a + b) * FRAC_1_SQRT_2);
                hi.set(i, y, (a - b) * FRAC_1_SQRT_2);
            }
        }
        (lo, hi)
    };

    let (approximation, horizontal) = split_rows(&low);
    let (vertical, diagonal) = split_rows(&high);

    (
        approximation,
        Details {
            horizontal,
            vertical,
            diagonal,
        },
    )
}

/// One inverse level. `approximation` must match the detail shape.
fn idwt2(approximation: &Plane, details: &Details) -> Plane {
    let (hw, hh) = approximation.shape();
    let (w, h) = (hw * 2, hh * 2);

    let merge_rows = |lo: &Plane, hi: &Plane| -> Plane {
        let mut out = Plane::zeros(w, hh);
        for y in 0..hh {
            for i in 0..hw {
                let a = lo.at(i, y);
                let d = hi.at(i, y);
                out.set(2 * i, y, (a + d) * FRAC_1_SQRT_2);
                out.set(2 * i + 1, y, (a - d) * FRAC_1_SQRT_2);
            }
        }
        out
    };

    let low = merge_rows(approximation, &details.horizontal);
    let high = merge_rows(&details.vertical, &details.diagonal);

    let mut out = Plane::zeros(w, h);
    for x in 0..w {
        for i in 0..hh {
            let a = low.at(x, i);
            let d = high.at(x, i);
            out.set(x, 2 * i, (a + d) * FRAC_1_SQRT_2);
            out.set(x, 2 * i + 1, (a - d) * FRAC_1_SQRT_2);
        }
    }
    out
}

/// Multilevel forward transform. Empty planes yield no levels.
pub fn wavedec2(input: &Plane, level: usize) -> Decomposition {
    let mut approximation = input.clone();
    let mut details = Vec::with_capacity(level);
    if input.width == 0 || input.height == 0 {
        return Decomposition {
            approximation,
            details,
        };
    }

    for _ in 0..level {
        let (a, d) = dwt2(&approximation);
        approximation = a;
        details.push(d);
    }
    details.reverse();

    Decomposition {
        approximation,
        details,
    }
}

/// Multilevel inverse transform.
pub fn waverec2(decomposition: &Decomposition) -> Plane {
    let mut approximation = decomposition.approximation.clone();
    for details in &decomposition.details {
        let (w, h) = details.horizontal.shape();
        approximation = idwt2(&approximation.trimmed(w, h), details);
    }
    approximation
}

/// High-pass wavelet image of a colour crop.
///
/// Luminance (red/blue-swapped weights) scaled to `[0, 1]`, decomposed
/// `WAVELET_LEVEL` times, approximation band zeroed, reconstructed, then
/// scaled back by 255 and cast to `u8` with truncation and 8-bit wrap.
pub fn wavelet_image(crop: &RgbImage) -> GrayImage {
    let gray = imgproc::luma_channel_swapped(crop);
    let plane = Plane {
        width: gray.width() as usize,
        height: gray.height() as usize,
        data: gray.as_raw().iter().map(|&p| p as f32 / 255.0).collect(),
    };

    let mut decomposition = wavedec2(&plane, WAVELET_LEVEL);
    decomposition.approximation.data.fill(0.0);
    let restored = waverec2(&decomposition);

    let pixels = restored
        .data
        .iter()
        .map(|&v| wrap_to_u8(v * 255.0))
        .collect();
    GrayImage::from_raw(restored.width as u32, restored.height as u32, pixels)
        .unwrap_or_else(|| GrayImage::new(0, 0))
}

/// Truncate toward zero, then keep the low 8 bits.
fn wrap_to_u8(v: f32) -> u8 {
    (v as i32) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn ramp(width: usize, height: usize) -> Plane {
        Plane {
            width,
            height,
            data: (0..width * height).map(|i| (i % 17) as f32 / 16.0).collect(),
        }
    }

    fn assert_close(a: &[f32], b: &[f32]) {
        assert_eq!(a.len(), b.len());
        for (i, (x, y)) in a.iter().zip(b).enumerate() {
            assert!((x - y).abs() < 1e-4, "index {i}: {x} vs {y}");
        }
    }

    #[test]
    fn test_single_level_known_values() {
        let plane = Plane {
            width: 2,
            height: 2,
            data: vec![1.0, 2.0, 3.0, 4.0],
        };
        let (a, d) = dwt2(&plane);
        assert_close(&a.data, &[5.0]);
        assert_close(&d.horizontal.data, &[-1.0]);
        assert_close(&d.vertical.data, &[-2.0]);
        assert_close(&d.diagonal.data, &[0.0]);
    }

    #[test]
    fn test_odd_length_uses_symmetric_extension() {
        let plane = Plane {
            width: 3,
            height: 1,
            data: vec![1.0, 2.0, 3.0],
        };
        let (a, d) = dwt2(&plane);
        assert_eq!(a.shape(), (2, 1));
        // Height 1 extends to [x, x]; width 3 extends to [1, 2, 3, 3].
        assert_close(&a.data, &[3.0, 6.0]);
        assert_close(&d.horizontal.data, &[-1.0, 0.0]);
    }

    #[test]
    fn test_even_roundtrip_is_exact() {
        let plane = ramp(64, 48);
        let dec = wavedec2(&plane, WAVELET_LEVEL);
        assert_eq!(dec.details.len(), WAVELET_LEVEL);
        assert_eq!(dec.approximation.shape(), (2, 2));
        let out = waverec2(&dec);
        assert_close(&out.data, &plane.data);
    }

    #[test]
    fn test_odd_roundtrip_pads_by_one() {
        let plane = ramp(37, 29);
        let dec = wavedec2(&plane, WAVELET_LEVEL);
        let out = waverec2(&dec);
        assert_eq!(out.shape(), (38, 30));
        let trimmed = out.trimmed(37, 29);
        assert_close(&trimmed.data, &plane.data);
    }

    #[test]
    fn test_level_deeper_than_image() {
        let plane = ramp(3, 2);
        let dec = wavedec2(&plane, WAVELET_LEVEL);
        assert_eq!(dec.approximation.shape(), (1, 1));
        let out = waverec2(&dec);
        assert_close(&out.trimmed(3, 2).data, &plane.data);
    }

    #[test]
    fn test_wavelet_image_of_flat_crop_is_black() {
        let crop = RgbImage::from_pixel(40, 40, Rgb([120, 80, 200]));
        let img = wavelet_image(&crop);
        assert_eq!(img.dimensions(), (40, 40));
        assert!(img.pixels().all(|p| p.0[0] == 0));
    }

    #[test]
    fn test_wavelet_image_keeps_edges() {
        let crop = RgbImage::from_fn(32, 32, |x, _| {
            if x < 16 {
                Rgb([0, 0, 0])
            } else {
                Rgb([255, 255, 255])
            }
        });
        let img = wavelet_image(&crop);
        assert!(img.pixels().any(|p| p.0[0] != 0));
    }

    #[test]
    fn test_wavelet_image_is_deterministic() {
        let crop = RgbImage::from_fn(45, 51, |x, y| Rgb([(x * 5) as u8, (y * 3) as u8, (x ^ y) as u8]));
        assert_eq!(wavelet_image(&crop), wavelet_image(&crop));
    }

    #[test]
    fn test_wrap_to_u8() {
        assert_eq!(wrap_to_u8(12.9), 12);
        assert_eq!(wrap_to_u8(-3.7), 253);
        assert_eq!(wrap_to_u8(256.5), 0);
        assert_eq!(wrap_to_u8(f32::NAN), 0);
    }
}

//! Small raster helpers shared by the detector and the feature builder.

use crate::types::Region;
use image::{GrayImage, ImageBuffer, Pixel, RgbImage};

// BT.601 luma in 14-bit fixed point, rounding constant 1 << 13.
const LUMA_R: u32 = 4899;
const LUMA_G: u32 = 9617;
const LUMA_B: u32 = 1868;
const LUMA_SHIFT: u32 = 14;
const LUMA_ROUND: u32 = 1 << (LUMA_SHIFT - 1);

/// Convert to single-channel luminance: `0.299 R + 0.587 G + 0.114 B`.
pub fn luma(img: &RgbImage) -> GrayImage {
    weighted_luma(img, |[r, g, b]| r * LUMA_R + g * LUMA_G + b * LUMA_B)
}

/// Luminance with the red and blue weights exchanged:
/// `0.299 B + 0.587 G + 0.114 R`.
///
/// The classifier's wavelet plane was trained on this variant.
pub fn luma_channel_swapped(img: &RgbImage) -> GrayImage {
    weighted_luma(img, |[r, g, b]| b * LUMA_R + g * LUMA_G + r * LUMA_B)
}

fn weighted_luma(img: &RgbImage, weigh: impl Fn([u32; 3]) -> u32) -> GrayImage {
    let mut out = GrayImage::new(img.width(), img.height());
    for (dst, src) in out.pixels_mut().zip(img.pixels()) {
        let [r, g, b] = src.0;
        let acc = weigh([r as u32, g as u32, b as u32]);
        dst.0[0] = ((acc + LUMA_ROUND) >> LUMA_SHIFT).min(255) as u8;
    }
    out
}

/// Bilinear resize with pixel-centre alignment, any 8-bit pixel layout.
///
/// Source coordinates are `(dst + 0.5) * scale - 0.5`, clamped at the
/// borders, so a same-size resize is an exact copy.
pub fn resize_bilinear<P>(
    src: &ImageBuffer<P, Vec<u8>>,
    new_width: u32,
    new_height: u32,
) -> ImageBuffer<P, Vec<u8>>
where
    P: Pixel<Subpixel = u8>,
{
    let mut out = ImageBuffer::<P, Vec<u8>>::new(new_width, new_height);
    let width = src.width() as usize;
    let height = src.height() as usize;
    if width == 0 || height == 0 || new_width == 0 || new_height == 0 {
        return out;
    }

    let channels = P::CHANNEL_COUNT as usize;
    let new_w = new_width as usize;
    let new_h = new_height as usize;
    let scale_x = width as f32 / new_w as f32;
    let scale_y = height as f32 / new_h as f32;

    let x_spans: Vec<(usize, usize, f32)> = (0..new_w)
        .map(|x| source_span(x, scale_x, width))
        .collect();

    let frame = src.as_raw();
    let resized: &mut [u8] = &mut out;

    for y in 0..new_h {
        let (y0, y1, fy) = source_span(y, scale_y, height);
        for (x, &(x0, x1, fx)) in x_spans.iter().enumerate() {
            for c in 0..channels {
                let tl = frame[(y0 * width + x0) * channels + c] as f32;
                let tr = frame[(y0 * width + x1) * channels + c] as f32;
                let bl = frame[(y1 * width + x0) * channels + c] as f32;
                let br = frame[(y1 * width + x1) * channels + c] as f32;

                let val = tl * (1.0 - fx) * (1.0 - fy)
                    + tr * fx * (1.0 - fy)
                    + bl * (1.0 - fx) * fy
                    + br * fx * fy;

                resized[(y * new_w + x) * channels + c] = val.round().clamp(0.0, 255.0) as u8;
            }
        }
    }

    out
}

/// Neighbouring source indices and blend weight for one output coordinate.
fn source_span(dst: usize, scale: f32, len: usize) -> (usize, usize, f32) {
    let src = ((dst as f32 + 0.5) * scale - 0.5).max(0.0);
    let i0 = (src.floor() as usize).min(len - 1);
    let i1 = (i0 + 1).min(len - 1);
    let frac = (src - src.floor()).clamp(0.0, 1.0);
    (i0, i1, frac)
}

/// Copy out `region`, clipped to the image. `None` if the clip is empty.
pub fn crop<P>(
    img: &ImageBuffer<P, Vec<P::Subpixel>>,
    region: Region,
) -> Option<ImageBuffer<P, Vec<P::Subpixel>>>
where
    P: Pixel + 'static,
{
    let r = region.clamp_to(img.width(), img.height())?;
    Some(image::imageops::crop_imm(img, r.x, r.y, r.width, r.height).to_image())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgb};

    #[test]
    fn test_luma_primaries() {
        let mut img = RgbImage::new(3, 1);
        img.put_pixel(0, 0, Rgb([255, 0, 0]));
        img.put_pixel(1, 0, Rgb([0, 255, 0]));
        img.put_pixel(2, 0, Rgb([0, 0, 255]));
        let gray = luma(&img);
        assert_eq!(gray.get_pixel(0, 0).0[0], 76);
        assert_eq!(gray.get_pixel(1, 0).0[0], 150);
        assert_eq!(gray.get_pixel(2, 0).0[0], 29);
    }

    #[test]
    fn test_luma_channel_swapped_mirrors_red_and_blue() {
        let mut img = RgbImage::new(2, 1);
        img.put_pixel(0, 0, Rgb([255, 0, 0]));
        img.put_pixel(1, 0, Rgb([0, 0, 255]));
        let gray = luma_channel_swapped(&img);
        assert_eq!(gray.get_pixel(0, 0).0[0], 29);
        assert_eq!(gray.get_pixel(1, 0).0[0], 76);
    }

    #[test]
    fn test_luma_white_stays_white() {
        let img = RgbImage::from_pixel(4, 4, Rgb([255, 255, 255]));
        assert!(luma(&img).pixels().all(|p| p.0[0] == 255));
        assert!(luma_channel_swapped(&img).pixels().all(|p| p.0[0] == 255));
    }

    #[test]
    fn test_resize_same_size_is_copy() {
        let img = GrayImage::from_fn(7, 5, |x, y| Luma([(x * 30 + y * 7) as u8]));
        let out = resize_bilinear(&img, 7, 5);
        assert_eq!(out, img);
    }

    #[test]
    fn test_resize_uniform_stays_uniform() {
        let img = RgbImage::from_pixel(100, 60, Rgb([10, 128, 250]));
        let out = resize_bilinear(&img, 32, 32);
        assert_eq!(out.dimensions(), (32, 32));
        assert!(out.pixels().all(|p| p.0 == [10, 128, 250]));
    }

    #[test]
    fn test_resize_upscale_interpolates() {
        let img = GrayImage::from_raw(2, 1, vec![0, 200]).unwrap();
        let out = resize_bilinear(&img, 4, 1);
        // Centres map to -0.25, 0.25, 0.75, 1.25 in source space.
        assert_eq!(out.as_raw(), &vec![0, 50, 150, 200]);
    }

    #[test]
    fn test_resize_to_empty() {
        let img = GrayImage::new(4, 4);
        let out = resize_bilinear(&img, 0, 3);
        assert_eq!(out.dimensions(), (0, 3));
    }

    #[test]
    fn test_crop_clips_to_bounds() {
        let img = RgbImage::from_fn(10, 10, |x, y| Rgb([x as u8, y as u8, 0]));
        let out = crop(&img, Region::new(8, 7, 5, 5)).unwrap();
        assert_eq!(out.dimensions(), (2, 3));
        assert_eq!(out.get_pixel(0, 0).0, [8, 7, 0]);
        assert!(crop(&img, Region::new(10, 0, 3, 3)).is_none());
    }
}

use crate::registry::ClassRegistry;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Side length of both feature planes.
pub const FEATURE_SIDE: u32 = 32;
/// Raw colour block: 32 × 32 × 3.
pub const RAW_FEATURE_LEN: usize = (FEATURE_SIDE * FEATURE_SIDE * 3) as usize;
/// Wavelet block: 32 × 32.
pub const WAVELET_FEATURE_LEN: usize = (FEATURE_SIDE * FEATURE_SIDE) as usize;
/// Total feature vector length consumed by the classifier.
pub const FEATURE_LEN: usize = RAW_FEATURE_LEN + WAVELET_FEATURE_LEN;

/// Axis-aligned rectangle inside a source image, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Intersect with a `width × height` image. `None` if nothing is left.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<Region> {
        if self.x >= width || self.y >= height {
            return None;
        }
        let w = self.width.min(width - self.x);
        let h = self.height.min(height - self.y);
        let clamped = Region::new(self.x, self.y, w, h);
        (!clamped.is_empty()).then_some(clamped)
    }
}

/// Colour crop of a face that passed the two-eye check.
#[derive(Debug, Clone)]
pub struct QualifiedFace {
    /// Where the face was found in the source image.
    pub region: Region,
    /// Number of eye regions found inside it (always >= 2).
    pub eyes: usize,
    pub image: RgbImage,
}

/// Fixed-length classifier input: 3072 raw BGR values followed by
/// 1024 wavelet values.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    values: Vec<f32>,
}

impl FeatureVector {
    /// Wrap a vector that already has the classifier layout.
    ///
    /// Returns `None` unless `values.len() == FEATURE_LEN`.
    pub fn from_values(values: Vec<f32>) -> Option<Self> {
        (values.len() == FEATURE_LEN).then_some(Self { values })
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn raw_block(&self) -> &[f32] {
        &self.values[..RAW_FEATURE_LEN]
    }

    pub fn wavelet_block(&self) -> &[f32] {
        &self.values[RAW_FEATURE_LEN..]
    }
}

/// Classification of one qualified face.
///
/// Serializes to the wire shape clients expect:
/// `{"class": ..., "class_probability": [...], "class_dictionary": {...}}`.
#[derive(Debug, Clone, Serialize)]
pub struct ClassificationResult {
    /// Predicted class name.
    pub class: String,
    /// Percent probabilities indexed by class index, rounded to 2 decimals.
    pub class_probability: Vec<f64>,
    /// Shared name→index dictionary.
    pub class_dictionary: Arc<ClassRegistry>,
}

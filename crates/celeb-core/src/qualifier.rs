//! Face qualification: keep only faces in which at least two eyes are found.

use crate::cascade::{CascadeError, DetectParams, HaarCascade};
use crate::imgproc;
use crate::types::{QualifiedFace, Region};
use image::{GrayImage, RgbImage};
use std::path::Path;

// --- Tuning constants ---
const FACE_SCALE_FACTOR: f64 = 1.3;
const FACE_MIN_NEIGHBORS: u32 = 5;
const MIN_EYES: usize = 2;

/// Anything that can find regions of one object category in a grey image.
pub trait RegionDetector: Send {
    fn detect(&self, gray: &GrayImage) -> Result<Vec<Region>, CascadeError>;
}

/// Haar cascade bound to fixed scan parameters.
pub struct CascadeDetector {
    cascade: HaarCascade,
    params: DetectParams,
}

impl CascadeDetector {
    pub fn new(cascade: HaarCascade, params: DetectParams) -> Self {
        Self { cascade, params }
    }

    /// Frontal-face detector: scale factor 1.3, five neighbours.
    pub fn faces(cascade: HaarCascade) -> Self {
        Self::new(
            cascade,
            DetectParams {
                scale_factor: FACE_SCALE_FACTOR,
                min_neighbors: FACE_MIN_NEIGHBORS,
            },
        )
    }

    /// Eye detector with the default scan parameters.
    pub fn eyes(cascade: HaarCascade) -> Self {
        Self::new(cascade, DetectParams::default())
    }
}

impl RegionDetector for CascadeDetector {
    fn detect(&self, gray: &GrayImage) -> Result<Vec<Region>, CascadeError> {
        self.cascade.detect_multi_scale(gray, &self.params)
    }
}

/// Finds faces and keeps the ones showing two or more eyes.
pub struct FaceQualifier {
    faces: Box<dyn RegionDetector>,
    eyes: Box<dyn RegionDetector>,
}

impl FaceQualifier {
    pub fn new(faces: Box<dyn RegionDetector>, eyes: Box<dyn RegionDetector>) -> Self {
        Self { faces, eyes }
    }

    /// Load the frontal-face and eye cascades from disk.
    pub fn load(face_cascade: &Path, eye_cascade: &Path) -> Result<Self, CascadeError> {
        let faces = CascadeDetector::faces(HaarCascade::load(face_cascade)?);
        let eyes = CascadeDetector::eyes(HaarCascade::load(eye_cascade)?);
        Ok(Self::new(Box::new(faces), Box::new(eyes)))
    }

    /// Colour crops of every face with at least two eyes, in detector order.
    ///
    /// No faces, or no face with two eyes, gives an empty list.
    pub fn qualify_faces(&self, image: &RgbImage) -> Result<Vec<QualifiedFace>, CascadeError> {
        let gray = imgproc::luma(image);
        let candidates = self.faces.detect(&gray)?;

        let mut qualified = Vec::new();
        for candidate in candidates {
            let Some(region) = candidate.clamp_to(image.width(), image.height()) else {
                continue;
            };
            let Some(face_gray) = imgproc::crop(&gray, region) else {
                continue;
            };

            let eyes = self.eyes.detect(&face_gray)?.len();
            tracing::debug!(?region, eyes, "face candidate");
            if eyes < MIN_EYES {
                continue;
            }

            if let Some(face) = imgproc::crop(image, region) {
                qualified.push(QualifiedFace {
                    region,
                    eyes,
                    image: face,
                });
            }
        }

        Ok(qualified)
    }
}

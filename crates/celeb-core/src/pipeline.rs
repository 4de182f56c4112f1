//! End-to-end classification: decode → qualify → features → classifier.

use crate::cascade::CascadeError;
use crate::classifier::{Classifier, ClassifierError, OnnxClassifier};
use crate::decode::{DecodeError, ImageSource};
use crate::features::{self, FeatureError};
use crate::qualifier::FaceQualifier;
use crate::registry::{ClassRegistry, RegistryError};
use crate::types::ClassificationResult;
use image::RgbImage;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("face detection failed: {0}")]
    Detection(#[from] CascadeError),
    #[error(transparent)]
    Features(#[from] FeatureError),
    #[error("classifier failed: {0}")]
    Classifier(#[from] ClassifierError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("classifier predicted index {0}, which is not in the class dictionary")]
    UnknownClass(usize),
    #[error("classifier returned {got} probabilities for {expected} classes")]
    ProbabilityMismatch { expected: usize, got: usize },
}

/// Where the pipeline's four artifacts live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub face_cascade: PathBuf,
    pub eye_cascade: PathBuf,
    pub model: PathBuf,
    pub class_dictionary: PathBuf,
}

/// Owns every piece of inference state. Not shared; one per engine thread.
pub struct Pipeline {
    qualifier: FaceQualifier,
    classifier: Box<dyn Classifier>,
    registry: Arc<ClassRegistry>,
}

impl Pipeline {
    pub fn new(
        qualifier: FaceQualifier,
        classifier: Box<dyn Classifier>,
        registry: Arc<ClassRegistry>,
    ) -> Self {
        Self {
            qualifier,
            classifier,
            registry,
        }
    }

    /// Load cascades, model and class dictionary. Any failure is fatal to startup.
    pub fn load(paths: &ArtifactPaths) -> Result<Self, PipelineError> {
        let registry = Arc::new(ClassRegistry::load(&paths.class_dictionary)?);
        let qualifier = FaceQualifier::load(&paths.face_cascade, &paths.eye_cascade)?;
        let classifier = OnnxClassifier::load(&paths.model)?;
        tracing::info!(classes = registry.len(), "pipeline ready");
        Ok(Self::new(qualifier, Box::new(classifier), registry))
    }

    pub fn registry(&self) -> Arc<ClassRegistry> {
        Arc::clone(&self.registry)
    }

    /// Decode and classify. An image with no qualifying face yields an empty list.
    pub fn classify(&mut self, source: &ImageSource) -> Result<Vec<ClassificationResult>, PipelineError> {
        let image = source.decode()?;
        self.classify_image(&image)
    }

    /// One result per qualifying face, in qualification order.
    pub fn classify_image(&mut self, image: &RgbImage) -> Result<Vec<ClassificationResult>, PipelineError> {
        let faces = self.qualifier.qualify_faces(image)?;
        tracing::debug!(faces = faces.len(), "qualified faces");

        let mut results = Vec::with_capacity(faces.len());
        for face in &faces {
            let features = features::build_features(&face.image)?;
            let (index, probabilities) = self.classifier.classify(&features)?;

            let class = self
                .registry
                .name_of(index)
                .ok_or(PipelineError::UnknownClass(index))?
                .to_string();
            if probabilities.len() != self.registry.len() {
                return Err(PipelineError::ProbabilityMismatch {
                    expected: self.registry.len(),
                    got: probabilities.len(),
                });
            }

            tracing::info!(class = %class, region = ?face.region, "classified face");
            results.push(ClassificationResult {
                class,
                class_probability: probabilities.into_iter().map(to_percent).collect(),
                class_dictionary: Arc::clone(&self.registry),
            });
        }

        Ok(results)
    }
}

/// Fraction → percent, rounded to 2 decimals, ties to even.
pub fn to_percent(p: f64) -> f64 {
    (p * 100.0 * 100.0).round_ties_even() / 100.0
}

//! celeb-core: Sports celebrity face classification engine.
//!
//! Finds frontal faces with Haar cascades, keeps the ones showing two eyes,
//! turns each into a raw + wavelet feature vector and classifies it with a
//! model exported to ONNX.

pub mod cascade;
pub mod classifier;
pub mod decode;
pub mod features;
pub mod imgproc;
pub mod pipeline;
pub mod qualifier;
pub mod registry;
pub mod types;
pub mod wavelet;

pub use classifier::{Classifier, ClassifierError, OnnxClassifier};
pub use decode::{DecodeError, ImageSource};
pub use pipeline::{ArtifactPaths, Pipeline, PipelineError};
pub use qualifier::FaceQualifier;
pub use registry::{ClassRegistry, RegistryError};
pub use types::{ClassificationResult, FeatureVector, QualifiedFace, Region};

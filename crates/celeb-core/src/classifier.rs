//! Trained classifier boundary and the ONNX Runtime implementation.
//!
//! The model is the exported probability-capable classifier: one `f32`
//! input of shape `[1, 4096]`, an `int64` label output and an `f32`
//! probability tensor of shape `[1, n_classes]` whose columns follow
//! class-index order.

use crate::types::{FeatureVector, FEATURE_LEN};
use ndarray::Array2;
use ort::session::Session;
use ort::tensor::TensorElementType;
use ort::value::{TensorRef, ValueType};
use std::path::Path;
use thiserror::Error;

const INTRA_THREADS: usize = 2;
const LABEL_OUTPUT_NAMES: [&str; 2] = ["output_label", "label"];
const PROBABILITY_OUTPUT_NAMES: [&str; 2] = ["output_probability", "probabilities"];

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("model has no outputs")]
    NoOutputs,
    #[error("feature vector has {0} entries, expected {FEATURE_LEN}")]
    FeatureLength(usize),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("probability output {name} must be a plain f32 tensor (export without ZipMap), found {dtype}")]
    UnsupportedProbabilityOutput { name: String, dtype: String },
    #[error("model returned a negative class index {0}")]
    NegativeLabel(i64),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Maps a feature vector to a class index and per-class probabilities.
pub trait Classifier: Send {
    /// Most likely class index.
    fn predict(&mut self, features: &FeatureVector) -> Result<usize, ClassifierError>;

    /// Probability per class, indexed by class index, summing to ~1.
    fn predict_probability(&mut self, features: &FeatureVector) -> Result<Vec<f64>, ClassifierError>;

    /// Both at once. Implementations backed by a single forward pass override this.
    fn classify(&mut self, features: &FeatureVector) -> Result<(usize, Vec<f64>), ClassifierError> {
        let label = self.predict(features)?;
        let probabilities = self.predict_probability(features)?;
        Ok((label, probabilities))
    }
}

/// Output tensor positions discovered at load time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OutputIndices {
    label: Option<usize>,
    probability: usize,
}

/// Classifier exported to ONNX, run on the CPU.
pub struct OnnxClassifier {
    session: Session,
    outputs: OutputIndices,
}

impl OnnxClassifier {
    /// Load the ONNX model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, ClassifierError> {
        if !model_path.exists() {
            return Err(ClassifierError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(INTRA_THREADS)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?output_names,
            "loaded classifier model"
        );

        let outputs = discover_output_indices(&output_names).ok_or(ClassifierError::NoOutputs)?;
        check_probability_output(
            &output_names[outputs.probability],
            session.outputs()[outputs.probability].dtype(),
        )?;
        tracing::debug!(?outputs, "classifier output mapping");

        Ok(Self { session, outputs })
    }

    fn run(&mut self, features: &FeatureVector) -> Result<(Option<i64>, Vec<f64>), ClassifierError> {
        let input = to_input(features)?;
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, probabilities) = outputs[self.outputs.probability]
            .try_extract_tensor::<f32>()
            .map_err(|e| ClassifierError::InferenceFailed(format!("probabilities: {e}")))?;
        let probabilities: Vec<f64> = probabilities.iter().map(|&p| p as f64).collect();

        let label = match self.outputs.label {
            Some(idx) => {
                let (_, labels) = outputs[idx]
                    .try_extract_tensor::<i64>()
                    .map_err(|e| ClassifierError::InferenceFailed(format!("label: {e}")))?;
                labels.first().copied()
            }
            None => None,
        };

        Ok((label, probabilities))
    }
}

impl Classifier for OnnxClassifier {
    fn predict(&mut self, features: &FeatureVector) -> Result<usize, ClassifierError> {
        self.classify(features).map(|(label, _)| label)
    }

    fn predict_probability(&mut self, features: &FeatureVector) -> Result<Vec<f64>, ClassifierError> {
        self.run(features).map(|(_, probabilities)| probabilities)
    }

    fn classify(&mut self, features: &FeatureVector) -> Result<(usize, Vec<f64>), ClassifierError> {
        let (label, probabilities) = self.run(features)?;
        let label = match label {
            Some(l) if l < 0 => return Err(ClassifierError::NegativeLabel(l)),
            Some(l) => l as usize,
            None => argmax(&probabilities)
                .ok_or_else(|| ClassifierError::InferenceFailed("empty probability output".into()))?,
        };
        Ok((label, probabilities))
    }
}

/// `[1, 4096]` input batch.
fn to_input(features: &FeatureVector) -> Result<Array2<f32>, ClassifierError> {
    Array2::from_shape_vec((1, features.len()), features.as_slice().to_vec())
        .map_err(|e| ClassifierError::InferenceFailed(e.to_string()))
        .and_then(|a| {
            if a.ncols() == FEATURE_LEN {
                Ok(a)
            } else {
                Err(ClassifierError::FeatureLength(a.ncols()))
            }
        })
}

/// Find the label and probability outputs by name.
///
/// Falls back to positional ordering: `[0]` label, `[1]` probabilities.
/// A single-output model is treated as probabilities only.
fn discover_output_indices(names: &[String]) -> Option<OutputIndices> {
    let find = |candidates: &[&str]| names.iter().position(|n| candidates.contains(&n.as_str()));

    if let Some(probability) = find(&PROBABILITY_OUTPUT_NAMES) {
        return Some(OutputIndices {
            label: find(&LABEL_OUTPUT_NAMES),
            probability,
        });
    }

    match names.len() {
        0 => None,
        1 => Some(OutputIndices {
            label: None,
            probability: 0,
        }),
        _ => {
            tracing::info!(?names, "classifier output names not recognized, using positional mapping");
            Some(OutputIndices {
                label: Some(0),
                probability: 1,
            })
        }
    }
}

/// Reject probability outputs that are not `f32` tensors, such as the
/// `seq(map(int64, float))` a ZipMap export produces.
fn check_probability_output(name: &str, dtype: &ValueType) -> Result<(), ClassifierError> {
    match dtype.tensor_type() {
        Some(TensorElementType::Float32) => Ok(()),
        _ => Err(ClassifierError::UnsupportedProbabilityOutput {
            name: name.to_string(),
            dtype: format!("{dtype:?}"),
        }),
    }
}

/// Index of the largest value; first wins on ties.
pub fn argmax(values: &[f64]) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f64)>, (i, &v)| match best {
            Some((_, b)) if b >= v => best,
            _ => Some((i, v)),
        })
        .map(|(i, _)| i)
}

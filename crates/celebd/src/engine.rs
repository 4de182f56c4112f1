use celeb_core::{ClassificationResult, ImageSource, Pipeline, PipelineError};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from HTTP handlers to the engine thread.
enum EngineRequest {
    Classify {
        source: ImageSource,
        reply: oneshot::Sender<Result<Vec<ClassificationResult>, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Decode, qualify and classify one image on the engine thread.
    pub async fn classify(&self, source: ImageSource) -> Result<Vec<ClassificationResult>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Classify {
                source,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Spawn the engine on a dedicated OS thread that owns `pipeline`.
///
/// `queue` bounds the number of requests waiting for the thread.
pub fn spawn_engine(mut pipeline: Pipeline, queue: usize) -> Result<EngineHandle, EngineError> {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(queue.max(1));

    std::thread::Builder::new()
        .name("celeb-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Classify { source, reply } => {
                        let result = pipeline.classify(&source).map_err(EngineError::from);
                        if let Err(e) = &result {
                            tracing::warn!(error = %e, "classification failed");
                        }
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}

#[cfg(test)]
mod tests {
    use super::*;
    use celeb_core::cascade::CascadeError;
    use celeb_core::qualifier::RegionDetector;
    use celeb_core::{ClassRegistry, Classifier, ClassifierError, FaceQualifier, FeatureVector, Region};
    use image::GrayImage;
    use std::sync::Arc;

    struct NoFaces;

    impl RegionDetector for NoFaces {
        fn detect(&self, _gray: &GrayImage) -> Result<Vec<Region>, CascadeError> {
            Ok(Vec::new())
        }
    }

    struct Never;

    impl Classifier for Never {
        fn predict(&mut self, _f: &FeatureVector) -> Result<usize, ClassifierError> {
            Err(ClassifierError::NoOutputs)
        }

        fn predict_probability(&mut self, _f: &FeatureVector) -> Result<Vec<f64>, ClassifierError> {
            Err(ClassifierError::NoOutputs)
        }
    }

    fn pipeline() -> Pipeline {
        let registry = ClassRegistry::from_json(r#"{"a": 0, "b": 1}"#).unwrap();
        Pipeline::new(
            FaceQualifier::new(Box::new(NoFaces), Box::new(NoFaces)),
            Box::new(Never),
            Arc::new(registry),
        )
    }

    #[tokio::test]
    async fn test_decode_error_is_returned() {
        let engine = spawn_engine(pipeline(), 1).unwrap();
        let err = engine
            .classify(ImageSource::Base64("data:image/png;base64,".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Pipeline(PipelineError::Decode(_))));
    }

    #[tokio::test]
    async fn test_handles_are_shared() {
        let engine = spawn_engine(pipeline(), 0).unwrap();
        let other = engine.clone();
        let (a, b) = tokio::join!(
            engine.classify(ImageSource::Base64("@@".into())),
            other.classify(ImageSource::Path("/nonexistent.png".into())),
        );
        assert!(a.is_err());
        assert!(b.is_err());
    }
}

use std::sync::Arc;

use rollcall_core::{
    CosineMatcher, EmbeddingExtractor, EnrollOutcome, FaceCropper, FaceDetector, FacePipeline,
    FaceRecognizer, IdentityKey, IdentityStore, RecognizeOutcome, ServiceError,
};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::config::Config;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("detector error: {0}")]
    Detector(#[from] rollcall_core::detector::DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] rollcall_core::recognizer::RecognizerError),
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from D-Bus handlers to the engine thread.
enum EngineRequest {
    Enroll {
        key: IdentityKey,
        image: Vec<u8>,
        reply: oneshot::Sender<Result<EnrollOutcome, EngineError>>,
    },
    Recognize {
        image: Vec<u8>,
        threshold: f32,
        reply: oneshot::Sender<Result<RecognizeOutcome, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Detect, embed and store the face in `image` under `key`.
    pub async fn enroll(&self, key: IdentityKey, image: Vec<u8>) -> Result<EnrollOutcome, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Enroll {
                key,
                image,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Detect and embed the face in `image`, then match it against the store.
    pub async fn recognize(&self, image: Vec<u8>, threshold: f32) -> Result<RecognizeOutcome, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Recognize {
                image,
                threshold,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Load both ONNX models and spawn the engine on a dedicated OS thread.
///
/// Fails fast at startup if either model is missing or cannot be loaded.
pub fn spawn_engine<S>(config: &Config, store: Arc<S>) -> Result<EngineHandle, EngineError>
where
    S: IdentityStore + Send + Sync + 'static,
{
    let detector_path = config.detector_model_path();
    let detector = FaceDetector::load(&detector_path, config.intra_threads)?;
    tracing::info!(path = %detector_path.display(), "SCRFD detector loaded");

    let recognizer_path = config.recognizer_model_path();
    let recognizer = FaceRecognizer::load(&recognizer_path, config.intra_threads)?;
    tracing::info!(path = %recognizer_path.display(), "ArcFace recognizer loaded");

    spawn_engine_with(FacePipeline::new(detector, recognizer), store)
}

/// Spawn the request loop around an already-built pipeline.
///
/// Requests are served one at a time, so enrollments and recognitions never
/// interleave on the models or the store.
pub fn spawn_engine_with<D, E, S>(
    mut pipeline: FacePipeline<D, E>,
    store: Arc<S>,
) -> Result<EngineHandle, EngineError>
where
    D: FaceCropper + Send + 'static,
    E: EmbeddingExtractor + Send + 'static,
    S: IdentityStore + Send + Sync + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);
    let matcher = CosineMatcher;

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Enroll { key, image, reply } => {
                        let result = rollcall_core::enroll(&mut pipeline, store.as_ref(), &key, &image)
                            .map_err(EngineError::from);
                        let _ = reply.send(result);
                    }
                    EngineRequest::Recognize {
                        image,
                        threshold,
                        reply,
                    } => {
                        let result = rollcall_core::recognize(
                            &mut pipeline,
                            store.as_ref(),
                            &matcher,
                            &image,
                            threshold,
                        )
                        .map_err(EngineError::from);
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}

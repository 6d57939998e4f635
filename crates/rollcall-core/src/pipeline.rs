//! Shared front half of enrollment and recognition:
//! bytes → decoded image → primary face crop → embedding.

use crate::detector::{DetectorError, FaceCropper};
use crate::recognizer::{EmbeddingExtractor, RecognizerError};
use crate::store::StoreError;
use crate::types::{Embedding, FaceCrop};
use image::RgbImage;
use thiserror::Error;

/// Message reported when the detector finds no face.
pub const MSG_FACE_NOT_DETECTED: &str = "face not detected";

/// Infrastructure failures. Bad input and absent faces are not errors; they
/// are reported through [`Stage`] and the service outcomes.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// How far an image made it through the pipeline.
#[derive(Debug, Clone)]
pub enum Stage {
    /// The bytes are not a decodable raster image.
    DecodeFailed(String),
    /// Decoded, but no face was found.
    NoFace,
    /// A face was found and embedded.
    Embedded { crop: FaceCrop, embedding: Embedding },
}

/// Detector + extractor pair, loaded once and reused for every request.
pub struct FacePipeline<D, E> {
    detector: D,
    extractor: E,
}

impl<D: FaceCropper, E: EmbeddingExtractor> FacePipeline<D, E> {
    pub fn new(detector: D, extractor: E) -> Self {
        Self { detector, extractor }
    }

    /// Run decode → detect → embed, stopping at the first stage that fails.
    pub fn process(&mut self, bytes: &[u8]) -> Result<Stage, ServiceError> {
        let image = match decode_image(bytes) {
            Ok(image) => image,
            Err(err) => {
                tracing::debug!(len = bytes.len(), error = %err, "image decode failed");
                return Ok(Stage::DecodeFailed(err.to_string()));
            }
        };

        let Some(crop) = self.detector.detect_and_crop(&image)? else {
            return Ok(Stage::NoFace);
        };

        let embedding = self.extractor.embed(&crop)?;
        Ok(Stage::Embedded { crop, embedding })
    }
}

/// Decode JPEG/PNG/... bytes into an 8-bit RGB image.
pub fn decode_image(bytes: &[u8]) -> Result<RgbImage, image::ImageError> {
    Ok(image::load_from_memory(bytes)?.to_rgb8())
}

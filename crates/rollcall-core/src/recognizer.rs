//! ArcFace face recognizer via ONNX Runtime.
//!
//! Extracts 512-dimensional unit-length face embeddings from aligned
//! 112×112 RGB face crops, using the w600k_r50 ArcFace model.

use crate::alignment::ALIGNED_SIZE;
use crate::types::{Embedding, FaceCrop};
use image::{imageops, RgbImage};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

// --- Named constants (different from SCRFD!) ---
const ARCFACE_INPUT_SIZE: usize = ALIGNED_SIZE as usize;
const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5; // not 128.0; maps [0, 255] onto [-1, 1]
const ARCFACE_EMBEDDING_DIM: usize = 512;
const ARCFACE_MODEL_VERSION: &str = "w600k_r50";

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0}; download from insightface and place in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("model produced a zero or non-finite embedding")]
    DegenerateEmbedding,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Maps a face crop to a unit-length embedding.
///
/// Implementations must L2-normalize their output; the matcher relies on it.
pub trait EmbeddingExtractor {
    fn embed(&mut self, crop: &FaceCrop) -> Result<Embedding, RecognizerError>;
}

/// ArcFace-based face recognizer.
pub struct FaceRecognizer {
    session: Session,
}

impl FaceRecognizer {
    /// Load the ArcFace ONNX model from the given path.
    pub fn load(model_path: &Path, intra_threads: usize) -> Result<Self, RecognizerError> {
        if !model_path.exists() {
            return Err(RecognizerError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(intra_threads)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded ArcFace model"
        );

        Ok(Self { session })
    }

    /// Convert a 112×112 RGB crop into a normalized NCHW float tensor.
    /// Crops of any other size are resized first.
    fn preprocess(crop: &RgbImage) -> Array4<f32> {
        let size = ARCFACE_INPUT_SIZE;
        let resized;
        let crop = if crop.dimensions() == (ALIGNED_SIZE, ALIGNED_SIZE) {
            crop
        } else {
            resized = imageops::resize(crop, ALIGNED_SIZE, ALIGNED_SIZE, imageops::FilterType::Triangle);
            &resized
        };

        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
        for (x, y, pixel) in crop.enumerate_pixels() {
            for c in 0..3 {
                tensor[[0, c, y as usize, x as usize]] = (pixel.0[c] as f32 - ARCFACE_MEAN) / ARCFACE_STD;
            }
        }
        tensor
    }
}

impl EmbeddingExtractor for FaceRecognizer {
    fn embed(&mut self, crop: &FaceCrop) -> Result<Embedding, RecognizerError> {
        let input = Self::preprocess(&crop.image);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw_data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("embedding extraction: {e}")))?;

        if raw_data.len() != ARCFACE_EMBEDDING_DIM {
            return Err(RecognizerError::InferenceFailed(format!(
                "expected {ARCFACE_EMBEDDING_DIM}-dim embedding, got {}",
                raw_data.len()
            )));
        }

        Embedding::normalized(raw_data.to_vec(), Some(ARCFACE_MODEL_VERSION.to_string()))
            .ok_or(RecognizerError::DegenerateEmbedding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_preprocess_output_shape() {
        let crop = RgbImage::from_pixel(ALIGNED_SIZE, ALIGNED_SIZE, Rgb([128, 128, 128]));
        let tensor = FaceRecognizer::preprocess(&crop);
        assert_eq!(tensor.shape(), &[1, 3, ARCFACE_INPUT_SIZE, ARCFACE_INPUT_SIZE]);
    }

    #[test]
    fn test_preprocess_symmetric_range() {
        let mut crop = RgbImage::from_pixel(ALIGNED_SIZE, ALIGNED_SIZE, Rgb([0, 255, 128]));
        crop.put_pixel(3, 7, Rgb([255, 0, 0]));
        let tensor = FaceRecognizer::preprocess(&crop);

        assert!((tensor[[0, 0, 0, 0]] + 1.0).abs() < 1e-6);
        assert!((tensor[[0, 1, 0, 0]] - 1.0).abs() < 1e-6);
        let expected = (128.0 - ARCFACE_MEAN) / ARCFACE_STD;
        assert!((tensor[[0, 2, 0, 0]] - expected).abs() < 1e-6);

        // NCHW indexing: channel, row (y), column (x).
        assert!((tensor[[0, 0, 7, 3]] - 1.0).abs() < 1e-6);
        assert!((tensor[[0, 1, 7, 3]] + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_preprocess_resizes_odd_crops() {
        let crop = RgbImage::from_pixel(160, 160, Rgb([255, 255, 255]));
        let tensor = FaceRecognizer::preprocess(&crop);
        assert_eq!(tensor.shape(), &[1, 3, ARCFACE_INPUT_SIZE, ARCFACE_INPUT_SIZE]);
        assert!((tensor[[0, 0, 56, 56]] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_load_missing_model() {
        let err = FaceRecognizer::load(Path::new("/nonexistent/w600k_r50.onnx"), 1)
            .err()
            .expect("load must fail without a model file");
        assert!(matches!(err, RecognizerError::ModelNotFound(_)));
    }
}

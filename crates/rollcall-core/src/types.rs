use image::RgbImage;
use serde::{Deserialize, Serialize};

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }
}

/// A single face cut out of an input image, already at the extractor's input size.
#[derive(Debug, Clone)]
pub struct FaceCrop {
    pub image: RgbImage,
    /// Detection the crop was taken from, in source-image coordinates.
    pub face: BoundingBox,
}

/// Face embedding vector (512-dimensional for ArcFace).
///
/// Embeddings produced by an extractor are unit length; use
/// [`Embedding::normalized`] to build one from raw model output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    /// L2-normalize raw model output. Returns `None` when the vector has zero
    /// or non-finite norm, since no unit vector can be derived from it.
    pub fn normalized(raw: Vec<f32>, model_version: Option<String>) -> Option<Self> {
        let norm = l2_norm(&raw);
        if !norm.is_finite() || norm <= 0.0 {
            return None;
        }
        Some(Self {
            values: raw.into_iter().map(|x| x / norm).collect(),
            model_version,
        })
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    pub fn norm(&self) -> f32 {
        l2_norm(&self.values)
    }

    /// Cosine similarity between two embeddings, in [-1, 1]. Higher = more similar.
    ///
    /// Divides by both norms even though stored and extracted embeddings are
    /// already unit length. Zero vectors score 0.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 {
            (dot / denom).clamp(-1.0, 1.0)
        } else {
            0.0
        }
    }
}

fn l2_norm(values: &[f32]) -> f32 {
    values.iter().map(|x| x * x).sum::<f32>().sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emb(values: &[f32]) -> Embedding {
        Embedding { values: values.to_vec(), model_version: None }
    }

    #[test]
    fn test_similarity_identical() {
        let a = emb(&[1.0, 0.0, 0.0]);
        assert!((a.similarity(&a.clone()) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_similarity_orthogonal() {
        assert!(emb(&[1.0, 0.0]).similarity(&emb(&[0.0, 1.0])).abs() < 1e-6);
    }

    #[test]
    fn test_similarity_opposite() {
        assert!((emb(&[1.0, 0.0]).similarity(&emb(&[-1.0, 0.0])) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_similarity_renormalizes() {
        // Not unit length on either side; cosine must ignore magnitude.
        let a = emb(&[3.0, 4.0]);
        let b = emb(&[0.6, 0.8]);
        assert!((a.similarity(&b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_similarity_zero_vector() {
        assert_eq!(emb(&[0.0, 0.0]).similarity(&emb(&[1.0, 0.0])), 0.0);
    }

    #[test]
    fn test_normalized_is_unit_length() {
        let e = Embedding::normalized(vec![3.0, 4.0, 12.0], Some("test".into())).unwrap();
        assert!((e.norm() - 1.0).abs() < 1e-6);
        assert!((e.values[0] - 3.0 / 13.0).abs() < 1e-6);
        assert_eq!(e.model_version.as_deref(), Some("test"));
    }

    #[test]
    fn test_normalized_rejects_degenerate() {
        assert!(Embedding::normalized(vec![0.0; 8], None).is_none());
        assert!(Embedding::normalized(vec![f32::NAN, 1.0], None).is_none());
        assert!(Embedding::normalized(Vec::new(), None).is_none());
    }

    #[test]
    fn test_bbox_area() {
        let b = BoundingBox {
            x: 0.0, y: 0.0, width: 10.0, height: 5.0,
            confidence: 0.9, landmarks: None,
        };
        assert_eq!(b.area(), 50.0);
    }
}

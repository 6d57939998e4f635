//! SCRFD face detector via ONNX Runtime.
//!
//! Implements the SCRFD (Sample and Computation Redistribution for Efficient Face
//! Detection) model with 3-stride anchor-free decoding and NMS post-processing,
//! plus the primary-face policy used to turn a photo into a single face crop.

use crate::alignment;
use crate::types::{BoundingBox, FaceCrop};
use image::{imageops, RgbImage};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::cmp::Ordering;
use std::path::Path;
use thiserror::Error;

// --- Named constants (no magic numbers) ---
const SCRFD_INPUT_SIZE: usize = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_CONFIDENCE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}; download from insightface and place in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Anything that can find the primary face in an image and cut it out.
///
/// Implemented by [`FaceDetector`]; tests substitute their own.
pub trait FaceCropper {
    /// Returns `Ok(None)` when the image contains no face.
    fn detect_and_crop(&mut self, image: &RgbImage) -> Result<Option<FaceCrop>, DetectorError>;
}

/// Metadata for coordinate de-mapping after letterbox resize.
struct LetterboxInfo {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

/// Output tensor indices for one stride: (score_idx, bbox_idx, kps_idx).
type StrideOutputIndices = (usize, usize, usize);

/// SCRFD-based face detector.
pub struct FaceDetector {
    session: Session,
    input_size: usize,
    /// Per-stride output indices [(score, bbox, kps)] for strides [8, 16, 32].
    stride_indices: [StrideOutputIndices; 3],
}

impl FaceDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &Path, intra_threads: usize) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(intra_threads)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();

        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?output_names,
            "loaded SCRFD model"
        );

        if output_names.len() < 9 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model requires 9 outputs (3 strides × score/bbox/kps), got {}",
                output_names.len()
            )));
        }

        let stride_indices = discover_output_indices(&output_names);
        tracing::debug!(?stride_indices, "SCRFD output tensor mapping");

        Ok(Self {
            session,
            input_size: SCRFD_INPUT_SIZE,
            stride_indices,
        })
    }

    /// Detect faces in an RGB image, returning bounding boxes sorted by confidence.
    pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
        if image.width() == 0 || image.height() == 0 {
            return Ok(Vec::new());
        }

        let (input, letterbox) = self.preprocess(image);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut all_detections = Vec::new();
        for (stride_pos, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx, kps_idx) = self.stride_indices[stride_pos];

            let extract = |idx: usize, what: &str| {
                outputs[idx]
                    .try_extract_tensor::<f32>()
                    .map(|(_, data)| data)
                    .map_err(|e| DetectorError::InferenceFailed(format!("{what} stride {stride}: {e}")))
            };
            let scores = extract(score_idx, "scores")?;
            let bboxes = extract(bbox_idx, "bboxes")?;
            let kps = extract(kps_idx, "kps")?;

            all_detections.extend(decode_stride(
                scores,
                bboxes,
                kps,
                stride,
                self.input_size,
                &letterbox,
                SCRFD_CONFIDENCE_THRESHOLD,
            ));
        }

        let mut result = nms(all_detections, SCRFD_NMS_THRESHOLD);
        result.sort_by(by_confidence_desc);
        Ok(result)
    }

    /// Letterbox an RGB image into a normalized 1×3×640×640 tensor.
    fn preprocess(&self, image: &RgbImage) -> (Array4<f32>, LetterboxInfo) {
        let size = self.input_size;
        let (width, height) = (image.width() as f32, image.height() as f32);
        let scale = (size as f32 / width).min(size as f32 / height);

        let new_w = ((width * scale).round() as u32).clamp(1, size as u32);
        let new_h = ((height * scale).round() as u32).clamp(1, size as u32);
        let pad_x = (size as u32 - new_w) / 2;
        let pad_y = (size as u32 - new_h) / 2;

        let resized = imageops::resize(image, new_w, new_h, imageops::FilterType::Triangle);

        // Padding stays at 0.0, which is what SCRFD_MEAN normalizes to.
        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
        for (x, y, pixel) in resized.enumerate_pixels() {
            let (tx, ty) = ((x + pad_x) as usize, (y + pad_y) as usize);
            for c in 0..3 {
                tensor[[0, c, ty, tx]] = (pixel.0[c] as f32 - SCRFD_MEAN) / SCRFD_STD;
            }
        }

        let letterbox = LetterboxInfo {
            scale,
            pad_x: pad_x as f32,
            pad_y: pad_y as f32,
        };
        (tensor, letterbox)
    }
}

impl FaceCropper for FaceDetector {
    fn detect_and_crop(&mut self, image: &RgbImage) -> Result<Option<FaceCrop>, DetectorError> {
        let faces = self.detect(image)?;
        let Some(face) = select_primary(&faces) else {
            tracing::debug!(width = image.width(), height = image.height(), "no face detected");
            return Ok(None);
        };

        tracing::debug!(
            candidates = faces.len(),
            confidence = face.confidence,
            has_landmarks = face.landmarks.is_some(),
            "primary face selected"
        );

        Ok(Some(FaceCrop {
            image: crop_face(image, face),
            face: face.clone(),
        }))
    }
}

/// Landmark alignment when possible, otherwise a square crop of the box.
fn crop_face(image: &RgbImage, face: &BoundingBox) -> RgbImage {
    face.landmarks
        .as_ref()
        .and_then(|landmarks| {
            let aligned = alignment::align_face(image, landmarks);
            if aligned.is_none() {
                tracing::debug!(?landmarks, "degenerate landmarks, using box crop");
            }
            aligned
        })
        .unwrap_or_else(|| alignment::crop_square(image, face))
}

fn by_confidence_desc(a: &BoundingBox, b: &BoundingBox) -> Ordering {
    b.confidence.partial_cmp(&a.confidence).unwrap_or(Ordering::Equal)
}

/// Pick exactly one face: highest confidence, then larger area, then the
/// top-most, left-most box. Deterministic for identical input.
pub fn select_primary(faces: &[BoundingBox]) -> Option<&BoundingBox> {
    faces.iter().min_by(|a, b| {
        by_confidence_desc(a, b)
            .then_with(|| b.area().partial_cmp(&a.area()).unwrap_or(Ordering::Equal))
            .then_with(|| a.y.partial_cmp(&b.y).unwrap_or(Ordering::Equal))
            .then_with(|| a.x.partial_cmp(&b.x).unwrap_or(Ordering::Equal))
    })
}

/// Discover output tensor ordering by name.
///
/// Some SCRFD exports name their outputs "score_8", "bbox_16", "kps_32", ...;
/// others use generic numeric names, in which case the standard positional
/// layout applies: [0-2] scores, [3-5] bboxes, [6-8] kps, each for strides 8/16/32.
fn discover_output_indices(names: &[String]) -> [StrideOutputIndices; 3] {
    let find = |prefix: &str, stride: usize| -> Option<usize> {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| n == &target)
    };

    let named: Option<Vec<StrideOutputIndices>> = SCRFD_STRIDES
        .iter()
        .map(|&stride| Some((find("score", stride)?, find("bbox", stride)?, find("kps", stride)?)))
        .collect();

    match named.as_deref() {
        Some(&[s8, s16, s32]) => {
            tracing::info!("SCRFD: using name-based output tensor mapping");
            [s8, s16, s32]
        }
        _ => {
            tracing::info!(?names, "SCRFD: output names not recognized, using positional mapping");
            [(0, 3, 6), (1, 4, 7), (2, 5, 8)]
        }
    }
}

/// Decode detections for a single stride level.
fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    kps: &[f32],
    stride: usize,
    input_size: usize,
    letterbox: &LetterboxInfo,
    threshold: f32,
) -> Vec<BoundingBox> {
    let grid = input_size / stride;
    let num_anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;
    let step = stride as f32;
    let unletterbox = |x: f32, y: f32| {
        (
            (x - letterbox.pad_x) / letterbox.scale,
            (y - letterbox.pad_y) / letterbox.scale,
        )
    };

    let mut detections = Vec::new();
    for idx in 0..num_anchors {
        let score = scores.get(idx).copied().unwrap_or(0.0);
        if score <= threshold {
            continue;
        }

        let cell = idx / SCRFD_ANCHORS_PER_CELL;
        let anchor_x = (cell % grid) as f32 * step;
        let anchor_y = (cell / grid) as f32 * step;

        // Distances from the anchor to the four box edges, in stride units.
        let Some(d) = bboxes.get(idx * 4..idx * 4 + 4) else {
            continue;
        };
        let (x1, y1) = unletterbox(anchor_x - d[0] * step, anchor_y - d[1] * step);
        let (x2, y2) = unletterbox(anchor_x + d[2] * step, anchor_y + d[3] * step);

        let landmarks = kps.get(idx * 10..idx * 10 + 10).map(|k| {
            std::array::from_fn(|i| unletterbox(anchor_x + k[i * 2] * step, anchor_y + k[i * 2 + 1] * step))
        });

        detections.push(BoundingBox {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            confidence: score,
            landmarks,
        });
    }

    detections
}

/// Non-Maximum Suppression: remove overlapping detections.
fn nms(mut detections: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    detections.sort_by(by_confidence_desc);

    let mut keep: Vec<BoundingBox> = Vec::new();
    for candidate in detections {
        if keep.iter().all(|kept| iou(kept, &candidate) <= iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}

/// Compute Intersection-over-Union between two bounding boxes.
fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);

    let inter_area = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union_area = a.area() + b.area() - inter_area;

    if union_area > 0.0 {
        inter_area / union_area
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_bbox(x: f32, y: f32, w: f32, h: f32, conf: f32) -> BoundingBox {
        BoundingBox {
            x, y, width: w, height: h, confidence: conf, landmarks: None,
        }
    }

    #[test]
    fn test_iou_identical() {
        let a = make_bbox(0.0, 0.0, 100.0, 100.0, 1.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_no_overlap() {
        let a = make_bbox(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = make_bbox(20.0, 20.0, 10.0, 10.0, 1.0);
        assert!(iou(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_iou_partial() {
        let a = make_bbox(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = make_bbox(5.0, 0.0, 10.0, 10.0, 1.0);
        // Overlap: 5x10 = 50, union: 100+100-50 = 150
        assert!((iou(&a, &b) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_nms_suppresses_overlapping() {
        let detections = vec![
            make_bbox(5.0, 5.0, 100.0, 100.0, 0.8),
            make_bbox(0.0, 0.0, 100.0, 100.0, 0.9),
            make_bbox(200.0, 200.0, 50.0, 50.0, 0.7),
        ];
        let result = nms(detections, 0.4);
        assert_eq!(result.len(), 2);
        assert!((result[0].confidence - 0.9).abs() < 1e-6);
        assert!((result[1].confidence - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_nms_empty() {
        assert!(nms(vec![], 0.4).is_empty());
    }

    #[test]
    fn test_select_primary_highest_confidence() {
        let faces = vec![
            make_bbox(0.0, 0.0, 200.0, 200.0, 0.7),
            make_bbox(300.0, 0.0, 50.0, 50.0, 0.95),
        ];
        assert_eq!(select_primary(&faces).map(|f| f.confidence), Some(0.95));
    }

    #[test]
    fn test_select_primary_tie_prefers_larger_then_top_left() {
        let faces = vec![
            make_bbox(300.0, 0.0, 50.0, 50.0, 0.9),
            make_bbox(100.0, 0.0, 80.0, 80.0, 0.9),
            make_bbox(10.0, 0.0, 80.0, 80.0, 0.9),
        ];
        let picked = select_primary(&faces).unwrap();
        assert_eq!((picked.x, picked.width), (10.0, 80.0));

        // Input order must not matter.
        let reversed: Vec<_> = faces.iter().rev().cloned().collect();
        assert_eq!(select_primary(&reversed), Some(picked));
    }

    #[test]
    fn test_crop_face_degenerate_landmarks_use_box() {
        // Green face region away from the top-left corner of a black frame.
        let mut image = RgbImage::new(400, 300);
        for y in 150..250 {
            for x in 250..350 {
                image.put_pixel(x, y, image::Rgb([0, 200, 0]));
            }
        }
        let mut face = make_bbox(250.0, 150.0, 100.0, 100.0, 0.9);
        face.landmarks = Some([(300.0, 200.0); 5]);

        let crop = crop_face(&image, &face);
        assert_eq!(crop.dimensions(), (alignment::ALIGNED_SIZE, alignment::ALIGNED_SIZE));
        assert_eq!(crop.get_pixel(56, 56).0, [0, 200, 0]);
    }

    #[test]
    fn test_select_primary_empty() {
        assert!(select_primary(&[]).is_none());
    }

    #[test]
    fn test_decode_stride_maps_back_through_letterbox() {
        let stride = 32;
        let grid = SCRFD_INPUT_SIZE / stride;
        let anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;

        // One confident anchor at cell (x=2, y=1).
        let cell = grid + 2;
        let idx = cell * SCRFD_ANCHORS_PER_CELL;
        let mut scores = vec![0.0; anchors];
        scores[idx] = 0.9;
        let mut bboxes = vec![0.0; anchors * 4];
        bboxes[idx * 4..idx * 4 + 4].copy_from_slice(&[1.0, 1.0, 1.0, 1.0]);
        let kps = vec![0.0; anchors * 10];

        let letterbox = LetterboxInfo { scale: 2.0, pad_x: 0.0, pad_y: 80.0 };
        let dets = decode_stride(&scores, &bboxes, &kps, stride, SCRFD_INPUT_SIZE, &letterbox, 0.5);
        assert_eq!(dets.len(), 1);

        let d = &dets[0];
        // Anchor at (64, 32) in letterbox space; box spans ±32 around it.
        assert!((d.x - 16.0).abs() < 1e-4, "x = {}", d.x);
        assert!((d.y - (-40.0)).abs() < 1e-4, "y = {}", d.y);
        assert!((d.width - 32.0).abs() < 1e-4);
        assert!((d.height - 32.0).abs() < 1e-4);
        let lms = d.landmarks.unwrap();
        assert!((lms[0].0 - 32.0).abs() < 1e-4 && (lms[0].1 - (-24.0)).abs() < 1e-4);
    }

    #[test]
    fn test_decode_stride_skips_low_scores() {
        let stride = 32;
        let grid = SCRFD_INPUT_SIZE / stride;
        let anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;
        let scores = vec![0.5; anchors];
        let letterbox = LetterboxInfo { scale: 1.0, pad_x: 0.0, pad_y: 0.0 };
        let dets = decode_stride(&scores, &vec![0.0; anchors * 4], &[], stride, SCRFD_INPUT_SIZE, &letterbox, 0.5);
        assert!(dets.is_empty());
    }

    #[test]
    fn test_discover_output_indices_named() {
        let names: Vec<String> = [
            "score_8", "score_16", "score_32",
            "bbox_8",  "bbox_16",  "bbox_32",
            "kps_8",   "kps_16",   "kps_32",
        ].iter().map(|s| s.to_string()).collect();

        assert_eq!(discover_output_indices(&names), [(0, 3, 6), (1, 4, 7), (2, 5, 8)]);
    }

    #[test]
    fn test_discover_output_indices_shuffled_named() {
        let names: Vec<String> = [
            "bbox_8", "kps_8", "score_8",
            "bbox_16", "kps_16", "score_16",
            "bbox_32", "kps_32", "score_32",
        ].iter().map(|s| s.to_string()).collect();

        assert_eq!(discover_output_indices(&names), [(2, 0, 1), (5, 3, 4), (8, 6, 7)]);
    }

    #[test]
    fn test_discover_output_indices_positional_fallback() {
        let names: Vec<String> = (0..9).map(|i: usize| i.to_string()).collect();
        assert_eq!(discover_output_indices(&names), [(0, 3, 6), (1, 4, 7), (2, 5, 8)]);
    }
}

//! rollcall-core: face enrollment and recognition engine.
//!
//! Uses SCRFD for face detection and ArcFace for face embeddings, both
//! running via ONNX Runtime, with a flat-directory identity store and a
//! linear-scan cosine matcher on top.

pub mod alignment;
pub mod detector;
pub mod enrollment;
pub mod key;
pub mod matcher;
pub mod npy;
pub mod pipeline;
pub mod recognition;
pub mod recognizer;
pub mod store;
pub mod types;

pub use detector::{FaceCropper, FaceDetector};
pub use enrollment::{enroll, EnrollOutcome};
pub use key::{IdentityKey, KeyError};
pub use matcher::{CosineMatcher, MatchResult, MatchStatus, Matcher, DEFAULT_MATCH_THRESHOLD};
pub use pipeline::{FacePipeline, ServiceError, Stage};
pub use recognition::{recognize, RecognizeOutcome};
pub use recognizer::{EmbeddingExtractor, FaceRecognizer};
pub use store::{FsIdentityStore, IdentityRecord, IdentityStore, PutStatus, StoreError};
pub use types::{BoundingBox, Embedding, FaceCrop};

/// File name of the SCRFD detection model inside the model directory.
pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";

/// File name of the ArcFace recognition model inside the model directory.
pub const RECOGNIZER_MODEL_FILE: &str = "w600k_r50.onnx";

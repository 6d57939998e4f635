//! Recognition: image → face crop → embedding → best match in the store.

use crate::detector::FaceCropper;
use crate::key::IdentityKey;
use crate::matcher::{MatchStatus, Matcher};
use crate::pipeline::{FacePipeline, ServiceError, Stage, MSG_FACE_NOT_DETECTED};
use crate::recognizer::EmbeddingExtractor;
use crate::store::IdentityStore;

#[derive(Debug, Clone, PartialEq)]
pub enum RecognizeOutcome {
    /// The upload could not be decoded as an image.
    DecodeFailed(String),
    /// No face in the image; no score is available.
    NoFace,
    /// Best match reached the threshold.
    Matched { identity: IdentityKey, score: f32 },
    /// Best match fell short of the threshold, or the store is empty (score -1.0).
    Unknown { score: f32 },
}

impl RecognizeOutcome {
    pub fn identity(&self) -> Option<&IdentityKey> {
        match self {
            Self::Matched { identity, .. } => Some(identity),
            _ => None,
        }
    }

    pub fn score(&self) -> Option<f32> {
        match self {
            Self::Matched { score, .. } | Self::Unknown { score } => Some(*score),
            Self::DecodeFailed(_) | Self::NoFace => None,
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::DecodeFailed(reason) => format!("image could not be decoded: {reason}"),
            Self::NoFace => MSG_FACE_NOT_DETECTED.to_string(),
            Self::Matched { .. } => MatchStatus::Matched.to_string(),
            Self::Unknown { .. } => MatchStatus::Unknown.to_string(),
        }
    }
}

/// Identify the face in `image` against every stored identity.
pub fn recognize<D, E, S, M>(
    pipeline: &mut FacePipeline<D, E>,
    store: &S,
    matcher: &M,
    image: &[u8],
    threshold: f32,
) -> Result<RecognizeOutcome, ServiceError>
where
    D: FaceCropper,
    E: EmbeddingExtractor,
    S: IdentityStore + ?Sized,
    M: Matcher + ?Sized,
{
    let embedding = match pipeline.process(image)? {
        Stage::DecodeFailed(reason) => return Ok(RecognizeOutcome::DecodeFailed(reason)),
        Stage::NoFace => {
            tracing::info!("recognize: face not detected");
            return Ok(RecognizeOutcome::NoFace);
        }
        Stage::Embedded { embedding, .. } => embedding,
    };

    let gallery = store.scan()?;
    let result = matcher.compare(&embedding, &gallery, threshold);

    tracing::info!(
        gallery = gallery.len(),
        threshold,
        score = result.score,
        status = %result.status,
        identity = ?result.identity.as_ref().map(ToString::to_string),
        "recognize finished"
    );

    Ok(match (result.status, result.identity) {
        (MatchStatus::Matched, Some(identity)) => RecognizeOutcome::Matched {
            identity,
            score: result.score,
        },
        _ => RecognizeOutcome::Unknown { score: result.score },
    })
}

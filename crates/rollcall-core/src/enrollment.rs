//! Enrollment: image → face crop → embedding → identity store.

use crate::detector::FaceCropper;
use crate::key::IdentityKey;
use crate::pipeline::{FacePipeline, ServiceError, Stage, MSG_FACE_NOT_DETECTED};
use crate::recognizer::EmbeddingExtractor;
use crate::store::{IdentityStore, PutStatus};

pub const MSG_REGISTERED: &str = "registered";
pub const MSG_UPDATED: &str = "face data updated";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnrollOutcome {
    /// First registration for this identifier.
    Registered(IdentityKey),
    /// Replaced the record previously stored for this identifier.
    Updated { key: IdentityKey, previous: IdentityKey },
    /// The upload could not be decoded as an image.
    DecodeFailed(String),
    /// No face in the image; nothing was stored.
    NoFace,
}

impl EnrollOutcome {
    pub fn success(&self) -> bool {
        matches!(self, Self::Registered(_) | Self::Updated { .. })
    }

    pub fn message(&self) -> String {
        match self {
            Self::Registered(_) => MSG_REGISTERED.to_string(),
            Self::Updated { .. } => MSG_UPDATED.to_string(),
            Self::DecodeFailed(reason) => format!("image could not be decoded: {reason}"),
            Self::NoFace => MSG_FACE_NOT_DETECTED.to_string(),
        }
    }
}

/// Register `key` with the face found in `image`.
///
/// The store is only touched once a face has been embedded, so a decode or
/// detection failure leaves any existing record for the identifier intact.
pub fn enroll<D, E, S>(
    pipeline: &mut FacePipeline<D, E>,
    store: &S,
    key: &IdentityKey,
    image: &[u8],
) -> Result<EnrollOutcome, ServiceError>
where
    D: FaceCropper,
    E: EmbeddingExtractor,
    S: IdentityStore + ?Sized,
{
    let outcome = match pipeline.process(image)? {
        Stage::DecodeFailed(reason) => EnrollOutcome::DecodeFailed(reason),
        Stage::NoFace => EnrollOutcome::NoFace,
        Stage::Embedded { crop, embedding } => match store.put(key, &embedding, &crop.image)? {
            PutStatus::Registered => EnrollOutcome::Registered(key.clone()),
            PutStatus::Updated { previous } => EnrollOutcome::Updated {
                key: key.clone(),
                previous,
            },
        },
    };

    tracing::info!(key = %key, success = outcome.success(), message = %outcome.message(), "enroll finished");
    Ok(outcome)
}

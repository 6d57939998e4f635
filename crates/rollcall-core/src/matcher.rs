use crate::key::IdentityKey;
use crate::store::IdentityRecord;
use crate::types::Embedding;
use serde::Serialize;
use std::fmt;

/// Cosine similarity a probe must reach to be accepted as a stored identity.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.65;

/// Score reported when there is nothing to compare against.
pub const EMPTY_GALLERY_SCORE: f32 = -1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MatchStatus {
    Matched,
    Unknown,
}

impl fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Matched => "Matched",
            Self::Unknown => "Unknown",
        })
    }
}

/// Result of matching a probe embedding against the gallery.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    /// Set only when `status` is `Matched`.
    pub identity: Option<IdentityKey>,
    /// Best cosine similarity found, even when rejected; -1.0 for an empty gallery.
    pub score: f32,
    pub status: MatchStatus,
}

/// Strategy for comparing a probe embedding against a gallery of enrolled faces.
pub trait Matcher {
    fn compare(&self, probe: &Embedding, gallery: &[IdentityRecord], threshold: f32) -> MatchResult;
}

/// Linear-scan cosine similarity matcher.
///
/// Visits every gallery entry and keeps the first strictly-greater score, so
/// ties go to whichever record the store listed first.
pub struct CosineMatcher;

impl Matcher for CosineMatcher {
    fn compare(&self, probe: &Embedding, gallery: &[IdentityRecord], threshold: f32) -> MatchResult {
        let mut best: Option<(f32, &IdentityRecord)> = None;

        for record in gallery {
            if record.embedding.dim() != probe.dim() {
                tracing::warn!(
                    key = %record.key,
                    stored_dim = record.embedding.dim(),
                    probe_dim = probe.dim(),
                    "skipping embedding with mismatched dimension"
                );
                continue;
            }

            let sim = probe.similarity(&record.embedding);
            if !sim.is_finite() {
                tracing::warn!(key = %record.key, "skipping non-finite similarity");
                continue;
            }
            if best.map_or(true, |(best_sim, _)| sim > best_sim) {
                best = Some((sim, record));
            }
        }

        match best {
            Some((score, record)) if score >= threshold => MatchResult {
                identity: Some(record.key.clone()),
                score,
                status: MatchStatus::Matched,
            },
            Some((score, _)) => MatchResult {
                identity: None,
                score,
                status: MatchStatus::Unknown,
            },
            None => MatchResult {
                identity: None,
                score: EMPTY_GALLERY_SCORE,
                status: MatchStatus::Unknown,
            },
        }
    }
}

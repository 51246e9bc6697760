use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::error::{FaceGateError, FaceGateResult};
use crate::extractor::{require_single_face, EmbeddingExtractor};
use crate::matcher::Matcher;
use crate::store::IdentityStore;
use crate::types::{DetectedFace, IdentityProfile, MatchResult};

/// Outcome of a verification. A miss is a normal outcome, not an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationOutcome {
    #[serde(flatten)]
    pub result: MatchResult,
    /// Profile of the matched identity (embedding omitted).
    pub identity: Option<IdentityProfile>,
}

impl VerificationOutcome {
    pub fn is_match(&self) -> bool {
        self.result.matched
    }
}

pub fn ensure_enrolled(store: &IdentityStore) -> FaceGateResult<()> {
    if store.is_empty() {
        return Err(FaceGateError::EmptyStore);
    }
    Ok(())
}

pub fn require_probe<I>(image: Option<&I>) -> FaceGateResult<&I> {
    image.ok_or(FaceGateError::MissingField("image"))
}

/// Match the single face in `faces` against the store.
pub fn match_faces<M: Matcher + ?Sized>(
    store: &IdentityStore,
    faces: Vec<DetectedFace>,
    matcher: &M,
    threshold: f32,
) -> FaceGateResult<VerificationOutcome> {
    ensure_enrolled(store)?;
    let face = require_single_face(faces)?;

    if let Some(expected) = store.dimension() {
        let got = face.embedding.dimension();
        if got != expected {
            return Err(FaceGateError::InvalidEmbedding(format!(
                "probe has {got} values but enrolled embeddings have {expected}"
            )));
        }
    }

    let result = matcher.compare(&face.embedding, store.records(), threshold);
    let identity = result
        .identity_key
        .as_deref()
        .and_then(|key| store.get(key))
        .map(|record| record.profile());

    match &identity {
        Some(profile) => tracing::info!(
            identity = %profile.identity_key,
            confidence = result.confidence.unwrap_or_default(),
            distance = result.distance.unwrap_or_default(),
            "face matched"
        ),
        None => tracing::info!(
            nearest = ?result.distance,
            threshold,
            population = store.len(),
            "face did not match any identity"
        ),
    }

    Ok(VerificationOutcome { result, identity })
}

/// Run the whole verification: enrolled check, probe check, extraction, match.
pub fn run_verification<E, M>(
    store: &IdentityStore,
    extractor: &mut E,
    image: Option<&RgbImage>,
    matcher: &M,
    threshold: f32,
) -> FaceGateResult<VerificationOutcome>
where
    E: EmbeddingExtractor + ?Sized,
    M: Matcher + ?Sized,
{
    ensure_enrolled(store)?;
    let image = require_probe(image)?;
    let faces = extractor.detect_and_encode(image)?;
    match_faces(store, faces, matcher, threshold)
}

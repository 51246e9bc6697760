//! Enrollment workflow.
//!
//! ```text
//! AwaitingInput → ValidatingFields → ExtractingFace → ValidatingFaceCount → Persisting → Done
//!                        └──────────────────┴──────────────┴──────────────────┴──→ Rejected
//! ```
//!
//! Extraction is the slow step, so the workflow is also available as two
//! phases ([`validate_enrollment`], then [`build_record`] with the extracted
//! faces) for callers that must not hold a store lock while extracting.

use std::fmt;

use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::error::{FaceGateError, FaceGateResult};
use crate::extractor::{require_single_face, EmbeddingExtractor};
use crate::registry::IdentityRegistry;
use crate::store::IdentityStore;
use crate::types::{DetectedFace, IdentityRecord};

/// Profile fields supplied by the caller at enrollment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrollmentFields {
    /// Unique key, e.g. an email address.
    pub identity_key: String,
    pub display_name: String,
    pub phone: String,
    pub address: String,
}

impl EnrollmentFields {
    /// Copy with surrounding whitespace stripped from every field.
    pub fn normalized(&self) -> Self {
        Self {
            identity_key: self.identity_key.trim().to_string(),
            display_name: self.display_name.trim().to_string(),
            phone: self.phone.trim().to_string(),
            address: self.address.trim().to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollmentStage {
    AwaitingInput,
    ValidatingFields,
    ExtractingFace,
    ValidatingFaceCount,
    Persisting,
    Done,
    Rejected,
}

impl fmt::Display for EnrollmentStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EnrollmentStage::AwaitingInput => "awaiting_input",
            EnrollmentStage::ValidatingFields => "validating_fields",
            EnrollmentStage::ExtractingFace => "extracting_face",
            EnrollmentStage::ValidatingFaceCount => "validating_face_count",
            EnrollmentStage::Persisting => "persisting",
            EnrollmentStage::Done => "done",
            EnrollmentStage::Rejected => "rejected",
        };
        f.write_str(name)
    }
}

/// Successful enrollment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrollOutcome {
    pub identity_key: String,
}

/// Follows one enrollment through its stages and logs where it stopped.
pub(crate) struct StageTracker {
    identity_key: String,
    stage: EnrollmentStage,
}

impl StageTracker {
    pub(crate) fn new(identity_key: &str) -> Self {
        Self {
            identity_key: identity_key.to_string(),
            stage: EnrollmentStage::AwaitingInput,
        }
    }

    pub(crate) fn enter(&mut self, stage: EnrollmentStage) {
        tracing::trace!(identity = %self.identity_key, from = %self.stage, to = %stage, "enrollment stage");
        self.stage = stage;
    }

    pub(crate) fn check<T>(&mut self, result: FaceGateResult<T>) -> FaceGateResult<T> {
        if let Err(err) = &result {
            if err.is_user_correctable() {
                tracing::info!(identity = %self.identity_key, stage = %self.stage, reason = %err, "enrollment rejected");
            } else {
                tracing::error!(identity = %self.identity_key, stage = %self.stage, error = %err, "enrollment failed");
            }
            self.stage = EnrollmentStage::Rejected;
        }
        result
    }

    #[cfg(test)]
    pub(crate) fn stage(&self) -> EnrollmentStage {
        self.stage
    }
}

/// Require a display name and an identity key. Expects normalized fields.
pub fn validate_fields(fields: &EnrollmentFields) -> FaceGateResult<()> {
    if fields.display_name.is_empty() {
        return Err(FaceGateError::MissingField("display_name"));
    }
    if fields.identity_key.is_empty() {
        return Err(FaceGateError::MissingField("identity_key"));
    }
    Ok(())
}

/// Check fields, image presence and key uniqueness.
///
/// Expects already-normalized fields. Returns the image so the caller can go
/// straight to extraction. Missing fields are reported before the store is
/// consulted.
pub fn validate_enrollment<'a, I>(
    fields: &EnrollmentFields,
    image: Option<&'a I>,
    store: &IdentityStore,
) -> FaceGateResult<&'a I> {
    validate_fields(fields)?;
    let image = image.ok_or(FaceGateError::MissingField("image"))?;

    if store.contains(&fields.identity_key) {
        return Err(FaceGateError::DuplicateIdentity(fields.identity_key.clone()));
    }
    Ok(image)
}

/// Turn the extractor's output into a record, requiring exactly one face.
pub fn build_record(
    fields: EnrollmentFields,
    faces: Vec<DetectedFace>,
) -> FaceGateResult<IdentityRecord> {
    let face = require_single_face(faces)?;
    Ok(IdentityRecord {
        identity_key: fields.identity_key,
        display_name: fields.display_name,
        phone: fields.phone,
        address: fields.address,
        embedding: face.embedding,
    })
}

/// Run the whole enrollment against a registry the caller owns exclusively.
pub fn run_enrollment<E: EmbeddingExtractor + ?Sized>(
    registry: &mut IdentityRegistry,
    extractor: &mut E,
    fields: &EnrollmentFields,
    image: Option<&RgbImage>,
) -> FaceGateResult<EnrollOutcome> {
    let fields = fields.normalized();
    let mut tracker = StageTracker::new(&fields.identity_key);

    tracker.enter(EnrollmentStage::ValidatingFields);
    let image = tracker.check(validate_enrollment(&fields, image, registry.store()))?;

    tracker.enter(EnrollmentStage::ExtractingFace);
    let faces = tracker.check(extractor.detect_and_encode(image).map_err(FaceGateError::from))?;

    tracker.enter(EnrollmentStage::ValidatingFaceCount);
    let record = tracker.check(build_record(fields, faces))?;

    tracker.enter(EnrollmentStage::Persisting);
    let identity_key = record.identity_key.clone();
    tracker.check(registry.insert(record))?;

    tracker.enter(EnrollmentStage::Done);
    tracing::info!(identity = %identity_key, "identity enrolled");
    Ok(EnrollOutcome { identity_key })
}

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use image::RgbImage;

use crate::enrollment::{
    build_record, validate_enrollment, validate_fields, EnrollOutcome, EnrollmentFields,
    EnrollmentStage, StageTracker,
};
use crate::error::{FaceGateError, FaceGateResult};
use crate::extractor::EmbeddingExtractor;
use crate::matcher::{EuclideanMatcher, Matcher};
use crate::registry::IdentityRegistry;
use crate::types::{DetectedFace, IdentityProfile};
use crate::verification::{ensure_enrolled, match_faces, require_probe, VerificationOutcome};

/// Caller-facing operations over a shared registry.
///
/// Mutations (insert/remove plus the save that follows) run under the write
/// lock; matching and listing run under the read lock. Extraction is never
/// done while a lock is held: enrollment and verification are split into a
/// `begin_*` check and a `complete_*` step that takes the extracted faces.
pub struct IdentityService<M = EuclideanMatcher> {
    registry: RwLock<IdentityRegistry>,
    matcher: M,
    threshold: f32,
}

impl<M: Matcher> IdentityService<M> {
    pub fn new(registry: IdentityRegistry, matcher: M, threshold: f32) -> Self {
        Self {
            registry: RwLock::new(registry),
            matcher,
            threshold,
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn matcher(&self) -> &M {
        &self.matcher
    }

    pub fn len(&self) -> usize {
        self.read().store().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().store().is_empty()
    }

    /// Field, image and uniqueness checks. Takes the read lock only.
    pub fn begin_enrollment<'a, I>(
        &self,
        fields: &EnrollmentFields,
        image: Option<&'a I>,
    ) -> FaceGateResult<&'a I> {
        let fields = fields.normalized();
        let registry = self.read();
        validate_enrollment(&fields, image, registry.store())
    }

    /// Field and face-count checks, then insert and save under the write lock.
    ///
    /// Uniqueness is checked again by the insert, so a concurrent enrollment
    /// of the same key that won the race yields `DuplicateIdentity`.
    pub fn complete_enrollment(
        &self,
        fields: &EnrollmentFields,
        faces: Vec<DetectedFace>,
    ) -> FaceGateResult<EnrollOutcome> {
        let fields = fields.normalized();
        let mut tracker = StageTracker::new(&fields.identity_key);

        tracker.enter(EnrollmentStage::ValidatingFields);
        tracker.check(validate_fields(&fields))?;

        tracker.enter(EnrollmentStage::ValidatingFaceCount);
        let record = tracker.check(build_record(fields, faces))?;

        tracker.enter(EnrollmentStage::Persisting);
        let identity_key = record.identity_key.clone();
        tracker.check(self.write().insert(record))?;

        tracker.enter(EnrollmentStage::Done);
        tracing::info!(identity = %identity_key, "identity enrolled");
        Ok(EnrollOutcome { identity_key })
    }

    pub fn enroll<E: EmbeddingExtractor + ?Sized>(
        &self,
        fields: &EnrollmentFields,
        image: Option<&RgbImage>,
        extractor: &mut E,
    ) -> FaceGateResult<EnrollOutcome> {
        let image = self.begin_enrollment(fields, image)?;
        let faces = extractor.detect_and_encode(image)?;
        self.complete_enrollment(fields, faces)
    }

    /// Fails with `EmptyStore` when nobody is enrolled.
    pub fn begin_verification(&self) -> FaceGateResult<()> {
        let registry = self.read();
        ensure_enrolled(registry.store())
    }

    pub fn complete_verification(
        &self,
        faces: Vec<DetectedFace>,
    ) -> FaceGateResult<VerificationOutcome> {
        let registry = self.read();
        match_faces(registry.store(), faces, &self.matcher, self.threshold)
    }

    pub fn verify<E: EmbeddingExtractor + ?Sized>(
        &self,
        image: Option<&RgbImage>,
        extractor: &mut E,
    ) -> FaceGateResult<VerificationOutcome> {
        self.begin_verification()?;
        let image = require_probe(image)?;
        let faces = extractor.detect_and_encode(image)?;
        self.complete_verification(faces)
    }

    /// Enrolled identities in enrollment order, embeddings omitted.
    pub fn list_identities(&self) -> Vec<IdentityProfile> {
        self.read().store().profiles()
    }

    pub fn delete_identity(&self, identity_key: &str) -> FaceGateResult<()> {
        match self.write().remove(identity_key) {
            Ok(_) => {
                tracing::info!(identity = identity_key, "identity deleted");
                Ok(())
            }
            Err(err @ FaceGateError::NotFound(_)) => {
                tracing::info!(identity = identity_key, "delete requested for unknown identity");
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, IdentityRegistry> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, IdentityRegistry> {
        self.registry.write().unwrap_or_else(PoisonError::into_inner)
    }
}

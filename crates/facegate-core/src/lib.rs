//! facegate-core — Biometric identity store and face matching engine.
//!
//! Enrolls a face embedding per identity into a checksummed, atomically
//! written store file and verifies probe faces against the enrolled
//! population by Euclidean distance. Embeddings come from an external
//! [`EmbeddingExtractor`].

pub mod codec;
pub mod enrollment;
pub mod error;
pub mod extractor;
pub mod matcher;
pub mod registry;
pub mod service;
pub mod store;
pub mod types;
pub mod verification;

pub use enrollment::{run_enrollment, EnrollOutcome, EnrollmentFields, EnrollmentStage};
pub use error::{FaceGateError, FaceGateResult};
pub use extractor::{CommandExtractor, EmbeddingExtractor, ExtractorError};
pub use matcher::{EuclideanMatcher, MatchPolicy, Matcher, DEFAULT_MATCH_THRESHOLD};
pub use registry::IdentityRegistry;
pub use service::IdentityService;
pub use store::{IdentityStore, StoreFile};
pub use types::{
    BoundingBox, DetectedFace, Embedding, IdentityProfile, IdentityRecord, MatchResult,
};
pub use verification::{run_verification, VerificationOutcome};

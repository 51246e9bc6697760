use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::extractor::ExtractorError;

#[derive(Error, Debug)]
pub enum FaceGateError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("an identity with key '{0}' is already enrolled")]
    DuplicateIdentity(String),

    #[error("no face detected — capture a clear photo of a single face")]
    NoFaceDetected,

    #[error("{0} faces detected — make sure only one face is visible")]
    MultipleFaces(usize),

    #[error("no identities enrolled yet — enroll someone first")]
    EmptyStore,

    #[error("no identity with key '{0}'")]
    NotFound(String),

    #[error("invalid embedding: {0}")]
    InvalidEmbedding(String),

    #[error("identity store {path} is corrupt: {message}")]
    CorruptStore { path: PathBuf, message: String },

    #[error("failed to read identity store {path}: {source}")]
    StoreRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write identity store {path}: {source}")]
    StoreWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("embedding extractor: {0}")]
    Extractor(#[from] ExtractorError),
}

impl FaceGateError {
    /// Whether the caller can fix this by changing its input.
    ///
    /// Everything else is an operational failure of the store or extractor.
    pub fn is_user_correctable(&self) -> bool {
        matches!(
            self,
            FaceGateError::MissingField(_)
                | FaceGateError::DuplicateIdentity(_)
                | FaceGateError::NoFaceDetected
                | FaceGateError::MultipleFaces(_)
                | FaceGateError::EmptyStore
                | FaceGateError::NotFound(_)
                | FaceGateError::InvalidEmbedding(_)
        )
    }
}

pub type FaceGateResult<T> = Result<T, FaceGateError>;

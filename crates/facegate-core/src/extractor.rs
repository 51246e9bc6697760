//! Embedding extractor contract and the external-helper implementation.
//!
//! Face detection and encoding are not done in-process. An extractor turns an
//! RGB image into zero or more `(bounding box, embedding)` pairs; the rest of
//! the crate only relies on that contract.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use image::{ImageFormat, RgbImage};
use thiserror::Error;

use crate::error::{FaceGateError, FaceGateResult};
use crate::types::DetectedFace;

#[derive(Error, Debug)]
pub enum ExtractorError {
    #[error("failed to stage image for extraction: {0}")]
    Stage(#[from] image::ImageError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("failed to launch extractor {program}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("extractor exited with {status}: {stderr}")]
    HelperFailed { status: String, stderr: String },
    #[error("extractor output is not valid face JSON: {0}")]
    InvalidOutput(#[from] serde_json::Error),
    #[error("extractor returned an unusable embedding: {0}")]
    InvalidEmbedding(String),
}

/// Detects faces in an image and encodes each one as an embedding.
///
/// Implementations must return an empty list when no face is found, one entry
/// per detected face, and embeddings of a fixed dimensionality. The same image
/// must always produce the same embeddings.
pub trait EmbeddingExtractor {
    fn detect_and_encode(&mut self, image: &RgbImage) -> Result<Vec<DetectedFace>, ExtractorError>;
}

impl<E: EmbeddingExtractor + ?Sized> EmbeddingExtractor for Box<E> {
    fn detect_and_encode(&mut self, image: &RgbImage) -> Result<Vec<DetectedFace>, ExtractorError> {
        (**self).detect_and_encode(image)
    }
}

/// Accept exactly one detected face.
pub fn require_single_face(mut faces: Vec<DetectedFace>) -> FaceGateResult<DetectedFace> {
    match faces.len() {
        0 => Err(FaceGateError::NoFaceDetected),
        1 => Ok(faces.remove(0)),
        n => Err(FaceGateError::MultipleFaces(n)),
    }
}

/// Runs an external helper program that performs detection and encoding.
///
/// The image is written to a temporary PNG whose path is appended to `args`.
/// The helper must print a JSON array on stdout:
///
/// ```text
/// [{"bounding_box": {"left": 0, "top": 0, "right": 10, "bottom": 10},
///   "embedding": [0.01, -0.12, ...]}]
/// ```
#[derive(Debug, Clone)]
pub struct CommandExtractor {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandExtractor {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    fn run(&self, image_path: &Path) -> Result<Vec<u8>, ExtractorError> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(image_path)
            .output()
            .map_err(|source| ExtractorError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(ExtractorError::HelperFailed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(output.stdout)
    }
}

impl EmbeddingExtractor for CommandExtractor {
    fn detect_and_encode(&mut self, image: &RgbImage) -> Result<Vec<DetectedFace>, ExtractorError> {
        let staged = tempfile::Builder::new()
            .prefix("facegate-")
            .suffix(".png")
            .tempfile()?;
        image.save_with_format(staged.path(), ImageFormat::Png)?;

        let stdout = self.run(staged.path())?;
        let faces = parse_helper_output(&stdout)?;
        tracing::debug!(
            program = %self.program.display(),
            faces = faces.len(),
            "extractor helper finished"
        );
        Ok(faces)
    }
}

/// Parse and sanity-check the JSON printed by an extractor helper.
pub fn parse_helper_output(stdout: &[u8]) -> Result<Vec<DetectedFace>, ExtractorError> {
    let faces: Vec<DetectedFace> = serde_json::from_slice(stdout)?;

    let mut dimension = None;
    for (i, face) in faces.iter().enumerate() {
        let dim = face.embedding.dimension();
        if dim == 0 {
            return Err(ExtractorError::InvalidEmbedding(format!(
                "face #{i} has an empty embedding"
            )));
        }
        if !face.embedding.is_finite() {
            return Err(ExtractorError::InvalidEmbedding(format!(
                "face #{i} contains non-finite values"
            )));
        }
        match dimension {
            None => dimension = Some(dim),
            Some(expected) if expected != dim => {
                return Err(ExtractorError::InvalidEmbedding(format!(
                    "face #{i} has {dim} values, expected {expected}"
                )));
            }
            Some(_) => {}
        }
    }

    Ok(faces)
}

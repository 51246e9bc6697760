use serde::{Deserialize, Serialize};

/// Pixel-space bounding box of a detected face, as reported by the extractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub left: i64,
    pub top: i64,
    pub right: i64,
    pub bottom: i64,
}

/// Face embedding vector (128-dimensional for dlib-style encoders).
///
/// Serialized as a bare array of floats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn dimension(&self) -> usize {
        self.values.len()
    }

    /// True when every component is a finite number.
    pub fn is_finite(&self) -> bool {
        self.values.iter().all(|v| v.is_finite())
    }

    /// Compute Euclidean distance between two embeddings.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// One face found by an [`EmbeddingExtractor`](crate::extractor::EmbeddingExtractor).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedFace {
    pub bounding_box: BoundingBox,
    pub embedding: Embedding,
}

/// An enrolled person. `identity_key` is unique within a store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub identity_key: String,
    pub display_name: String,
    pub phone: String,
    pub address: String,
    pub embedding: Embedding,
}

impl IdentityRecord {
    pub fn profile(&self) -> IdentityProfile {
        IdentityProfile {
            identity_key: self.identity_key.clone(),
            display_name: self.display_name.clone(),
            phone: self.phone.clone(),
            address: self.address.clone(),
        }
    }
}

/// An identity record with the embedding left out, safe to hand to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityProfile {
    pub identity_key: String,
    pub display_name: String,
    pub phone: String,
    pub address: String,
}

/// Result of matching a probe embedding against the enrolled population.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub matched: bool,
    /// Key of the matched identity (if any).
    pub identity_key: Option<String>,
    /// Match strength in [0, 100] (if matched).
    pub confidence: Option<f32>,
    /// Distance to the matched identity, or to the nearest one on a miss.
    pub distance: Option<f32>,
}

impl MatchResult {
    pub fn no_match(nearest: Option<f32>) -> Self {
        Self {
            matched: false,
            identity_key: None,
            confidence: None,
            distance: nearest,
        }
    }
}

/// Map an embedding distance onto a [0, 100] confidence score.
pub fn confidence_from_distance(distance: f32) -> f32 {
    ((1.0 - distance) * 100.0).clamp(0.0, 100.0)
}

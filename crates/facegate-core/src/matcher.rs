use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::types::{confidence_from_distance, Embedding, IdentityRecord, MatchResult};

/// Default maximum Euclidean distance for a positive match.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.6;

/// How to pick among several identities that are all within the threshold.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchPolicy {
    /// Closest identity wins; equal distances resolve to the earlier enrollment.
    #[default]
    Nearest,
    /// First identity in enrollment order that is within the threshold.
    First,
}

impl fmt::Display for MatchPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchPolicy::Nearest => f.write_str("nearest"),
            MatchPolicy::First => f.write_str("first"),
        }
    }
}

impl FromStr for MatchPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "nearest" => Ok(MatchPolicy::Nearest),
            "first" => Ok(MatchPolicy::First),
            other => Err(format!("unknown match policy '{other}' (expected 'nearest' or 'first')")),
        }
    }
}

/// Strategy for comparing a probe embedding against the enrolled gallery.
///
/// The linear scan below is the only implementation; an approximate
/// nearest-neighbour index can be dropped in behind the same signature.
pub trait Matcher {
    fn compare(&self, probe: &Embedding, gallery: &[IdentityRecord], threshold: f32) -> MatchResult;
}

/// Euclidean-distance matcher with an inclusive threshold.
#[derive(Debug, Clone, Copy, Default)]
pub struct EuclideanMatcher {
    policy: MatchPolicy,
}

impl EuclideanMatcher {
    pub fn new(policy: MatchPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> MatchPolicy {
        self.policy
    }
}

impl Matcher for EuclideanMatcher {
    fn compare(&self, probe: &Embedding, gallery: &[IdentityRecord], threshold: f32) -> MatchResult {
        if gallery.is_empty() {
            return MatchResult::no_match(None);
        }

        // Seeded from the first record so an overflowed (infinite) distance
        // is still reported.
        let mut best_idx = 0;
        let mut best_dist = probe.euclidean_distance(&gallery[0].embedding);

        for (i, record) in gallery.iter().enumerate() {
            let dist = if i == 0 {
                best_dist
            } else {
                probe.euclidean_distance(&record.embedding)
            };
            if self.policy == MatchPolicy::First && dist <= threshold {
                return matched(record, dist);
            }
            // Strict `<` keeps the earlier record on ties.
            if dist < best_dist {
                best_dist = dist;
                best_idx = i;
            }
        }

        if best_dist <= threshold {
            matched(&gallery[best_idx], best_dist)
        } else {
            MatchResult::no_match(Some(best_dist))
        }
    }
}

fn matched(record: &IdentityRecord, distance: f32) -> MatchResult {
    MatchResult {
        matched: true,
        identity_key: Some(record.identity_key.clone()),
        confidence: Some(confidence_from_distance(distance)),
        distance: Some(distance),
    }
}

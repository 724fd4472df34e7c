//! Match policies: compare a live descriptor against the stored gallery.
//!
//! Two mutually-exclusive policies exist: Euclidean minimum distance and
//! cosine maximum similarity. Configuration selects exactly one; they use
//! very different thresholds and are never combined in a single decision.

use crate::types::Descriptor;
use serde::Serialize;

/// Outcome of comparing a probe descriptor against a gallery.
#[derive(Debug, Clone, Serialize)]
pub struct MatchOutcome {
    pub accepted: bool,
    /// Best score under the active policy: minimum distance or maximum
    /// similarity. `None` when nothing was comparable.
    pub score: Option<f32>,
    /// Gallery index of the best-scoring entry.
    pub best_index: Option<usize>,
    pub compared: usize,
    /// Entries skipped for descriptor-length mismatch.
    pub skipped: usize,
}

impl MatchOutcome {
    fn rejected(skipped: usize) -> Self {
        Self {
            accepted: false,
            score: None,
            best_index: None,
            compared: 0,
            skipped,
        }
    }
}

/// Strategy for comparing a probe descriptor against the gallery.
///
/// Implementations traverse the entire gallery with no early exit, and
/// skip entries whose descriptor length differs from the probe's.
pub trait Matcher: Send {
    fn compare(&self, probe: &Descriptor, gallery: &[Descriptor]) -> MatchOutcome;
}

/// Which policy the daemon runs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyKind {
    Distance,
    Similarity,
}

impl PolicyKind {
    /// Parse a config string; unknown values yield `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "distance" => Some(Self::Distance),
            "similarity" => Some(Self::Similarity),
            _ => None,
        }
    }
}

/// Euclidean minimum-distance policy: accept when the closest comparable
/// gallery entry is strictly below the threshold.
pub struct DistanceMatcher {
    pub threshold: f32,
}

impl Matcher for DistanceMatcher {
    fn compare(&self, probe: &Descriptor, gallery: &[Descriptor]) -> MatchOutcome {
        let mut best: Option<(usize, f32)> = None;
        let mut compared = 0usize;
        let mut skipped = 0usize;

        for (i, stored) in gallery.iter().enumerate() {
            if stored.len() != probe.len() {
                tracing::warn!(index = i, stored_len = stored.len(), probe_len = probe.len(),
                    "skipping length-mismatched gallery entry");
                skipped += 1;
                continue;
            }
            compared += 1;
            let distance = probe.euclidean_distance(stored);
            if best.map_or(true, |(_, d)| distance < d) {
                best = Some((i, distance));
            }
        }

        match best {
            Some((index, distance)) => MatchOutcome {
                accepted: distance < self.threshold,
                score: Some(distance),
                best_index: Some(index),
                compared,
                skipped,
            },
            None => MatchOutcome::rejected(skipped),
        }
    }
}

/// Cosine maximum-similarity policy: accept when the most similar
/// comparable gallery entry is at or above the threshold.
pub struct SimilarityMatcher {
    pub threshold: f32,
}

impl Matcher for SimilarityMatcher {
    fn compare(&self, probe: &Descriptor, gallery: &[Descriptor]) -> MatchOutcome {
        let mut best: Option<(usize, f32)> = None;
        let mut compared = 0usize;
        let mut skipped = 0usize;

        for (i, stored) in gallery.iter().enumerate() {
            if stored.len() != probe.len() {
                tracing::warn!(index = i, stored_len = stored.len(), probe_len = probe.len(),
                    "skipping length-mismatched gallery entry");
                skipped += 1;
                continue;
            }
            compared += 1;
            let similarity = probe.cosine_similarity(stored);
            if best.map_or(true, |(_, s)| similarity > s) {
                best = Some((i, similarity));
            }
        }

        match best {
            Some((index, similarity)) => MatchOutcome {
                accepted: similarity >= self.threshold,
                score: Some(similarity),
                best_index: Some(index),
                compared,
                skipped,
            },
            None => MatchOutcome::rejected(skipped),
        }
    }
}

//! Roster matching: nearest enrolled descriptor under an acceptance threshold.

use crate::roster::Roster;
use crate::types::{Descriptor, Identity, MatchResult};

/// Euclidean distance below which two descriptors are the same person.
///
/// Trades false accepts against false rejects; lower is stricter. The right
/// value depends on the descriptor space of the recognition model, so it is
/// usually tuned per recognizer profile. 0.5 is the general default.
pub const DEFAULT_ACCEPTANCE_THRESHOLD: f32 = 0.5;

/// Strategy for comparing a live descriptor against the roster.
pub trait Matcher: Send + Sync {
    fn find_best_match(&self, query: &Descriptor, roster: &Roster) -> MatchResult;
}

/// Linear-scan Euclidean matcher.
///
/// Both comparisons are strict: a distance equal to the threshold is
/// rejected, and a distance equal to the current best does not replace it,
/// so the earliest identity in roster order wins ties.
#[derive(Debug, Clone, Copy)]
pub struct EuclideanMatcher {
    pub threshold: f32,
}

impl EuclideanMatcher {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }
}

impl Default for EuclideanMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_ACCEPTANCE_THRESHOLD)
    }
}

impl Matcher for EuclideanMatcher {
    fn find_best_match(&self, query: &Descriptor, roster: &Roster) -> MatchResult {
        let threshold = f64::from(self.threshold);
        let mut best: Option<(&Identity, f64)> = None;

        for identity in roster {
            let Some(enrolled) = identity.descriptor.as_ref().filter(|d| !d.is_empty()) else {
                continue;
            };
            if !query.is_comparable_with(enrolled) {
                tracing::debug!(
                    id = %identity.id,
                    query_len = query.len(),
                    enrolled_len = enrolled.len(),
                    "skipping descriptor from a different extractor configuration"
                );
                continue;
            }

            let distance = query.euclidean_distance(enrolled);
            let improves = best.map_or(true, |(_, d)| distance < d);
            if distance < threshold && improves {
                best = Some((identity, distance));
            }
        }

        match best {
            Some((identity, distance)) => MatchResult::Matched {
                identity: identity.clone(),
                distance,
            },
            None => MatchResult::NoMatch,
        }
    }
}

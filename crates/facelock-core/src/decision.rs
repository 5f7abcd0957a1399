//! Accept/reject decision over a match set.
//!
//! Both constants are tunable policy, not structure: the per-pair distance
//! cutoff and the acceptance threshold arrive as configuration so the
//! decision boundary can be recalibrated without a code change.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::DescriptorMatch;

/// Default per-match Hamming distance cutoff (out of 256 bits).
pub const DEFAULT_DISTANCE_CUTOFF: u32 = 70;
/// Default similarity acceptance threshold.
pub const DEFAULT_ACCEPT_THRESHOLD: f32 = 0.90;

#[derive(Error, Debug)]
pub enum DecisionError {
    #[error("match set is empty, no similarity to score")]
    NoMatches,
}

/// Calibrated decision parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DecisionPolicy {
    /// A match counts as "good" when its distance is strictly below this.
    pub distance_cutoff: u32,
    /// Accept when similarity is at least this (inclusive boundary).
    pub accept_threshold: f32,
}

impl Default for DecisionPolicy {
    fn default() -> Self {
        Self {
            distance_cutoff: DEFAULT_DISTANCE_CUTOFF,
            accept_threshold: DEFAULT_ACCEPT_THRESHOLD,
        }
    }
}

/// Outcome of scoring one probe against one reference.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Decision {
    pub accepted: bool,
    /// Fraction of matches under the distance cutoff, in [0, 1].
    pub similarity: f32,
    pub good_matches: usize,
    pub total_matches: usize,
}

impl DecisionPolicy {
    /// Score a match set and apply the acceptance threshold.
    pub fn decide(&self, matches: &[DescriptorMatch]) -> Result<Decision, DecisionError> {
        if matches.is_empty() {
            return Err(DecisionError::NoMatches);
        }

        let good = matches
            .iter()
            .filter(|m| m.distance < self.distance_cutoff)
            .count();
        let similarity = good as f32 / matches.len() as f32;

        Ok(Decision {
            accepted: similarity >= self.accept_threshold,
            similarity,
            good_matches: good,
            total_matches: matches.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches_with_distances(distances: &[u32]) -> Vec<DescriptorMatch> {
        distances
            .iter()
            .enumerate()
            .map(|(i, &distance)| DescriptorMatch {
                query: i,
                train: i,
                distance,
            })
            .collect()
    }

    #[test]
    fn all_good_matches_accept_at_similarity_one() {
        let policy = DecisionPolicy::default();
        let decision = policy.decide(&matches_with_distances(&[0, 5, 69])).unwrap();
        assert!(decision.accepted);
        assert!((decision.similarity - 1.0).abs() < f32::EPSILON);
        assert_eq!(decision.good_matches, 3);
    }

    #[test]
    fn distance_cutoff_is_strict() {
        let policy = DecisionPolicy::default();
        // 70 is not < 70, so exactly-at-cutoff is not a good match.
        let decision = policy.decide(&matches_with_distances(&[70])).unwrap();
        assert_eq!(decision.good_matches, 0);
        assert!(!decision.accepted);
    }

    #[test]
    fn similarity_exactly_at_threshold_accepts() {
        let policy = DecisionPolicy::default();
        // 9 of 10 good = 0.90, the inclusive boundary.
        let mut distances = vec![0u32; 9];
        distances.push(200);
        let decision = policy.decide(&matches_with_distances(&distances)).unwrap();
        assert!((decision.similarity - 0.90).abs() < 1e-6);
        assert!(decision.accepted);
    }

    #[test]
    fn similarity_just_below_threshold_rejects() {
        let policy = DecisionPolicy::default();
        // 8999 of 10000 good = 0.8999
        let mut distances = vec![0u32; 8999];
        distances.extend(std::iter::repeat(200).take(1001));
        let decision = policy.decide(&matches_with_distances(&distances)).unwrap();
        assert!(decision.similarity < 0.90);
        assert!(!decision.accepted);
    }

    #[test]
    fn empty_match_set_is_no_matches() {
        let policy = DecisionPolicy::default();
        assert!(matches!(policy.decide(&[]), Err(DecisionError::NoMatches)));
    }

    #[test]
    fn custom_policy_changes_the_boundary() {
        let lax = DecisionPolicy {
            distance_cutoff: 128,
            accept_threshold: 0.5,
        };
        let decision = lax.decide(&matches_with_distances(&[100, 100, 200])).unwrap();
        assert_eq!(decision.good_matches, 2);
        assert!(decision.accepted);
    }
}

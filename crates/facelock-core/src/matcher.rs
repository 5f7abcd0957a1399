//! Cross-checked brute-force Hamming matching.
//!
//! A candidate pair (i, j) survives only when j is i's nearest neighbor
//! among the reference descriptors *and* i is j's nearest neighbor among
//! the probe descriptors. The symmetry requirement trades recall for
//! precision and suppresses spurious pairings.

use thiserror::Error;

use crate::types::{DescriptorMatch, DescriptorSet, DESCRIPTOR_BYTES};

#[derive(Error, Debug)]
pub enum MatchError {
    #[error("nothing to match: probe has {query} descriptors, reference has {train}")]
    NoDescriptors { query: usize, train: usize },
}

/// Match two descriptor sets under Hamming distance with cross-check.
///
/// Zero surviving matches is a valid outcome of cross-check filtering and
/// is returned as an empty vector; an empty *input* set is the
/// [`MatchError::NoDescriptors`] failure.
pub fn match_descriptors(
    query: &DescriptorSet,
    train: &DescriptorSet,
) -> Result<Vec<DescriptorMatch>, MatchError> {
    if query.is_empty() || train.is_empty() {
        return Err(MatchError::NoDescriptors {
            query: query.len(),
            train: train.len(),
        });
    }

    let forward: Vec<(usize, u32)> = query
        .descriptors
        .iter()
        .map(|d| nearest(d, &train.descriptors))
        .collect();
    let backward: Vec<(usize, u32)> = train
        .descriptors
        .iter()
        .map(|d| nearest(d, &query.descriptors))
        .collect();

    let matches: Vec<DescriptorMatch> = forward
        .iter()
        .enumerate()
        .filter(|&(qi, &(tj, _))| backward[tj].0 == qi)
        .map(|(qi, &(tj, distance))| DescriptorMatch {
            query: qi,
            train: tj,
            distance,
        })
        .collect();

    tracing::trace!(
        candidates = query.len(),
        survived = matches.len(),
        "cross-check matching complete"
    );
    Ok(matches)
}

/// Index and distance of the nearest descriptor; ties break to the lowest
/// index so matching is deterministic.
fn nearest(
    descriptor: &[u8; DESCRIPTOR_BYTES],
    pool: &[[u8; DESCRIPTOR_BYTES]],
) -> (usize, u32) {
    let mut best = (0usize, u32::MAX);
    for (i, candidate) in pool.iter().enumerate() {
        let d = hamming(descriptor, candidate);
        if d < best.1 {
            best = (i, d);
        }
    }
    best
}

fn hamming(a: &[u8; DESCRIPTOR_BYTES], b: &[u8; DESCRIPTOR_BYTES]) -> u32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x ^ y).count_ones())
        .sum()
}

use std::sync::Arc;

use serde::Serialize;

use crate::catalog::Record;

use super::fuzzy::Candidate;

/// Score multiplier when the query is a literal substring of the record's
/// normalized text.
pub const SUBSTRING_BOOST: f64 = 0.5;

/// Score multiplier for records in the recency list.
pub const RECENCY_BOOST: f64 = 0.7;

/// Floor for the running score so zero-distance hits can still be
/// separated by the boosts.
const MIN_SCORE: f64 = 1e-6;

#[derive(Debug, Clone, Serialize)]
pub struct Ranked {
    pub record: Arc<Record>,
    /// Raw matcher distance
    pub distance: f64,
    /// Distance after boosts; results are ordered by this, ascending
    pub score: f64,
}

/// Applies the substring and recency boosts to every candidate and sorts by
/// the boosted score. Only candidates are ever returned; the boosts reorder,
/// never admit.
pub fn rank_scored(query: &str, candidates: Vec<Candidate<'_>>, recent: &[String]) -> Vec<Ranked> {
    let mut ranked: Vec<Ranked> = candidates
        .into_iter()
        .map(|candidate| {
            let mut score = candidate.distance.max(MIN_SCORE);

            // against the unweighted concatenation, not the weighted fields
            if !query.is_empty() && candidate.projection.haystack().contains(query) {
                score *= SUBSTRING_BOOST;
            }

            if recent.iter().any(|id| *id == candidate.projection.record.id) {
                score *= RECENCY_BOOST;
            }

            Ranked {
                record: candidate.projection.record.clone(),
                distance: candidate.distance,
                score,
            }
        })
        .collect();

    // stable: ties keep matcher order
    ranked.sort_by(|a, b| a.score.total_cmp(&b.score));
    ranked
}

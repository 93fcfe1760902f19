//! Target ranking and per-pass candidate selection.
//!
//! Targets are ranked by how much yield a fully efficient batch produces per
//! thread per millisecond:
//!
//! ```text
//! score = max_yield / batch_threads / (fortify_ms + overhead_ms)
//! ```
//!
//! A target whose batch cannot fit the budget scores 0 and sorts last.

use rustc_hash::FxHashMap;
use std::cmp::Ordering;

use crate::batch::BatchStore;
use crate::config::BatchConfig;
use crate::models::{EnvironmentSnapshot, Target, TargetEstimates};
use crate::thread_math::extraction_threads;

/// Sort key for target ranking (lower = better).
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreKey {
    pub neg_score: f64,
    pub target_id: String,
}

/// Compare f64 values for sorting, treating NaN as equal.
fn cmp_f64(a: f64, b: f64) -> Ordering {
    a.partial_cmp(&b).unwrap_or(Ordering::Equal)
}

impl Eq for ScoreKey {}

impl Ord for ScoreKey {
    fn cmp(&self, other: &Self) -> Ordering {
        cmp_f64(self.neg_score, other.neg_score).then_with(|| self.target_id.cmp(&other.target_id))
    }
}

impl PartialOrd for ScoreKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Admin access and something to extract.
pub fn is_eligible(target: &Target) -> bool {
    target.has_admin && target.max_yield > 0.0
}

/// Yield has fallen below the extraction floor; the target needs remedial
/// fortify/grow work before it can take another batch.
pub fn needs_remedial(target: &Target, config: &BatchConfig) -> bool {
    target.yield_ratio() < config.extraction_floor()
}

/// Yield per batch thread per millisecond.
pub fn batch_score(
    target: &Target,
    estimates: &TargetEstimates,
    max_batch_threads: u32,
    config: &BatchConfig,
) -> f64 {
    let Some(counts) = extraction_threads(
        estimates.extract_fraction_per_thread,
        max_batch_threads,
        estimates.grow_factor_per_thread,
        config,
    )
    .threads() else {
        return 0.0;
    };
    let threads = counts.total();
    if threads == 0 {
        return 0.0;
    }
    let time_taken = estimates.fortify_ms + config.score_overhead_ms;
    if time_taken <= 0.0 {
        return 0.0;
    }
    target.max_yield / threads as f64 / time_taken
}

/// Eligible target ids, best first.
///
/// Targets without estimates are left out.
pub fn rank_targets(
    targets: &[Target],
    estimates: &FxHashMap<String, TargetEstimates>,
    max_batch_threads: u32,
    config: &BatchConfig,
) -> Vec<String> {
    let mut keys: Vec<ScoreKey> = targets
        .iter()
        .filter(|t| is_eligible(t))
        .filter_map(|t| {
            let est = estimates.get(&t.id)?;
            Some(ScoreKey {
                neg_score: -batch_score(t, est, max_batch_threads, config),
                target_id: t.id.clone(),
            })
        })
        .collect();

    keys.sort();

    keys.into_iter().map(|k| k.target_id).collect()
}

/// Ranked targets that should get direct fortify/grow work this pass: not
/// prepared, skill-gated in, nothing running against them, and not mid-batch.
pub fn remedial_candidates<'a>(
    ranked: &[String],
    snapshot: &'a EnvironmentSnapshot,
    store: &BatchStore,
) -> Vec<&'a Target> {
    ranked
        .iter()
        .filter_map(|id| snapshot.target(id))
        .filter(|t| {
            !snapshot.is_targeted(&t.id)
                && snapshot.skill >= t.required_skill
                && !store.is_batching(&t.id)
                && !t.is_prepared()
        })
        .collect()
}

/// Ranked targets offered new batches: already batching, or skill-gated in
/// and fully prepared.
pub fn batch_candidates<'a>(
    ranked: &[String],
    snapshot: &'a EnvironmentSnapshot,
    batching: &[String],
) -> Vec<&'a Target> {
    ranked
        .iter()
        .filter_map(|id| snapshot.target(id))
        .filter(|t| {
            batching.iter().any(|b| *b == t.id)
                || (snapshot.skill >= t.required_skill && t.is_prepared())
        })
        .collect()
}

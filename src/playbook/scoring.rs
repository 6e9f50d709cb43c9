//! Confidence scoring
//!
//! The Wilson score lower bound ranks playbooks by how sure we are that
//! they work, not by raw success rate: one success out of one run scores
//! far below nine out of ten.

use super::{Playbook, SearchResult};

/// z-score for a 95% confidence interval
pub const Z_95: f64 = 1.96;

/// Lower bound of the Wilson score interval at 95% confidence
///
/// Returns 0.0 when there are no observations; never negative.
pub fn wilson_confidence(successes: u32, failures: u32) -> f64 {
    let n = successes as f64 + failures as f64;
    if n == 0.0 {
        return 0.0;
    }
    let p = successes as f64 / n;
    let z2 = Z_95 * Z_95;

    let center = p + z2 / (2.0 * n);
    let spread = Z_95 * ((p * (1.0 - p) + z2 / (4.0 * n)) / n).sqrt();
    let lower = (center - spread) / (1.0 + z2 / n);

    lower.max(0.0)
}

impl Playbook {
    /// Recompute success rate and confidence from the counters
    ///
    /// Idempotent; touches only `success_rate` and `confidence`.
    pub fn update_stats(&mut self) {
        let total = self.total_executions();
        self.success_rate = if total > 0 {
            self.success_count as f64 / total as f64
        } else {
            0.0
        };
        self.confidence = wilson_confidence(self.success_count, self.failure_count);
    }
}

/// Min-max normalize `score` into [0, 1]; a degenerate range maps to 1.0
pub fn normalize_score(score: f64, min: f64, max: f64) -> f64 {
    if max <= min {
        return 1.0;
    }
    (score - min) / (max - min)
}

/// Blend raw relevance with playbook confidence and re-sort descending
///
/// `final = (1 - w) * normalized + w * confidence`. A weight of 0 leaves
/// the raw order and scores untouched. Ties keep their incoming order.
pub fn apply_composite_score(results: &mut [SearchResult], weight: f64) {
    let w = weight.clamp(0.0, 1.0);
    if w == 0.0 || results.is_empty() {
        return;
    }

    let (min, max) = results.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), r| {
        (lo.min(r.score), hi.max(r.score))
    });

    for r in results.iter_mut() {
        let norm = normalize_score(r.score, min, max);
        r.score = (1.0 - w) * norm + w * r.playbook.confidence;
    }

    results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
}

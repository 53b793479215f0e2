//! Prefetch gate - decide whether an event is worth the enrichment fetch
//!
//! Under-fetching loses notifications (hard failure); over-fetching
//! wastes quota (soft failure). The gate computes a lower bound from
//! prefetch-known categories only, an upper bound that assumes the
//! configured `unknown_assumption` for everything else, and applies the
//! RMS safety margin in strict mode: the prefetch aggregate is a linear
//! mean while the post-fetch blend is RMS, and for n categories the two
//! diverge by at most sqrt(n).

use crate::rules::RuleInput;
use crate::signals::{EvalStage, SignalContext};
use crate::types::{PrefetchMode, SignalCategory};

use super::calculator::{CategoryScore, ProfileEvaluator};

/// The gate's verdict for one (profile, event) pair.
#[derive(Debug, Clone)]
pub enum PrefetchDecision {
    /// Pay the fetch.
    Fetch { reason: FetchReason },
    /// Skip the fetch; the event cannot reach the notify threshold.
    Skip {
        /// Linear-mean score over prefetch-known categories, if any.
        prefetch_score: Option<f64>,
        /// Prefetch-stage category evaluations, kept for the drop
        /// decision's explainability.
        scores: Vec<CategoryScore>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchReason {
    /// Mode is bypass: every event fetches.
    Bypass,
    /// A prefetch-capable always-notify rule matched the raw event.
    AlwaysNotify,
    /// The prefetch score cleared the (adjusted) threshold.
    ScoreAboveThreshold,
    /// The optimistic upper bound cleared the threshold.
    UpperBoundAboveThreshold,
    /// Nothing is prefetch-known; conservative mode fetches blind.
    NoPrefetchSignal,
}

/// Cap for the strict-mode safety factor: beyond five categories the
/// threshold stops shrinking, bounding over-fetch for wide profiles.
const RMS_MARGIN_CATEGORY_CAP: f64 = 5.0;

/// `adjusted = threshold * max(1/sqrt(n), 1/sqrt(5))` for n configured
/// categories.
pub fn adjusted_threshold(notify_threshold: f64, configured_categories: usize) -> f64 {
    let n = configured_categories.max(1) as f64;
    let factor = (1.0 / n.sqrt()).max(1.0 / RMS_MARGIN_CATEGORY_CAP.sqrt());
    notify_threshold * factor
}

impl ProfileEvaluator {
    /// Run the prefetch gate against a raw event.
    pub fn prefetch(&self, ctx: &SignalContext<'_>) -> PrefetchDecision {
        let mode = self.resolved_prefetch_mode();
        if mode == PrefetchMode::Bypass {
            return PrefetchDecision::Fetch {
                reason: FetchReason::Bypass,
            };
        }

        let scores = self.category_scores(ctx, EvalStage::Prefetch);
        let snapshots = Self::snapshots(&scores);
        let profile = self.profile();
        let rule_input = RuleInput {
            signal_ctx: ctx,
            stage: EvalStage::Prefetch,
            snapshots: &snapshots,
            operator_corporations: &profile.operator.corporations,
            operator_alliances: &profile.operator.alliances,
            high_value_isk: profile.high_value_isk,
            watchlist_scope: self.engine().watchlist_scope(),
        };

        // Always-notify overrides come before any score arithmetic.
        if self.engine().prefetch_always_notify(&rule_input) {
            return PrefetchDecision::Fetch {
                reason: FetchReason::AlwaysNotify,
            };
        }

        let bounds = self.prefetch_bounds(&scores);
        let threshold = profile.thresholds.notify;

        match mode {
            PrefetchMode::Bypass => PrefetchDecision::Fetch {
                reason: FetchReason::Bypass,
            },
            PrefetchMode::Strict => {
                // Compile-time coercion guarantees a known category exists.
                let adjusted = adjusted_threshold(threshold, bounds.configured);
                match bounds.prefetch_score {
                    Some(score) if score >= adjusted => PrefetchDecision::Fetch {
                        reason: FetchReason::ScoreAboveThreshold,
                    },
                    score => PrefetchDecision::Skip {
                        prefetch_score: score,
                        scores,
                    },
                }
            }
            PrefetchMode::Conservative => match bounds.prefetch_score {
                None => PrefetchDecision::Fetch {
                    reason: FetchReason::NoPrefetchSignal,
                },
                Some(score) if score >= threshold => PrefetchDecision::Fetch {
                    reason: FetchReason::ScoreAboveThreshold,
                },
                Some(score) => {
                    if bounds.upper_bound >= threshold {
                        PrefetchDecision::Fetch {
                            reason: FetchReason::UpperBoundAboveThreshold,
                        }
                    } else {
                        PrefetchDecision::Skip {
                            prefetch_score: Some(score),
                            scores,
                        }
                    }
                }
            },
        }
    }

    /// Lower/upper bounds from the prefetch-stage category scores.
    fn prefetch_bounds(&self, scores: &[CategoryScore]) -> PrefetchBounds {
        let profile = self.profile();
        let unknown_assumption = profile.prefetch.unknown_assumption;
        let known = self.prefetch_known();

        let mut known_weight = 0.0;
        let mut known_sum = 0.0;
        let mut unknown_weight = 0.0;
        let mut configured = 0usize;

        for cs in scores {
            if cs.weight <= 0.0 || cs.score.is_none() {
                continue;
            }
            configured += 1;
            if known.contains(&cs.category) {
                known_weight += cs.weight;
                // Score is Some by the filter above.
                known_sum += cs.weight * cs.score.unwrap_or(0.0);
            } else {
                unknown_weight += cs.weight;
            }
        }

        let prefetch_score = if known_weight > 0.0 {
            Some(known_sum / known_weight)
        } else {
            None
        };
        let total_weight = known_weight + unknown_weight;
        let upper_bound = if total_weight > 0.0 {
            (known_sum + unknown_weight * unknown_assumption) / total_weight
        } else {
            unknown_assumption
        };

        PrefetchBounds {
            prefetch_score,
            upper_bound,
            configured,
        }
    }
}

struct PrefetchBounds {
    prefetch_score: Option<f64>,
    upper_bound: f64,
    configured: usize,
}

//! Politics signal - entity group and role matching
//!
//! Group-role aggregation: for each configured group the score is the
//! best of (victim, final-blow, attacker) role matches weighted by the
//! group's role weights, with the solo modifier applied to aggressor
//! roles on single-attacker kills. Aggregation across groups is max
//! (`any`) or min (`all`). The known-alt penalty applies after
//! aggregation, and the match flag is evaluated against the penalized
//! score.
//!
//! Victim and final-blow identities are visible on the raw event, so
//! those roles evaluate at prefetch; full attacker-role matching needs
//! enriched identity context and makes the signal non-prefetch-capable
//! as a whole.

use crate::interest::CompiledGroup;
use crate::types::{
    Attacker, EnrichedEvent, Event, PoliticsAggregation, SignalCategory, SignalScore,
};

use super::{EvalStage, SignalContext, SignalProvider};

pub struct PoliticsSignal {
    aggregation: PoliticsAggregation,
    known_alt_penalty: f64,
}

/// One group's evaluation against one event.
struct GroupOutcome {
    score: f64,
    matched: bool,
    /// The winning role's matched entities were all alts.
    alt_only: bool,
}

impl PoliticsSignal {
    pub fn new(aggregation: PoliticsAggregation, known_alt_penalty: f64) -> Self {
        Self {
            aggregation,
            known_alt_penalty,
        }
    }

    fn attacker_identity(
        attacker: &Attacker,
        enriched: Option<&EnrichedEvent>,
    ) -> (Option<u64>, Option<u64>, Option<u64>) {
        match enriched {
            Some(e) => (
                e.attacker_corp(attacker),
                e.attacker_alliance(attacker),
                attacker.faction_id,
            ),
            None => (attacker.corporation_id, attacker.alliance_id, attacker.faction_id),
        }
    }

    fn evaluate_group(
        group: &CompiledGroup,
        event: &Event,
        enriched: Option<&EnrichedEvent>,
        stage: EvalStage,
    ) -> GroupOutcome {
        let weights = &group.role_weights;
        let solo_mod = if event.attackers.len() == 1 {
            weights.solo_modifier
        } else {
            1.0
        };

        let victim = &event.victim;
        let victim_match = group.matches(
            Some(victim.corporation_id),
            victim.alliance_id,
            victim.faction_id,
        );
        let victim_alt = victim_match && group.is_alt_only(Some(victim.corporation_id), victim.alliance_id);

        let final_blow = event.final_blow();
        let (fb_match, fb_alt) = final_blow.map_or((false, false), |attacker| {
            let (corp, alliance, faction) = Self::attacker_identity(attacker, enriched);
            let matched = group.matches(corp, alliance, faction);
            (matched, matched && group.is_alt_only(corp, alliance))
        });

        // Attacker-role identity is only trustworthy post-fetch.
        let (attacker_match, attacker_alt) = if stage == EvalStage::Full {
            let mut matched = false;
            let mut all_alt = true;
            for attacker in &event.attackers {
                let (corp, alliance, faction) = Self::attacker_identity(attacker, enriched);
                if group.matches(corp, alliance, faction) {
                    matched = true;
                    all_alt &= group.is_alt_only(corp, alliance);
                }
            }
            (matched, matched && all_alt)
        } else {
            (false, false)
        };

        let contributions = [
            (victim_match, weights.victim, victim_alt),
            (fb_match, weights.final_blow * solo_mod, fb_alt),
            (attacker_match, weights.attacker * solo_mod, attacker_alt),
        ];

        let mut best = 0.0f64;
        let mut best_alt = false;
        for (matched, weight, alt) in contributions {
            if matched && weight > best {
                best = weight;
                best_alt = alt;
            }
        }

        GroupOutcome {
            score: best.clamp(0.0, 1.0),
            matched: best > 0.0,
            alt_only: best_alt,
        }
    }
}

impl SignalProvider for PoliticsSignal {
    fn category(&self) -> SignalCategory {
        SignalCategory::Politics
    }

    fn prefetch_capable(&self) -> bool {
        false
    }

    fn evaluate(&self, ctx: &SignalContext<'_>, stage: EvalStage) -> SignalScore {
        let outcomes: Vec<GroupOutcome> = ctx
            .map
            .groups
            .iter()
            .map(|g| Self::evaluate_group(g, ctx.event, ctx.enriched, stage))
            .collect();

        let raw = if outcomes.is_empty() {
            0.0
        } else {
            match self.aggregation {
                PoliticsAggregation::Any => outcomes
                    .iter()
                    .map(|o| o.score)
                    .fold(0.0, f64::max),
                PoliticsAggregation::All => outcomes
                    .iter()
                    .map(|o| o.score)
                    .fold(1.0, f64::min),
            }
        };

        let any_matched = outcomes.iter().any(|o| o.matched);
        let all_matches_alt = any_matched && outcomes.iter().filter(|o| o.matched).all(|o| o.alt_only);
        let penalty = if all_matches_alt {
            self.known_alt_penalty
        } else {
            0.0
        };

        let score = (raw * (1.0 - penalty)).clamp(0.0, 1.0);

        SignalScore::new(SignalCategory::Politics, score, false)
            .with_component("raw", raw)
            .with_component("penalty:known_alt", penalty)
    }
}

//! War signal - active war-target involvement

use crate::types::{SignalCategory, SignalScore, WarRoleScale, WarTargets};

use super::{EvalStage, SignalContext, SignalProvider};

/// Scores war-target involvement scaled by role: a war target losing a
/// ship outranks one whoring on a kill. Attacker identity needs enriched
/// context, so the signal is never prefetch-capable.
pub struct WarSignal {
    targets: WarTargets,
    role_scale: WarRoleScale,
}

impl WarSignal {
    pub fn new(targets: WarTargets, role_scale: WarRoleScale) -> Self {
        Self { targets, role_scale }
    }

    fn is_target(&self, corporation: Option<u64>, alliance: Option<u64>) -> bool {
        corporation.is_some_and(|c| self.targets.corporations.contains(&c))
            || alliance.is_some_and(|a| self.targets.alliances.contains(&a))
    }
}

impl SignalProvider for WarSignal {
    fn category(&self) -> SignalCategory {
        SignalCategory::War
    }

    fn prefetch_capable(&self) -> bool {
        false
    }

    fn evaluate(&self, ctx: &SignalContext<'_>, stage: EvalStage) -> SignalScore {
        let event = ctx.event;
        let mut best = 0.0f64;

        if self.is_target(Some(event.victim.corporation_id), event.victim.alliance_id) {
            best = best.max(self.role_scale.victim);
        }

        if stage == EvalStage::Full {
            for attacker in &event.attackers {
                let (corp, alliance) = match ctx.enriched {
                    Some(e) => (e.attacker_corp(attacker), e.attacker_alliance(attacker)),
                    None => (attacker.corporation_id, attacker.alliance_id),
                };
                if self.is_target(corp, alliance) {
                    let scale = if attacker.final_blow {
                        self.role_scale.final_blow
                    } else {
                        self.role_scale.attacker
                    };
                    best = best.max(scale);
                }
            }
        }

        SignalScore::new(SignalCategory::War, best, false)
    }
}

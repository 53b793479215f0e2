//! Activity signal - recent kill volume and pattern escalation

use crate::types::{SignalCategory, SignalScore};

use super::{EvalStage, SignalContext, SignalProvider};

/// Scores 1.0 outright when a pattern escalation is active, otherwise
/// ramps linearly with recent ship kills (5 kills saturates). Reads the
/// copied activity observation, so it is not prefetch-capable.
pub struct ActivitySignal;

impl ActivitySignal {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ActivitySignal {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalProvider for ActivitySignal {
    fn category(&self) -> SignalCategory {
        SignalCategory::Activity
    }

    fn prefetch_capable(&self) -> bool {
        false
    }

    fn evaluate(&self, ctx: &SignalContext<'_>, _stage: EvalStage) -> SignalScore {
        let Some(observation) = ctx.activity else {
            return SignalScore::new(SignalCategory::Activity, 0.0, false)
                .with_component("observed", 0.0);
        };

        let recent = observation.slice.ship_kills;
        let score = if observation.escalation.is_some() {
            1.0
        } else {
            (recent as f64 / 5.0).min(1.0)
        };

        SignalScore::new(SignalCategory::Activity, score, false)
            .with_component("recent_ship_kills", recent as f64)
            .with_component(
                "escalated",
                if observation.escalation.is_some() { 1.0 } else { 0.0 },
            )
    }
}

//! Ship signal - hull-class preference lists

use crate::types::{ShipClass, SignalCategory, SignalScore};

use super::{EvalStage, SignalContext, SignalProvider};

/// Prefer/avoid lists over the victim hull class, with an optional boost
/// for capitals and structures. The avoid list wins over everything.
/// Classification comes from the local catalog index, so the signal is
/// prefetch-capable.
pub struct ShipSignal {
    prefer: Vec<ShipClass>,
    avoid: Vec<ShipClass>,
    capital_boost: f64,
}

impl ShipSignal {
    pub fn new(prefer: Vec<ShipClass>, avoid: Vec<ShipClass>, capital_boost: f64) -> Self {
        Self {
            prefer,
            avoid,
            capital_boost,
        }
    }
}

impl SignalProvider for ShipSignal {
    fn category(&self) -> SignalCategory {
        SignalCategory::Ship
    }

    fn prefetch_capable(&self) -> bool {
        true
    }

    fn evaluate(&self, ctx: &SignalContext<'_>, _stage: EvalStage) -> SignalScore {
        let class = ctx.ships.classify(ctx.event.victim.ship_type_id);

        if self.avoid.contains(&class) {
            return SignalScore::new(SignalCategory::Ship, 0.0, true)
                .with_match(false)
                .with_component("avoided", 1.0);
        }

        let mut score = if self.prefer.contains(&class) { 1.0 } else { 0.0 };
        if class.is_capital_or_structure() {
            score = (score + self.capital_boost).min(1.0);
        }

        SignalScore::new(SignalCategory::Ship, score, true)
            .with_component("preferred", if self.prefer.contains(&class) { 1.0 } else { 0.0 })
            .with_component(
                "capital_or_structure",
                if class.is_capital_or_structure() { 1.0 } else { 0.0 },
            )
    }
}

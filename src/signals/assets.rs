//! Assets signal - operator structures and offices

use crate::interest::AssetKind;
use crate::types::{SignalCategory, SignalScore};

use super::{EvalStage, SignalContext, SignalProvider};

/// Scores the kill system by operator asset presence: structures score
/// highest, rented offices slightly lower, everything else zero.
pub struct AssetsSignal {
    structure_score: f64,
    office_score: f64,
}

impl AssetsSignal {
    pub fn new(structure_score: f64, office_score: f64) -> Self {
        Self {
            structure_score,
            office_score,
        }
    }
}

impl SignalProvider for AssetsSignal {
    fn category(&self) -> SignalCategory {
        SignalCategory::Assets
    }

    fn prefetch_capable(&self) -> bool {
        true
    }

    fn evaluate(&self, ctx: &SignalContext<'_>, _stage: EvalStage) -> SignalScore {
        let (score, kind) = match ctx.map.asset_kind(ctx.event.system_id) {
            Some(AssetKind::Structure) => (self.structure_score, 1.0),
            Some(AssetKind::Office) => (self.office_score, 2.0),
            None => (0.0, 0.0),
        };
        SignalScore::new(SignalCategory::Assets, score, true).with_component("asset_kind", kind)
    }
}

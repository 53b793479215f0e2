//! Location signal - geographic layer score blended with security band

use crate::types::{BandScores, SignalCategory, SignalScore};

use super::{EvalStage, SignalContext, SignalProvider};

/// Scores the kill system against the profile's geographic layers and its
/// security band. The stronger of the two components wins, so a hunting
/// system right next door is not diluted by an indifferent band score.
pub struct LocationSignal {
    band_scores: BandScores,
}

impl LocationSignal {
    pub fn new(band_scores: BandScores) -> Self {
        Self { band_scores }
    }
}

impl SignalProvider for LocationSignal {
    fn category(&self) -> SignalCategory {
        SignalCategory::Location
    }

    fn prefetch_capable(&self) -> bool {
        true
    }

    fn evaluate(&self, ctx: &SignalContext<'_>, _stage: EvalStage) -> SignalScore {
        let geographic = ctx.map.geographic_score(ctx.event.system_id);
        // A system missing from the graph scores zero on both components.
        let band = ctx
            .topology
            .attrs(ctx.event.system_id)
            .map(|attrs| self.band_scores.for_band(attrs.band()))
            .unwrap_or(0.0);

        SignalScore::new(SignalCategory::Location, geographic.max(band), true)
            .with_component("geographic", geographic)
            .with_component("security_band", band)
    }
}

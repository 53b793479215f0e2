//! Routes signal - watched route membership with optional ship filter

use crate::types::{SignalCategory, SignalScore};

use super::{EvalStage, SignalContext, SignalProvider};

/// 1.0 when the kill system lies on any watched route and the route's
/// ship filter (if any) matches the victim hull class. A non-empty filter
/// needs the catalog-resolved hull class of the victim, which is only
/// trusted post-fetch — so the signal is prefetch-capable iff every
/// configured route has an empty filter.
pub struct RoutesSignal {
    all_filters_empty: bool,
}

impl RoutesSignal {
    pub fn new(all_filters_empty: bool) -> Self {
        Self { all_filters_empty }
    }
}

impl SignalProvider for RoutesSignal {
    fn category(&self) -> SignalCategory {
        SignalCategory::Routes
    }

    fn prefetch_capable(&self) -> bool {
        self.all_filters_empty
    }

    fn evaluate(&self, ctx: &SignalContext<'_>, stage: EvalStage) -> SignalScore {
        let victim_class = ctx.ships.classify(ctx.event.victim.ship_type_id);
        let mut hits = 0u32;
        let mut filtered_out = 0u32;

        for route in ctx.map.routes_through(ctx.event.system_id) {
            if route.ship_filter.is_empty() {
                hits += 1;
                continue;
            }
            // Filtered routes only count on the full pass.
            if stage == EvalStage::Full && route.ship_filter.contains(&victim_class) {
                hits += 1;
            } else {
                filtered_out += 1;
            }
        }

        let score = if hits > 0 { 1.0 } else { 0.0 };
        SignalScore::new(SignalCategory::Routes, score, self.all_filters_empty)
            .with_match(hits > 0)
            .with_component("routes_hit", f64::from(hits))
            .with_component("routes_filtered_out", f64::from(filtered_out))
    }
}

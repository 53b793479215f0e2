//! Value signal - ISK value scaled around a configurable pivot

use crate::types::{SignalCategory, SignalScore, ValueScaling};

use super::{EvalStage, SignalContext, SignalProvider};

/// Scores `zkb.total_value` through one of the closed scaling curves.
/// The relay provides the value pre-fetch, so this signal is always
/// prefetch-capable.
pub struct ValueSignal {
    scaling: ValueScaling,
    pivot_isk: f64,
    /// Named extra curve, reachable only behind the `custom_scaling`
    /// feature flag (validated at profile load).
    custom: Option<String>,
}

impl ValueSignal {
    pub fn new(scaling: ValueScaling, pivot_isk: f64, custom: Option<String>) -> Self {
        Self {
            scaling,
            pivot_isk,
            custom,
        }
    }

    fn scale(&self, value: f64) -> f64 {
        if let Some(name) = &self.custom {
            return custom_scale(name, value, self.pivot_isk);
        }
        match self.scaling {
            ValueScaling::Sigmoid => {
                // Steepness tied to the pivot: ~0.88 at 1.5x pivot.
                let k = self.pivot_isk / 4.0;
                1.0 / (1.0 + (-(value - self.pivot_isk) / k).exp())
            }
            ValueScaling::Linear => (value / (2.0 * self.pivot_isk)).clamp(0.0, 1.0),
            ValueScaling::Log => {
                ((1.0 + value).ln() / (1.0 + 10.0 * self.pivot_isk).ln()).clamp(0.0, 1.0)
            }
            ValueScaling::Step => {
                if value >= self.pivot_isk {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }
}

/// The named custom curves available when `custom_scaling` is enabled.
pub fn custom_scale(name: &str, value: f64, pivot: f64) -> f64 {
    match name {
        "sqrt" => (value / (2.0 * pivot)).clamp(0.0, 1.0).sqrt(),
        "quadratic" => {
            let x = (value / (2.0 * pivot)).clamp(0.0, 1.0);
            x * x
        }
        _ => 0.0,
    }
}

/// Curve names accepted by [`custom_scale`]; referenced by profile
/// validation.
pub const CUSTOM_SCALING_NAMES: &[&str] = &["sqrt", "quadratic"];

impl SignalProvider for ValueSignal {
    fn category(&self) -> SignalCategory {
        SignalCategory::Value
    }

    fn prefetch_capable(&self) -> bool {
        true
    }

    fn evaluate(&self, ctx: &SignalContext<'_>, _stage: EvalStage) -> SignalScore {
        let value = ctx.event.zkb.total_value.max(0.0);
        let score = self.scale(value);
        SignalScore::new(SignalCategory::Value, score, true)
            .with_component("total_value_isk", value)
            .with_component("pivot_isk", self.pivot_isk)
    }
}

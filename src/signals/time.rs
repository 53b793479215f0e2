//! Time signal - configured UTC activity windows

use chrono::Timelike;

use crate::types::{SignalCategory, SignalScore, TimeWindow};

use super::{EvalStage, SignalContext, SignalProvider};

/// 1.0 when the event timestamp falls inside any configured UTC window,
/// 0 otherwise.
pub struct TimeSignal {
    windows: Vec<TimeWindow>,
}

impl TimeSignal {
    pub fn new(windows: Vec<TimeWindow>) -> Self {
        Self { windows }
    }
}

impl SignalProvider for TimeSignal {
    fn category(&self) -> SignalCategory {
        SignalCategory::Time
    }

    fn prefetch_capable(&self) -> bool {
        true
    }

    fn evaluate(&self, ctx: &SignalContext<'_>, _stage: EvalStage) -> SignalScore {
        let hour = ctx.event.timestamp.hour() as u8;
        let inside = self.windows.iter().any(|w| w.contains_hour(hour));
        let score = if inside { 1.0 } else { 0.0 };
        SignalScore::new(SignalCategory::Time, score, true).with_component("hour_utc", f64::from(hour))
    }
}

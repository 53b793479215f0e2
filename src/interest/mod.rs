//! Interest scoring: precomputed maps, the calculator, and the prefetch
//! gate.

mod calculator;
mod map;
mod prefetch;

pub use calculator::{CategoryScore, ProfileEvaluator};
pub use map::{AssetKind, CompiledGroup, CompiledRoute, InterestMap, InterestMapRegistry};
pub use prefetch::{adjusted_threshold, FetchReason, PrefetchDecision};

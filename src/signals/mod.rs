//! Signal providers - the nine scoring dimensions
//!
//! Each provider is stateless except for the configuration it closes
//! over; evaluation is pure and synchronous. A provider declares whether
//! it is prefetch-capable (computable from raw event fields without an
//! enrichment fetch); the prefetch gate treats a category as known only
//! when every configured signal in it is prefetch-capable.

mod activity;
mod assets;
mod location;
mod politics;
mod routes;
mod ship;
mod time;
mod value;
mod war;

pub use activity::ActivitySignal;
pub use assets::AssetsSignal;
pub use location::LocationSignal;
pub use politics::PoliticsSignal;
pub use routes::RoutesSignal;
pub use ship::ShipSignal;
pub use time::TimeSignal;
pub use value::{ValueSignal, CUSTOM_SCALING_NAMES};
pub use war::WarSignal;

use std::collections::BTreeMap;

use crate::activity::ActivitySlice;
use crate::catalog::ShipIndex;
use crate::interest::InterestMap;
use crate::topology::TopologyGraph;
use crate::types::{
    EnrichedEvent, Event, PatternEscalation, Profile, SignalCategory, SignalScore,
};

/// Which scoring pass is running. Prefetch sees raw event fields only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalStage {
    Prefetch,
    Full,
}

/// Copied activity context for one event, taken under the single-writer
/// before signal evaluation so every signal sees the same snapshot.
#[derive(Debug, Clone, Default)]
pub struct ActivityObservation {
    /// Trailing 60-minute slice for the event's system.
    pub slice: ActivitySlice,
    pub escalation: Option<PatternEscalation>,
}

/// Everything a signal may read. Pure data; no suspension.
pub struct SignalContext<'a> {
    pub event: &'a Event,
    /// Present only after an enrichment fetch.
    pub enriched: Option<&'a EnrichedEvent>,
    pub map: &'a InterestMap,
    pub topology: &'a TopologyGraph,
    pub ships: &'a ShipIndex,
    /// Absent during prefetch (the activity signal is not prefetch-capable).
    pub activity: Option<&'a ActivityObservation>,
}

/// A scorer in one category. Implementations live in this module's
/// submodules, one per category.
pub trait SignalProvider: Send + Sync {
    fn category(&self) -> SignalCategory;

    /// True iff the score can be computed from raw event fields alone.
    /// Static per configuration, never per event.
    fn prefetch_capable(&self) -> bool;

    fn evaluate(&self, ctx: &SignalContext<'_>, stage: EvalStage) -> SignalScore;
}

/// One configured signal instance with its blending weight.
pub struct ConfiguredSignal {
    pub weight: f64,
    pub provider: Box<dyn SignalProvider>,
}

/// The full signal set for one profile, grouped by category in
/// deterministic order.
pub type SignalSet = BTreeMap<SignalCategory, Vec<ConfiguredSignal>>;

/// Instantiate providers for every configured signal in the profile.
///
/// Profile validation has already run; specs here are structurally sound.
pub fn build_signal_set(profile: &Profile) -> SignalSet {
    let mut set: SignalSet = BTreeMap::new();
    for (category, config) in &profile.categories {
        let mut instances = Vec::with_capacity(config.signals.len());
        for instance in &config.signals {
            let provider = build_provider(profile, &instance.spec);
            instances.push(ConfiguredSignal {
                weight: instance.weight,
                provider,
            });
        }
        if !instances.is_empty() {
            set.insert(*category, instances);
        }
    }
    set
}

fn build_provider(
    profile: &Profile,
    spec: &crate::types::SignalSpec,
) -> Box<dyn SignalProvider> {
    use crate::types::SignalSpec;
    match spec {
        SignalSpec::Location { band_scores } => Box::new(LocationSignal::new(*band_scores)),
        SignalSpec::Value {
            scaling,
            pivot_isk,
            custom,
        } => Box::new(ValueSignal::new(*scaling, *pivot_isk, custom.clone())),
        SignalSpec::Politics {
            aggregation,
            known_alt_penalty,
        } => Box::new(PoliticsSignal::new(*aggregation, *known_alt_penalty)),
        SignalSpec::Activity => Box::new(ActivitySignal::new()),
        SignalSpec::Time { windows } => Box::new(TimeSignal::new(windows.clone())),
        SignalSpec::Routes => Box::new(RoutesSignal::new(
            profile.routes.iter().all(|r| r.ship_filter.is_empty()),
        )),
        SignalSpec::Assets {
            structure_score,
            office_score,
        } => Box::new(AssetsSignal::new(*structure_score, *office_score)),
        SignalSpec::War { targets, role_scale } => {
            Box::new(WarSignal::new(targets.clone(), *role_scale))
        }
        SignalSpec::Ship {
            prefer,
            avoid,
            capital_boost,
        } => Box::new(ShipSignal::new(prefer.clone(), avoid.clone(), *capital_boost)),
    }
}

/// True when every configured signal in the category is prefetch-capable.
pub fn category_prefetch_known(signals: &[ConfiguredSignal]) -> bool {
    !signals.is_empty() && signals.iter().all(|s| s.provider.prefetch_capable())
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use crate::interest::AssetKind;
    use crate::topology::SystemAttrs;
    use crate::types::{Attacker, Victim, ZkbMeta};
    use chrono::{TimeZone, Utc};
    use std::collections::HashMap;

    /// Small fixture topology: Home(1) - Mid(2) - Far(3), region border
    /// between 2 and 3.
    pub fn topology() -> TopologyGraph {
        TopologyGraph::build(
            vec![
                SystemAttrs {
                    system_id: 1,
                    name: "Home".to_string(),
                    security: 0.9,
                    region_id: 1,
                    constellation_id: 1,
                },
                SystemAttrs {
                    system_id: 2,
                    name: "Mid".to_string(),
                    security: 0.4,
                    region_id: 1,
                    constellation_id: 1,
                },
                SystemAttrs {
                    system_id: 3,
                    name: "Far".to_string(),
                    security: -0.2,
                    region_id: 2,
                    constellation_id: 2,
                },
            ],
            &[(1, 2), (2, 3)],
            true,
        )
        .unwrap()
    }

    pub fn ships() -> ShipIndex {
        ShipIndex::from_entries(&[
            (587, crate::types::ShipClass::Frigate),
            (670, crate::types::ShipClass::Capsule),
            (20185, crate::types::ShipClass::Freighter),
            (23773, crate::types::ShipClass::Supercapital),
            (35832, crate::types::ShipClass::Structure),
        ])
    }

    pub fn profile_yaml(yaml: &str) -> Profile {
        serde_yaml::from_str(yaml).unwrap()
    }

    pub fn map_for(profile: &Profile, topology: &TopologyGraph) -> InterestMap {
        InterestMap::build(profile, topology, &HashMap::new())
    }

    pub fn map_with_assets(
        profile: &Profile,
        topology: &TopologyGraph,
        assets: &[(u32, AssetKind)],
    ) -> InterestMap {
        let assets: HashMap<u32, AssetKind> = assets.iter().copied().collect();
        InterestMap::build(profile, topology, &assets)
    }

    pub fn event(system_id: u32) -> Event {
        Event {
            kill_id: 1000,
            timestamp: Utc.with_ymd_and_hms(2025, 6, 1, 20, 30, 0).unwrap(),
            system_id,
            victim: Victim {
                character_id: Some(500),
                corporation_id: 98000001,
                alliance_id: None,
                faction_id: None,
                ship_type_id: 587,
            },
            attackers: vec![Attacker {
                character_id: Some(600),
                corporation_id: Some(77000001),
                final_blow: true,
                ..Attacker::default()
            }],
            zkb: ZkbMeta {
                total_value: 50_000_000.0,
                npc: false,
                solo: false,
            },
        }
    }
}

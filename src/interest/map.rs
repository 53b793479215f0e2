//! Per-profile precomputed interest artifacts
//!
//! The interest map is rebuilt whenever the profile or topology changes
//! and held as an immutable snapshot; evaluators reference it by pointer
//! and never mutate. Publication goes through [`InterestMapRegistry`],
//! an arc-swap so in-flight evaluations keep the version they started
//! with.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::topology::TopologyGraph;
use crate::types::{
    EntityGroupConfig, LayerDecay, Profile, RoleWeights, ShipClass, SystemId,
};

/// Asset kinds tracked per system. Refreshed by the external enrichment
/// client; read-only here.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    Structure,
    Office,
}

/// A compiled entity group with fast membership checks.
#[derive(Debug, Clone)]
pub struct CompiledGroup {
    pub name: String,
    pub corporations: HashSet<u64>,
    pub alliances: HashSet<u64>,
    pub factions: HashSet<u64>,
    pub alt_entities: HashSet<u64>,
    pub role_weights: RoleWeights,
    pub watchlist: bool,
}

impl CompiledGroup {
    fn compile(config: &EntityGroupConfig) -> Self {
        Self {
            name: config.name.clone(),
            corporations: config.corporations.iter().copied().collect(),
            alliances: config.alliances.iter().copied().collect(),
            factions: config.factions.iter().copied().collect(),
            alt_entities: config.alt_entities.iter().copied().collect(),
            role_weights: config.role_weights,
            watchlist: config.watchlist,
        }
    }

    /// Membership over any of (corp, alliance, faction).
    pub fn matches(
        &self,
        corporation: Option<u64>,
        alliance: Option<u64>,
        faction: Option<u64>,
    ) -> bool {
        corporation.is_some_and(|c| self.corporations.contains(&c))
            || alliance.is_some_and(|a| self.alliances.contains(&a))
            || faction.is_some_and(|f| self.factions.contains(&f))
    }

    /// True when every provided id that matched is in the alt set.
    pub fn is_alt_only(&self, corporation: Option<u64>, alliance: Option<u64>) -> bool {
        let corp_matched = corporation.is_some_and(|c| self.corporations.contains(&c));
        let alliance_matched = alliance.is_some_and(|a| self.alliances.contains(&a));
        if !corp_matched && !alliance_matched {
            return false;
        }
        let corp_alt = !corp_matched || corporation.is_some_and(|c| self.alt_entities.contains(&c));
        let alliance_alt =
            !alliance_matched || alliance.is_some_and(|a| self.alt_entities.contains(&a));
        corp_alt && alliance_alt
    }
}

/// One compiled route.
#[derive(Debug, Clone)]
pub struct CompiledRoute {
    pub name: String,
    pub systems: HashSet<SystemId>,
    pub ship_filter: Vec<ShipClass>,
}

/// Immutable per-profile artifacts, keyed by (profile revision, topology
/// version).
#[derive(Debug)]
pub struct InterestMap {
    pub profile_name: String,
    pub profile_revision: u64,
    pub topology_version: u64,
    /// system -> geographic layer score in [0, 1].
    pub geographic_scores: HashMap<SystemId, f64>,
    pub routes: BTreeMap<String, CompiledRoute>,
    pub asset_systems: HashMap<SystemId, AssetKind>,
    pub groups: Vec<CompiledGroup>,
    /// Names that failed to resolve against the topology at build time.
    pub unresolved_names: Vec<String>,
}

impl InterestMap {
    /// Build the map for one profile against the current topology.
    ///
    /// Unknown system names are soft errors: collected, warned, skipped.
    pub fn build(
        profile: &Profile,
        topology: &TopologyGraph,
        assets: &HashMap<SystemId, AssetKind>,
    ) -> Self {
        let mut unresolved = Vec::new();

        let mut geographic_scores: HashMap<SystemId, f64> = HashMap::new();
        let layers = [
            (&profile.geography.home, profile.geography.layers.home),
            (&profile.geography.hunting, profile.geography.layers.hunting),
            (&profile.geography.transit, profile.geography.layers.transit),
        ];
        for (names, decay) in layers {
            for name in names.iter() {
                match topology.resolve(name) {
                    Some(origin) => {
                        spread_layer(topology, origin, decay, &mut geographic_scores);
                    }
                    None => unresolved.push(name.clone()),
                }
            }
        }

        let mut routes = BTreeMap::new();
        for route in &profile.routes {
            let mut systems: HashSet<SystemId> = HashSet::new();
            let mut waypoint_ids = Vec::new();
            for name in &route.waypoints {
                match topology.resolve(name) {
                    Some(id) => waypoint_ids.push(id),
                    None => unresolved.push(name.clone()),
                }
            }
            for pair in waypoint_ids.windows(2) {
                match topology.path(pair[0], pair[1]) {
                    Some(path) => systems.extend(path),
                    None => warn!(
                        route = %route.name,
                        "Route segment has no path; skipping segment"
                    ),
                }
            }
            routes.insert(
                route.name.clone(),
                CompiledRoute {
                    name: route.name.clone(),
                    systems,
                    ship_filter: route.ship_filter.clone(),
                },
            );
        }

        // Asset systems outside the graph are dropped: the map invariant
        // is that every referenced system exists as a graph node.
        let asset_systems: HashMap<SystemId, AssetKind> = assets
            .iter()
            .filter(|(id, _)| topology.contains(**id))
            .map(|(id, kind)| (*id, *kind))
            .collect();

        let groups = profile.groups.iter().map(CompiledGroup::compile).collect();

        for name in &unresolved {
            warn!(profile = %profile.name, system = %name, "Unknown system name in profile");
        }

        Self {
            profile_name: profile.name.clone(),
            profile_revision: profile.revision,
            topology_version: topology.version(),
            geographic_scores,
            routes,
            asset_systems,
            groups,
            unresolved_names: unresolved,
        }
    }

    pub fn geographic_score(&self, system_id: SystemId) -> f64 {
        self.geographic_scores.get(&system_id).copied().unwrap_or(0.0)
    }

    pub fn asset_kind(&self, system_id: SystemId) -> Option<AssetKind> {
        self.asset_systems.get(&system_id).copied()
    }

    /// Routes containing the system.
    pub fn routes_through(&self, system_id: SystemId) -> impl Iterator<Item = &CompiledRoute> {
        self.routes
            .values()
            .filter(move |route| route.systems.contains(&system_id))
    }

    pub fn watchlist_groups(&self) -> impl Iterator<Item = &CompiledGroup> {
        self.groups.iter().filter(|g| g.watchlist)
    }

    pub fn group(&self, name: &str) -> Option<&CompiledGroup> {
        self.groups.iter().find(|g| g.name == name)
    }
}

/// Spread one layer's decayed score outward from a source system, keeping
/// the max where layers overlap.
fn spread_layer(
    topology: &TopologyGraph,
    origin: SystemId,
    decay: LayerDecay,
    scores: &mut HashMap<SystemId, f64>,
) {
    for (system, hops) in topology.distances(origin, decay.range) {
        let score = (decay.base * decay.decay.powi(hops as i32)).clamp(0.0, 1.0);
        scores
            .entry(system)
            .and_modify(|existing| *existing = existing.max(score))
            .or_insert(score);
    }
}

// ============================================================================
// Registry (copy-on-write publication)
// ============================================================================

/// Published interest maps, one per profile. Rebuilds publish a new outer
/// map pointer; readers load a consistent snapshot and keep it for the
/// duration of an evaluation.
pub struct InterestMapRegistry {
    maps: ArcSwap<HashMap<String, Arc<InterestMap>>>,
}

impl Default for InterestMapRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InterestMapRegistry {
    pub fn new() -> Self {
        Self {
            maps: ArcSwap::from_pointee(HashMap::new()),
        }
    }

    pub fn get(&self, profile_name: &str) -> Option<Arc<InterestMap>> {
        self.maps.load().get(profile_name).cloned()
    }

    /// Ensure the registry holds a map matching the profile revision and
    /// topology version, rebuilding when stale.
    pub fn ensure(
        &self,
        profile: &Profile,
        topology: &TopologyGraph,
        assets: &HashMap<SystemId, AssetKind>,
    ) -> Arc<InterestMap> {
        if let Some(existing) = self.get(&profile.name) {
            if existing.profile_revision == profile.revision
                && existing.topology_version == topology.version()
            {
                return existing;
            }
        }
        let built = Arc::new(InterestMap::build(profile, topology, assets));
        info!(
            profile = %profile.name,
            geographic_systems = built.geographic_scores.len(),
            routes = built.routes.len(),
            "Interest map rebuilt"
        );
        let mut next: HashMap<String, Arc<InterestMap>> = (**self.maps.load()).clone();
        next.insert(profile.name.clone(), built.clone());
        self.maps.store(Arc::new(next));
        built
    }

    /// Drop maps for removed profiles.
    pub fn retain(&self, live_profiles: &HashSet<String>) {
        let mut next: HashMap<String, Arc<InterestMap>> = (**self.maps.load()).clone();
        next.retain(|name, _| live_profiles.contains(name));
        self.maps.store(Arc::new(next));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::SystemAttrs;

    fn topology() -> TopologyGraph {
        // Chain: 1 (Home) - 2 - 3 - 4 - 5
        let systems = (1..=5)
            .map(|id| SystemAttrs {
                system_id: id,
                name: format!("Sys{id}"),
                security: 0.5,
                region_id: 1,
                constellation_id: 1,
            })
            .collect();
        TopologyGraph::build(systems, &[(1, 2), (2, 3), (3, 4), (4, 5)], true).unwrap()
    }

    fn profile(yaml: &str) -> Profile {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn geographic_scores_decay_with_hops() {
        let p = profile(
            r#"
name: geo
categories:
  location: { weight: 1.0, signals: [ { type: location } ] }
geography:
  home: [Sys1]
"#,
        );
        let map = InterestMap::build(&p, &topology(), &HashMap::new());
        assert!((map.geographic_score(1) - 1.0).abs() < 1e-9);
        assert!((map.geographic_score(2) - 0.5).abs() < 1e-9);
        assert!((map.geographic_score(3) - 0.25).abs() < 1e-9);
        // Beyond home range (5 hops covers the whole chain here).
        assert!(map.geographic_score(5) > 0.0);
    }

    #[test]
    fn overlapping_layers_keep_max() {
        let p = profile(
            r#"
name: geo
categories:
  location: { weight: 1.0, signals: [ { type: location } ] }
geography:
  home: [Sys1]
  hunting: [Sys3]
"#,
        );
        let map = InterestMap::build(&p, &topology(), &HashMap::new());
        // Sys3: home gives 0.25, hunting gives 0.8 -> max wins.
        assert!((map.geographic_score(3) - 0.8).abs() < 1e-9);
    }

    #[test]
    fn unknown_names_collected_not_fatal() {
        let p = profile(
            r#"
name: geo
categories:
  location: { weight: 1.0, signals: [ { type: location } ] }
geography:
  home: [Nowhere]
"#,
        );
        let map = InterestMap::build(&p, &topology(), &HashMap::new());
        assert_eq!(map.unresolved_names, vec!["Nowhere".to_string()]);
        assert!(map.geographic_scores.is_empty());
    }

    #[test]
    fn route_expands_waypoints() {
        let p = profile(
            r#"
name: routes
categories:
  routes: { weight: 1.0, signals: [ { type: routes } ] }
routes:
  - name: main
    waypoints: [Sys1, Sys4]
"#,
        );
        let map = InterestMap::build(&p, &topology(), &HashMap::new());
        let route = &map.routes["main"];
        assert_eq!(
            route.systems,
            [1, 2, 3, 4].into_iter().collect::<HashSet<_>>()
        );
        assert_eq!(map.routes_through(3).count(), 1);
        assert_eq!(map.routes_through(5).count(), 0);
    }

    #[test]
    fn assets_outside_graph_are_dropped() {
        let p = profile(
            r#"
name: assets
categories:
  assets: { weight: 1.0, signals: [ { type: assets } ] }
"#,
        );
        let mut assets = HashMap::new();
        assets.insert(2u32, AssetKind::Structure);
        assets.insert(999u32, AssetKind::Office);
        let map = InterestMap::build(&p, &topology(), &assets);
        assert_eq!(map.asset_kind(2), Some(AssetKind::Structure));
        assert_eq!(map.asset_kind(999), None);
    }

    #[test]
    fn registry_reuses_until_revision_changes() {
        let registry = InterestMapRegistry::new();
        let topo = topology();
        let mut p = profile(
            r#"
name: geo
categories:
  location: { weight: 1.0, signals: [ { type: location } ] }
geography:
  home: [Sys1]
"#,
        );
        p.revision = 1;
        let first = registry.ensure(&p, &topo, &HashMap::new());
        let second = registry.ensure(&p, &topo, &HashMap::new());
        assert!(Arc::ptr_eq(&first, &second));

        p.revision = 2;
        let third = registry.ensure(&p, &topo, &HashMap::new());
        assert!(!Arc::ptr_eq(&first, &third));
    }

    #[test]
    fn group_membership_and_alt_detection() {
        let config = EntityGroupConfig {
            name: "rivals".to_string(),
            corporations: vec![100, 200],
            alliances: vec![300],
            factions: vec![],
            role_weights: RoleWeights::default(),
            alt_entities: vec![200],
            watchlist: false,
        };
        let group = CompiledGroup::compile(&config);
        assert!(group.matches(Some(100), None, None));
        assert!(group.matches(None, Some(300), None));
        assert!(!group.matches(Some(999), None, None));
        assert!(group.is_alt_only(Some(200), None));
        assert!(!group.is_alt_only(Some(100), None));
    }
}

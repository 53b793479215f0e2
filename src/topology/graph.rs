//! Immutable galaxy topology: adjacency, attribute lookup, and the
//! bounded BFS distance engine.
//!
//! The graph is frozen at startup and shared lock-free behind an `Arc`;
//! reseeding requires a restart. All traversal is deterministic: neighbor
//! lists are sorted at build time and tie-breaks are total orders.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::types::{SecurityBand, SystemId};

/// Static attributes of one star system.
#[derive(Debug, Clone)]
pub struct SystemAttrs {
    pub system_id: SystemId,
    pub name: String,
    pub security: f64,
    pub region_id: u32,
    pub constellation_id: u32,
}

impl SystemAttrs {
    pub fn band(&self) -> SecurityBand {
        SecurityBand::of(self.security)
    }
}

/// Errors raised while assembling the graph. All of these are fatal at
/// load: a corrupt topology must never reach the scoring pipeline.
#[derive(Debug, thiserror::Error)]
pub enum TopologyError {
    #[error("edge references unknown system {0}")]
    DanglingEdge(SystemId),
    #[error("duplicate system id {0}")]
    DuplicateSystem(SystemId),
    #[error("graph is empty")]
    Empty,
    #[error("graph is unexpectedly disconnected: {reachable} of {total} systems reachable from {origin}")]
    Disconnected {
        origin: SystemId,
        reachable: usize,
        total: usize,
    },
}

/// The immutable topology graph.
#[derive(Debug)]
pub struct TopologyGraph {
    attrs: HashMap<SystemId, SystemAttrs>,
    /// Sorted neighbor lists; undirected edges appear on both sides.
    adjacency: HashMap<SystemId, Vec<SystemId>>,
    /// Lowercased name -> id for case-insensitive resolution.
    name_index: HashMap<String, SystemId>,
    /// Systems with a neighbor in a different security band or region.
    borders: Vec<SystemId>,
    /// Cheap fingerprint for cache keys (interest map rebuilds).
    version: u64,
}

impl TopologyGraph {
    /// Build a graph from node attributes and undirected edges.
    ///
    /// Fails on duplicate systems or edges naming unknown systems. When
    /// `expect_connected` is set, an unreachable component is fatal too.
    pub fn build(
        systems: Vec<SystemAttrs>,
        edges: &[(SystemId, SystemId)],
        expect_connected: bool,
    ) -> Result<Self, TopologyError> {
        if systems.is_empty() {
            return Err(TopologyError::Empty);
        }

        let mut attrs = HashMap::with_capacity(systems.len());
        let mut name_index = HashMap::with_capacity(systems.len());
        for system in systems {
            let id = system.system_id;
            name_index.insert(system.name.to_lowercase(), id);
            if attrs.insert(id, system).is_some() {
                return Err(TopologyError::DuplicateSystem(id));
            }
        }

        let mut adjacency: HashMap<SystemId, Vec<SystemId>> =
            attrs.keys().map(|id| (*id, Vec::new())).collect();
        for &(a, b) in edges {
            if !attrs.contains_key(&a) {
                return Err(TopologyError::DanglingEdge(a));
            }
            if !attrs.contains_key(&b) {
                return Err(TopologyError::DanglingEdge(b));
            }
            if a == b {
                continue;
            }
            if let Some(v) = adjacency.get_mut(&a) {
                v.push(b);
            }
            if let Some(v) = adjacency.get_mut(&b) {
                v.push(a);
            }
        }
        for neighbors in adjacency.values_mut() {
            neighbors.sort_unstable();
            neighbors.dedup();
        }

        let version = {
            // Order-independent fingerprint over ids and edge endpoints.
            let node_fold = attrs.keys().fold(0u64, |acc, id| acc ^ u64::from(*id));
            let edge_fold = edges
                .iter()
                .fold(0u64, |acc, (a, b)| acc ^ (u64::from(*a).wrapping_mul(31) ^ u64::from(*b)));
            (attrs.len() as u64) << 40 ^ (edges.len() as u64) << 20 ^ node_fold ^ edge_fold
        };

        let mut graph = Self {
            attrs,
            adjacency,
            name_index,
            borders: Vec::new(),
            version,
        };
        graph.borders = graph.compute_borders();

        if expect_connected {
            let origin = *graph
                .adjacency
                .keys()
                .min()
                .ok_or(TopologyError::Empty)?;
            let reachable = graph.distances(origin, u32::MAX).len();
            if reachable != graph.attrs.len() {
                return Err(TopologyError::Disconnected {
                    origin,
                    reachable,
                    total: graph.attrs.len(),
                });
            }
        }

        Ok(graph)
    }

    /// Fingerprint of this topology load, part of interest map cache keys.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.attrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }

    /// Case-insensitive name lookup. Unknown names are a soft error —
    /// callers surface the `None`.
    pub fn resolve(&self, name: &str) -> Option<SystemId> {
        self.name_index.get(&name.to_lowercase()).copied()
    }

    pub fn attrs(&self, id: SystemId) -> Option<&SystemAttrs> {
        self.attrs.get(&id)
    }

    pub fn contains(&self, id: SystemId) -> bool {
        self.attrs.contains_key(&id)
    }

    pub fn neighbors(&self, id: SystemId) -> &[SystemId] {
        self.adjacency.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Bounded BFS: hop counts for every system within `max_hops` of the
    /// origin, origin included at hop 0. All-pairs is never materialized.
    pub fn distances(&self, origin: SystemId, max_hops: u32) -> HashMap<SystemId, u32> {
        let mut dist = HashMap::new();
        if !self.attrs.contains_key(&origin) {
            return dist;
        }
        dist.insert(origin, 0);
        let mut queue = VecDeque::from([origin]);
        while let Some(current) = queue.pop_front() {
            let hop = dist[&current];
            if hop >= max_hops {
                continue;
            }
            for &next in self.neighbors(current) {
                if !dist.contains_key(&next) {
                    dist.insert(next, hop + 1);
                    queue.push_back(next);
                }
            }
        }
        dist
    }

    /// Shortest path by hop count, inclusive of both endpoints.
    ///
    /// Ties are broken deterministically: lower total sum of system
    /// security along the path, then lexicographic comparison of the
    /// system-name sequence.
    pub fn path(&self, a: SystemId, b: SystemId) -> Option<Vec<SystemId>> {
        if !self.attrs.contains_key(&a) || !self.attrs.contains_key(&b) {
            return None;
        }
        if a == b {
            return Some(vec![a]);
        }

        // Forward and reverse hop maps meet in the middle; the shortest
        // path DAG is the set of nodes with dist_a + dist_b == D.
        let dist_a = self.distances(a, u32::MAX);
        let total = *dist_a.get(&b)?;
        let dist_b = self.distances(b, total);

        let on_dag = |id: SystemId| -> bool {
            match (dist_a.get(&id), dist_b.get(&id)) {
                (Some(da), Some(db)) => da + db == total,
                _ => false,
            }
        };

        // Layered DP over the DAG, carrying the best (security sum, name
        // sequence) prefix per node. DAG layers are small relative to the
        // whole graph, so storing prefixes is acceptable.
        let mut best: HashMap<SystemId, (f64, Vec<SystemId>)> = HashMap::new();
        best.insert(a, (self.security_of(a), vec![a]));

        let mut layer = vec![a];
        for hop in 1..=total {
            let mut next_layer: Vec<SystemId> = Vec::new();
            for &node in &layer {
                for &next in self.neighbors(node) {
                    if dist_a.get(&next) == Some(&hop) && on_dag(next) {
                        let (prev_cost, prev_path) = &best[&node];
                        let cost = prev_cost + self.security_of(next);
                        let mut path = prev_path.clone();
                        path.push(next);
                        match best.get(&next) {
                            Some((existing_cost, existing_path)) => {
                                if Self::path_beats(
                                    cost,
                                    &path,
                                    *existing_cost,
                                    existing_path,
                                    self,
                                ) {
                                    best.insert(next, (cost, path));
                                }
                            }
                            None => {
                                next_layer.push(next);
                                best.insert(next, (cost, path));
                            }
                        }
                    }
                }
            }
            next_layer.sort_unstable();
            next_layer.dedup();
            layer = next_layer;
        }

        best.remove(&b).map(|(_, path)| path)
    }

    /// True when (cost, path) beats the incumbent under the tie-break
    /// order: security sum first, then lexicographic name sequence.
    fn path_beats(
        cost: f64,
        path: &[SystemId],
        existing_cost: f64,
        existing_path: &[SystemId],
        graph: &TopologyGraph,
    ) -> bool {
        if (cost - existing_cost).abs() > 1e-9 {
            return cost < existing_cost;
        }
        let names = |p: &[SystemId]| -> Vec<String> {
            p.iter()
                .map(|id| {
                    graph
                        .attrs
                        .get(id)
                        .map(|a| a.name.clone())
                        .unwrap_or_default()
                })
                .collect()
        };
        names(path) < names(existing_path)
    }

    fn security_of(&self, id: SystemId) -> f64 {
        self.attrs.get(&id).map(|a| a.security).unwrap_or(0.0)
    }

    /// All systems in a region.
    pub fn region_systems(&self, region_id: u32) -> HashSet<SystemId> {
        self.attrs
            .values()
            .filter(|a| a.region_id == region_id)
            .map(|a| a.system_id)
            .collect()
    }

    /// Precomputed border systems: any system with a neighbor in a
    /// different security band or a different region.
    pub fn border_systems(&self) -> &[SystemId] {
        &self.borders
    }

    fn compute_borders(&self) -> Vec<SystemId> {
        let mut borders: Vec<SystemId> = self
            .attrs
            .values()
            .filter(|attrs| {
                self.neighbors(attrs.system_id).iter().any(|&n| {
                    self.attrs.get(&n).map_or(false, |other| {
                        other.region_id != attrs.region_id || other.band() != attrs.band()
                    })
                })
            })
            .map(|attrs| attrs.system_id)
            .collect();
        borders.sort_unstable();
        borders
    }
}

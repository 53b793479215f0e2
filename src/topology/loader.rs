//! Topology seeding from the static catalog or a JSON seed file.
//!
//! The graph is assembled once at startup. Any structural corruption
//! (dangling edge, unexpected disconnect) aborts the load — callers treat
//! these as fatal, per the failure semantics of the topology contract.

use std::path::Path;

use serde::Deserialize;
use tracing::info;

use crate::catalog::CatalogStore;

use super::{SystemAttrs, TopologyError, TopologyGraph};

/// One system record in a JSON seed file.
#[derive(Debug, Deserialize)]
pub struct SeedSystem {
    pub system_id: u32,
    pub name: String,
    pub security: f64,
    pub region_id: u32,
    pub constellation_id: u32,
}

/// JSON seed document: systems plus undirected stargate pairs.
#[derive(Debug, Deserialize)]
pub struct TopologySeed {
    pub systems: Vec<SeedSystem>,
    pub edges: Vec<(u32, u32)>,
}

#[derive(Debug, thiserror::Error)]
pub enum TopologyLoadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("seed parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("catalog error: {0}")]
    Catalog(#[from] crate::catalog::CatalogError),
    #[error(transparent)]
    Graph(#[from] TopologyError),
}

/// Load the graph from a JSON seed file.
pub fn from_json_file(path: &Path, expect_connected: bool) -> Result<TopologyGraph, TopologyLoadError> {
    let raw = std::fs::read_to_string(path)?;
    let seed: TopologySeed = serde_json::from_str(&raw)?;
    from_seed(seed, expect_connected)
}

/// Assemble a graph from an in-memory seed.
pub fn from_seed(seed: TopologySeed, expect_connected: bool) -> Result<TopologyGraph, TopologyLoadError> {
    let systems = seed
        .systems
        .into_iter()
        .map(|s| SystemAttrs {
            system_id: s.system_id,
            name: s.name,
            security: s.security,
            region_id: s.region_id,
            constellation_id: s.constellation_id,
        })
        .collect::<Vec<_>>();
    let graph = TopologyGraph::build(systems, &seed.edges, expect_connected)?;
    info!(
        systems = graph.len(),
        borders = graph.border_systems().len(),
        version = graph.version(),
        "Topology graph assembled"
    );
    Ok(graph)
}

/// Load the graph from the static catalog's map tables.
pub async fn from_catalog(
    catalog: &CatalogStore,
    expect_connected: bool,
) -> Result<TopologyGraph, TopologyLoadError> {
    let systems = catalog.all_systems().await?;
    let edges = catalog.all_stargate_edges().await?;
    let attrs = systems
        .into_iter()
        .map(|s| SystemAttrs {
            system_id: s.system_id,
            name: s.name,
            security: s.security,
            region_id: s.region_id,
            constellation_id: s.constellation_id,
        })
        .collect::<Vec<_>>();
    let graph = TopologyGraph::build(attrs, &edges, expect_connected)?;
    info!(
        systems = graph.len(),
        borders = graph.border_systems().len(),
        version = graph.version(),
        "Topology graph assembled from catalog"
    );
    Ok(graph)
}

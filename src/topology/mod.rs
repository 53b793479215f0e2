//! Galaxy topology: immutable adjacency graph with security/region
//! lookups and bounded BFS distances.

mod graph;
mod loader;

pub use graph::{SystemAttrs, TopologyError, TopologyGraph};
pub use loader::{from_catalog, from_json_file, from_seed, SeedSystem, TopologyLoadError, TopologySeed};

//! KILLWATCH: Kill-feed Operational Intelligence
//!
//! Real-time interest scoring and notification pipeline for a space-MMO
//! kill feed.
//!
//! ## Architecture
//!
//! - **Topology Graph**: immutable galaxy adjacency with bounded BFS
//! - **Activity Cache**: rolling per-system counts and pattern detection
//! - **Interest Map**: per-profile precomputed geographic/route/entity artifacts
//! - **Signals**: nine independent scorers, each normalized to [0, 1]
//! - **Rule Engine**: always-notify / always-ignore rules and category gates
//! - **Interest Calculator**: RMS/linear/max blending into a tiered decision
//! - **Prefetch Gate**: decide whether an event is worth the enrichment fetch
//! - **Ingestion Loop**: long-poll consumer, dedup, per-profile dispatch
//! - **Delivery Router**: per-tier routing, rate limits, digest batching
//! - **Explain / Simulate**: side-effect-free replay diagnostics

pub mod activity;
pub mod catalog;
pub mod config;
pub mod delivery;
pub mod enrichment;
pub mod explain;
pub mod interest;
pub mod pipeline;
pub mod rules;
pub mod signals;
pub mod storage;
pub mod topology;
pub mod types;

// Re-export the core data model
pub use types::{
    Decision, EnrichedEvent, Event, KillId, PatternEscalation, Profile, SignalCategory,
    SignalScore, SystemId, Tier,
};

// Re-export the main pipeline surfaces
pub use interest::{InterestMap, InterestMapRegistry, ProfileEvaluator};
pub use pipeline::{IngestLoop, IngestServices, PipelineStats, RelaySource, ReplaySource};
pub use topology::TopologyGraph;

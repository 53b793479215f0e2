//! Kill-feed ingestion pipeline: sources, the processing loop, and
//! per-profile counters.

mod ingest;
mod source;

pub use ingest::{IngestLoop, IngestServices, PipelineStats, ProfileCounters};
pub use source::{parse_relay_body, EventSource, RelaySource, ReplaySource, SourceEvent};

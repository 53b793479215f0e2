//! System-wide default constants.
//!
//! Centralises magic numbers used across the pipeline. Grouped by
//! subsystem for easy discovery.

// ============================================================================
// Ingestion
// ============================================================================

/// Dedup cache capacity (kill ids). LRU, silent drop on hit.
pub const DEDUP_CACHE_SIZE: usize = 10_000;

/// Base relay backoff after a transient failure (milliseconds).
pub const RELAY_BACKOFF_BASE_MS: u64 = 1_000;

/// Relay backoff cap (milliseconds).
pub const RELAY_BACKOFF_CAP_MS: u64 = 60_000;

/// Long-poll request timeout (seconds). The relay holds the connection up
/// to 10s server-side; leave headroom for transit.
pub const RELAY_POLL_TIMEOUT_SECS: u64 = 20;

/// Deadline for draining in-flight events at shutdown (seconds).
pub const SHUTDOWN_DRAIN_DEADLINE_SECS: u64 = 30;

/// Ceiling on concurrent enrichment fetches.
pub const MAX_CONCURRENT_FETCHES: usize = 8;

// ============================================================================
// Activity cache
// ============================================================================

/// Sliding window covered by the per-minute ring (minutes).
pub const ACTIVITY_WINDOW_MINUTES: usize = 60;

/// Idle time after which a system's buckets are evicted (minutes).
pub const ACTIVITY_EVICT_IDLE_MINUTES: i64 = 240;

/// Observation time before the historical average is trusted (hours).
pub const HISTORICAL_MIN_OBSERVATION_HOURS: i64 = 24;

/// Smoothing factor for the long-lived exponential hourly average.
/// 2 / (N + 1) with N = 168 hourly samples (7 days).
pub const HISTORICAL_EMA_ALPHA: f64 = 2.0 / 169.0;

// ============================================================================
// Pattern detection
// ============================================================================

/// Gatecamp: minimum ship kills inside the rolling window.
pub const GATECAMP_MIN_KILLS: u64 = 3;

/// Gatecamp rolling window (minutes).
pub const GATECAMP_WINDOW_MINUTES: u32 = 10;

/// Gatecamp: long-run hourly average must be below this.
pub const GATECAMP_MAX_HISTORICAL_AVG: f64 = 2.0;

pub const GATECAMP_MULTIPLIER: f64 = 1.5;
pub const GATECAMP_TTL_MINUTES: i64 = 5;

/// Spike: recent hourly count over historical average ratio.
pub const SPIKE_RATIO: f64 = 2.0;
pub const SPIKE_MULTIPLIER: f64 = 1.3;
pub const SPIKE_TTL_MINUTES: i64 = 10;

/// Sustained: minimum ship kills in the past 60 minutes.
pub const SUSTAINED_MIN_KILLS: u64 = 6;
pub const SUSTAINED_MULTIPLIER: f64 = 1.2;
pub const SUSTAINED_TTL_MINUTES: i64 = 15;

/// A single attacker corp "dominates" sustained activity above this share.
pub const SUSTAINED_DOMINANCE_SHARE: f64 = 0.5;

// ============================================================================
// Delivery
// ============================================================================

/// Retry cap for retryable provider send failures.
pub const DELIVERY_MAX_RETRIES: u32 = 3;

/// Base delay for delivery retry backoff (milliseconds).
pub const DELIVERY_RETRY_BASE_MS: u64 = 500;

/// Webhook send timeout (seconds).
pub const WEBHOOK_TIMEOUT_SECS: u64 = 10;

// ============================================================================
// Explain / replay
// ============================================================================

/// zstd compression level for replay capture records.
pub const REPLAY_ZSTD_LEVEL: i32 = 3;

/// Retention for replay capture records (hours).
pub const REPLAY_RETENTION_HOURS: i64 = 72;

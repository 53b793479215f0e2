//! Per-profile delivery token bucket

use chrono::{DateTime, Utc};

use crate::types::RateLimitConfig;

/// Token bucket over wall-clock time: `burst` capacity, refilled at
/// `max_per_hour / 3600` tokens per second. Time comes from the caller so
/// replay and tests stay deterministic.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    tokens: f64,
    last_refill: Option<DateTime<Utc>>,
}

impl TokenBucket {
    pub fn new(config: RateLimitConfig) -> Self {
        let capacity = f64::from(config.burst.max(1));
        Self {
            capacity,
            refill_per_sec: f64::from(config.max_per_hour) / 3600.0,
            tokens: capacity,
            last_refill: None,
        }
    }

    /// Take one token if available. Returns false when exhausted.
    pub fn try_acquire(&mut self, now: DateTime<Utc>) -> bool {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Tokens currently available (for the explain surface).
    pub fn available(&mut self, now: DateTime<Utc>) -> f64 {
        self.refill(now);
        self.tokens
    }

    fn refill(&mut self, now: DateTime<Utc>) {
        if let Some(last) = self.last_refill {
            let elapsed = (now - last).num_milliseconds().max(0) as f64 / 1000.0;
            self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        }
        self.last_refill = Some(now);
    }
}

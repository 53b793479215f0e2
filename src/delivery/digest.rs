//! Digest batching - accumulate digest-tier decisions into summaries

use chrono::{DateTime, Duration, Utc};

use crate::types::{Decision, SignalCategory, Tier};

/// Accumulates digest-tier decisions for one profile and emits a single
/// summary when the window closes or the size cap is hit.
#[derive(Debug)]
pub struct DigestBuffer {
    window: Duration,
    max_size: usize,
    pending: Vec<Decision>,
    window_opened: Option<DateTime<Utc>>,
}

impl DigestBuffer {
    pub fn new(window_minutes: u32, max_size: usize) -> Self {
        Self {
            window: Duration::minutes(i64::from(window_minutes)),
            max_size: max_size.max(1),
            pending: Vec::new(),
            window_opened: None,
        }
    }

    /// Add a decision; returns a summary when the size cap closes the
    /// window early.
    pub fn push(&mut self, decision: Decision, now: DateTime<Utc>) -> Option<Decision> {
        if self.pending.is_empty() {
            self.window_opened = Some(now);
        }
        self.pending.push(decision);
        if self.pending.len() >= self.max_size {
            return self.emit(now);
        }
        None
    }

    /// Emit the summary if the window has elapsed. Called on a timer tick.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Option<Decision> {
        match self.window_opened {
            Some(opened) if now - opened >= self.window => self.emit(now),
            _ => None,
        }
    }

    /// Unconditionally close the window (shutdown flush).
    pub fn flush(&mut self, now: DateTime<Utc>) -> Option<Decision> {
        self.emit(now)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn emit(&mut self, now: DateTime<Utc>) -> Option<Decision> {
        if self.pending.is_empty() {
            return None;
        }
        let batch = std::mem::take(&mut self.pending);
        self.window_opened = None;

        let first = &batch[0];
        let interest = batch.iter().map(|d| d.interest).fold(0.0, f64::max);
        let kill_ids: Vec<u64> = batch.iter().map(|d| d.kill_id).collect();
        // Most frequent dominant category across the batch.
        let dominant = {
            let mut counts: std::collections::BTreeMap<SignalCategory, usize> =
                std::collections::BTreeMap::new();
            for d in &batch {
                if let Some(cat) = d.dominant_category {
                    *counts.entry(cat).or_insert(0) += 1;
                }
            }
            counts
                .into_iter()
                .max_by_key(|(_, count)| *count)
                .map(|(cat, _)| cat)
        };

        Some(Decision {
            kill_id: first.kill_id,
            profile: first.profile.clone(),
            tier: Tier::Digest,
            interest,
            dominant_category: dominant,
            signal_scores: Vec::new(),
            rule_matches: Vec::new(),
            escalation: None,
            fetch_performed: batch.iter().any(|d| d.fetch_performed),
            rate_limited: false,
            enrichment_failed: false,
            digest_kill_ids: kill_ids,
            decided_at: now,
        })
    }
}

//! Activity pattern detection: gatecamp, spike, sustained.
//!
//! Detection is deterministic and pure — it reads an activity slice and a
//! historical baseline and returns a value. The cache owns laziness and
//! TTL caching; this module owns the rules.

use chrono::{DateTime, Duration, Utc};

use crate::config::defaults::{
    GATECAMP_MAX_HISTORICAL_AVG, GATECAMP_MIN_KILLS, GATECAMP_MULTIPLIER, GATECAMP_TTL_MINUTES,
    SPIKE_MULTIPLIER, SPIKE_RATIO, SPIKE_TTL_MINUTES, SUSTAINED_DOMINANCE_SHARE,
    SUSTAINED_MIN_KILLS, SUSTAINED_MULTIPLIER, SUSTAINED_TTL_MINUTES,
};
use crate::types::PatternEscalation;

use super::ActivitySlice;

/// Inputs for one detection pass.
pub struct PatternInput<'a> {
    /// Rolling 10-minute slice (gatecamp window).
    pub short: &'a ActivitySlice,
    /// Rolling 60-minute slice (spike / sustained window).
    pub hour: &'a ActivitySlice,
    /// Long-run hourly average; zero when history is insufficient.
    pub historical_avg: f64,
}

/// Evaluate all patterns; the strongest multiplier wins and reasons are
/// concatenated. Returns `None` when nothing matches.
pub fn detect(input: &PatternInput<'_>, now: DateTime<Utc>) -> Option<PatternEscalation> {
    let mut matches: Vec<(f64, i64, String)> = Vec::new();

    if let Some(reason) = detect_gatecamp(input) {
        matches.push((GATECAMP_MULTIPLIER, GATECAMP_TTL_MINUTES, reason));
    }
    if let Some(reason) = detect_spike(input) {
        matches.push((SPIKE_MULTIPLIER, SPIKE_TTL_MINUTES, reason));
    }
    if let Some(reason) = detect_sustained(input) {
        matches.push((SUSTAINED_MULTIPLIER, SUSTAINED_TTL_MINUTES, reason));
    }

    if matches.is_empty() {
        return None;
    }

    // Strongest multiplier decides the TTL; all reasons are reported.
    let (multiplier, ttl_minutes, _) = matches
        .iter()
        .cloned()
        .max_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal))?;
    let reason = matches
        .iter()
        .map(|(_, _, r)| r.as_str())
        .collect::<Vec<_>>()
        .join("; ");

    Some(PatternEscalation {
        multiplier,
        reason,
        expires_at: now + Duration::minutes(ttl_minutes),
    })
}

/// Gatecamp: >= 3 ship kills in 10 minutes, at least two sharing an
/// attacker corporation, in a system that is normally quiet.
fn detect_gatecamp(input: &PatternInput<'_>) -> Option<String> {
    if input.short.ship_kills < GATECAMP_MIN_KILLS {
        return None;
    }
    let max_corp_kills = input
        .short
        .attacker_corp_counts
        .values()
        .copied()
        .max()
        .unwrap_or(0);
    if max_corp_kills < 2 {
        return None;
    }
    if input.historical_avg >= GATECAMP_MAX_HISTORICAL_AVG {
        return None;
    }
    Some(format!(
        "gatecamp: {} ship kills in 10m, repeat attacker corp ({} kills), baseline {:.1}/hr",
        input.short.ship_kills, max_corp_kills, input.historical_avg
    ))
}

/// Spike: recent hourly count at least double the historical average.
/// Insufficient history (avg == 0) degrades to "no escalation".
fn detect_spike(input: &PatternInput<'_>) -> Option<String> {
    if input.historical_avg <= 0.0 {
        return None;
    }
    let ratio = input.hour.ship_kills as f64 / input.historical_avg;
    if ratio < SPIKE_RATIO {
        return None;
    }
    Some(format!(
        "spike: {} kills/hr vs baseline {:.1}/hr ({:.1}x)",
        input.hour.ship_kills, input.historical_avg, ratio
    ))
}

/// Sustained: >= 6 ship kills in the past hour with no single attacker
/// corporation dominating.
fn detect_sustained(input: &PatternInput<'_>) -> Option<String> {
    if input.hour.ship_kills < SUSTAINED_MIN_KILLS {
        return None;
    }
    let max_corp_kills = input
        .hour
        .attacker_corp_counts
        .values()
        .copied()
        .max()
        .unwrap_or(0);
    let share = max_corp_kills as f64 / input.hour.ship_kills as f64;
    if share > SUSTAINED_DOMINANCE_SHARE {
        return None;
    }
    Some(format!(
        "sustained: {} ship kills in 60m, max corp share {:.0}%",
        input.hour.ship_kills,
        share * 100.0
    ))
}

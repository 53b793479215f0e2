//! Rolling per-system activity cache
//!
//! Single-writer: the ingestion task owns all mutation. Readers receive
//! copied [`ActivitySlice`] values, so signal evaluation sees a consistent
//! snapshot per event. Time always comes from the caller (event time
//! during live ingestion, captured time during replay), which keeps the
//! window math deterministic.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::catalog::ShipIndex;
use crate::config::defaults::{
    ACTIVITY_EVICT_IDLE_MINUTES, ACTIVITY_WINDOW_MINUTES, GATECAMP_WINDOW_MINUTES,
    HISTORICAL_EMA_ALPHA, HISTORICAL_MIN_OBSERVATION_HOURS,
};
use crate::storage::{BaselineRecord, BaselineStore};
use crate::types::{Event, PatternEscalation, ShipClass, SystemId};

use super::patterns::{self, PatternInput};

/// Counts over a sliding window, plus attacker-corp repetition data for
/// the gatecamp heuristics.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ActivitySlice {
    pub since_minutes: u32,
    pub ship_kills: u64,
    pub pod_kills: u64,
    pub npc_kills: u64,
    pub jumps: u64,
    /// Number of kills each attacker corporation appeared in.
    pub attacker_corp_counts: HashMap<u64, u64>,
}

impl ActivitySlice {
    pub fn total_kills(&self) -> u64 {
        self.ship_kills + self.pod_kills + self.npc_kills
    }

    /// Corporations seen in two or more kills inside the slice.
    pub fn repeated_attacker_corps(&self) -> Vec<u64> {
        let mut corps: Vec<u64> = self
            .attacker_corp_counts
            .iter()
            .filter(|(_, &count)| count >= 2)
            .map(|(&corp, _)| corp)
            .collect();
        corps.sort_unstable();
        corps
    }
}

/// One minute of activity.
#[derive(Debug, Clone, Default)]
struct MinuteBucket {
    /// Unix minute this bucket covers.
    minute: i64,
    ship_kills: u64,
    pod_kills: u64,
    npc_kills: u64,
    jumps: u64,
    attacker_corps: HashMap<u64, u64>,
}

#[derive(Debug, Clone)]
struct CachedEscalation {
    value: Option<PatternEscalation>,
}

/// Per-system state: the bucket ring plus the long-lived hourly average.
#[derive(Debug)]
struct SystemActivity {
    buckets: VecDeque<MinuteBucket>,
    last_event: DateTime<Utc>,
    observed_since: DateTime<Utc>,
    hourly_ema: f64,
    /// Unix hour currently being accumulated into `kills_this_hour`.
    hour_anchor: i64,
    kills_this_hour: u64,
    cached_escalation: Option<CachedEscalation>,
}

impl SystemActivity {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            buckets: VecDeque::with_capacity(ACTIVITY_WINDOW_MINUTES),
            last_event: now,
            observed_since: now,
            hourly_ema: 0.0,
            hour_anchor: unix_hour(now),
            kills_this_hour: 0,
            cached_escalation: None,
        }
    }

    fn restore(baseline: &BaselineRecord, now: DateTime<Utc>) -> Self {
        let mut state = Self::new(now);
        state.hourly_ema = baseline.hourly_ema;
        state.observed_since = baseline.observed_since;
        state
    }

    /// Fold completed hours into the EMA. Idle hours decay toward zero.
    fn roll_hours(&mut self, now: DateTime<Utc>) {
        let hour = unix_hour(now);
        if hour <= self.hour_anchor {
            return;
        }
        let elapsed = (hour - self.hour_anchor).min(24 * 14);
        let mut count = self.kills_this_hour as f64;
        for _ in 0..elapsed {
            self.hourly_ema = HISTORICAL_EMA_ALPHA * count + (1.0 - HISTORICAL_EMA_ALPHA) * self.hourly_ema;
            count = 0.0;
        }
        self.hour_anchor = hour;
        self.kills_this_hour = 0;
    }

    fn bucket_mut(&mut self, minute: i64) -> &mut MinuteBucket {
        let needs_new = self.buckets.back().map_or(true, |b| b.minute != minute);
        if needs_new {
            if self.buckets.back().is_some_and(|b| b.minute > minute) {
                // Late event for an already-advanced minute: fold into the
                // newest bucket rather than reordering the ring.
            } else {
                self.buckets.push_back(MinuteBucket {
                    minute,
                    ..MinuteBucket::default()
                });
            }
            while self.buckets.len() > ACTIVITY_WINDOW_MINUTES {
                self.buckets.pop_front();
            }
        }
        // Ring is never empty here.
        #[allow(clippy::unwrap_used)]
        self.buckets.back_mut().unwrap()
    }

    fn slice(&self, since_minutes: u32, now: DateTime<Utc>) -> ActivitySlice {
        let cutoff = unix_minute(now) - i64::from(since_minutes) + 1;
        let mut slice = ActivitySlice {
            since_minutes,
            ..ActivitySlice::default()
        };
        for bucket in self.buckets.iter().filter(|b| b.minute >= cutoff) {
            slice.ship_kills += bucket.ship_kills;
            slice.pod_kills += bucket.pod_kills;
            slice.npc_kills += bucket.npc_kills;
            slice.jumps += bucket.jumps;
            for (&corp, &count) in &bucket.attacker_corps {
                *slice.attacker_corp_counts.entry(corp).or_insert(0) += count;
            }
        }
        slice
    }
}

fn unix_minute(t: DateTime<Utc>) -> i64 {
    t.timestamp() / 60
}

fn unix_hour(t: DateTime<Utc>) -> i64 {
    t.timestamp() / 3600
}

/// The activity cache. See module docs for the ownership model.
pub struct ActivityCache {
    systems: HashMap<SystemId, SystemActivity>,
    ship_index: Arc<ShipIndex>,
    baselines: Option<BaselineStore>,
}

impl ActivityCache {
    pub fn new(ship_index: Arc<ShipIndex>, baselines: Option<BaselineStore>) -> Self {
        Self {
            systems: HashMap::new(),
            ship_index,
            baselines,
        }
    }

    /// Record one event. O(1): touches only the current bucket.
    pub fn record(&mut self, event: &Event) {
        let now = event.timestamp;
        let is_pod = matches!(
            self.ship_index.classify(event.victim.ship_type_id),
            ShipClass::Capsule
        );
        let attacker_corps: Vec<u64> = {
            let mut corps: Vec<u64> = event
                .attackers
                .iter()
                .filter_map(|a| a.corporation_id)
                .collect();
            corps.sort_unstable();
            corps.dedup();
            corps
        };

        let system = self.touch(event.system_id, now);
        system.roll_hours(now);
        system.last_event = now;
        system.kills_this_hour += 1;
        system.cached_escalation = None;

        let bucket = system.bucket_mut(unix_minute(now));
        if event.zkb.npc {
            bucket.npc_kills += 1;
        } else if is_pod {
            bucket.pod_kills += 1;
        } else {
            bucket.ship_kills += 1;
        }
        for corp in attacker_corps {
            *bucket.attacker_corps.entry(corp).or_insert(0) += 1;
        }
    }

    /// Record traffic (jump) counts from an auxiliary feed.
    pub fn record_jumps(&mut self, system_id: SystemId, jumps: u64, now: DateTime<Utc>) {
        let system = self.touch(system_id, now);
        system.last_event = now;
        system.bucket_mut(unix_minute(now)).jumps += jumps;
    }

    /// Counts over the trailing `since_minutes`, as a consistent copy.
    pub fn recent(&self, system_id: SystemId, since_minutes: u32, now: DateTime<Utc>) -> ActivitySlice {
        self.systems
            .get(&system_id)
            .map(|s| s.slice(since_minutes, now))
            .unwrap_or(ActivitySlice {
                since_minutes,
                ..ActivitySlice::default()
            })
    }

    /// Long-run hourly baseline. Zero until 24h of observations exist.
    pub fn historical_avg(&self, system_id: SystemId, now: DateTime<Utc>) -> f64 {
        match self.systems.get(&system_id) {
            Some(system)
                if now - system.observed_since
                    >= Duration::hours(HISTORICAL_MIN_OBSERVATION_HOURS) =>
            {
                system.hourly_ema
            }
            _ => 0.0,
        }
    }

    /// Lazily evaluated pattern escalation, cached until it expires or the
    /// next `record` for the system.
    pub fn escalation(&mut self, system_id: SystemId, now: DateTime<Utc>) -> Option<PatternEscalation> {
        if let Some(cached) = self
            .systems
            .get(&system_id)
            .and_then(|s| s.cached_escalation.as_ref())
        {
            match &cached.value {
                Some(esc) if now < esc.expires_at => return Some(esc.clone()),
                None => return None,
                _ => {}
            }
        }

        let historical_avg = self.historical_avg(system_id, now);
        let short = self.recent(system_id, GATECAMP_WINDOW_MINUTES, now);
        let hour = self.recent(system_id, ACTIVITY_WINDOW_MINUTES as u32, now);
        let value = patterns::detect(
            &PatternInput {
                short: &short,
                hour: &hour,
                historical_avg,
            },
            now,
        );

        if let Some(system) = self.systems.get_mut(&system_id) {
            system.cached_escalation = Some(CachedEscalation { value: value.clone() });
        }
        value
    }

    /// Evict systems idle for more than 4 hours, persisting their
    /// baselines. Returns the number of evicted systems.
    pub fn evict_idle(&mut self, now: DateTime<Utc>) -> usize {
        let cutoff = now - Duration::minutes(ACTIVITY_EVICT_IDLE_MINUTES);
        let stale: Vec<SystemId> = self
            .systems
            .iter()
            .filter(|(_, s)| s.last_event < cutoff)
            .map(|(&id, _)| id)
            .collect();

        for system_id in &stale {
            if let Some(mut state) = self.systems.remove(system_id) {
                state.roll_hours(now);
                self.persist_baseline(*system_id, &state, now);
            }
        }
        if !stale.is_empty() {
            debug!(evicted = stale.len(), "Evicted idle activity entries");
        }
        stale.len()
    }

    /// Persist every tracked system's baseline. Shutdown step 4.
    pub fn flush(&mut self, now: DateTime<Utc>) {
        let ids: Vec<SystemId> = self.systems.keys().copied().collect();
        for system_id in ids {
            if let Some(state) = self.systems.get_mut(&system_id) {
                state.roll_hours(now);
            }
            if let Some(state) = self.systems.get(&system_id) {
                self.persist_baseline(system_id, state, now);
            }
        }
        if let Some(store) = &self.baselines {
            if let Err(e) = store.flush() {
                warn!(error = %e, "Baseline flush failed");
            }
        }
    }

    pub fn tracked_systems(&self) -> usize {
        self.systems.len()
    }

    fn persist_baseline(&self, system_id: SystemId, state: &SystemActivity, now: DateTime<Utc>) {
        if let Some(store) = &self.baselines {
            let record = BaselineRecord {
                system_id,
                hourly_ema: state.hourly_ema,
                observed_since: state.observed_since,
                evicted_at: now,
            };
            if let Err(e) = store.put(&record) {
                warn!(system_id, error = %e, "Failed to persist activity baseline");
            }
        }
    }

    /// Get or create the per-system state, restoring a persisted baseline
    /// on first touch.
    fn touch(&mut self, system_id: SystemId, now: DateTime<Utc>) -> &mut SystemActivity {
        if !self.systems.contains_key(&system_id) {
            let state = self
                .baselines
                .as_ref()
                .and_then(|store| store.get(system_id).ok().flatten())
                .map(|baseline| SystemActivity::restore(&baseline, now))
                .unwrap_or_else(|| SystemActivity::new(now));
            self.systems.insert(system_id, state);
        }
        // Entry exists by construction.
        #[allow(clippy::unwrap_used)]
        self.systems.get_mut(&system_id).unwrap()
    }
}

//! Unified ingestion loop: dedup, activity recording, per-profile
//! prefetch gating, on-demand enrichment, scoring, and routing.
//!
//! Single-writer model: this loop owns all mutation of the activity
//! cache and the dedup cache. Profiles are evaluated in deterministic
//! name order, and decisions for one profile are emitted in ingestion
//! order. The enrichment fetch happens at most once per event and is
//! shared by every profile that wanted it.

use std::collections::{BTreeMap, HashMap};
use std::num::NonZeroUsize;
use std::sync::Arc;

use chrono::Utc;
use lru::LruCache;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::activity::ActivityCache;
use crate::catalog::ShipIndex;
use crate::config::defaults::SHUTDOWN_DRAIN_DEADLINE_SECS;
use crate::delivery::{DeliveryRouter, RouteResult};
use crate::enrichment::EnrichmentClient;
use crate::interest::{AssetKind, InterestMapRegistry, PrefetchDecision, ProfileEvaluator};
use crate::signals::{ActivityObservation, SignalContext};
use crate::storage::{ReplayRecord, ReplayStore};
use crate::types::{Decision, EnrichedEvent, Event, KillId, SystemId, Tier};

use super::source::{EventSource, SourceEvent};

/// Operator-visible per-profile counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProfileCounters {
    pub processed: u64,
    pub notified: u64,
    pub dropped: u64,
    pub rate_limited: u64,
    pub enrichment_failed: u64,
}

/// Final statistics returned when the loop exits.
#[derive(Debug, Default)]
pub struct PipelineStats {
    pub events_processed: u64,
    pub duplicates_dropped: u64,
    pub fetches_performed: u64,
    pub fetch_failures: u64,
    pub per_profile: BTreeMap<String, ProfileCounters>,
}

/// Shared immutable services for the loop.
pub struct IngestServices {
    pub topology: Arc<crate::topology::TopologyGraph>,
    pub ships: Arc<ShipIndex>,
    pub maps: Arc<InterestMapRegistry>,
    pub enrichment: Arc<dyn EnrichmentClient>,
    pub assets: HashMap<SystemId, AssetKind>,
}

pub struct IngestLoop {
    services: IngestServices,
    /// Sorted by profile name at construction for deterministic order.
    evaluators: Vec<ProfileEvaluator>,
    activity: ActivityCache,
    dedup: LruCache<KillId, ()>,
    router: DeliveryRouter,
    replay: Option<ReplayStore>,
    fetch_limiter: Arc<Semaphore>,
    cancel: CancellationToken,
    stats: PipelineStats,
}

impl IngestLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        services: IngestServices,
        mut evaluators: Vec<ProfileEvaluator>,
        activity: ActivityCache,
        router: DeliveryRouter,
        replay: Option<ReplayStore>,
        dedup_capacity: usize,
        fetch_concurrency: usize,
        cancel: CancellationToken,
    ) -> Self {
        evaluators.sort_by(|a, b| a.profile().name.cmp(&b.profile().name));
        let mut stats = PipelineStats::default();
        for evaluator in &evaluators {
            stats
                .per_profile
                .insert(evaluator.profile().name.clone(), ProfileCounters::default());
        }
        let capacity = NonZeroUsize::new(dedup_capacity.max(1))
            .unwrap_or(NonZeroUsize::MIN);
        Self {
            services,
            evaluators,
            activity,
            dedup: LruCache::new(capacity),
            router,
            replay,
            fetch_limiter: Arc::new(Semaphore::new(fetch_concurrency.max(1))),
            cancel,
            stats,
        }
    }

    /// Run until the source is exhausted or cancellation, then run the
    /// shutdown sequence. Returns final statistics.
    pub async fn run<S: EventSource>(mut self, source: &mut S) -> PipelineStats {
        info!(
            source = source.source_name(),
            profiles = self.evaluators.len(),
            "Ingestion loop started"
        );

        let mut housekeeping = tokio::time::interval(std::time::Duration::from_secs(60));
        housekeeping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        enum Step {
            Shutdown,
            Housekeep,
            Source(anyhow::Result<SourceEvent>),
        }

        loop {
            // Arms only select; all mutation happens below.
            let step = tokio::select! {
                _ = self.cancel.cancelled() => Step::Shutdown,
                _ = housekeeping.tick() => Step::Housekeep,
                result = source.next_event() => Step::Source(result),
            };

            match step {
                Step::Shutdown => {
                    info!("Shutdown signal received; relay polling stopped");
                    break;
                }
                Step::Housekeep => {
                    let now = Utc::now();
                    self.activity.evict_idle(now);
                    self.router.tick(now).await;
                    if let Some(replay) = &self.replay {
                        if let Err(e) = replay.prune(now) {
                            warn!(error = %e, "Replay prune failed");
                        }
                    }
                }
                Step::Source(Ok(SourceEvent::Event(event))) => self.process_event(event).await,
                Step::Source(Ok(SourceEvent::Empty)) => continue,
                Step::Source(Ok(SourceEvent::Eof)) => {
                    info!(
                        events = self.stats.events_processed,
                        "Source reached end of data"
                    );
                    break;
                }
                Step::Source(Err(e)) => {
                    warn!(error = %e, "Source error; stopping");
                    break;
                }
            }
        }

        self.shutdown().await
    }

    /// One event through the full per-profile pipeline.
    async fn process_event(&mut self, event: Event) {
        // 1. Dedup: silent drop on hit.
        if self.dedup.put(event.kill_id, ()).is_some() {
            debug!(kill_id = event.kill_id, "Duplicate kill id, dropped");
            self.stats.duplicates_dropped += 1;
            return;
        }
        self.stats.events_processed += 1;

        // 2. Activity recording is unconditional, even for events every
        //    profile will drop.
        self.activity.record(&event);
        let observation = ActivityObservation {
            slice: self
                .activity
                .recent(event.system_id, crate::config::defaults::ACTIVITY_WINDOW_MINUTES as u32, event.timestamp),
            escalation: self.activity.escalation(event.system_id, event.timestamp),
        };

        // 3. Per-profile evaluation, deterministic order. The fetch is
        //    paid once and shared.
        let mut enriched_memo: Option<Result<EnrichedEvent, String>> = None;
        let mut decisions: Vec<Decision> = Vec::with_capacity(self.evaluators.len());

        for index in 0..self.evaluators.len() {
            let evaluator = &self.evaluators[index];
            let profile_name = evaluator.profile().name.clone();
            let map = self.services.maps.ensure(
                evaluator.profile(),
                &self.services.topology,
                &self.services.assets,
            );

            let gate_ctx = SignalContext {
                event: &event,
                enriched: None,
                map: &map,
                topology: &self.services.topology,
                ships: &self.services.ships,
                activity: None,
            };

            let mut decision = match evaluator.prefetch(&gate_ctx) {
                PrefetchDecision::Skip { scores, .. } => {
                    Self::skip_decision(&profile_name, &event, &scores)
                }
                PrefetchDecision::Fetch { reason } => {
                    debug!(
                        profile = %profile_name,
                        kill_id = event.kill_id,
                        ?reason,
                        "Prefetch gate: fetch"
                    );
                    if enriched_memo.is_none() {
                        enriched_memo = Some(self.fetch(&event).await);
                    }
                    let (enriched, enrichment_failed, fetch_performed) = match &enriched_memo {
                        Some(Ok(enriched)) => (Some(enriched), false, true),
                        Some(Err(_)) => (None, true, false),
                        None => (None, true, false),
                    };
                    let full_ctx = SignalContext {
                        event: &event,
                        enriched,
                        map: &map,
                        topology: &self.services.topology,
                        ships: &self.services.ships,
                        activity: Some(&observation),
                    };
                    self.evaluators[index].evaluate(&full_ctx, fetch_performed, enrichment_failed)
                }
            };

            let route_result = self.router.route(&mut decision, Utc::now()).await;
            self.account(&profile_name, &decision, route_result);
            decisions.push(decision);
        }

        // 4. Capture for explain/simulate, decisions included.
        if let Some(replay) = &self.replay {
            let record = ReplayRecord {
                event,
                activity: observation.slice,
                escalation: observation.escalation,
                decisions,
            };
            if let Err(e) = replay.put(&record) {
                warn!(error = %e, "Replay capture failed");
            }
        }
    }

    /// Fetch enrichment, bounded by the concurrency limiter. Failures
    /// are returned, not raised: they map to log-tier decisions.
    async fn fetch(&mut self, event: &Event) -> Result<EnrichedEvent, String> {
        let _permit = match self.fetch_limiter.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return Err("fetch limiter closed".to_string()),
        };
        match self.services.enrichment.get_kill_details(event.kill_id).await {
            Ok(enriched) => {
                self.stats.fetches_performed += 1;
                Ok(enriched)
            }
            // Upstream has no extra context for this kill; the raw
            // fields carry the evaluation.
            Err(crate::enrichment::EnrichmentError::NotFound(_)) => {
                self.stats.fetches_performed += 1;
                Ok(EnrichedEvent::bare(event.clone()))
            }
            Err(e) => {
                self.stats.fetch_failures += 1;
                warn!(kill_id = event.kill_id, error = %e, "Enrichment failed");
                Err(e.to_string())
            }
        }
    }

    /// Decision for an event the gate skipped: drop tier, prefetch
    /// scores retained for explainability.
    fn skip_decision(
        profile: &str,
        event: &Event,
        scores: &[crate::interest::CategoryScore],
    ) -> Decision {
        Decision {
            kill_id: event.kill_id,
            profile: profile.to_string(),
            tier: Tier::Drop,
            interest: 0.0,
            dominant_category: None,
            signal_scores: scores.iter().flat_map(|cs| cs.signals.clone()).collect(),
            rule_matches: Vec::new(),
            escalation: None,
            fetch_performed: false,
            rate_limited: false,
            enrichment_failed: false,
            digest_kill_ids: Vec::new(),
            decided_at: Utc::now(),
        }
    }

    fn account(&mut self, profile: &str, decision: &Decision, route: RouteResult) {
        let Some(counters) = self.stats.per_profile.get_mut(profile) else {
            return;
        };
        counters.processed += 1;
        if decision.enrichment_failed {
            counters.enrichment_failed += 1;
        }
        match route {
            RouteResult::Delivered => counters.notified += 1,
            RouteResult::RateLimited => counters.rate_limited += 1,
            RouteResult::Buffered => {}
            RouteResult::NotRouted => {
                if decision.tier == Tier::Drop {
                    counters.dropped += 1;
                }
            }
        }
    }

    /// Ordered shutdown: polling already stopped, drain is implicit
    /// (events are processed one at a time), cancel pending fetches,
    /// flush activity baselines, close delivery. Each step reports.
    async fn shutdown(mut self) -> PipelineStats {
        let now = Utc::now();

        self.fetch_limiter.close();
        info!("Shutdown: pending fetches cancelled");

        self.activity.flush(now);
        info!("Shutdown: activity baselines flushed");

        let drain = tokio::time::timeout(
            std::time::Duration::from_secs(SHUTDOWN_DRAIN_DEADLINE_SECS),
            self.router.shutdown(now),
        )
        .await;
        match drain {
            Ok(true) => info!("Shutdown: delivery providers closed cleanly"),
            Ok(false) => warn!("Shutdown: delivery providers closed with errors"),
            Err(_) => warn!(
                deadline_secs = SHUTDOWN_DRAIN_DEADLINE_SECS,
                "Shutdown: delivery drain deadline exceeded"
            ),
        }

        for (profile, counters) in &self.stats.per_profile {
            info!(
                profile = %profile,
                processed = counters.processed,
                notified = counters.notified,
                dropped = counters.dropped,
                rate_limited = counters.rate_limited,
                enrichment_failed = counters.enrichment_failed,
                "Final profile counters"
            );
        }
        info!(
            events = self.stats.events_processed,
            duplicates = self.stats.duplicates_dropped,
            fetches = self.stats.fetches_performed,
            fetch_failures = self.stats.fetch_failures,
            "Ingestion loop finished"
        );
        self.stats
    }

    /// The compiled evaluators, for the explain surface.
    pub fn evaluators(&self) -> &[ProfileEvaluator] {
        &self.evaluators
    }
}

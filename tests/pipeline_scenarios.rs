//! End-to-end pipeline scenarios: replayed events through the full
//! ingestion loop with an in-memory enrichment client and a recording
//! delivery sink.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tokio_util::sync::CancellationToken;

use killwatch::activity::ActivityCache;
use killwatch::catalog::ShipIndex;
use killwatch::config::ProviderConfig;
use killwatch::delivery::{DeliveryProvider, DeliveryRouter, ProviderRegistry, SendResult};
use killwatch::enrichment::{EnrichmentClient, MemoryEnrichment};
use killwatch::interest::InterestMapRegistry;
use killwatch::pipeline::{IngestLoop, IngestServices, PipelineStats, ReplaySource};
use killwatch::storage::{open_data_db, ReplayRecord, ReplayStore};
use killwatch::topology::{SystemAttrs, TopologyGraph};
use killwatch::types::{
    Attacker, Decision, Event, Profile, RuleAction, ShipClass, SignalCategory, Tier, Victim,
    ZkbMeta,
};

// ============================================================================
// Fixtures
// ============================================================================

const RIFTER: u32 = 587;
const CAPSULE: u32 = 670;
const FREIGHTER: u32 = 20185;

const OPERATOR_CORP: u64 = 98000001;
const CAMPER_CORP: u64 = 77000001;

const CAMPSITE: u32 = 30001234;
const ALPHA: u32 = 30000001;
const BRAVO: u32 = 30000002;
const CHARLIE: u32 = 30000003;
const FARPOINT: u32 = 30003458;

fn topology() -> Arc<TopologyGraph> {
    let sys = |id: u32, name: &str, security: f64, region: u32| SystemAttrs {
        system_id: id,
        name: name.to_string(),
        security,
        region_id: region,
        constellation_id: region,
    };
    Arc::new(
        TopologyGraph::build(
            vec![
                sys(ALPHA, "Alpha", 0.9, 1),
                sys(BRAVO, "Bravo", 0.7, 1),
                sys(CHARLIE, "Charlie", 0.6, 1),
                sys(CAMPSITE, "Campsite", 0.3, 1),
                sys(FARPOINT, "Farpoint", 0.2, 2),
            ],
            &[
                (ALPHA, BRAVO),
                (BRAVO, CHARLIE),
                (CHARLIE, CAMPSITE),
                (CAMPSITE, FARPOINT),
            ],
            true,
        )
        .unwrap(),
    )
}

fn ships() -> Arc<ShipIndex> {
    Arc::new(ShipIndex::from_entries(&[
        (RIFTER, ShipClass::Frigate),
        (CAPSULE, ShipClass::Capsule),
        (FREIGHTER, ShipClass::Freighter),
    ]))
}

fn event(kill_id: u64, system_id: u32, victim_corp: u64, ship: u32, attacker_corps: &[u64]) -> Event {
    Event {
        kill_id,
        timestamp: Utc::now(),
        system_id,
        victim: Victim {
            character_id: Some(kill_id + 500_000),
            corporation_id: victim_corp,
            alliance_id: None,
            faction_id: None,
            ship_type_id: ship,
        },
        attackers: attacker_corps
            .iter()
            .enumerate()
            .map(|(i, &corp)| Attacker {
                character_id: Some(kill_id * 10 + i as u64),
                corporation_id: Some(corp),
                final_blow: i == 0,
                ..Attacker::default()
            })
            .collect(),
        zkb: ZkbMeta {
            total_value: 5_000_000.0,
            npc: false,
            solo: attacker_corps.len() == 1,
        },
    }
}

/// Recording sink: captures every decision it is asked to deliver.
#[derive(Debug)]
struct RecordingSink {
    sent: Arc<Mutex<Vec<Decision>>>,
}

#[async_trait]
impl DeliveryProvider for RecordingSink {
    fn name(&self) -> &str {
        "sink"
    }
    fn validate(&self, _config: &ProviderConfig) -> Vec<String> {
        Vec::new()
    }
    async fn send(&self, decision: &Decision) -> SendResult {
        self.sent.lock().unwrap().push(decision.clone());
        SendResult::ok()
    }
}

struct RunOutput {
    stats: PipelineStats,
    delivered: Vec<Decision>,
    records: Vec<ReplayRecord>,
}

impl RunOutput {
    fn decision_for(&self, kill_id: u64, profile: &str) -> Option<&Decision> {
        self.records
            .iter()
            .find(|r| r.event.kill_id == kill_id)
            .and_then(|r| r.decisions.iter().find(|d| d.profile == profile))
    }
}

/// Run a batch of events through the full ingestion loop.
async fn run_events(
    profile_yaml: &str,
    events: Vec<Event>,
    enrichment: Arc<dyn EnrichmentClient>,
) -> RunOutput {
    let profile: Profile = serde_yaml::from_str(profile_yaml).unwrap();
    let profile = Arc::new(profile);
    let evaluator = killwatch::ProfileEvaluator::compile(profile.clone()).unwrap();

    let sent = Arc::new(Mutex::new(Vec::new()));
    let mut registry: ProviderRegistry = HashMap::new();
    registry.insert(
        "sink".to_string(),
        Arc::new(RecordingSink { sent: sent.clone() }),
    );
    let router = DeliveryRouter::new(&registry, &[profile]);

    let tmp = tempfile::tempdir().unwrap();
    let db = open_data_db(tmp.path()).unwrap();
    let replay = ReplayStore::open(&db).unwrap();

    let services = IngestServices {
        topology: topology(),
        ships: ships(),
        maps: Arc::new(InterestMapRegistry::new()),
        enrichment,
        assets: HashMap::new(),
    };
    let ingest = IngestLoop::new(
        services,
        vec![evaluator],
        ActivityCache::new(ships(), None),
        router,
        Some(replay.clone()),
        10_000,
        8,
        CancellationToken::new(),
    );

    let mut source = ReplaySource::new(events);
    let stats = ingest.run(&mut source).await;
    let records = replay
        .scan_since(Utc::now() - Duration::days(30))
        .unwrap();
    let delivered = sent.lock().unwrap().clone();
    RunOutput {
        stats,
        delivered,
        records,
    }
}

// ============================================================================
// Scenario 1: corp-member loss, far away
// ============================================================================

#[tokio::test]
async fn corp_member_loss_far_away_forces_notify() {
    let yaml = r#"
name: main
operator:
  corporations: [98000001]
categories:
  location: { weight: 1.0, signals: [ { type: location } ] }
geography:
  home: [Alpha]
rules:
  - name: corp_member_victim
    when: { builtin: corp_member_victim }
    action: always_notify
delivery:
  routes:
    notify: [sink]
    priority: [sink]
"#;
    let enrichment = Arc::new(MemoryEnrichment::new());
    let ev = event(100, FARPOINT, OPERATOR_CORP, RIFTER, &[CAMPER_CORP]);
    enrichment.register_event(ev.clone());

    let output = run_events(yaml, vec![ev], enrichment).await;
    let decision = output.decision_for(100, "main").unwrap();

    assert_eq!(decision.tier, Tier::Notify);
    assert_eq!(decision.dominant_category, Some(SignalCategory::Rule));
    assert!(decision.fetch_performed);
    assert!(decision
        .rule_matches
        .iter()
        .any(|m| m.rule == "corp_member_victim" && m.action == RuleAction::AlwaysNotify));
    assert_eq!(output.delivered.len(), 1);
}

// ============================================================================
// Scenario 2: gatecamp detection
// ============================================================================

#[tokio::test]
async fn gatecamp_escalates_to_priority() {
    let yaml = r#"
name: camps
prefetch: { mode: bypass }
thresholds: { notify: 0.6, priority: 0.7 }
categories:
  location: { weight: 0.6, signals: [ { type: location } ] }
  activity: { weight: 0.4, signals: [ { type: activity } ] }
delivery:
  routes:
    notify: [sink]
    priority: [sink]
"#;
    // Three prior kills in the campsite, two sharing the camper corp.
    let mut events = vec![
        event(1, CAMPSITE, 1000, RIFTER, &[CAMPER_CORP]),
        event(2, CAMPSITE, 1001, RIFTER, &[CAMPER_CORP, 88000001]),
        event(3, CAMPSITE, 1002, RIFTER, &[99000001]),
    ];
    events.push(event(101, CAMPSITE, 1003, RIFTER, &[CAMPER_CORP]));

    let output = run_events(yaml, events, Arc::new(MemoryEnrichment::new())).await;
    let decision = output.decision_for(101, "camps").unwrap();

    let escalation = decision.escalation.as_ref().unwrap();
    assert!((escalation.multiplier - 1.5).abs() < f64::EPSILON);
    assert!(escalation.reason.contains("gatecamp"));

    let activity_score = decision
        .signal_scores
        .iter()
        .find(|s| s.category == SignalCategory::Activity)
        .unwrap();
    assert!((activity_score.score - 1.0).abs() < f64::EPSILON);
    assert_eq!(decision.tier, Tier::Priority);
}

// ============================================================================
// Scenario 3: route ship filter miss
// ============================================================================

#[tokio::test]
async fn route_ship_filter_miss_scores_zero() {
    let yaml = r#"
name: hauling
categories:
  routes: { weight: 1.0, signals: [ { type: routes } ] }
routes:
  - name: corridor
    waypoints: [Alpha, Bravo, Charlie]
    ship_filter: [freighter, transport]
delivery:
  routes:
    notify: [sink]
"#;
    let ev = event(102, BRAVO, 1000, RIFTER, &[CAMPER_CORP]);
    let output = run_events(yaml, vec![ev], Arc::new(MemoryEnrichment::new())).await;
    let decision = output.decision_for(102, "hauling").unwrap();

    let routes_score = decision
        .signal_scores
        .iter()
        .find(|s| s.category == SignalCategory::Routes)
        .unwrap();
    assert!((routes_score.score - 0.0).abs() < f64::EPSILON);
    assert!(!routes_score.r#match);
    assert_eq!(decision.tier, Tier::Drop);

    // The same loss in a freighter matches the filter.
    let ev = event(103, BRAVO, 1000, FREIGHTER, &[CAMPER_CORP]);
    let output = run_events(yaml, vec![ev], Arc::new(MemoryEnrichment::new())).await;
    let decision = output.decision_for(103, "hauling").unwrap();
    let routes_score = decision
        .signal_scores
        .iter()
        .find(|s| s.category == SignalCategory::Routes)
        .unwrap();
    assert!((routes_score.score - 1.0).abs() < f64::EPSILON);
}

// ============================================================================
// Scenario 4: strict prefetch safety
// ============================================================================

#[tokio::test]
async fn strict_prefetch_fetches_on_adjusted_threshold() {
    // Four configured categories; only location is prefetch-known.
    // adjusted = 0.6 * max(1/sqrt(4), 1/sqrt(5)) = 0.30; location scores
    // 1.0 at home, so the gate must fetch.
    let yaml = r#"
name: strict
prefetch: { mode: strict }
thresholds: { notify: 0.6 }
categories:
  location: { weight: 1.0, signals: [ { type: location } ] }
  politics: { weight: 1.0, signals: [ { type: politics } ] }
  activity: { weight: 1.0, signals: [ { type: activity } ] }
  war: { weight: 1.0, signals: [ { type: war, targets: { corporations: [77000001] } } ] }
geography:
  home: [Alpha]
delivery:
  routes:
    notify: [sink]
"#;
    assert!((killwatch::interest::adjusted_threshold(0.6, 4) - 0.30).abs() < 1e-9);

    let ev = event(104, ALPHA, 1000, RIFTER, &[CAMPER_CORP]);
    let output = run_events(yaml, vec![ev], Arc::new(MemoryEnrichment::new())).await;
    let decision = output.decision_for(104, "strict").unwrap();
    assert!(decision.fetch_performed, "1.0 >= 0.30 must fetch");
    assert_eq!(output.stats.fetches_performed, 1);

    // The same profile skips a kill in a system scoring zero.
    let ev = event(105, FARPOINT, 1000, RIFTER, &[1]);
    let output = run_events(yaml, vec![ev], Arc::new(MemoryEnrichment::new())).await;
    let decision = output.decision_for(105, "strict").unwrap();
    assert!(!decision.fetch_performed);
    assert_eq!(decision.tier, Tier::Drop);
    assert_eq!(output.stats.fetches_performed, 0);
}

// ============================================================================
// Scenario 5: always-ignore beats always-notify
// ============================================================================

#[tokio::test]
async fn always_ignore_beats_always_notify() {
    let yaml = r#"
name: precedence
operator:
  corporations: [98000001]
categories:
  location: { weight: 1.0, signals: [ { type: location } ] }
rules:
  - name: corp_member_victim
    when: { builtin: corp_member_victim }
    action: always_notify
  - name: pod_only
    when: { builtin: pod_only }
    action: always_ignore
delivery:
  routes:
    notify: [sink]
    priority: [sink]
"#;
    let ev = event(106, FARPOINT, OPERATOR_CORP, CAPSULE, &[CAMPER_CORP]);
    let enrichment = Arc::new(MemoryEnrichment::new());
    enrichment.register_event(ev.clone());

    let output = run_events(yaml, vec![ev], enrichment).await;
    let decision = output.decision_for(106, "precedence").unwrap();
    assert_eq!(decision.tier, Tier::Drop);
    assert!(output.delivered.is_empty(), "ignored kills are never delivered");
}

// ============================================================================
// Scenario 6: digest batching
// ============================================================================

#[tokio::test]
async fn digest_batches_into_single_summary() {
    let yaml = r#"
name: digesty
prefetch: { mode: bypass }
thresholds: { log: 0.1, digest: 0.3, notify: 0.95, priority: 0.99 }
categories:
  location: { weight: 1.0, signals: [ { type: location } ] }
geography:
  hunting: [Campsite]
delivery:
  routes:
    digest: [sink]
  digest_window_minutes: 15
  digest_max_size: 20
"#;
    let events: Vec<Event> = (0..5)
        .map(|i| event(200 + i, CAMPSITE, 1000 + i, RIFTER, &[CAMPER_CORP]))
        .collect();

    let output = run_events(yaml, events, Arc::new(MemoryEnrichment::new())).await;

    // All five were recorded by the activity cache and captured.
    assert_eq!(output.stats.events_processed, 5);
    assert_eq!(output.records.len(), 5);
    for kill_id in 200..205 {
        assert_eq!(
            output.decision_for(kill_id, "digesty").unwrap().tier,
            Tier::Digest
        );
    }

    // One aggregated decision at window close (shutdown flush).
    assert_eq!(output.delivered.len(), 1);
    let summary = &output.delivered[0];
    assert_eq!(summary.tier, Tier::Digest);
    assert_eq!(summary.digest_kill_ids, vec![200, 201, 202, 203, 204]);
}

// ============================================================================
// Invariants: dedup, ordering, rate limits
// ============================================================================

#[tokio::test]
async fn duplicate_kill_ids_produce_one_decision() {
    let yaml = r#"
name: dedup
prefetch: { mode: bypass }
categories:
  location: { weight: 1.0, signals: [ { type: location } ] }
geography:
  home: [Campsite]
delivery:
  routes:
    notify: [sink]
    priority: [sink]
"#;
    let ev = event(300, CAMPSITE, 1000, RIFTER, &[CAMPER_CORP]);
    let dup = ev.clone();
    let output = run_events(yaml, vec![ev, dup], Arc::new(MemoryEnrichment::new())).await;

    assert_eq!(output.stats.events_processed, 1);
    assert_eq!(output.stats.duplicates_dropped, 1);
    let decisions: Vec<_> = output
        .records
        .iter()
        .flat_map(|r| r.decisions.iter())
        .filter(|d| d.kill_id == 300)
        .collect();
    assert_eq!(decisions.len(), 1);
}

#[tokio::test]
async fn decisions_preserve_ingestion_order_per_profile() {
    let yaml = r#"
name: ordered
prefetch: { mode: bypass }
categories:
  location: { weight: 1.0, signals: [ { type: location } ] }
geography:
  home: [Campsite]
delivery:
  routes:
    notify: [sink]
    priority: [sink]
"#;
    let events: Vec<Event> = (0..6)
        .map(|i| event(400 + i, CAMPSITE, 1000, RIFTER, &[CAMPER_CORP]))
        .collect();
    let output = run_events(yaml, events, Arc::new(MemoryEnrichment::new())).await;

    let delivered_ids: Vec<u64> = output.delivered.iter().map(|d| d.kill_id).collect();
    let mut sorted = delivered_ids.clone();
    sorted.sort_unstable();
    assert_eq!(delivered_ids, sorted, "per-profile order must follow ingestion");
}

#[tokio::test]
async fn rate_limit_exhaustion_marks_decisions() {
    let yaml = r#"
name: limited
prefetch: { mode: bypass }
rate_limit: { max_per_hour: 60, burst: 2 }
categories:
  location: { weight: 1.0, signals: [ { type: location } ] }
geography:
  home: [Campsite]
delivery:
  routes:
    notify: [sink]
    priority: [sink]
"#;
    let events: Vec<Event> = (0..4)
        .map(|i| event(500 + i, CAMPSITE, 1000, RIFTER, &[CAMPER_CORP]))
        .collect();
    let output = run_events(yaml, events, Arc::new(MemoryEnrichment::new())).await;

    assert_eq!(output.delivered.len(), 2, "burst of two delivers, rest limited");
    let limited: Vec<_> = output
        .records
        .iter()
        .flat_map(|r| r.decisions.iter())
        .filter(|d| d.rate_limited)
        .collect();
    assert_eq!(limited.len(), 2);
    let counters = &output.stats.per_profile["limited"];
    assert_eq!(counters.rate_limited, 2);
    assert_eq!(counters.notified, 2);
}

// ============================================================================
// Enrichment failure semantics
// ============================================================================

#[tokio::test]
async fn enrichment_failure_degrades_to_log_but_keeps_forced_notify() {
    let yaml = r#"
name: fragile
operator:
  corporations: [98000001]
prefetch: { mode: bypass }
categories:
  location: { weight: 1.0, signals: [ { type: location } ] }
geography:
  home: [Campsite]
rules:
  - name: corp_member_victim
    when: { builtin: corp_member_victim }
    action: always_notify
delivery:
  routes:
    notify: [sink]
    priority: [sink]
"#;
    let failing = Arc::new(MemoryEnrichment::failing("upstream 500"));

    // A kill matching the raw-data always-notify still delivers.
    let forced = event(600, CAMPSITE, OPERATOR_CORP, RIFTER, &[CAMPER_CORP]);
    let output = run_events(yaml, vec![forced], failing.clone()).await;
    let decision = output.decision_for(600, "fragile").unwrap();
    assert!(decision.enrichment_failed);
    assert_eq!(decision.tier, Tier::Notify);
    assert_eq!(output.delivered.len(), 1);

    // Without a forcing rule the decision degrades to log tier.
    let plain = event(601, CAMPSITE, 1000, RIFTER, &[CAMPER_CORP]);
    let output = run_events(yaml, vec![plain], failing).await;
    let decision = output.decision_for(601, "fragile").unwrap();
    assert!(decision.enrichment_failed);
    assert_eq!(decision.tier, Tier::Log);
    assert!(output.delivered.is_empty());
    assert_eq!(output.stats.per_profile["fragile"].enrichment_failed, 1);
}

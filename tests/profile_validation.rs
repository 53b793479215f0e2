//! Profile loading round-trips and failure isolation.

use std::collections::BTreeSet;

use killwatch::config::{load_profile_dir, validate_profile, FeatureFlags};
use killwatch::types::{BlendMode, PrefetchMode, Profile, SignalCategory};

fn providers() -> BTreeSet<String> {
    ["sink".to_string(), "log".to_string()].into_iter().collect()
}

const FULL_PROFILE: &str = r#"
name: hunter
blend: weighted
thresholds: { log: 0.1, digest: 0.3, notify: 0.6, priority: 0.85 }
prefetch: { mode: conservative, unknown_assumption: 0.5 }
rate_limit: { max_per_hour: 30, burst: 5, bypass_for_always_notify: true }
operator:
  corporations: [98000001]
categories:
  location:
    weight: 0.6
    signals:
      - type: location
        band_scores: { high: 0.0, low: 0.4, "null": 0.3 }
  value:
    weight: 0.4
    signals:
      - type: value
        scaling: log
        pivot_isk: 250000000
  politics:
    weight: 1.0
    signals:
      - type: politics
        aggregation: any
        known_alt_penalty: 0.25
geography:
  home: [Alpha]
  hunting: [Campsite]
routes:
  - name: corridor
    waypoints: [Alpha, Charlie]
    ship_filter: [freighter]
groups:
  - name: rivals
    corporations: [77000001]
    alliances: [99000123]
    role_weights: { victim: 1.0, final_blow: 0.9, attacker: 0.7, solo_modifier: 1.2 }
    watchlist: true
rules:
  - name: watched
    when: { builtin: watchlist_match }
    action: always_notify
    priority: true
gates:
  require_any: [politics, location]
delivery:
  routes:
    notify: [sink]
    priority: [sink]
  digest_window_minutes: 10
  digest_max_size: 15
watchlist_activity_scope: attacker_global
high_value_isk: 2000000000
"#;

#[test]
fn profile_round_trips_identically() {
    let original: Profile = serde_yaml::from_str(FULL_PROFILE).unwrap();
    validate_profile(&original, &FeatureFlags::default(), &providers()).unwrap();

    let serialized = serde_yaml::to_string(&original).unwrap();
    let reloaded: Profile = serde_yaml::from_str(&serialized).unwrap();
    validate_profile(&reloaded, &FeatureFlags::default(), &providers()).unwrap();

    // Serializing again must be a fixed point.
    let reserialized = serde_yaml::to_string(&reloaded).unwrap();
    assert_eq!(serialized, reserialized);

    assert_eq!(reloaded.name, "hunter");
    assert_eq!(reloaded.blend, BlendMode::Weighted);
    assert_eq!(reloaded.prefetch.mode, Some(PrefetchMode::Conservative));
    assert!((reloaded.prefetch.unknown_assumption - 0.5).abs() < f64::EPSILON);
    assert_eq!(reloaded.categories.len(), 3);
    assert_eq!(
        reloaded.gates.require_any,
        vec![SignalCategory::Politics, SignalCategory::Location]
    );
    assert_eq!(reloaded.groups[0].alliances, vec![99000123]);
    assert!((reloaded.high_value_isk - 2e9).abs() < f64::EPSILON);
}

#[test]
fn invalid_profiles_are_isolated() {
    let tmp = tempfile::tempdir().unwrap();
    std::fs::write(tmp.path().join("a_hunter.yaml"), FULL_PROFILE).unwrap();
    std::fs::write(
        tmp.path().join("b_broken.yaml"),
        r#"
name: broken
thresholds: { digest: 0.9, notify: 0.5, priority: 0.4 }
categories:
  location: { weight: 1.0, signals: [ { type: location } ] }
"#,
    )
    .unwrap();
    std::fs::write(tmp.path().join("c_not_yaml.yaml"), ": : :").unwrap();
    std::fs::write(tmp.path().join("ignored.txt"), "not a profile").unwrap();

    let report = load_profile_dir(tmp.path(), &FeatureFlags::default(), &providers()).unwrap();
    assert_eq!(report.profiles.len(), 1);
    assert_eq!(report.profiles[0].name, "hunter");
    assert_eq!(report.failures.len(), 2);
}

#[test]
fn unknown_delivery_provider_fails_load() {
    let tmp = tempfile::tempdir().unwrap();
    std::fs::write(
        tmp.path().join("profile.yaml"),
        r#"
name: misdirected
categories:
  location: { weight: 1.0, signals: [ { type: location } ] }
delivery:
  routes:
    notify: [nonexistent]
"#,
    )
    .unwrap();
    let report = load_profile_dir(tmp.path(), &FeatureFlags::default(), &providers()).unwrap();
    assert!(report.profiles.is_empty());
    assert_eq!(report.failures.len(), 1);
    assert!(report.failures[0].1.contains("nonexistent"));
}

#[test]
fn expression_rules_load_with_flag() {
    let mut flags_on = std::collections::BTreeMap::new();
    flags_on.insert("rule_dsl".to_string(), true);
    let flags = FeatureFlags::from_config(&flags_on);

    let profile: Profile = serde_yaml::from_str(
        r#"
name: dsl
categories:
  location: { weight: 1.0, signals: [ { type: location } ] }
  value: { weight: 1.0, signals: [ { type: value } ] }
rules:
  - name: fancy
    when: { expr: "value_above(1_000_000_000) and not solo_kill()" }
    action: always_notify
"#,
    )
    .unwrap();
    validate_profile(&profile, &flags, &providers()).unwrap();
    assert!(validate_profile(&profile, &FeatureFlags::default(), &providers()).is_err());
}

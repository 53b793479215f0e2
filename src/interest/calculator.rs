//! Interest calculator - blending, penalties, gates, tiers
//!
//! One [`ProfileEvaluator`] is compiled per loaded profile and holds the
//! signal set, rule engine, and resolved prefetch mode. Evaluation is
//! pure and synchronous; every pipeline step returns a value, never an
//! escape.

use std::sync::Arc;

use chrono::Utc;
use tracing::warn;

use crate::rules::{CategorySnapshot, CategorySnapshots, RuleEngine, RuleInput};
use crate::signals::{
    build_signal_set, category_prefetch_known, EvalStage, SignalContext, SignalSet,
};
use crate::types::{
    BlendMode, Decision, PrefetchMode, Profile, RuleAction, RuleMatch, SignalCategory, SignalScore,
    Tier,
};

/// Per-category evaluation result inside one pass.
#[derive(Debug, Clone)]
pub struct CategoryScore {
    pub category: SignalCategory,
    pub weight: f64,
    /// None when the category has no configured signals.
    pub score: Option<f64>,
    pub matched: bool,
    pub signals: Vec<SignalScore>,
}

/// A compiled, evaluatable profile.
pub struct ProfileEvaluator {
    profile: Arc<Profile>,
    signals: SignalSet,
    engine: RuleEngine,
    /// Categories whose every configured signal is prefetch-capable.
    prefetch_known: Vec<SignalCategory>,
    /// Mode after auto-derivation and strict-coercion.
    resolved_prefetch_mode: PrefetchMode,
}

impl ProfileEvaluator {
    pub fn compile(profile: Arc<Profile>) -> Result<Self, crate::rules::expr::ExprError> {
        let signals = build_signal_set(&profile);

        let prefetch_known: Vec<SignalCategory> = signals
            .iter()
            .filter(|(category, instances)| {
                profile.category_weight(**category) > 0.0 && category_prefetch_known(instances)
            })
            .map(|(category, _)| *category)
            .collect();

        let engine = RuleEngine::compile(&profile, &prefetch_known)?;

        let resolved_prefetch_mode =
            Self::resolve_prefetch_mode(&profile, &signals, &prefetch_known, &engine);

        Ok(Self {
            profile,
            signals,
            engine,
            prefetch_known,
            resolved_prefetch_mode,
        })
    }

    /// Mode resolution: explicit config wins (with strict coerced to
    /// conservative when nothing is prefetch-known); otherwise strict iff
    /// everything is prefetch-capable and no always-notify rule depends
    /// on post-fetch data.
    fn resolve_prefetch_mode(
        profile: &Profile,
        signals: &SignalSet,
        prefetch_known: &[SignalCategory],
        engine: &RuleEngine,
    ) -> PrefetchMode {
        let enabled: Vec<SignalCategory> = signals
            .keys()
            .filter(|c| profile.category_weight(**c) > 0.0)
            .copied()
            .collect();

        match profile.prefetch.mode {
            Some(PrefetchMode::Bypass) => PrefetchMode::Bypass,
            Some(PrefetchMode::Conservative) => PrefetchMode::Conservative,
            Some(PrefetchMode::Strict) => {
                if prefetch_known.is_empty() {
                    warn!(
                        profile = %profile.name,
                        "strict prefetch with no prefetch-known categories; coercing to conservative"
                    );
                    PrefetchMode::Conservative
                } else {
                    PrefetchMode::Strict
                }
            }
            None => {
                let all_known = !enabled.is_empty() && enabled.len() == prefetch_known.len();
                if all_known && !engine.has_post_fetch_always_notify() {
                    PrefetchMode::Strict
                } else {
                    PrefetchMode::Conservative
                }
            }
        }
    }

    pub fn profile(&self) -> &Arc<Profile> {
        &self.profile
    }

    pub fn engine(&self) -> &RuleEngine {
        &self.engine
    }

    pub fn prefetch_known(&self) -> &[SignalCategory] {
        &self.prefetch_known
    }

    pub fn resolved_prefetch_mode(&self) -> PrefetchMode {
        self.resolved_prefetch_mode
    }

    /// Evaluate every configured category at the given stage.
    pub fn category_scores(&self, ctx: &SignalContext<'_>, stage: EvalStage) -> Vec<CategoryScore> {
        let mut scores = Vec::with_capacity(self.signals.len());
        for (category, instances) in &self.signals {
            let weight = self.profile.category_weight(*category);
            let mut signal_scores = Vec::with_capacity(instances.len());
            let mut weighted_sum = 0.0;
            let mut weight_sum = 0.0;
            let mut matched = false;
            for instance in instances {
                let score = instance.provider.evaluate(ctx, stage);
                weighted_sum += instance.weight * score.score;
                weight_sum += instance.weight;
                matched |= score.r#match;
                signal_scores.push(score);
            }
            let score = if weight_sum > 0.0 {
                Some((weighted_sum / weight_sum).clamp(0.0, 1.0))
            } else {
                None
            };
            scores.push(CategoryScore {
                category: *category,
                weight,
                score,
                matched,
                signals: signal_scores,
            });
        }
        scores
    }

    /// Snapshot view for the rule engine.
    pub fn snapshots(scores: &[CategoryScore]) -> CategorySnapshots {
        scores
            .iter()
            .filter_map(|cs| {
                cs.score.map(|score| {
                    (
                        cs.category,
                        CategorySnapshot {
                            score,
                            matched: cs.matched,
                        },
                    )
                })
            })
            .collect()
    }

    /// Blend enabled category scores into the raw interest value.
    ///
    /// Disabled (weight 0) and null-score categories are excluded. The
    /// RMS blend preserves strong single signals; linear is a plain mean;
    /// max takes the best category.
    pub fn blend(&self, scores: &[CategoryScore]) -> f64 {
        let contributing: Vec<(f64, f64)> = scores
            .iter()
            .filter(|cs| cs.weight > 0.0)
            .filter_map(|cs| cs.score.map(|s| (cs.weight, s)))
            .collect();
        if contributing.is_empty() {
            return 0.0;
        }

        match self.profile.blend {
            BlendMode::Weighted => {
                let weight_sum: f64 = contributing.iter().map(|(w, _)| w).sum();
                let squared: f64 = contributing.iter().map(|(w, s)| w * s * s).sum();
                (squared / weight_sum).sqrt()
            }
            BlendMode::Linear => {
                let weight_sum: f64 = contributing.iter().map(|(w, _)| w).sum();
                let sum: f64 = contributing.iter().map(|(w, s)| w * s).sum();
                sum / weight_sum
            }
            BlendMode::Max => contributing
                .iter()
                .map(|(_, s)| *s)
                .fold(0.0, f64::max),
        }
    }

    /// Full post-fetch evaluation producing the decision for this
    /// (profile, event) pair.
    ///
    /// `enrichment_failed` caps the tier at log unless a raw-data
    /// always-notify rule fired.
    pub fn evaluate(
        &self,
        ctx: &SignalContext<'_>,
        fetch_performed: bool,
        enrichment_failed: bool,
    ) -> Decision {
        let stage = if enrichment_failed {
            // Scoring falls back to raw event fields only.
            EvalStage::Prefetch
        } else {
            EvalStage::Full
        };

        let scores = self.category_scores(ctx, stage);
        let snapshots = Self::snapshots(&scores);
        let rule_input = RuleInput {
            signal_ctx: ctx,
            stage,
            snapshots: &snapshots,
            operator_corporations: &self.profile.operator.corporations,
            operator_alliances: &self.profile.operator.alliances,
            high_value_isk: self.profile.high_value_isk,
            watchlist_scope: self.engine.watchlist_scope(),
        };
        let outcome = self.engine.evaluate(&rule_input);

        let mut rule_matches: Vec<RuleMatch> = Vec::new();
        for name in &outcome.ignore_matched {
            rule_matches.push(RuleMatch {
                rule: name.clone(),
                action: RuleAction::AlwaysIgnore,
            });
        }
        for matched in &outcome.notify_matched {
            rule_matches.push(RuleMatch {
                rule: matched.rule.clone(),
                action: if matched.priority {
                    RuleAction::AlwaysPriority
                } else {
                    RuleAction::AlwaysNotify
                },
            });
        }

        let raw_interest = self.blend(&scores);
        let escalation = ctx.activity.and_then(|obs| obs.escalation.clone());
        let interest = match &escalation {
            Some(esc) => (raw_interest * esc.multiplier).min(1.0),
            None => raw_interest,
        };

        let signal_scores: Vec<SignalScore> =
            scores.iter().flat_map(|cs| cs.signals.clone()).collect();
        let weights = self
            .signals
            .keys()
            .map(|c| (*c, self.profile.category_weight(*c)))
            .collect();

        // Precedence 1: always_ignore wins outright.
        if outcome.ignored() {
            return Decision {
                kill_id: ctx.event.kill_id,
                profile: self.profile.name.clone(),
                tier: Tier::Drop,
                interest,
                dominant_category: Some(SignalCategory::Rule),
                signal_scores,
                rule_matches,
                escalation,
                fetch_performed,
                rate_limited: false,
                enrichment_failed,
                digest_kill_ids: Vec::new(),
                decided_at: Utc::now(),
            };
        }

        // Precedence 3: gates. Disabled categories cannot satisfy a gate.
        let gates_passed = self.gates_pass(&scores);

        // Precedence 4: thresholds.
        let scored_tier = if !gates_passed {
            if interest >= self.profile.thresholds.log {
                Tier::Log
            } else {
                Tier::Drop
            }
        } else {
            self.tier_for(interest)
        };

        // Precedence 2: always_notify floors the tier.
        let forced = outcome.forced_notify();
        let mut tier = scored_tier;
        if let Some(forced) = forced {
            let floor = if forced.priority {
                Tier::Priority
            } else {
                Tier::Notify
            };
            tier = tier.max(floor);
        }

        // Enrichment failure degrades anything not forced by a rule.
        if enrichment_failed && forced.is_none() && tier > Tier::Log {
            tier = Tier::Log;
        }

        let dominant_category = if forced.is_some() && scored_tier < tier {
            Some(SignalCategory::Rule)
        } else {
            Decision::compute_dominant(&signal_scores, &weights)
        };

        Decision {
            kill_id: ctx.event.kill_id,
            profile: self.profile.name.clone(),
            tier,
            interest,
            dominant_category,
            signal_scores,
            rule_matches,
            escalation,
            fetch_performed,
            rate_limited: false,
            enrichment_failed,
            digest_kill_ids: Vec::new(),
            decided_at: Utc::now(),
        }
    }

    fn gates_pass(&self, scores: &[CategoryScore]) -> bool {
        let matched = |category: &SignalCategory| -> bool {
            scores
                .iter()
                .find(|cs| cs.category == *category && cs.weight > 0.0)
                .map(|cs| cs.matched && cs.score.is_some())
                .unwrap_or(false)
        };

        let gates = &self.profile.gates;
        let enabled_any: Vec<&SignalCategory> = gates
            .require_any
            .iter()
            .filter(|c| self.profile.category_weight(**c) > 0.0)
            .collect();

        if !enabled_any.is_empty() && !enabled_any.iter().any(|c| matched(c)) {
            return false;
        }
        gates
            .require_all
            .iter()
            .filter(|c| self.profile.category_weight(**c) > 0.0)
            .all(|c| matched(c))
    }

    /// Highest tier whose threshold is met.
    fn tier_for(&self, interest: f64) -> Tier {
        let t = &self.profile.thresholds;
        if interest >= t.priority {
            Tier::Priority
        } else if interest >= t.notify {
            Tier::Notify
        } else if interest >= t.digest {
            Tier::Digest
        } else if interest >= t.log {
            Tier::Log
        } else {
            Tier::Drop
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::testutil;

    fn evaluator(yaml: &str) -> ProfileEvaluator {
        let profile: Profile = serde_yaml::from_str(yaml).unwrap();
        ProfileEvaluator::compile(Arc::new(profile)).unwrap()
    }

    struct Fixture {
        topology: crate::topology::TopologyGraph,
        ships: crate::catalog::ShipIndex,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                topology: testutil::topology(),
                ships: testutil::ships(),
            }
        }
    }

    const SINGLE_CATEGORY: &str = r#"
name: single
categories:
  location:
    weight: 1.0
    signals:
      - type: location
geography:
  home: [Home]
"#;

    #[test]
    fn single_category_interest_equals_category_score() {
        let evaluator = evaluator(SINGLE_CATEGORY);
        let fixture = Fixture::new();
        let map = testutil::map_for(evaluator.profile(), &fixture.topology);
        let event = testutil::event(1);
        let ctx = SignalContext {
            event: &event,
            enriched: None,
            map: &map,
            topology: &fixture.topology,
            ships: &fixture.ships,
            activity: None,
        };
        let decision = evaluator.evaluate(&ctx, true, false);
        assert!((decision.interest - 1.0).abs() < 1e-9);
        assert_eq!(decision.tier, Tier::Priority);
    }

    #[test]
    fn rms_preserves_permutations() {
        // I6: permuting category scores across equal weights keeps the
        // same interest.
        let evaluator = evaluator(
            r#"
name: perm
categories:
  location:
    weight: 1.0
    signals:
      - type: location
        band_scores: { high: 0.0, low: 0.0, "null": 0.0 }
  value: { weight: 1.0, signals: [ { type: value, scaling: step, pivot_isk: 100000000 } ] }
geography:
  home: [Home]
"#,
        );
        let fixture = Fixture::new();
        let map = testutil::map_for(evaluator.profile(), &fixture.topology);

        // k1: location 1.0 (Home), value 0.0 (below pivot).
        let mut k1 = testutil::event(1);
        k1.zkb.total_value = 1e6;
        // k2: location 0.0 (off-map), value 1.0 (above pivot).
        let mut k2 = testutil::event(3);
        k2.zkb.total_value = 5e8;

        let ctx1 = SignalContext {
            event: &k1,
            enriched: None,
            map: &map,
            topology: &fixture.topology,
            ships: &fixture.ships,
            activity: None,
        };
        let ctx2 = SignalContext {
            event: &k2,
            enriched: None,
            map: &map,
            topology: &fixture.topology,
            ships: &fixture.ships,
            activity: None,
        };
        let d1 = evaluator.evaluate(&ctx1, true, false);
        let d2 = evaluator.evaluate(&ctx2, true, false);
        assert!((d1.interest - d2.interest).abs() < 1e-9);
        // RMS of (1, 0) with equal weights: sqrt(0.5).
        assert!((d1.interest - 0.5f64.sqrt()).abs() < 1e-9);
    }

    #[test]
    fn escalation_multiplies_after_blend() {
        let evaluator = evaluator(
            r#"
name: esc
categories:
  location: { weight: 0.6, signals: [ { type: location } ] }
  activity: { weight: 0.4, signals: [ { type: activity } ] }
thresholds: { notify: 0.6, priority: 0.7 }
geography:
  hunting: [Home]
"#,
        );
        let fixture = Fixture::new();
        let map = testutil::map_for(evaluator.profile(), &fixture.topology);
        let event = testutil::event(1);
        let observation = crate::signals::ActivityObservation {
            slice: crate::activity::ActivitySlice {
                ship_kills: 3,
                ..crate::activity::ActivitySlice::default()
            },
            escalation: Some(crate::types::PatternEscalation {
                multiplier: 1.5,
                reason: "gatecamp".to_string(),
                expires_at: Utc::now() + chrono::Duration::minutes(5),
            }),
        };
        let ctx = SignalContext {
            event: &event,
            enriched: None,
            map: &map,
            topology: &fixture.topology,
            ships: &fixture.ships,
            activity: Some(&observation),
        };
        let decision = evaluator.evaluate(&ctx, true, false);
        // location 0.8, activity 1.0 (escalated):
        // rms = sqrt((0.6*0.64 + 0.4*1.0) / 1.0) = sqrt(0.784) ~= 0.885
        // escalated: min(0.885 * 1.5, 1.0) = 1.0 -> priority.
        assert!((decision.interest - 1.0).abs() < 1e-9);
        assert_eq!(decision.tier, Tier::Priority);
        assert!(decision.escalation.is_some());
    }

    #[test]
    fn always_ignore_beats_always_notify() {
        let evaluator = evaluator(
            r#"
name: precedence
operator:
  corporations: [98000001]
categories:
  location: { weight: 1.0, signals: [ { type: location } ] }
rules:
  - name: corp-loss
    when: { builtin: corp_member_victim }
    action: always_notify
  - name: pods
    when: { builtin: pod_only }
    action: always_ignore
"#,
        );
        let fixture = Fixture::new();
        let map = testutil::map_for(evaluator.profile(), &fixture.topology);
        let mut event = testutil::event(1);
        event.victim.ship_type_id = 670; // pod owned by the operator corp
        let ctx = SignalContext {
            event: &event,
            enriched: None,
            map: &map,
            topology: &fixture.topology,
            ships: &fixture.ships,
            activity: None,
        };
        let decision = evaluator.evaluate(&ctx, true, false);
        assert_eq!(decision.tier, Tier::Drop);
        assert!(decision
            .rule_matches
            .iter()
            .any(|m| m.action == RuleAction::AlwaysIgnore));
    }

    #[test]
    fn require_any_gate_failure_forces_low_tier() {
        let evaluator = evaluator(
            r#"
name: gated
categories:
  location: { weight: 1.0, signals: [ { type: location } ] }
  politics: { weight: 1.0, signals: [ { type: politics } ] }
gates:
  require_any: [politics]
thresholds: { log: 0.1 }
geography:
  home: [Home]
"#,
        );
        let fixture = Fixture::new();
        let map = testutil::map_for(evaluator.profile(), &fixture.topology);
        let event = testutil::event(1); // no groups configured -> politics 0
        let ctx = SignalContext {
            event: &event,
            enriched: None,
            map: &map,
            topology: &fixture.topology,
            ships: &fixture.ships,
            activity: None,
        };
        let decision = evaluator.evaluate(&ctx, true, false);
        // Location alone would clear notify, but the gate fails.
        assert_eq!(decision.tier, Tier::Log);
    }

    #[test]
    fn disabled_category_contributes_nothing() {
        // I8: weight 0 excludes the category from blending and gates.
        let evaluator = evaluator(
            r#"
name: disabled
categories:
  location: { weight: 1.0, signals: [ { type: location } ] }
  value: { weight: 0.0, signals: [ { type: value, scaling: step, pivot_isk: 1000 } ] }
geography:
  home: [Home]
"#,
        );
        let fixture = Fixture::new();
        let map = testutil::map_for(evaluator.profile(), &fixture.topology);
        let mut event = testutil::event(1);
        event.zkb.total_value = 1e12; // value signal would be 1.0 if counted
        let ctx = SignalContext {
            event: &event,
            enriched: None,
            map: &map,
            topology: &fixture.topology,
            ships: &fixture.ships,
            activity: None,
        };
        let decision = evaluator.evaluate(&ctx, true, false);
        // Pure location score; value excluded despite scoring 1.0.
        assert!((decision.interest - 1.0).abs() < 1e-9);
        let scores = evaluator.category_scores(&ctx, EvalStage::Full);
        let blended = evaluator.blend(&scores);
        assert!((blended - 1.0).abs() < 1e-9);
    }

    #[test]
    fn enrichment_failure_caps_at_log_without_forcing_rule() {
        let evaluator = evaluator(SINGLE_CATEGORY);
        let fixture = Fixture::new();
        let map = testutil::map_for(evaluator.profile(), &fixture.topology);
        let event = testutil::event(1);
        let ctx = SignalContext {
            event: &event,
            enriched: None,
            map: &map,
            topology: &fixture.topology,
            ships: &fixture.ships,
            activity: None,
        };
        let decision = evaluator.evaluate(&ctx, true, true);
        assert_eq!(decision.tier, Tier::Log);
        assert!(decision.enrichment_failed);
    }

    #[test]
    fn enrichment_failure_does_not_drop_forced_notify() {
        let evaluator = evaluator(
            r#"
name: forced
operator:
  corporations: [98000001]
categories:
  location: { weight: 1.0, signals: [ { type: location } ] }
rules:
  - name: corp-loss
    when: { builtin: corp_member_victim }
    action: always_notify
"#,
        );
        let fixture = Fixture::new();
        let map = testutil::map_for(evaluator.profile(), &fixture.topology);
        let event = testutil::event(1);
        let ctx = SignalContext {
            event: &event,
            enriched: None,
            map: &map,
            topology: &fixture.topology,
            ships: &fixture.ships,
            activity: None,
        };
        let decision = evaluator.evaluate(&ctx, true, true);
        assert_eq!(decision.tier, Tier::Notify);
        assert_eq!(decision.dominant_category, Some(SignalCategory::Rule));
    }

    #[test]
    fn score_bounds_hold() {
        // I5: interest and every signal score stay in [0, 1].
        let evaluator = evaluator(
            r#"
name: bounds
categories:
  location: { weight: 2.0, signals: [ { type: location } ] }
  value: { weight: 0.5, signals: [ { type: value } ] }
  ship: { weight: 1.5, signals: [ { type: ship, prefer: [frigate], capital_boost: 0.9 } ] }
geography:
  home: [Home]
"#,
        );
        let fixture = Fixture::new();
        let map = testutil::map_for(evaluator.profile(), &fixture.topology);
        let mut event = testutil::event(1);
        event.zkb.total_value = 1e13;
        let ctx = SignalContext {
            event: &event,
            enriched: None,
            map: &map,
            topology: &fixture.topology,
            ships: &fixture.ships,
            activity: None,
        };
        let decision = evaluator.evaluate(&ctx, true, false);
        assert!((0.0..=1.0).contains(&decision.interest));
        for score in &decision.signal_scores {
            assert!((0.0..=1.0).contains(&score.score), "{score:?}");
        }
    }
}

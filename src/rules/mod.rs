//! Rule engine - always-notify / always-ignore rules and category gates
//!
//! Rules compile once at profile load; evaluation is pure. Precedence is
//! fixed and enforced by the interest calculator:
//!
//! 1. `always_ignore` wins outright (tier drop).
//! 2. `always_notify` forces notify (or priority), bypassing scoring
//!    gates but not rate limits unless the rule says so.
//! 3. `require_all` / `require_any` gates across categories.
//! 4. Interest score and tier thresholds.

pub mod expr;
pub mod templates;

pub use templates::{CategorySnapshot, CategorySnapshots, RuleInput};

use tracing::debug;

use crate::signals::EvalStage;
use crate::types::{
    Profile, RuleActionConfig, RuleLeaf, RuleWhen, SignalCategory, WatchlistScope,
};

/// A profile rule compiled for evaluation.
pub struct CompiledRule {
    pub name: String,
    pub action: RuleActionConfig,
    pub priority: bool,
    pub bypass_rate_limit: bool,
    pub prefetch_capable: bool,
    condition: CompiledCondition,
}

enum CompiledCondition {
    All(Vec<RuleLeaf>),
    Any(Vec<RuleLeaf>),
    Leaf(RuleLeaf),
    Expr(expr::Expr),
}

/// One always-notify rule that matched, with its escalation flags.
#[derive(Debug, Clone)]
pub struct NotifyMatch {
    pub rule: String,
    pub priority: bool,
    pub bypass_rate_limit: bool,
}

/// Result of evaluating every rule against one event.
#[derive(Debug, Default)]
pub struct RuleOutcome {
    pub ignore_matched: Vec<String>,
    pub notify_matched: Vec<NotifyMatch>,
}

impl RuleOutcome {
    pub fn ignored(&self) -> bool {
        !self.ignore_matched.is_empty()
    }

    /// Best notify escalation: priority beats plain notify.
    pub fn forced_notify(&self) -> Option<&NotifyMatch> {
        self.notify_matched
            .iter()
            .max_by_key(|m| u8::from(m.priority))
    }
}

/// The compiled rule set for one profile.
pub struct RuleEngine {
    rules: Vec<CompiledRule>,
    watchlist_scope: WatchlistScope,
}

impl RuleEngine {
    /// Compile the profile's rules. `prefetch_known` is the set of
    /// categories whose signals are all prefetch-capable, used to derive
    /// static capability for category predicates.
    ///
    /// Expression parsing errors surface here; profile validation has
    /// already rejected them, so a failure is a programming error on the
    /// caller's side and is returned, not panicked on.
    pub fn compile(
        profile: &Profile,
        prefetch_known: &[SignalCategory],
    ) -> Result<Self, expr::ExprError> {
        let mut rules = Vec::with_capacity(profile.rules.len());
        for rule in &profile.rules {
            let (condition, prefetch_capable) = match &rule.when {
                RuleWhen::All { all } => (
                    CompiledCondition::All(all.clone()),
                    all.iter().all(|leaf| {
                        templates::leaf_prefetch_capable(
                            leaf,
                            prefetch_known,
                            profile.watchlist_activity_scope,
                        )
                    }),
                ),
                RuleWhen::Any { any } => (
                    CompiledCondition::Any(any.clone()),
                    any.iter().all(|leaf| {
                        templates::leaf_prefetch_capable(
                            leaf,
                            prefetch_known,
                            profile.watchlist_activity_scope,
                        )
                    }),
                ),
                RuleWhen::Leaf(leaf) => (
                    CompiledCondition::Leaf(leaf.clone()),
                    templates::leaf_prefetch_capable(
                        leaf,
                        prefetch_known,
                        profile.watchlist_activity_scope,
                    ),
                ),
                RuleWhen::Expr { expr: raw } => {
                    let parsed = expr::parse(raw)?;
                    let capable =
                        parsed.prefetch_capable(prefetch_known, profile.watchlist_activity_scope);
                    (CompiledCondition::Expr(parsed), capable)
                }
            };
            rules.push(CompiledRule {
                name: rule.name.clone(),
                action: rule.action,
                priority: rule.priority,
                bypass_rate_limit: rule.bypass_rate_limit,
                prefetch_capable,
                condition,
            });
        }
        Ok(Self {
            rules,
            watchlist_scope: profile.watchlist_activity_scope,
        })
    }

    pub fn watchlist_scope(&self) -> WatchlistScope {
        self.watchlist_scope
    }

    /// Evaluate all rules. During the prefetch stage only prefetch-capable
    /// rules fire; post-fetch everything is evaluated.
    pub fn evaluate(&self, input: &RuleInput<'_>) -> RuleOutcome {
        let mut outcome = RuleOutcome::default();
        for rule in &self.rules {
            if input.stage == EvalStage::Prefetch && !rule.prefetch_capable {
                continue;
            }
            if !Self::condition_matches(&rule.condition, input) {
                continue;
            }
            debug!(rule = %rule.name, action = ?rule.action, "Rule matched");
            match rule.action {
                RuleActionConfig::AlwaysIgnore => outcome.ignore_matched.push(rule.name.clone()),
                RuleActionConfig::AlwaysNotify => outcome.notify_matched.push(NotifyMatch {
                    rule: rule.name.clone(),
                    priority: rule.priority,
                    bypass_rate_limit: rule.bypass_rate_limit,
                }),
            }
        }
        outcome
    }

    /// True when any prefetch-capable always-notify rule matches the raw
    /// event. Drives the prefetch gate's unconditional-fetch override.
    pub fn prefetch_always_notify(&self, input: &RuleInput<'_>) -> bool {
        self.rules
            .iter()
            .filter(|r| r.prefetch_capable && r.action == RuleActionConfig::AlwaysNotify)
            .any(|r| Self::condition_matches(&r.condition, input))
    }

    /// True when any always-notify rule is not prefetch-capable (feeds
    /// prefetch mode auto-derivation).
    pub fn has_post_fetch_always_notify(&self) -> bool {
        self.rules
            .iter()
            .any(|r| r.action == RuleActionConfig::AlwaysNotify && !r.prefetch_capable)
    }

    fn condition_matches(condition: &CompiledCondition, input: &RuleInput<'_>) -> bool {
        match condition {
            CompiledCondition::All(leaves) => {
                leaves.iter().all(|l| templates::evaluate_leaf(l, input))
            }
            CompiledCondition::Any(leaves) => {
                leaves.iter().any(|l| templates::evaluate_leaf(l, input))
            }
            CompiledCondition::Leaf(leaf) => templates::evaluate_leaf(leaf, input),
            CompiledCondition::Expr(expr) => expr.evaluate(input),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::{testutil, EvalStage, SignalContext};

    fn profile(yaml: &str) -> Profile {
        serde_yaml::from_str(yaml).unwrap()
    }

    struct Fixture {
        topology: crate::topology::TopologyGraph,
        ships: crate::catalog::ShipIndex,
        map: crate::interest::InterestMap,
        profile: Profile,
    }

    impl Fixture {
        fn new(yaml: &str) -> Self {
            let profile = profile(yaml);
            let topology = testutil::topology();
            let map = testutil::map_for(&profile, &topology);
            Self {
                topology,
                ships: testutil::ships(),
                map,
                profile,
            }
        }

        fn input<'a>(
            &'a self,
            signal_ctx: &'a SignalContext<'a>,
            stage: EvalStage,
            snapshots: &'a CategorySnapshots,
        ) -> RuleInput<'a> {
            RuleInput {
                signal_ctx,
                stage,
                snapshots,
                operator_corporations: &self.profile.operator.corporations,
                operator_alliances: &self.profile.operator.alliances,
                high_value_isk: self.profile.high_value_isk,
                watchlist_scope: self.profile.watchlist_activity_scope,
            }
        }
    }

    const RULES_YAML: &str = r#"
name: t
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
  - name: big
    when: { template: value_above, isk: 1000000000 }
    action: always_notify
    priority: true
"#;

    #[test]
    fn ignore_and_notify_both_collected() {
        let fixture = Fixture::new(RULES_YAML);
        let engine = RuleEngine::compile(&fixture.profile, &[SignalCategory::Location]).unwrap();

        let mut event = testutil::event(1);
        event.victim.ship_type_id = 670; // pod, victim corp is operator's
        let ctx = SignalContext {
            event: &event,
            enriched: None,
            map: &fixture.map,
            topology: &fixture.topology,
            ships: &fixture.ships,
            activity: None,
        };
        let snapshots = CategorySnapshots::new();
        let outcome = engine.evaluate(&fixture.input(&ctx, EvalStage::Full, &snapshots));
        assert!(outcome.ignored());
        assert_eq!(outcome.notify_matched.len(), 1);
        assert_eq!(outcome.notify_matched[0].rule, "corp-loss");
    }

    #[test]
    fn priority_rule_wins_forced_notify() {
        let fixture = Fixture::new(RULES_YAML);
        let engine = RuleEngine::compile(&fixture.profile, &[]).unwrap();

        let mut event = testutil::event(1);
        event.zkb.total_value = 2e9;
        let ctx = SignalContext {
            event: &event,
            enriched: None,
            map: &fixture.map,
            topology: &fixture.topology,
            ships: &fixture.ships,
            activity: None,
        };
        let snapshots = CategorySnapshots::new();
        let outcome = engine.evaluate(&fixture.input(&ctx, EvalStage::Full, &snapshots));
        assert_eq!(outcome.notify_matched.len(), 2);
        let forced = outcome.forced_notify().unwrap();
        assert_eq!(forced.rule, "big");
        assert!(forced.priority);
    }

    #[test]
    fn prefetch_always_notify_sees_raw_event() {
        let fixture = Fixture::new(RULES_YAML);
        let engine = RuleEngine::compile(&fixture.profile, &[]).unwrap();

        let event = testutil::event(1); // victim corp 98000001
        let ctx = SignalContext {
            event: &event,
            enriched: None,
            map: &fixture.map,
            topology: &fixture.topology,
            ships: &fixture.ships,
            activity: None,
        };
        let snapshots = CategorySnapshots::new();
        assert!(engine.prefetch_always_notify(&fixture.input(&ctx, EvalStage::Prefetch, &snapshots)));
    }

    #[test]
    fn non_prefetch_rules_skipped_at_prefetch() {
        let yaml = r#"
name: t
categories:
  location: { weight: 1.0, signals: [ { type: location } ] }
groups:
  - name: rivals
    corporations: [55000001]
rules:
  - name: rival-attacker
    when: { template: group_role, group: rivals, role: attacker }
    action: always_notify
"#;
        let fixture = Fixture::new(yaml);
        let engine = RuleEngine::compile(&fixture.profile, &[]).unwrap();
        assert!(engine.has_post_fetch_always_notify());

        let mut event = testutil::event(1);
        event.attackers[0].corporation_id = Some(55000001);
        let ctx = SignalContext {
            event: &event,
            enriched: None,
            map: &fixture.map,
            topology: &fixture.topology,
            ships: &fixture.ships,
            activity: None,
        };
        let snapshots = CategorySnapshots::new();
        // Matches at full, never at prefetch.
        let prefetch = engine.evaluate(&fixture.input(&ctx, EvalStage::Prefetch, &snapshots));
        assert!(prefetch.notify_matched.is_empty());
        let full = engine.evaluate(&fixture.input(&ctx, EvalStage::Full, &snapshots));
        assert_eq!(full.notify_matched.len(), 1);
    }

    #[test]
    fn watchlist_scope_controls_attacker_matching() {
        let yaml = r#"
name: t
watchlist_activity_scope: victim_only
categories:
  location: { weight: 1.0, signals: [ { type: location } ] }
groups:
  - name: watch
    corporations: [77000001]
    watchlist: true
rules:
  - name: watched
    when: { builtin: watchlist_match }
    action: always_notify
"#;
        let fixture = Fixture::new(yaml);
        let engine = RuleEngine::compile(&fixture.profile, &[]).unwrap();

        // Fixture attacker is corp 77000001; victim is not watched.
        let event = testutil::event(1);
        let ctx = SignalContext {
            event: &event,
            enriched: None,
            map: &fixture.map,
            topology: &fixture.topology,
            ships: &fixture.ships,
            activity: None,
        };
        let snapshots = CategorySnapshots::new();
        let outcome = engine.evaluate(&fixture.input(&ctx, EvalStage::Full, &snapshots));
        assert!(outcome.notify_matched.is_empty(), "victim_only scope must not match attackers");
    }
}

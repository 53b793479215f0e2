//! Rule leaf evaluation: built-ins and the closed template registry
//!
//! Prefetch capability is a static property of each leaf (± role
//! parameter), resolved once at profile compile time, never per event.

use std::collections::BTreeMap;

use crate::signals::{EvalStage, SignalContext};
use crate::types::{
    BuiltinRule, RuleLeaf, RuleRole, RuleTemplate, ShipClass, SignalCategory, WatchlistScope,
};

/// Category score/match snapshot handed to the rule engine by the
/// calculator.
#[derive(Debug, Clone, Copy, Default)]
pub struct CategorySnapshot {
    pub score: f64,
    pub matched: bool,
}

pub type CategorySnapshots = BTreeMap<SignalCategory, CategorySnapshot>;

/// Everything a rule leaf may read.
pub struct RuleInput<'a> {
    pub signal_ctx: &'a SignalContext<'a>,
    pub stage: EvalStage,
    pub snapshots: &'a CategorySnapshots,
    /// Operator identity for `corp_member_victim`.
    pub operator_corporations: &'a [u64],
    pub operator_alliances: &'a [u64],
    pub high_value_isk: f64,
    pub watchlist_scope: WatchlistScope,
}

// ============================================================================
// Capability
// ============================================================================

/// Static prefetch capability of a leaf. `prefetch_known` is the set of
/// categories whose every signal is prefetch-capable under this profile.
pub fn leaf_prefetch_capable(
    leaf: &RuleLeaf,
    prefetch_known: &[SignalCategory],
    watchlist_scope: WatchlistScope,
) -> bool {
    match leaf {
        RuleLeaf::Builtin { builtin } => builtin_prefetch_capable(*builtin, watchlist_scope),
        RuleLeaf::Template(template) => template_prefetch_capable(template, prefetch_known),
    }
}

fn builtin_prefetch_capable(builtin: BuiltinRule, watchlist_scope: WatchlistScope) -> bool {
    match builtin {
        BuiltinRule::NpcOnly
        | BuiltinRule::PodOnly
        | BuiltinRule::CorpMemberVictim
        | BuiltinRule::HighValue
        | BuiltinRule::StructureKill
        | BuiltinRule::SoloKill => true,
        // Needs the activity cache, which the prefetch stage does not read.
        BuiltinRule::GatecampDetected => false,
        // Victim-only scope matches raw fields; attacker-global needs
        // resolved attacker identity.
        BuiltinRule::WatchlistMatch => watchlist_scope == WatchlistScope::VictimOnly,
    }
}

fn template_prefetch_capable(template: &RuleTemplate, prefetch_known: &[SignalCategory]) -> bool {
    match template {
        RuleTemplate::GroupRole { role, .. } => *role == RuleRole::Victim,
        RuleTemplate::CategoryMatch { category } | RuleTemplate::CategoryScore { category, .. } => {
            prefetch_known.contains(category)
        }
        RuleTemplate::ValueAbove { .. }
        | RuleTemplate::ValueBelow { .. }
        | RuleTemplate::ShipClass { .. }
        | RuleTemplate::ShipGroup { .. }
        | RuleTemplate::SecurityBand { .. }
        | RuleTemplate::SystemMatch { .. }
        | RuleTemplate::AttackerCount { .. }
        | RuleTemplate::SoloKill => true,
    }
}

// ============================================================================
// Evaluation
// ============================================================================

pub fn evaluate_leaf(leaf: &RuleLeaf, input: &RuleInput<'_>) -> bool {
    match leaf {
        RuleLeaf::Builtin { builtin } => evaluate_builtin(*builtin, input),
        RuleLeaf::Template(template) => evaluate_template(template, input),
    }
}

fn victim_class(input: &RuleInput<'_>) -> ShipClass {
    input
        .signal_ctx
        .ships
        .classify(input.signal_ctx.event.victim.ship_type_id)
}

fn evaluate_builtin(builtin: BuiltinRule, input: &RuleInput<'_>) -> bool {
    let event = input.signal_ctx.event;
    match builtin {
        BuiltinRule::NpcOnly => event.zkb.npc,
        BuiltinRule::PodOnly => victim_class(input) == ShipClass::Capsule,
        BuiltinRule::CorpMemberVictim => {
            input
                .operator_corporations
                .contains(&event.victim.corporation_id)
                || event
                    .victim
                    .alliance_id
                    .is_some_and(|a| input.operator_alliances.contains(&a))
        }
        BuiltinRule::HighValue => event.zkb.total_value >= input.high_value_isk,
        BuiltinRule::GatecampDetected => input
            .signal_ctx
            .activity
            .is_some_and(|obs| {
                obs.escalation
                    .as_ref()
                    .is_some_and(|esc| esc.reason.contains("gatecamp"))
            }),
        BuiltinRule::WatchlistMatch => evaluate_watchlist(input),
        BuiltinRule::StructureKill => victim_class(input) == ShipClass::Structure,
        BuiltinRule::SoloKill => event.is_solo(),
    }
}

/// Watchlist matching under the configured scope. The v1 trigger engine
/// matched the victim only; the v2 engine matches any attacker slot.
fn evaluate_watchlist(input: &RuleInput<'_>) -> bool {
    let event = input.signal_ctx.event;
    let victim_hit = input.signal_ctx.map.watchlist_groups().any(|g| {
        g.matches(
            Some(event.victim.corporation_id),
            event.victim.alliance_id,
            event.victim.faction_id,
        )
    });
    if victim_hit {
        return true;
    }
    if input.watchlist_scope == WatchlistScope::VictimOnly {
        return false;
    }
    if input.stage != EvalStage::Full {
        return false;
    }
    event.attackers.iter().any(|attacker| {
        let (corp, alliance) = match input.signal_ctx.enriched {
            Some(e) => (e.attacker_corp(attacker), e.attacker_alliance(attacker)),
            None => (attacker.corporation_id, attacker.alliance_id),
        };
        input
            .signal_ctx
            .map
            .watchlist_groups()
            .any(|g| g.matches(corp, alliance, attacker.faction_id))
    })
}

fn evaluate_template(template: &RuleTemplate, input: &RuleInput<'_>) -> bool {
    let event = input.signal_ctx.event;
    match template {
        RuleTemplate::GroupRole { group, role } => {
            let Some(group) = input.signal_ctx.map.group(group) else {
                return false;
            };
            let victim_hit = || {
                group.matches(
                    Some(event.victim.corporation_id),
                    event.victim.alliance_id,
                    event.victim.faction_id,
                )
            };
            let final_blow_hit = || {
                event.final_blow().is_some_and(|attacker| {
                    let (corp, alliance) = match input.signal_ctx.enriched {
                        Some(e) => (e.attacker_corp(attacker), e.attacker_alliance(attacker)),
                        None => (attacker.corporation_id, attacker.alliance_id),
                    };
                    group.matches(corp, alliance, attacker.faction_id)
                })
            };
            let attacker_hit = || {
                event.attackers.iter().any(|attacker| {
                    let (corp, alliance) = match input.signal_ctx.enriched {
                        Some(e) => (e.attacker_corp(attacker), e.attacker_alliance(attacker)),
                        None => (attacker.corporation_id, attacker.alliance_id),
                    };
                    group.matches(corp, alliance, attacker.faction_id)
                })
            };
            match role {
                RuleRole::Victim => victim_hit(),
                RuleRole::FinalBlow => final_blow_hit(),
                RuleRole::Attacker => attacker_hit(),
                RuleRole::Any => victim_hit() || attacker_hit(),
            }
        }
        RuleTemplate::CategoryMatch { category } => input
            .snapshots
            .get(category)
            .map(|s| s.matched)
            .unwrap_or(false),
        RuleTemplate::CategoryScore { category, min } => input
            .snapshots
            .get(category)
            .map(|s| s.score >= *min)
            .unwrap_or(false),
        RuleTemplate::ValueAbove { isk } => event.zkb.total_value >= *isk,
        RuleTemplate::ValueBelow { isk } => event.zkb.total_value < *isk,
        RuleTemplate::ShipClass { classes } => classes.contains(&victim_class(input)),
        RuleTemplate::ShipGroup { group_ids } => input
            .signal_ctx
            .ships
            .group_id(event.victim.ship_type_id)
            .is_some_and(|g| group_ids.contains(&g)),
        RuleTemplate::SecurityBand { bands } => input
            .signal_ctx
            .topology
            .attrs(event.system_id)
            .is_some_and(|attrs| bands.contains(&attrs.band())),
        RuleTemplate::SystemMatch { systems } => systems.iter().any(|name| {
            input.signal_ctx.topology.resolve(name) == Some(event.system_id)
        }),
        RuleTemplate::AttackerCount { min, max } => {
            let count = event.attackers.len() as u32;
            count >= *min && max.map_or(true, |m| count <= m)
        }
        RuleTemplate::SoloKill => event.is_solo(),
    }
}

//! Profile loading and validation
//!
//! Profiles live as YAML files under `paths.profile_dir`, one file per
//! profile. Loading validates weights, thresholds, rule references, group
//! references, and feature-flag gating. An invalid profile refuses to load
//! and is reported; the remaining profiles continue — one operator typo
//! must not take down the whole feed.

use std::collections::BTreeSet;
use std::path::Path;

use tracing::{error, info, warn};

use crate::types::{
    BlendMode, PrefetchMode, Profile, RuleLeaf, RuleTemplate, RuleWhen, SignalCategory, SignalSpec,
};

use super::FeatureFlags;

/// Why a profile refused to load.
#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid profile '{name}': {errors:?}")]
    Invalid { name: String, errors: Vec<String> },
}

/// Result of a directory load: valid profiles plus per-file failures.
#[derive(Debug, Default)]
pub struct ProfileLoadReport {
    pub profiles: Vec<Profile>,
    pub failures: Vec<(String, String)>,
    pub warnings: Vec<String>,
}

/// Load every `*.yaml` / `*.yml` file in the directory, in deterministic
/// (sorted) order. Invalid profiles are reported and skipped.
pub fn load_profile_dir(
    dir: &Path,
    flags: &FeatureFlags,
    provider_names: &BTreeSet<String>,
) -> std::io::Result<ProfileLoadReport> {
    let mut report = ProfileLoadReport::default();

    let mut paths: Vec<_> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            matches!(
                p.extension().and_then(|e| e.to_str()),
                Some("yaml") | Some("yml")
            )
        })
        .collect();
    paths.sort();

    for (idx, path) in paths.iter().enumerate() {
        match load_profile_file(path, flags, provider_names) {
            Ok((mut profile, mut warnings)) => {
                profile.revision = idx as u64 + 1;
                info!(profile = %profile.name, path = %path.display(), "Loaded profile");
                report.warnings.append(&mut warnings);
                report.profiles.push(profile);
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "Profile refused to load, skipping");
                report.failures.push((path.display().to_string(), e.to_string()));
            }
        }
    }

    // Deterministic per-profile iteration order for the ingestion loop.
    report.profiles.sort_by(|a, b| a.name.cmp(&b.name));

    let mut seen = BTreeSet::new();
    let mut duplicates = Vec::new();
    report.profiles.retain(|profile| {
        if seen.insert(profile.name.clone()) {
            true
        } else {
            duplicates.push(profile.name.clone());
            false
        }
    });
    for name in duplicates {
        report
            .failures
            .push((name.clone(), format!("duplicate profile name '{name}'")));
    }

    Ok(report)
}

/// Load and validate a single profile file.
pub fn load_profile_file(
    path: &Path,
    flags: &FeatureFlags,
    provider_names: &BTreeSet<String>,
) -> Result<(Profile, Vec<String>), ProfileError> {
    let raw = std::fs::read_to_string(path)?;
    let profile: Profile = serde_yaml::from_str(&raw)?;
    let warnings = validate_profile(&profile, flags, provider_names).map_err(|errors| {
        ProfileError::Invalid {
            name: profile.name.clone(),
            errors,
        }
    })?;
    for w in &warnings {
        warn!(profile = %profile.name, "{w}");
    }
    Ok((profile, warnings))
}

/// Full profile validation. Returns warnings on success, the error list on
/// failure. Runs at load time only — scoring never re-validates.
pub fn validate_profile(
    profile: &Profile,
    flags: &FeatureFlags,
    provider_names: &BTreeSet<String>,
) -> Result<Vec<String>, Vec<String>> {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if profile.name.trim().is_empty() {
        errors.push("profile name must not be empty".to_string());
    }

    validate_weights(profile, &mut errors, &mut warnings);
    validate_thresholds(profile, &mut errors);
    validate_blend_and_prefetch(profile, &mut errors);
    validate_signals(profile, flags, &mut errors);
    validate_gates(profile, &mut errors, &mut warnings);
    validate_rules(profile, flags, &mut errors, &mut warnings);
    validate_routes(profile, &mut errors);
    validate_delivery(profile, provider_names, &mut errors);

    if errors.is_empty() {
        Ok(warnings)
    } else {
        Err(errors)
    }
}

fn validate_weights(profile: &Profile, errors: &mut Vec<String>, _warnings: &mut [String]) {
    let mut any_nonzero = false;
    for (category, cfg) in &profile.categories {
        if !cfg.weight.is_finite() || cfg.weight < 0.0 {
            errors.push(format!(
                "category '{category}' weight {} must be non-negative and finite",
                cfg.weight
            ));
            continue;
        }
        if cfg.weight > 0.0 && !cfg.signals.is_empty() {
            any_nonzero = true;
        }
        for signal in &cfg.signals {
            if !signal.weight.is_finite() || signal.weight < 0.0 {
                errors.push(format!(
                    "signal weight {} in category '{category}' must be non-negative and finite",
                    signal.weight
                ));
            }
        }
    }
    if !any_nonzero {
        errors.push("at least one category must have non-zero weight and a configured signal".to_string());
    }

    if profile.rate_limit.burst == 0 {
        errors.push("rate_limit.burst must be >= 1".to_string());
    }

    let ua = profile.prefetch.unknown_assumption;
    if !(0.0..=1.0).contains(&ua) {
        errors.push(format!("prefetch.unknown_assumption {ua} must be in [0, 1]"));
    }
}

fn validate_thresholds(profile: &Profile, errors: &mut Vec<String>) {
    let t = &profile.thresholds;
    for (name, v) in [
        ("log", t.log),
        ("digest", t.digest),
        ("notify", t.notify),
        ("priority", t.priority),
    ] {
        if !v.is_finite() || !(0.0..=1.0).contains(&v) {
            errors.push(format!("threshold '{name}' = {v} must be in [0, 1]"));
        }
    }
    if t.digest > t.notify || t.notify > t.priority {
        errors.push(format!(
            "threshold order violated: digest ({}) <= notify ({}) <= priority ({}) required",
            t.digest, t.notify, t.priority
        ));
    }
}

fn validate_blend_and_prefetch(profile: &Profile, errors: &mut Vec<String>) {
    if profile.blend == BlendMode::Max && profile.prefetch.mode != Some(PrefetchMode::Bypass) {
        errors.push("blend 'max' requires prefetch.mode = bypass".to_string());
    }
}

fn validate_signals(profile: &Profile, flags: &FeatureFlags, errors: &mut Vec<String>) {
    for (category, cfg) in &profile.categories {
        if cfg.signals.len() > 1 && !flags.custom_signals() {
            errors.push(format!(
                "category '{category}' configures {} signals; multiple instances require the 'custom_signals' feature flag",
                cfg.signals.len()
            ));
        }
        for signal in &cfg.signals {
            if signal.spec.category() != *category {
                errors.push(format!(
                    "signal of type '{}' placed under category '{category}'",
                    signal.spec.category()
                ));
            }
            if let SignalSpec::Value { custom: Some(name), .. } = &signal.spec {
                if !flags.custom_scaling() {
                    errors.push(format!(
                        "value signal uses custom scaling '{name}' but the 'custom_scaling' feature flag is off"
                    ));
                } else if !crate::signals::CUSTOM_SCALING_NAMES.contains(&name.as_str()) {
                    errors.push(format!("unknown custom scaling function '{name}'"));
                }
            }
            if let SignalSpec::Time { windows } = &signal.spec {
                if windows.is_empty() {
                    errors.push("time signal requires at least one window".to_string());
                }
                for w in windows {
                    if w.start_hour >= 24 || w.end_hour >= 24 {
                        errors.push(format!(
                            "time window {}-{} hours must be in [0, 24)",
                            w.start_hour, w.end_hour
                        ));
                    }
                }
            }
        }
    }
}

fn validate_gates(profile: &Profile, errors: &mut Vec<String>, warnings: &mut Vec<String>) {
    let enabled: BTreeSet<SignalCategory> = profile.enabled_categories().into_iter().collect();

    for category in &profile.gates.require_all {
        if !enabled.contains(category) {
            errors.push(format!(
                "require_all references disabled category '{category}'"
            ));
        }
    }
    for category in &profile.gates.require_any {
        if !enabled.contains(category) {
            warnings.push(format!(
                "require_any references disabled category '{category}'; it can never satisfy the gate"
            ));
        }
    }
    if profile
        .gates
        .require_any
        .iter()
        .all(|c| !enabled.contains(c))
        && !profile.gates.require_any.is_empty()
    {
        errors.push("require_any references only disabled categories".to_string());
    }
}

fn validate_rules(
    profile: &Profile,
    flags: &FeatureFlags,
    errors: &mut Vec<String>,
    warnings: &mut Vec<String>,
) {
    let mut seen = BTreeSet::new();
    for rule in &profile.rules {
        if !seen.insert(rule.name.as_str()) {
            errors.push(format!("duplicate rule name '{}'", rule.name));
        }
        match &rule.when {
            RuleWhen::Expr { expr } => {
                if !flags.rule_dsl() {
                    errors.push(format!(
                        "rule '{}' uses an expression but the 'rule_dsl' feature flag is off",
                        rule.name
                    ));
                } else if let Err(e) = crate::rules::expr::parse(expr) {
                    errors.push(format!("rule '{}' expression error: {e}", rule.name));
                }
            }
            RuleWhen::All { all } => validate_leaves(profile, &rule.name, all, errors),
            RuleWhen::Any { any } => validate_leaves(profile, &rule.name, any, errors),
            RuleWhen::Leaf(leaf) => {
                validate_leaves(profile, &rule.name, std::slice::from_ref(leaf), errors);
            }
        }
        if let RuleWhen::Leaf(RuleLeaf::Builtin { builtin }) = &rule.when {
            if *builtin == crate::types::BuiltinRule::WatchlistMatch
                && !profile.groups.iter().any(|g| g.watchlist)
            {
                warnings.push(format!(
                    "rule '{}' uses watchlist_match but no group is marked watchlist",
                    rule.name
                ));
            }
            if *builtin == crate::types::BuiltinRule::CorpMemberVictim
                && profile.operator.corporations.is_empty()
                && profile.operator.alliances.is_empty()
            {
                errors.push(format!(
                    "rule '{}' uses corp_member_victim but operator identity is empty",
                    rule.name
                ));
            }
        }
    }
}

fn validate_leaves(
    profile: &Profile,
    rule_name: &str,
    leaves: &[RuleLeaf],
    errors: &mut Vec<String>,
) {
    for leaf in leaves {
        if let RuleLeaf::Template(template) = leaf {
            match template {
                RuleTemplate::GroupRole { group, .. } => {
                    if profile.group(group).is_none() {
                        errors.push(format!(
                            "rule '{rule_name}' references unknown group '{group}'"
                        ));
                    }
                }
                RuleTemplate::CategoryScore { min, .. } => {
                    if !(0.0..=1.0).contains(min) {
                        errors.push(format!(
                            "rule '{rule_name}' category_score min {min} must be in [0, 1]"
                        ));
                    }
                }
                RuleTemplate::AttackerCount { min, max } => {
                    if let Some(max) = max {
                        if max < min {
                            errors.push(format!(
                                "rule '{rule_name}' attacker_count max {max} < min {min}"
                            ));
                        }
                    }
                }
                _ => {}
            }
        }
    }
}

fn validate_routes(profile: &Profile, errors: &mut Vec<String>) {
    for route in &profile.routes {
        if route.waypoints.len() < 2 {
            errors.push(format!(
                "route '{}' needs at least two waypoints",
                route.name
            ));
        }
    }
}

fn validate_delivery(
    profile: &Profile,
    provider_names: &BTreeSet<String>,
    errors: &mut Vec<String>,
) {
    for (tier, providers) in &profile.delivery.routes {
        if providers.is_empty() {
            errors.push(format!("delivery route for tier '{tier}' is empty"));
        }
        for name in providers {
            if !provider_names.contains(name) {
                errors.push(format!(
                    "delivery route for tier '{tier}' references unknown provider '{name}'"
                ));
            }
        }
    }
    if profile.delivery.digest_window_minutes == 0 {
        errors.push("delivery.digest_window_minutes must be >= 1".to_string());
    }
    if profile.delivery.digest_max_size == 0 {
        errors.push("delivery.digest_max_size must be >= 1".to_string());
    }
}

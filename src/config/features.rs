//! Feature flags - a small immutable map read once at startup.
//!
//! Recognized flags gate opt-in functionality; unknown flags log a
//! warning and are ignored so a config written for a newer build does not
//! brick an older one.

use std::collections::BTreeMap;

use tracing::warn;

/// Flags recognized by this build.
const KNOWN_FLAGS: &[&str] = &[
    "rule_dsl",
    "custom_signals",
    "custom_scaling",
    "delivery_webhook",
    "delivery_slack",
    "delivery_email",
];

/// Immutable feature-flag set. Built once from the `[features]` table and
/// passed explicitly to the subsystems that consult it.
#[derive(Debug, Clone, Default)]
pub struct FeatureFlags {
    enabled: BTreeMap<String, bool>,
}

impl FeatureFlags {
    /// Build from the raw config table, warning on unknown names.
    pub fn from_config(raw: &BTreeMap<String, bool>) -> Self {
        let mut enabled = BTreeMap::new();
        for (name, value) in raw {
            if KNOWN_FLAGS.contains(&name.as_str()) {
                enabled.insert(name.clone(), *value);
            } else {
                warn!(flag = %name, "Unknown feature flag, ignoring");
            }
        }
        Self { enabled }
    }

    pub fn is_enabled(&self, flag: &str) -> bool {
        self.enabled.get(flag).copied().unwrap_or(false)
    }

    /// Expression rules in profiles.
    pub fn rule_dsl(&self) -> bool {
        self.is_enabled("rule_dsl")
    }

    /// Additional signal instances beyond the built-in one per category.
    pub fn custom_signals(&self) -> bool {
        self.is_enabled("custom_signals")
    }

    /// Named custom value-scaling functions.
    pub fn custom_scaling(&self) -> bool {
        self.is_enabled("custom_scaling")
    }

    pub fn delivery_webhook(&self) -> bool {
        self.is_enabled("delivery_webhook")
    }

    pub fn delivery_slack(&self) -> bool {
        self.is_enabled("delivery_slack")
    }

    pub fn delivery_email(&self) -> bool {
        self.is_enabled("delivery_email")
    }
}

//! Scoring outcome types: SignalScore, PatternEscalation, Decision

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::KillId;

/// Signal category. The nine scoring dimensions plus `rule` for decisions
/// driven by an always-notify rule rather than the blend.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum SignalCategory {
    Location,
    Value,
    Politics,
    Activity,
    Time,
    Routes,
    Assets,
    War,
    Ship,
    /// Synthetic category reported when a rule forced the decision.
    Rule,
}

impl SignalCategory {
    /// The nine scoreable categories, in stable order.
    pub const ALL: [SignalCategory; 9] = [
        SignalCategory::Location,
        SignalCategory::Value,
        SignalCategory::Politics,
        SignalCategory::Activity,
        SignalCategory::Time,
        SignalCategory::Routes,
        SignalCategory::Assets,
        SignalCategory::War,
        SignalCategory::Ship,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SignalCategory::Location => "location",
            SignalCategory::Value => "value",
            SignalCategory::Politics => "politics",
            SignalCategory::Activity => "activity",
            SignalCategory::Time => "time",
            SignalCategory::Routes => "routes",
            SignalCategory::Assets => "assets",
            SignalCategory::War => "war",
            SignalCategory::Ship => "ship",
            SignalCategory::Rule => "rule",
        }
    }
}

impl std::fmt::Display for SignalCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Default threshold above which a signal counts as a "match" when the
/// provider does not set the flag explicitly.
pub const DEFAULT_MATCH_THRESHOLD: f64 = 0.3;

/// One signal provider's verdict for one event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalScore {
    pub category: SignalCategory,
    /// Normalized score in [0, 1].
    pub score: f64,
    /// Whether the signal considers this event a hit.
    pub r#match: bool,
    /// True iff the score was computed from raw-event fields only.
    pub prefetch_capable: bool,
    /// Named sub-scores for explainability.
    #[serde(default)]
    pub components: HashMap<String, f64>,
}

impl SignalScore {
    /// Build a score with the default match rule (`score >= 0.3`).
    pub fn new(category: SignalCategory, score: f64, prefetch_capable: bool) -> Self {
        let score = score.clamp(0.0, 1.0);
        Self {
            category,
            score,
            r#match: score >= DEFAULT_MATCH_THRESHOLD,
            prefetch_capable,
            components: HashMap::new(),
        }
    }

    /// Override the match flag (e.g. politics evaluates it against the
    /// penalized score, routes require the ship filter to pass).
    pub fn with_match(mut self, matched: bool) -> Self {
        self.r#match = matched;
        self
    }

    pub fn with_component(mut self, name: &str, value: f64) -> Self {
        self.components.insert(name.to_string(), value);
        self
    }
}

/// Activity-pattern escalation applied after the blend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PatternEscalation {
    /// Multiplier >= 1.0 applied to the blended interest score.
    pub multiplier: f64,
    /// Human-readable reasons, one per matched pattern.
    pub reason: String,
    pub expires_at: DateTime<Utc>,
}

/// Discrete decision outcome, ordered from least to most urgent.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    #[default]
    Drop,
    Log,
    Digest,
    Notify,
    Priority,
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Tier::Drop => "drop",
            Tier::Log => "log",
            Tier::Digest => "digest",
            Tier::Notify => "notify",
            Tier::Priority => "priority",
        };
        f.write_str(s)
    }
}

/// A rule that fired during evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleMatch {
    pub rule: String,
    pub action: RuleAction,
}

/// What a matched rule does to the decision.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RuleAction {
    AlwaysIgnore,
    AlwaysNotify,
    /// AlwaysNotify escalated to the priority tier.
    AlwaysPriority,
    RequireAnyFailed,
    RequireAllFailed,
    GatePassed,
}

/// The final verdict for one (profile, event) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub kill_id: KillId,
    pub profile: String,
    pub tier: Tier,
    /// Final interest in [0, 1] after blending, penalties, and escalation.
    pub interest: f64,
    /// Category with the highest contribution, or `rule` when forced.
    pub dominant_category: Option<SignalCategory>,
    pub signal_scores: Vec<SignalScore>,
    pub rule_matches: Vec<RuleMatch>,
    #[serde(default)]
    pub escalation: Option<PatternEscalation>,
    pub fetch_performed: bool,
    #[serde(default)]
    pub rate_limited: bool,
    /// Set when the enrichment fetch failed and scoring fell back to raw
    /// fields; such decisions are capped at the log tier unless a
    /// prefetch-capable always-notify rule fired.
    #[serde(default)]
    pub enrichment_failed: bool,
    /// Kills folded into this decision when it is a digest summary.
    #[serde(default)]
    pub digest_kill_ids: Vec<KillId>,
    pub decided_at: DateTime<Utc>,
}

impl Decision {
    /// The category that contributed most to the interest score.
    pub fn compute_dominant(signal_scores: &[SignalScore], weights: &HashMap<SignalCategory, f64>) -> Option<SignalCategory> {
        signal_scores
            .iter()
            .filter(|s| weights.get(&s.category).copied().unwrap_or(0.0) > 0.0)
            .max_by(|a, b| {
                let wa = weights.get(&a.category).copied().unwrap_or(0.0) * a.score;
                let wb = weights.get(&b.category).copied().unwrap_or(0.0) * b.score;
                wa.partial_cmp(&wb).unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|s| s.category)
    }
}

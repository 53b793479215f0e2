//! Profile configuration schema
//!
//! One profile is one operator-configured notification policy: category
//! weights, signal instances, rules, thresholds, rate limit, and delivery
//! routes. Profiles are loaded from per-profile YAML files; validation
//! happens at load time in `config::profiles`, never at runtime.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{SecurityBand, ShipClass, SignalCategory, Tier};

fn default_weight() -> f64 {
    1.0
}

fn default_pivot_isk() -> f64 {
    100_000_000.0
}

fn default_high_value_isk() -> f64 {
    1_000_000_000.0
}

fn default_alt_penalty() -> f64 {
    0.3
}

/// How category scores are combined into the final interest value.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BlendMode {
    /// Root-mean-square weighted blend. Preserves strong single signals.
    #[default]
    Weighted,
    /// Plain weighted mean.
    Linear,
    /// Maximum category score. Only valid with `prefetch.mode = bypass`.
    Max,
}

/// Tier thresholds. Order `digest <= notify <= priority` is enforced at
/// profile load.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Thresholds {
    #[serde(default = "Thresholds::default_log")]
    pub log: f64,
    #[serde(default = "Thresholds::default_digest")]
    pub digest: f64,
    #[serde(default = "Thresholds::default_notify")]
    pub notify: f64,
    #[serde(default = "Thresholds::default_priority")]
    pub priority: f64,
}

impl Thresholds {
    fn default_log() -> f64 {
        0.1
    }
    fn default_digest() -> f64 {
        0.3
    }
    fn default_notify() -> f64 {
        0.6
    }
    fn default_priority() -> f64 {
        0.85
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            log: Self::default_log(),
            digest: Self::default_digest(),
            notify: Self::default_notify(),
            priority: Self::default_priority(),
        }
    }
}

/// Prefetch gate mode. Absent means auto-derived from the configured
/// signals (strict when everything is prefetch-capable, else conservative).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PrefetchMode {
    Bypass,
    Strict,
    Conservative,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PrefetchConfig {
    #[serde(default)]
    pub mode: Option<PrefetchMode>,
    /// Score assumed for prefetch-unknown categories when computing the
    /// upper bound. 1.0 is safe; constrained deployments may lower it.
    #[serde(default = "default_weight")]
    pub unknown_assumption: f64,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            mode: None,
            unknown_assumption: 1.0,
        }
    }
}

/// Token-bucket rate limit for notify/priority deliveries.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "RateLimitConfig::default_max_per_hour")]
    pub max_per_hour: u32,
    #[serde(default = "RateLimitConfig::default_burst")]
    pub burst: u32,
    /// When true, always-notify decisions skip the bucket entirely.
    #[serde(default)]
    pub bypass_for_always_notify: bool,
}

impl RateLimitConfig {
    fn default_max_per_hour() -> u32 {
        60
    }
    fn default_burst() -> u32 {
        10
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_per_hour: Self::default_max_per_hour(),
            burst: Self::default_burst(),
            bypass_for_always_notify: false,
        }
    }
}

// ============================================================================
// Signal configuration
// ============================================================================

/// Per-security-band score used by the location signal blend.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BandScores {
    #[serde(default)]
    pub high: f64,
    #[serde(default = "BandScores::default_low")]
    pub low: f64,
    #[serde(default = "BandScores::default_null")]
    pub null: f64,
}

impl BandScores {
    fn default_low() -> f64 {
        0.2
    }
    fn default_null() -> f64 {
        0.1
    }
}

impl Default for BandScores {
    fn default() -> Self {
        Self {
            high: 0.0,
            low: Self::default_low(),
            null: Self::default_null(),
        }
    }
}

impl BandScores {
    pub fn for_band(&self, band: SecurityBand) -> f64 {
        match band {
            SecurityBand::High => self.high,
            SecurityBand::Low => self.low,
            SecurityBand::Null => self.null,
        }
    }
}

/// Value scaling curve applied around the pivot.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ValueScaling {
    #[default]
    Sigmoid,
    Linear,
    Log,
    Step,
}

/// Aggregation across entity groups for the politics score.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PoliticsAggregation {
    /// `require_any` semantics: max over group scores (default).
    #[default]
    Any,
    /// `require_all` semantics: min over group scores.
    All,
}

/// One UTC activity window for the time signal, hours in [0, 24).
/// Windows wrapping midnight are expressed as `start > end`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start_hour: u8,
    pub end_hour: u8,
}

impl TimeWindow {
    pub fn contains_hour(&self, hour: u8) -> bool {
        if self.start_hour <= self.end_hour {
            hour >= self.start_hour && hour < self.end_hour
        } else {
            hour >= self.start_hour || hour < self.end_hour
        }
    }
}

/// War-target lists matched by the war signal.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WarTargets {
    #[serde(default)]
    pub corporations: Vec<u64>,
    #[serde(default)]
    pub alliances: Vec<u64>,
}

/// Role scaling for war-target involvement.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WarRoleScale {
    #[serde(default = "default_weight")]
    pub victim: f64,
    #[serde(default = "WarRoleScale::default_final_blow")]
    pub final_blow: f64,
    #[serde(default = "WarRoleScale::default_attacker")]
    pub attacker: f64,
}

impl WarRoleScale {
    fn default_final_blow() -> f64 {
        0.9
    }
    fn default_attacker() -> f64 {
        0.7
    }
}

impl Default for WarRoleScale {
    fn default() -> Self {
        Self {
            victim: 1.0,
            final_blow: Self::default_final_blow(),
            attacker: Self::default_attacker(),
        }
    }
}

/// One configured signal instance. The tagged union keeps the profile
/// schema closed: one variant per category, fixed parameters each.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignalSpec {
    Location {
        #[serde(default)]
        band_scores: BandScores,
    },
    Value {
        #[serde(default)]
        scaling: ValueScaling,
        #[serde(default = "default_pivot_isk")]
        pivot_isk: f64,
        /// Named custom scaling function; requires the `custom_scaling`
        /// feature flag.
        #[serde(default)]
        custom: Option<String>,
    },
    Politics {
        #[serde(default)]
        aggregation: PoliticsAggregation,
        #[serde(default = "default_alt_penalty")]
        known_alt_penalty: f64,
    },
    Activity,
    Time {
        windows: Vec<TimeWindow>,
    },
    Routes,
    Assets {
        #[serde(default = "default_weight")]
        structure_score: f64,
        #[serde(default = "SignalSpec::default_office_score")]
        office_score: f64,
    },
    War {
        #[serde(default)]
        targets: WarTargets,
        #[serde(default)]
        role_scale: WarRoleScale,
    },
    Ship {
        #[serde(default)]
        prefer: Vec<ShipClass>,
        #[serde(default)]
        avoid: Vec<ShipClass>,
        #[serde(default = "SignalSpec::default_capital_boost")]
        capital_boost: f64,
    },
}

impl SignalSpec {
    fn default_office_score() -> f64 {
        0.8
    }
    fn default_capital_boost() -> f64 {
        0.2
    }

    /// The category this spec belongs to. Profile validation rejects a
    /// spec placed under the wrong category key.
    pub fn category(&self) -> SignalCategory {
        match self {
            SignalSpec::Location { .. } => SignalCategory::Location,
            SignalSpec::Value { .. } => SignalCategory::Value,
            SignalSpec::Politics { .. } => SignalCategory::Politics,
            SignalSpec::Activity => SignalCategory::Activity,
            SignalSpec::Time { .. } => SignalCategory::Time,
            SignalSpec::Routes => SignalCategory::Routes,
            SignalSpec::Assets { .. } => SignalCategory::Assets,
            SignalSpec::War { .. } => SignalCategory::War,
            SignalSpec::Ship { .. } => SignalCategory::Ship,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalInstance {
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(flatten)]
    pub spec: SignalSpec,
}

/// One category's weight and configured signal instances. A category with
/// an empty signal list yields a null score and is excluded from blending.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CategoryConfig {
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default)]
    pub signals: Vec<SignalInstance>,
}

// ============================================================================
// Geography, routes, groups
// ============================================================================

/// Decay parameters for one geographic classification layer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LayerDecay {
    pub base: f64,
    pub decay: f64,
    pub range: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GeographyLayers {
    #[serde(default = "GeographyLayers::default_home")]
    pub home: LayerDecay,
    #[serde(default = "GeographyLayers::default_hunting")]
    pub hunting: LayerDecay,
    #[serde(default = "GeographyLayers::default_transit")]
    pub transit: LayerDecay,
}

impl GeographyLayers {
    fn default_home() -> LayerDecay {
        LayerDecay {
            base: 1.0,
            decay: 0.5,
            range: 5,
        }
    }
    fn default_hunting() -> LayerDecay {
        LayerDecay {
            base: 0.8,
            decay: 0.6,
            range: 4,
        }
    }
    fn default_transit() -> LayerDecay {
        LayerDecay {
            base: 0.5,
            decay: 0.5,
            range: 2,
        }
    }
}

impl Default for GeographyLayers {
    fn default() -> Self {
        Self {
            home: Self::default_home(),
            hunting: Self::default_hunting(),
            transit: Self::default_transit(),
        }
    }
}

/// Operator-classified systems by name. Names resolve against the topology
/// when the interest map is built; unknown names are load warnings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GeographyConfig {
    #[serde(default)]
    pub home: Vec<String>,
    #[serde(default)]
    pub hunting: Vec<String>,
    #[serde(default)]
    pub transit: Vec<String>,
    #[serde(default)]
    pub layers: GeographyLayers,
}

/// A watched route: waypoints expanded to the systems on the shortest
/// path between each consecutive pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteConfig {
    pub name: String,
    pub waypoints: Vec<String>,
    /// When non-empty, only losses of these hull classes count. A non-empty
    /// filter makes the routes signal post-fetch only.
    #[serde(default)]
    pub ship_filter: Vec<ShipClass>,
}

/// Role weights for politics scoring, per spec'd group-role matching.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RoleWeights {
    #[serde(default = "default_weight")]
    pub victim: f64,
    #[serde(default = "RoleWeights::default_final_blow")]
    pub final_blow: f64,
    #[serde(default = "RoleWeights::default_attacker")]
    pub attacker: f64,
    #[serde(default = "default_weight")]
    pub solo_modifier: f64,
}

impl RoleWeights {
    fn default_final_blow() -> f64 {
        0.9
    }
    fn default_attacker() -> f64 {
        0.7
    }
}

impl Default for RoleWeights {
    fn default() -> Self {
        Self {
            victim: 1.0,
            final_blow: Self::default_final_blow(),
            attacker: Self::default_attacker(),
            solo_modifier: 1.0,
        }
    }
}

/// A named entity group: corporations, alliances, and factions watched
/// together with shared role weights.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityGroupConfig {
    pub name: String,
    #[serde(default)]
    pub corporations: Vec<u64>,
    #[serde(default)]
    pub alliances: Vec<u64>,
    #[serde(default)]
    pub factions: Vec<u64>,
    #[serde(default)]
    pub role_weights: RoleWeights,
    /// Known alt entities; matches consisting solely of these take the
    /// known-alt penalty.
    #[serde(default)]
    pub alt_entities: Vec<u64>,
    /// Marks this group as a watchlist group for the `watchlist_match`
    /// built-in rule.
    #[serde(default)]
    pub watchlist: bool,
}

/// Operator's own corp/alliance identity, used by `corp_member_victim`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OperatorIdentity {
    #[serde(default)]
    pub corporations: Vec<u64>,
    #[serde(default)]
    pub alliances: Vec<u64>,
}

// ============================================================================
// Rules
// ============================================================================

/// Built-in rules with fixed semantics.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BuiltinRule {
    NpcOnly,
    PodOnly,
    CorpMemberVictim,
    HighValue,
    GatecampDetected,
    WatchlistMatch,
    StructureKill,
    SoloKill,
}

/// Entity role a rule predicate matches against.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RuleRole {
    Victim,
    Attacker,
    FinalBlow,
    Any,
}

/// Closed registry of rule templates, each with fixed parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "template", rename_all = "snake_case")]
pub enum RuleTemplate {
    GroupRole { group: String, role: RuleRole },
    CategoryMatch { category: SignalCategory },
    CategoryScore { category: SignalCategory, min: f64 },
    ValueAbove { isk: f64 },
    ValueBelow { isk: f64 },
    ShipClass { classes: Vec<ShipClass> },
    ShipGroup { group_ids: Vec<u32> },
    SecurityBand { bands: Vec<SecurityBand> },
    SystemMatch { systems: Vec<String> },
    AttackerCount { min: u32, #[serde(default)] max: Option<u32> },
    SoloKill,
}

/// A single rule condition: a built-in or a template instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RuleLeaf {
    Builtin { builtin: BuiltinRule },
    Template(RuleTemplate),
}

/// Rule condition. Combinators are one level deep: `all` / `any` over
/// leaves, no nesting, no negation. Expression rules are opt-in behind the
/// `rule_dsl` feature flag and parse to an AST at profile load.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RuleWhen {
    All { all: Vec<RuleLeaf> },
    Any { any: Vec<RuleLeaf> },
    Expr { expr: String },
    Leaf(RuleLeaf),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RuleActionConfig {
    AlwaysNotify,
    AlwaysIgnore,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleConfig {
    pub name: String,
    pub when: RuleWhen,
    pub action: RuleActionConfig,
    /// Escalate `always_notify` to the priority tier.
    #[serde(default)]
    pub priority: bool,
    /// Let this always-notify rule bypass the rate limit even when the
    /// profile default says otherwise.
    #[serde(default)]
    pub bypass_rate_limit: bool,
}

/// Cross-category gates. Failure forces drop (or log when the log
/// threshold is met).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GateConfig {
    #[serde(default)]
    pub require_any: Vec<SignalCategory>,
    #[serde(default)]
    pub require_all: Vec<SignalCategory>,
}

// ============================================================================
// Delivery
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Provider names per tier. Tiers with no entry are not delivered
    /// (drop and log never route anywhere).
    #[serde(default)]
    pub routes: BTreeMap<Tier, Vec<String>>,
    #[serde(default = "DeliveryConfig::default_digest_window")]
    pub digest_window_minutes: u32,
    #[serde(default = "DeliveryConfig::default_digest_max")]
    pub digest_max_size: usize,
}

impl DeliveryConfig {
    fn default_digest_window() -> u32 {
        15
    }
    fn default_digest_max() -> usize {
        20
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            routes: BTreeMap::new(),
            digest_window_minutes: Self::default_digest_window(),
            digest_max_size: Self::default_digest_max(),
        }
    }
}

/// Legacy watchlist matching scope (v1 trigger migration).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum WatchlistScope {
    /// Watchlist entities match in any attacker slot (v2 engine behavior).
    #[default]
    AttackerGlobal,
    /// Watchlist entities match the victim only (v1 trigger behavior).
    VictimOnly,
}

// ============================================================================
// Profile
// ============================================================================

/// One operator notification policy. See module docs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    #[serde(default)]
    pub blend: BlendMode,
    #[serde(default)]
    pub thresholds: Thresholds,
    #[serde(default)]
    pub prefetch: PrefetchConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    /// BTreeMap keeps category iteration deterministic.
    #[serde(default)]
    pub categories: BTreeMap<SignalCategory, CategoryConfig>,
    #[serde(default)]
    pub operator: OperatorIdentity,
    #[serde(default)]
    pub geography: GeographyConfig,
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
    #[serde(default)]
    pub groups: Vec<EntityGroupConfig>,
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
    #[serde(default)]
    pub gates: GateConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub watchlist_activity_scope: WatchlistScope,
    #[serde(default = "default_high_value_isk")]
    pub high_value_isk: f64,
    /// Load revision stamped by the profile loader; part of the interest
    /// map cache key, never serialized.
    #[serde(skip)]
    pub revision: u64,
}

impl Profile {
    /// Weight of a category, zero for unconfigured ones.
    pub fn category_weight(&self, category: SignalCategory) -> f64 {
        self.categories
            .get(&category)
            .map(|c| c.weight)
            .unwrap_or(0.0)
    }

    /// Categories with non-zero weight and at least one configured signal,
    /// in deterministic order.
    pub fn enabled_categories(&self) -> Vec<SignalCategory> {
        self.categories
            .iter()
            .filter(|(_, cfg)| cfg.weight > 0.0 && !cfg.signals.is_empty())
            .map(|(cat, _)| *cat)
            .collect()
    }

    pub fn group(&self, name: &str) -> Option<&EntityGroupConfig> {
        self.groups.iter().find(|g| g.name == name)
    }
}

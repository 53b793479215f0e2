//! Config linting: typo detection and value range checks.
//!
//! Serde silently ignores TOML keys it does not recognize, which turns a
//! misspelled threshold into a default that ships to production. Before
//! the strict deserialize, the raw document is linted against the list
//! of keys `AppConfig` actually owns, and anything unrecognized gets a
//! warning with the nearest real key attached. Lint output never blocks
//! a load; range errors (impossible values) do.

use std::collections::HashSet;

/// Furthest edit distance at which a key is still offered as a hint.
const MAX_HINT_DISTANCE: usize = 3;

/// One non-fatal finding from the config linter.
#[derive(Debug, Clone)]
pub struct ConfigWarning {
    /// Dotted path of the offending key or field.
    pub key: String,
    pub detail: String,
    /// Nearest recognized key, when one is close enough to be useful.
    pub hint: Option<String>,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.hint {
            Some(hint) => write!(f, "{} (closest known key: '{hint}')", self.detail),
            None => write!(f, "{}", self.detail),
        }
    }
}

// ============================================================================
// Recognized Keys
// ============================================================================

/// Every dotted key path `AppConfig` understands. Kept in sync with the
/// struct tree in app.rs by hand; a field added there without an entry
/// here will warn on every load, which is the reminder to update this.
pub fn known_config_keys() -> HashSet<&'static str> {
    HashSet::from([
        "relay",
        "relay.url",
        "relay.queue_id",
        "paths",
        "paths.profile_dir",
        "paths.catalog_db",
        "paths.data_dir",
        "ingestion",
        "ingestion.fetch_concurrency",
        "ingestion.dedup_cache_size",
        // Operator-named tables; their children are checked structurally
        // in `accepts_dynamic_key`.
        "features",
        "providers",
    ])
}

/// Keys under `[features]` are flag names and keys under `[providers]`
/// are sink names, so their first path segment is operator-chosen.
/// Provider tables still have a fixed field set one level down.
fn accepts_dynamic_key(key: &str) -> bool {
    if let Some(flag) = key.strip_prefix("features.") {
        return !flag.contains('.');
    }
    if let Some(rest) = key.strip_prefix("providers.") {
        return match rest.split_once('.') {
            None => true,
            Some((_, field)) => matches!(field, "kind" | "url"),
        };
    }
    false
}

// ============================================================================
// Document Walking
// ============================================================================

/// Flatten a parsed TOML document into dotted key paths, depth first.
pub fn collect_key_paths(value: &toml::Value, prefix: &str, out: &mut Vec<String>) {
    let Some(table) = value.as_table() else {
        return;
    };
    for (name, child) in table {
        let path = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{prefix}.{name}")
        };
        collect_key_paths(child, &path, out);
        out.push(path);
    }
}

// ============================================================================
// Nearest-Key Hints
// ============================================================================

/// Levenshtein distance, single-row formulation: `row[j]` holds the
/// distance from the consumed prefix of `a` to the first `j` characters
/// of `b`, and `diagonal` carries the substitution cost across the
/// in-place update.
fn edit_distance(a: &str, b: &str) -> usize {
    let b_chars: Vec<char> = b.chars().collect();
    let mut row: Vec<usize> = (0..=b_chars.len()).collect();

    for (i, ca) in a.chars().enumerate() {
        let mut diagonal = row[0];
        row[0] = i + 1;
        for (j, &cb) in b_chars.iter().enumerate() {
            let substitute = if ca == cb { diagonal } else { diagonal + 1 };
            diagonal = row[j + 1];
            row[j + 1] = substitute.min(row[j] + 1).min(row[j + 1] + 1);
        }
    }

    row[b_chars.len()]
}

/// Nearest recognized key within [`MAX_HINT_DISTANCE`] edits. Ties break
/// on the key text so hints are stable run to run.
pub fn closest_known_key(unknown: &str, known: &HashSet<&'static str>) -> Option<String> {
    known
        .iter()
        .map(|&candidate| (edit_distance(unknown, candidate), candidate))
        .filter(|&(distance, _)| distance <= MAX_HINT_DISTANCE)
        .min_by_key(|&(distance, candidate)| (distance, candidate))
        .map(|(_, candidate)| candidate.to_string())
}

// ============================================================================
// Lint Pass (entry point)
// ============================================================================

/// Lint a raw TOML document for unrecognized keys. Returns warnings only;
/// a document that fails to parse at all is left for serde to report.
pub fn validate_unknown_keys(raw_toml: &str) -> Vec<ConfigWarning> {
    let Ok(document) = raw_toml.parse::<toml::Value>() else {
        return Vec::new();
    };

    let known = known_config_keys();
    let mut paths = Vec::new();
    collect_key_paths(&document, "", &mut paths);

    paths
        .into_iter()
        .filter(|path| !known.contains(path.as_str()) && !accepts_dynamic_key(path))
        .map(|path| ConfigWarning {
            detail: format!("config key '{path}' is not recognized"),
            hint: closest_known_key(&path, &known),
            key: path,
        })
        .collect()
}

// ============================================================================
// Range Checks
// ============================================================================

/// Check a parsed AppConfig for impossible or suspicious values.
///
/// Errors abort startup (the daemon cannot run with them); warnings are
/// reported and tolerated.
pub fn validate_ranges(config: &super::AppConfig) -> (Vec<String>, Vec<ConfigWarning>) {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if config.relay.url.is_empty() {
        errors.push("relay.url must not be empty".to_string());
    }
    if config.relay.queue_id.is_empty() {
        errors.push("relay.queue_id must not be empty".to_string());
    }

    if config.ingestion.fetch_concurrency == 0 {
        errors.push("ingestion.fetch_concurrency must be >= 1".to_string());
    }
    if config.ingestion.fetch_concurrency > 64 {
        warnings.push(ConfigWarning {
            key: "ingestion.fetch_concurrency".to_string(),
            detail: format!(
                "fetch_concurrency = {} is aggressive for upstream rate limits (typical range 1-16)",
                config.ingestion.fetch_concurrency
            ),
            hint: None,
        });
    }

    if config.ingestion.dedup_cache_size < 100 {
        warnings.push(ConfigWarning {
            key: "ingestion.dedup_cache_size".to_string(),
            detail: format!(
                "dedup_cache_size = {} is small; relay replays may slip through",
                config.ingestion.dedup_cache_size
            ),
            hint: None,
        });
    }

    for (name, provider) in &config.providers {
        if provider.kind.is_empty() {
            errors.push(format!("providers.{name}.kind must not be empty"));
        }
        if provider.kind == "webhook" && provider.url.is_none() {
            errors.push(format!("providers.{name}: webhook providers require a url"));
        }
    }

    (errors, warnings)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppConfig, ProviderConfig};

    #[test]
    fn edit_distance_basics() {
        assert_eq!(edit_distance("relay", "relay"), 0);
        assert_eq!(edit_distance("quue_id", "queue_id"), 1);
        assert_eq!(edit_distance("", "abc"), 3);
        assert_eq!(edit_distance("abc", ""), 3);
        assert_eq!(edit_distance("kitten", "sitting"), 3);
    }

    #[test]
    fn typo_gets_a_hint() {
        let warnings = validate_unknown_keys(
            r#"
[relay]
quue_id = "main"
"#,
        );
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].key.contains("quue_id"));
        assert_eq!(warnings[0].hint.as_deref(), Some("relay.queue_id"));
    }

    #[test]
    fn garbage_key_gets_no_hint() {
        let known = known_config_keys();
        assert!(closest_known_key("completely_unrelated_nonsense", &known).is_none());
    }

    #[test]
    fn fully_recognized_document_is_clean() {
        let warnings = validate_unknown_keys(
            r#"
[relay]
url = "http://localhost/listen"
queue_id = "main"

[ingestion]
fetch_concurrency = 4

[features]
rule_dsl = true

[providers.ops]
kind = "log"
"#,
        );
        assert!(warnings.is_empty(), "expected no warnings, got: {warnings:?}");
    }

    #[test]
    fn provider_tables_accept_names_but_not_stray_fields() {
        let warnings = validate_unknown_keys(
            r#"
[providers.ops]
kind = "log"
colour = "red"
"#,
        );
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].key.contains("colour"));
    }

    #[test]
    fn unparseable_document_is_left_to_serde() {
        assert!(validate_unknown_keys("not [ valid toml").is_empty());
    }

    #[test]
    fn zero_fetch_concurrency_is_an_error() {
        let mut config = AppConfig::default();
        config.ingestion.fetch_concurrency = 0;
        let (errors, _) = validate_ranges(&config);
        assert!(errors.iter().any(|e| e.contains("fetch_concurrency")));
    }

    #[test]
    fn webhook_without_url_is_an_error() {
        let mut config = AppConfig::default();
        config.providers.insert(
            "hook".to_string(),
            ProviderConfig {
                kind: "webhook".to_string(),
                url: None,
            },
        );
        let (errors, _) = validate_ranges(&config);
        assert!(errors.iter().any(|e| e.contains("providers.hook")));
    }

    #[test]
    fn default_config_passes_range_checks() {
        let (errors, warnings) = validate_ranges(&AppConfig::default());
        assert!(errors.is_empty(), "defaults must not error: {errors:?}");
        assert!(warnings.is_empty(), "defaults must not warn: {warnings:?}");
    }
}

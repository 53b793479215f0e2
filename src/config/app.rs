//! Deployment configuration (TOML).
//!
//! Everything the daemon needs outside profile policy lives here: relay
//! endpoint, storage paths, ingestion limits, feature flags, and the
//! delivery provider table. Profiles (the per-operator scoring policy)
//! are deliberately elsewhere — they are YAML, hot-reloadable in spirit,
//! and validated by `config::profiles`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::defaults;

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root of the deployment config tree. Obtained via
/// [`AppConfig::load`]; see that method for the resolution order.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub relay: RelayConfig,

    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub ingestion: IngestionConfig,

    /// Feature flags, read once at startup. Unknown flags warn and are
    /// ignored (see `config::features`).
    #[serde(default)]
    pub features: BTreeMap<String, bool>,

    /// Delivery provider registry: name -> provider definition.
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderConfig>,
}

/// Upstream relay (long-poll) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    pub url: String,
    /// Stable consumer queue id; the relay tracks per-queue cursors.
    pub queue_id: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            url: "https://zkillredisq.stream/listen.php".to_string(),
            queue_id: "killwatch".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Directory of per-profile YAML files.
    pub profile_dir: PathBuf,
    /// Read-only static catalog (SQLite).
    pub catalog_db: PathBuf,
    /// Local state: activity baselines, replay capture.
    pub data_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            profile_dir: PathBuf::from("profiles"),
            catalog_db: PathBuf::from("data/catalog.sqlite"),
            data_dir: PathBuf::from("data"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct IngestionConfig {
    /// Ceiling on concurrent enrichment fetches.
    pub fetch_concurrency: usize,
    /// Dedup LRU capacity (kill ids).
    pub dedup_cache_size: usize,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            fetch_concurrency: defaults::MAX_CONCURRENT_FETCHES,
            dedup_cache_size: defaults::DEDUP_CACHE_SIZE,
        }
    }
}

/// One delivery provider definition. `kind` selects the implementation
/// from the registry; the remaining fields are kind-specific.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProviderConfig {
    pub kind: String,
    #[serde(default)]
    pub url: Option<String>,
}

// ============================================================================
// Loading
// ============================================================================

impl AppConfig {
    /// Resolve the deployment configuration. An explicit
    /// `$KILLWATCH_CONFIG` path takes precedence over a `killwatch.toml`
    /// sitting in the working directory; with neither present the daemon
    /// runs on built-in defaults, which point at local paths and the
    /// public relay.
    pub fn load() -> Self {
        let candidates = [
            std::env::var_os("KILLWATCH_CONFIG").map(PathBuf::from),
            Some(PathBuf::from("killwatch.toml")).filter(|p| p.is_file()),
        ];

        for path in candidates.into_iter().flatten() {
            match Self::load_from_file(&path) {
                Ok(config) => {
                    info!(path = %path.display(), "Configuration applied");
                    return config;
                }
                Err(e) => {
                    // An explicitly named file that does not parse (or
                    // does not exist) is worth a loud note before the
                    // next candidate is tried.
                    warn!(path = %path.display(), error = %e, "Config file rejected, trying next candidate");
                }
            }
        }

        info!("Running on built-in default configuration");
        Self::default()
    }

    /// Read and parse one TOML file: lint for unrecognized keys, strict
    /// deserialize, then range-check the result. Range errors refuse the
    /// file; lint findings only warn.
    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        for finding in super::validation::validate_unknown_keys(&raw) {
            warn!(key = %finding.key, "{finding}");
        }

        let config: AppConfig = toml::from_str(&raw)?;
        let (errors, warnings) = super::validation::validate_ranges(&config);
        for finding in &warnings {
            warn!(key = %finding.key, "{finding}");
        }
        if !errors.is_empty() {
            anyhow::bail!("invalid configuration: {}", errors.join("; "));
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_runnable() {
        let config = AppConfig::default();
        assert!(!config.relay.url.is_empty());
        assert_eq!(config.ingestion.fetch_concurrency, 8);
        assert_eq!(config.ingestion.dedup_cache_size, 10_000);
    }

    #[test]
    fn parses_provider_table() {
        let raw = r#"
[relay]
url = "http://localhost:9000/listen"
queue_id = "test"

[providers.ops-log]
kind = "log"

[providers.discord-main]
kind = "webhook"
url = "http://localhost:9001/hook"
"#;
        let config: AppConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.providers.len(), 2);
        assert_eq!(config.providers["discord-main"].kind, "webhook");
        assert_eq!(
            config.providers["discord-main"].url.as_deref(),
            Some("http://localhost:9001/hook")
        );
    }
}

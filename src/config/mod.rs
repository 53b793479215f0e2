//! Configuration: deployment TOML, feature flags, per-profile YAML.
//!
//! The deployment config is resolved once in `main` and pinned for the
//! process lifetime behind [`init`]/[`get`]; nothing else in the tree
//! reads files or environment variables. Profiles are loaded separately
//! (`profiles::load_profile_dir`) because their failure mode is
//! different: a bad profile is skipped, a bad deployment config stops
//! the daemon.

mod app;
pub mod defaults;
mod features;
pub mod profiles;
pub mod validation;

pub use app::*;
pub use features::FeatureFlags;
pub use profiles::{load_profile_dir, load_profile_file, validate_profile, ProfileError, ProfileLoadReport};

use std::sync::OnceLock;

static APP_CONFIG: OnceLock<AppConfig> = OnceLock::new();

/// Pin the deployment configuration for the process lifetime. A second
/// call is a programming error; it logs and keeps the first value
/// rather than racing.
pub fn init(config: AppConfig) {
    if APP_CONFIG.set(config).is_err() {
        tracing::warn!("config::init() called twice; keeping the first configuration");
    }
}

/// The pinned deployment configuration.
///
/// Panics when called before [`init`] — that ordering is wired in
/// `main`, so hitting the panic means a startup-sequencing bug, not an
/// operator mistake.
#[allow(clippy::expect_used)]
pub fn get() -> &'static AppConfig {
    APP_CONFIG
        .get()
        .expect("config::get() before config::init()")
}

/// Whether [`init`] has run. Lets test helpers avoid double-init.
pub fn is_initialized() -> bool {
    APP_CONFIG.get().is_some()
}

//! killwatch - kill-feed operational intelligence daemon
//!
//! # Usage
//!
//! ```bash
//! # Run the live pipeline
//! killwatch run
//!
//! # Explain a captured kill for one profile
//! killwatch explain --profile hunter --kill-id 123456789
//!
//! # Simulate a profile against the last 24h of captured events
//! killwatch simulate --profile hunter --since-hours 24
//! ```
//!
//! # Environment Variables
//!
//! - `KILLWATCH_CONFIG`: path to the TOML config file
//! - `RUST_LOG`: logging level (default: info)

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use killwatch::activity::ActivityCache;
use killwatch::catalog::CatalogStore;
use killwatch::config::{self, AppConfig, FeatureFlags};
use killwatch::delivery::{build_registry, DeliveryRouter};
use killwatch::enrichment::MemoryEnrichment;
use killwatch::explain::{explain, simulate, ExplainEnv};
use killwatch::interest::InterestMapRegistry;
use killwatch::pipeline::{IngestLoop, IngestServices, RelaySource};
use killwatch::storage::{BaselineStore, ReplayStore};
use killwatch::ProfileEvaluator;

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "killwatch")]
#[command(about = "Kill-feed Operational Intelligence")]
#[command(version)]
struct CliArgs {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the live ingestion pipeline against the configured relay.
    Run,
    /// Re-run one captured kill with full instrumentation.
    Explain {
        #[arg(long)]
        profile: String,
        #[arg(long)]
        kill_id: u64,
    },
    /// Replay captured events and report aggregate statistics.
    Simulate {
        #[arg(long)]
        profile: String,
        /// How far back to replay, in hours.
        #[arg(long, default_value = "24")]
        since_hours: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = CliArgs::parse();
    config::init(AppConfig::load());

    match args.command {
        Command::Run => run_pipeline().await,
        Command::Explain { profile, kill_id } => run_explain(&profile, kill_id).await,
        Command::Simulate {
            profile,
            since_hours,
        } => run_simulate(&profile, since_hours).await,
    }
}

// ============================================================================
// Shared bootstrap
// ============================================================================

struct Boot {
    flags: FeatureFlags,
    topology: Arc<killwatch::TopologyGraph>,
    ships: Arc<killwatch::catalog::ShipIndex>,
    evaluators: Vec<ProfileEvaluator>,
    db: sled::Db,
    registry: killwatch::delivery::ProviderRegistry,
}

/// Load catalog, topology, profiles, and the provider registry. Invalid
/// profiles are skipped with an error report; the rest continue.
async fn bootstrap() -> Result<Boot> {
    let app = config::get();
    let flags = FeatureFlags::from_config(&app.features);

    let registry = build_registry(app, &flags)
        .map_err(|errors| anyhow::anyhow!("provider registry invalid: {}", errors.join("; ")))?;
    let provider_names: BTreeSet<String> = registry.keys().cloned().collect();

    let catalog = CatalogStore::open(&app.paths.catalog_db)
        .await
        .context("opening catalog database")?;
    let ships = Arc::new(catalog.load_ship_index().await?);
    let topology = Arc::new(
        killwatch::topology::from_catalog(&catalog, false)
            .await
            .context("assembling topology graph")?,
    );

    let report = config::load_profile_dir(&app.paths.profile_dir, &flags, &provider_names)
        .context("loading profile directory")?;
    for (path, reason) in &report.failures {
        error!(path = %path, reason = %reason, "Profile skipped");
    }
    if report.profiles.is_empty() {
        anyhow::bail!("no valid profiles loaded from {}", app.paths.profile_dir.display());
    }

    let mut evaluators = Vec::with_capacity(report.profiles.len());
    for profile in report.profiles {
        let name = profile.name.clone();
        match ProfileEvaluator::compile(Arc::new(profile)) {
            Ok(evaluator) => evaluators.push(evaluator),
            Err(e) => error!(profile = %name, error = %e, "Profile failed to compile, skipping"),
        }
    }

    let db = killwatch::storage::open_data_db(&app.paths.data_dir)
        .context("opening local state database")?;

    Ok(Boot {
        flags,
        topology,
        ships,
        evaluators,
        db,
        registry,
    })
}

// ============================================================================
// run
// ============================================================================

async fn run_pipeline() -> Result<()> {
    let app = config::get();
    let boot = bootstrap().await?;
    info!(
        profiles = boot.evaluators.len(),
        systems = boot.topology.len(),
        rule_dsl = boot.flags.rule_dsl(),
        "killwatch starting"
    );

    let baselines = BaselineStore::open(&boot.db)?;
    let replay = ReplayStore::open(&boot.db)?;
    let activity = ActivityCache::new(boot.ships.clone(), Some(baselines));

    let profiles: Vec<_> = boot
        .evaluators
        .iter()
        .map(|e| e.profile().clone())
        .collect();
    let router = DeliveryRouter::new(&boot.registry, &profiles);

    let services = IngestServices {
        topology: boot.topology,
        ships: boot.ships,
        maps: Arc::new(InterestMapRegistry::new()),
        // The OAuth-backed HTTP client plugs in here; without it,
        // unresolvable kills are promoted bare and scored on raw fields.
        enrichment: Arc::new(MemoryEnrichment::new()),
        assets: std::collections::HashMap::new(),
    };

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, shutting down");
            signal_cancel.cancel();
        }
    });

    let ingest = IngestLoop::new(
        services,
        boot.evaluators,
        activity,
        router,
        Some(replay),
        app.ingestion.dedup_cache_size,
        app.ingestion.fetch_concurrency,
        cancel,
    );

    let mut source = RelaySource::new(&app.relay.url, &app.relay.queue_id)?;
    let stats = ingest.run(&mut source).await;
    info!(
        events = stats.events_processed,
        duplicates = stats.duplicates_dropped,
        "killwatch stopped"
    );
    Ok(())
}

// ============================================================================
// explain / simulate
// ============================================================================

fn find_evaluator<'a>(
    evaluators: &'a [ProfileEvaluator],
    profile: &str,
) -> Result<&'a ProfileEvaluator> {
    evaluators
        .iter()
        .find(|e| e.profile().name == profile)
        .ok_or_else(|| anyhow::anyhow!("unknown profile '{profile}'"))
}

async fn run_explain(profile: &str, kill_id: u64) -> Result<()> {
    let boot = bootstrap().await?;
    let replay = ReplayStore::open(&boot.db)?;
    let env = ExplainEnv {
        topology: boot.topology.clone(),
        ships: boot.ships.clone(),
        assets: std::collections::HashMap::new(),
    };
    let evaluator = find_evaluator(&boot.evaluators, profile)?;
    let report = explain(&env, evaluator, &replay, kill_id)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn run_simulate(profile: &str, since_hours: i64) -> Result<()> {
    let boot = bootstrap().await?;
    let replay = ReplayStore::open(&boot.db)?;
    let env = ExplainEnv {
        topology: boot.topology.clone(),
        ships: boot.ships.clone(),
        assets: std::collections::HashMap::new(),
    };
    let evaluator = find_evaluator(&boot.evaluators, profile)?;
    let since = chrono::Utc::now() - chrono::Duration::hours(since_hours);
    let report = simulate(&env, evaluator, &replay, since)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

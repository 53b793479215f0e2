//! Read-only static catalog access
//!
//! The catalog is a SQLite database materialized by the external
//! static-data importer. The core only queries it, never mutates it.
//! Expected tables:
//!
//! - `inv_types(type_id, name, group_id)`
//! - `inv_groups(group_id, name, category_id)`
//! - `inv_categories(category_id, name)`
//! - `map_systems(system_id, name, security, region_id, constellation_id)`
//! - `map_stargates(from_system_id, to_system_id)`
//! - `corp_stations(corporation_id, region_id)`
//!
//! Hull classification must be available synchronously during scoring, so
//! the ship tables are loaded once into an in-memory [`ShipIndex`] at
//! startup; only bulk loaders and the station lookup stay async.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tracing::info;

use crate::types::{ShipClass, TypeId};

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("catalog not found at {0}")]
    Missing(String),
}

/// One system row from the catalog's map tables.
#[derive(Debug, Clone)]
pub struct CatalogSystem {
    pub system_id: u32,
    pub name: String,
    pub security: f64,
    pub region_id: u32,
    pub constellation_id: u32,
}

/// One ship type row joined across the inv tables.
#[derive(Debug, Clone)]
pub struct ShipTypeRow {
    pub type_id: TypeId,
    pub name: String,
    pub group_id: u32,
    pub group_name: String,
    pub category_name: String,
}

// ============================================================================
// Ship Index (in-memory, sync lookups)
// ============================================================================

/// In-memory hull classification, keyed by `type_id`.
///
/// Missing types classify as [`ShipClass::Unknown`] — a missing catalog
/// row is data absence, not an error.
#[derive(Debug, Default, Clone)]
pub struct ShipIndex {
    classes: HashMap<TypeId, ShipClass>,
    groups: HashMap<TypeId, u32>,
    names: HashMap<TypeId, String>,
}

impl ShipIndex {
    pub fn from_rows(rows: &[ShipTypeRow]) -> Self {
        let mut index = Self::default();
        for row in rows {
            index
                .classes
                .insert(row.type_id, classify_group(&row.group_name, &row.category_name));
            index.groups.insert(row.type_id, row.group_id);
            index.names.insert(row.type_id, row.name.clone());
        }
        index
    }

    /// Test/fixture constructor from explicit classifications.
    pub fn from_entries(entries: &[(TypeId, ShipClass)]) -> Self {
        let mut index = Self::default();
        for &(type_id, class) in entries {
            index.classes.insert(type_id, class);
        }
        index
    }

    pub fn classify(&self, type_id: TypeId) -> ShipClass {
        self.classes.get(&type_id).copied().unwrap_or_default()
    }

    pub fn group_id(&self, type_id: TypeId) -> Option<u32> {
        self.groups.get(&type_id).copied()
    }

    pub fn name(&self, type_id: TypeId) -> Option<&str> {
        self.names.get(&type_id).map(String::as_str)
    }
}

/// Map a catalog group/category pair onto the closed hull-class enum.
fn classify_group(group_name: &str, category_name: &str) -> ShipClass {
    if category_name.eq_ignore_ascii_case("structure") {
        return ShipClass::Structure;
    }
    let group = group_name.to_lowercase();
    match group.as_str() {
        "capsule" => ShipClass::Capsule,
        "shuttle" => ShipClass::Shuttle,
        "frigate" | "assault frigate" | "interceptor" | "covert ops" | "electronic attack ship"
        | "logistics frigate" | "expedition frigate" => ShipClass::Frigate,
        "destroyer" | "interdictor" | "command destroyer" | "tactical destroyer" => {
            ShipClass::Destroyer
        }
        "cruiser" | "heavy assault cruiser" | "recon ship" | "logistics" | "strategic cruiser"
        | "heavy interdiction cruiser" => ShipClass::Cruiser,
        "combat battlecruiser" | "attack battlecruiser" | "command ship" | "battlecruiser" => {
            ShipClass::Battlecruiser
        }
        "battleship" | "marauder" | "black ops" => ShipClass::Battleship,
        "dreadnought" | "carrier" | "force auxiliary" | "lancer dreadnought" => ShipClass::Capital,
        "titan" | "supercarrier" => ShipClass::Supercapital,
        "hauler" | "industrial" | "industrial command ship" => ShipClass::Industrial,
        "deep space transport" | "blockade runner" | "transport ship" => ShipClass::Transport,
        "freighter" | "jump freighter" => ShipClass::Freighter,
        "mining barge" | "exhumer" => ShipClass::MiningBarge,
        _ => ShipClass::Unknown,
    }
}

// ============================================================================
// Catalog Store (async, sqlx)
// ============================================================================

/// Read-only handle on the catalog database.
pub struct CatalogStore {
    pool: SqlitePool,
}

impl CatalogStore {
    /// Open the catalog read-only. Fails fast when the file is absent —
    /// a missing catalog is a deployment error.
    pub async fn open(path: &Path) -> Result<Self, CatalogError> {
        if !path.exists() {
            return Err(CatalogError::Missing(path.display().to_string()));
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .read_only(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        info!(path = %path.display(), "Catalog opened read-only");
        Ok(Self { pool })
    }

    /// All systems, for topology assembly.
    pub async fn all_systems(&self) -> Result<Vec<CatalogSystem>, CatalogError> {
        let rows = sqlx::query(
            "SELECT system_id, name, security, region_id, constellation_id FROM map_systems",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| CatalogSystem {
                system_id: r.get::<i64, _>("system_id") as u32,
                name: r.get("name"),
                security: r.get("security"),
                region_id: r.get::<i64, _>("region_id") as u32,
                constellation_id: r.get::<i64, _>("constellation_id") as u32,
            })
            .collect())
    }

    /// All undirected stargate edges, for topology assembly.
    pub async fn all_stargate_edges(&self) -> Result<Vec<(u32, u32)>, CatalogError> {
        let rows = sqlx::query("SELECT from_system_id, to_system_id FROM map_stargates")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|r| {
                (
                    r.get::<i64, _>("from_system_id") as u32,
                    r.get::<i64, _>("to_system_id") as u32,
                )
            })
            .collect())
    }

    /// All ship/structure type rows, for the in-memory ship index.
    pub async fn ship_types(&self) -> Result<Vec<ShipTypeRow>, CatalogError> {
        let rows = sqlx::query(
            "SELECT t.type_id, t.name, t.group_id, g.name AS group_name, c.name AS category_name \
             FROM inv_types t \
             JOIN inv_groups g ON g.group_id = t.group_id \
             JOIN inv_categories c ON c.category_id = g.category_id \
             WHERE c.name IN ('Ship', 'Structure')",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| ShipTypeRow {
                type_id: r.get::<i64, _>("type_id") as u32,
                name: r.get("name"),
                group_id: r.get::<i64, _>("group_id") as u32,
                group_name: r.get("group_name"),
                category_name: r.get("category_name"),
            })
            .collect())
    }

    /// Regions a corporation has stations in. Missing corp -> empty set.
    pub async fn corporation_regions(
        &self,
        corporation_id: u64,
    ) -> Result<HashSet<u32>, CatalogError> {
        let rows = sqlx::query(
            "SELECT DISTINCT region_id FROM corp_stations WHERE corporation_id = ?1",
        )
        .bind(corporation_id as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| r.get::<i64, _>("region_id") as u32)
            .collect())
    }

    /// Load the full ship index into memory.
    pub async fn load_ship_index(&self) -> Result<ShipIndex, CatalogError> {
        let rows = self.ship_types().await?;
        info!(types = rows.len(), "Ship index loaded");
        Ok(ShipIndex::from_rows(&rows))
    }
}

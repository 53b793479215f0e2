//! Ship classification resolved from the static catalog

use serde::{Deserialize, Serialize};

/// Coarse hull class for a ship `type_id`, resolved via the catalog's
/// group/category tables. `Unknown` is returned for types the catalog has
/// no row for.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum ShipClass {
    Frigate,
    Destroyer,
    Cruiser,
    Battlecruiser,
    Battleship,
    Capital,
    Supercapital,
    Industrial,
    Transport,
    Freighter,
    MiningBarge,
    Shuttle,
    Capsule,
    Structure,
    #[default]
    Unknown,
}

impl ShipClass {
    /// Classes that trigger the ship signal's capital/structure boost.
    pub fn is_capital_or_structure(self) -> bool {
        matches!(
            self,
            ShipClass::Capital | ShipClass::Supercapital | ShipClass::Structure
        )
    }
}

impl std::fmt::Display for ShipClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ShipClass::Frigate => "frigate",
            ShipClass::Destroyer => "destroyer",
            ShipClass::Cruiser => "cruiser",
            ShipClass::Battlecruiser => "battlecruiser",
            ShipClass::Battleship => "battleship",
            ShipClass::Capital => "capital",
            ShipClass::Supercapital => "supercapital",
            ShipClass::Industrial => "industrial",
            ShipClass::Transport => "transport",
            ShipClass::Freighter => "freighter",
            ShipClass::MiningBarge => "mining_barge",
            ShipClass::Shuttle => "shuttle",
            ShipClass::Capsule => "capsule",
            ShipClass::Structure => "structure",
            ShipClass::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

//! Raw and enriched kill event types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 64-bit kill identifier, unique per event across the relay stream.
pub type KillId = u64;

/// Star system identifier (node in the topology graph).
pub type SystemId = u32;

/// Catalog type identifier (ships, weapons, structures).
pub type TypeId = u32;

/// Entity identifiers (characters, corporations, alliances, factions).
pub type CharacterId = u64;
pub type CorporationId = u64;
pub type AllianceId = u64;
pub type FactionId = u64;

/// Victim block of a kill event.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Victim {
    #[serde(default)]
    pub character_id: Option<CharacterId>,
    pub corporation_id: CorporationId,
    #[serde(default)]
    pub alliance_id: Option<AllianceId>,
    #[serde(default)]
    pub faction_id: Option<FactionId>,
    pub ship_type_id: TypeId,
}

/// One attacker entry. The attackers list of an [`Event`] is never empty.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Attacker {
    #[serde(default)]
    pub character_id: Option<CharacterId>,
    #[serde(default)]
    pub corporation_id: Option<CorporationId>,
    #[serde(default)]
    pub alliance_id: Option<AllianceId>,
    #[serde(default)]
    pub faction_id: Option<FactionId>,
    #[serde(default)]
    pub ship_type_id: Option<TypeId>,
    #[serde(default)]
    pub weapon_type_id: Option<TypeId>,
    #[serde(default)]
    pub final_blow: bool,
}

/// Relay-provided hints available before any enrichment fetch.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct ZkbMeta {
    #[serde(default)]
    pub total_value: f64,
    #[serde(default)]
    pub npc: bool,
    #[serde(default)]
    pub solo: bool,
}

/// A raw kill event as ingested from the upstream relay.
///
/// Immutable after parse. Duplicate `kill_id`s are silently dropped by the
/// ingestion loop's dedup cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub kill_id: KillId,
    pub timestamp: DateTime<Utc>,
    pub system_id: SystemId,
    pub victim: Victim,
    pub attackers: Vec<Attacker>,
    pub zkb: ZkbMeta,
}

impl Event {
    /// The attacker that landed the final blow, falling back to the first
    /// attacker when the relay omitted the flag.
    pub fn final_blow(&self) -> Option<&Attacker> {
        self.attackers
            .iter()
            .find(|a| a.final_blow)
            .or_else(|| self.attackers.first())
    }

    /// True when the victim ship is a capsule (pod) per the catalog.
    pub fn is_solo(&self) -> bool {
        self.zkb.solo || self.attackers.len() == 1
    }
}

/// Identity context for one resolved character.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct CharacterContext {
    pub corporation_id: CorporationId,
    pub alliance_id: Option<AllianceId>,
    pub faction_id: Option<FactionId>,
}

/// An [`Event`] extended with fields that require an enrichment fetch.
///
/// Produced on demand by the ingestion loop when the prefetch gate decides
/// the fetch is worth paying for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichedEvent {
    pub event: Event,
    /// Victim ship name resolved from the catalog.
    pub victim_ship_name: Option<String>,
    /// Resolved character names keyed by character id.
    pub character_names: std::collections::HashMap<CharacterId, String>,
    /// Region the kill system belongs to.
    pub region_id: Option<u32>,
    /// Constellation the kill system belongs to.
    pub constellation_id: Option<u32>,
    /// Attacker identity contexts resolved via the enrichment client.
    /// Fills in corp/alliance for attackers the relay reported bare.
    pub attacker_contexts: std::collections::HashMap<CharacterId, CharacterContext>,
}

impl EnrichedEvent {
    /// Wrap a raw event with no resolved context. Used when enrichment
    /// fails but scoring must still proceed on raw fields.
    pub fn bare(event: Event) -> Self {
        Self {
            event,
            victim_ship_name: None,
            character_names: std::collections::HashMap::new(),
            region_id: None,
            constellation_id: None,
            attacker_contexts: std::collections::HashMap::new(),
        }
    }

    /// Effective corporation id for an attacker: relay-provided if present,
    /// otherwise the resolved context.
    pub fn attacker_corp(&self, attacker: &Attacker) -> Option<CorporationId> {
        attacker.corporation_id.or_else(|| {
            attacker
                .character_id
                .and_then(|c| self.attacker_contexts.get(&c))
                .map(|ctx| ctx.corporation_id)
        })
    }

    /// Effective alliance id for an attacker.
    pub fn attacker_alliance(&self, attacker: &Attacker) -> Option<AllianceId> {
        attacker.alliance_id.or_else(|| {
            attacker
                .character_id
                .and_then(|c| self.attacker_contexts.get(&c))
                .and_then(|ctx| ctx.alliance_id)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event_with_attackers(attackers: Vec<Attacker>) -> Event {
        Event {
            kill_id: 1,
            timestamp: Utc::now(),
            system_id: 30000142,
            victim: Victim {
                corporation_id: 98000001,
                ship_type_id: 587,
                ..Victim::default()
            },
            attackers,
            zkb: ZkbMeta::default(),
        }
    }

    #[test]
    fn final_blow_prefers_flagged_attacker() {
        let ev = event_with_attackers(vec![
            Attacker {
                corporation_id: Some(1),
                ..Attacker::default()
            },
            Attacker {
                corporation_id: Some(2),
                final_blow: true,
                ..Attacker::default()
            },
        ]);
        assert_eq!(ev.final_blow().and_then(|a| a.corporation_id), Some(2));
    }

    #[test]
    fn final_blow_falls_back_to_first() {
        let ev = event_with_attackers(vec![Attacker {
            corporation_id: Some(7),
            ..Attacker::default()
        }]);
        assert_eq!(ev.final_blow().and_then(|a| a.corporation_id), Some(7));
    }

    #[test]
    fn enriched_attacker_corp_prefers_relay_value() {
        let mut ev = EnrichedEvent::bare(event_with_attackers(vec![Attacker {
            character_id: Some(100),
            corporation_id: Some(42),
            ..Attacker::default()
        }]));
        ev.attacker_contexts.insert(
            100,
            CharacterContext {
                corporation_id: 99,
                ..CharacterContext::default()
            },
        );
        let a = ev.event.attackers[0].clone();
        assert_eq!(ev.attacker_corp(&a), Some(42));
    }
}

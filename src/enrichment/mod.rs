//! Enrichment client interface
//!
//! The real client (rate-limited, cached, OAuth-backed) lives outside the
//! core; the pipeline consumes this contract only. Failures surface as
//! [`EnrichmentError`] and map to log-tier decisions — never to a dropped
//! always-notify.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::types::{CharacterContext, CharacterId, EnrichedEvent, KillId, TypeId};

#[derive(Debug, thiserror::Error)]
pub enum EnrichmentError {
    #[error("enrichment fetch failed: {0}")]
    Failed(String),
    #[error("upstream rate limited")]
    RateLimited,
    #[error("kill {0} not found upstream")]
    NotFound(KillId),
}

/// The four operations the core relies on. Batching, caching, and
/// backoff are the implementation's concern.
#[async_trait]
pub trait EnrichmentClient: Send + Sync {
    /// Batched id -> name resolution.
    async fn resolve_names(&self, ids: &[u64]) -> Result<HashMap<u64, String>, EnrichmentError>;

    /// Corp/alliance/faction context for a character.
    async fn get_character_context(
        &self,
        character_id: CharacterId,
    ) -> Result<CharacterContext, EnrichmentError>;

    /// Primary enrichment entry point for one kill.
    async fn get_kill_details(&self, kill_id: KillId) -> Result<EnrichedEvent, EnrichmentError>;

    /// Cached price lookup.
    async fn get_prices(&self, type_ids: &[TypeId]) -> Result<HashMap<TypeId, f64>, EnrichmentError>;
}

// ============================================================================
// In-memory client (tests, replay)
// ============================================================================

/// Deterministic in-memory client used by tests and the simulate surface.
/// `get_kill_details` returns the stored enriched event, or a bare
/// promotion of a registered raw event.
#[derive(Default)]
pub struct MemoryEnrichment {
    names: HashMap<u64, String>,
    contexts: HashMap<CharacterId, CharacterContext>,
    kills: std::sync::Mutex<HashMap<KillId, EnrichedEvent>>,
    prices: HashMap<TypeId, f64>,
    /// When set, every kill-details call fails with this reason.
    fail_with: Option<String>,
}

impl MemoryEnrichment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(reason: &str) -> Self {
        Self {
            fail_with: Some(reason.to_string()),
            ..Self::default()
        }
    }

    pub fn with_name(mut self, id: u64, name: &str) -> Self {
        self.names.insert(id, name.to_string());
        self
    }

    pub fn with_context(mut self, character_id: CharacterId, context: CharacterContext) -> Self {
        self.contexts.insert(character_id, context);
        self
    }

    pub fn with_price(mut self, type_id: TypeId, price: f64) -> Self {
        self.prices.insert(type_id, price);
        self
    }

    /// Register a raw event so `get_kill_details` can promote it.
    pub fn register_event(&self, event: crate::types::Event) {
        let mut enriched = EnrichedEvent::bare(event);
        for attacker in enriched.event.attackers.clone() {
            if let Some(char_id) = attacker.character_id {
                if let Some(ctx) = self.contexts.get(&char_id) {
                    enriched.attacker_contexts.insert(char_id, *ctx);
                }
            }
        }
        if let Ok(mut kills) = self.kills.lock() {
            kills.insert(enriched.event.kill_id, enriched);
        }
    }
}

#[async_trait]
impl EnrichmentClient for MemoryEnrichment {
    async fn resolve_names(&self, ids: &[u64]) -> Result<HashMap<u64, String>, EnrichmentError> {
        Ok(ids
            .iter()
            .filter_map(|id| self.names.get(id).map(|n| (*id, n.clone())))
            .collect())
    }

    async fn get_character_context(
        &self,
        character_id: CharacterId,
    ) -> Result<CharacterContext, EnrichmentError> {
        self.contexts
            .get(&character_id)
            .copied()
            .ok_or_else(|| EnrichmentError::Failed(format!("unknown character {character_id}")))
    }

    async fn get_kill_details(&self, kill_id: KillId) -> Result<EnrichedEvent, EnrichmentError> {
        if let Some(reason) = &self.fail_with {
            return Err(EnrichmentError::Failed(reason.clone()));
        }
        self.kills
            .lock()
            .map_err(|_| EnrichmentError::Failed("kill store poisoned".to_string()))?
            .get(&kill_id)
            .cloned()
            .ok_or(EnrichmentError::NotFound(kill_id))
    }

    async fn get_prices(&self, type_ids: &[TypeId]) -> Result<HashMap<TypeId, f64>, EnrichmentError> {
        Ok(type_ids
            .iter()
            .filter_map(|id| self.prices.get(id).map(|p| (*id, *p)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Attacker, Event, Victim, ZkbMeta};
    use chrono::Utc;

    fn event() -> Event {
        Event {
            kill_id: 7,
            timestamp: Utc::now(),
            system_id: 1,
            victim: Victim {
                corporation_id: 1,
                ship_type_id: 587,
                ..Victim::default()
            },
            attackers: vec![Attacker {
                character_id: Some(42),
                ..Attacker::default()
            }],
            zkb: ZkbMeta::default(),
        }
    }

    #[tokio::test]
    async fn promotes_registered_event_with_contexts() {
        let client = MemoryEnrichment::new().with_context(
            42,
            CharacterContext {
                corporation_id: 555,
                alliance_id: Some(9),
                faction_id: None,
            },
        );
        client.register_event(event());
        let enriched = client.get_kill_details(7).await.unwrap();
        let attacker = enriched.event.attackers[0].clone();
        assert_eq!(enriched.attacker_corp(&attacker), Some(555));
        assert_eq!(enriched.attacker_alliance(&attacker), Some(9));
    }

    #[tokio::test]
    async fn failing_client_reports_reason() {
        let client = MemoryEnrichment::failing("quota exhausted");
        client.register_event(event());
        let err = client.get_kill_details(7).await.unwrap_err();
        assert!(matches!(err, EnrichmentError::Failed(_)));
    }

    #[tokio::test]
    async fn unknown_kill_is_not_found() {
        let client = MemoryEnrichment::new();
        assert!(matches!(
            client.get_kill_details(99).await.unwrap_err(),
            EnrichmentError::NotFound(99)
        ));
    }
}

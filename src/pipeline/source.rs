//! Event source abstraction for kill-feed ingestion.
//!
//! Provides a unified trait for reading events from different sources:
//! the upstream long-poll relay (live), and captured replay (simulate,
//! tests). Implementations handle wire parsing, reconnection, and
//! backoff internally; the ingestion loop calls [`next_event`] in a
//! select! with cancellation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::defaults::{
    RELAY_BACKOFF_BASE_MS, RELAY_BACKOFF_CAP_MS, RELAY_POLL_TIMEOUT_SECS,
};
use crate::types::{Attacker, Event, Victim, ZkbMeta};

/// Events produced by a source.
pub enum SourceEvent {
    /// A valid kill event was read.
    Event(Event),
    /// The poll returned no package; poll again.
    Empty,
    /// Source reached end of data (replay exhaustion; the relay never
    /// ends).
    Eof,
}

/// Trait abstracting where kill events come from.
#[async_trait]
pub trait EventSource: Send + 'static {
    /// Read the next event. `SourceEvent::Empty` means "nothing right
    /// now, ask again"; `Err` means the source is unrecoverable.
    async fn next_event(&mut self) -> anyhow::Result<SourceEvent>;

    /// Human-readable name for logging (e.g. "relay", "replay").
    fn source_name(&self) -> &str;
}

// ============================================================================
// Wire format
// ============================================================================

/// Relay long-poll response: either `{"package": null}` or a full
/// package. The core treats anything it cannot parse as a skippable
/// malformed payload, never a crash.
#[derive(Debug, Deserialize)]
struct RelayResponse {
    package: Option<RelayPackage>,
}

#[derive(Debug, Deserialize)]
struct RelayPackage {
    #[serde(rename = "killID")]
    kill_id: u64,
    killmail: RelayKillmail,
    zkb: RelayZkb,
}

#[derive(Debug, Deserialize)]
struct RelayKillmail {
    killmail_time: DateTime<Utc>,
    solar_system_id: u32,
    victim: RelayVictim,
    #[serde(default)]
    attackers: Vec<RelayAttacker>,
}

#[derive(Debug, Deserialize)]
struct RelayVictim {
    #[serde(default)]
    character_id: Option<u64>,
    corporation_id: u64,
    #[serde(default)]
    alliance_id: Option<u64>,
    #[serde(default)]
    faction_id: Option<u64>,
    ship_type_id: u32,
}

#[derive(Debug, Deserialize)]
struct RelayAttacker {
    #[serde(default)]
    character_id: Option<u64>,
    #[serde(default)]
    corporation_id: Option<u64>,
    #[serde(default)]
    alliance_id: Option<u64>,
    #[serde(default)]
    faction_id: Option<u64>,
    #[serde(default)]
    ship_type_id: Option<u32>,
    #[serde(default)]
    weapon_type_id: Option<u32>,
    #[serde(default)]
    final_blow: bool,
}

#[derive(Debug, Deserialize)]
struct RelayZkb {
    #[serde(rename = "totalValue", default)]
    total_value: f64,
    #[serde(default)]
    npc: bool,
    #[serde(default)]
    solo: bool,
}

/// Parse one relay response body. `Ok(None)` is the empty package.
/// An event with no attackers is malformed (the data model requires a
/// non-empty attacker list).
pub fn parse_relay_body(body: &str) -> anyhow::Result<Option<Event>> {
    let response: RelayResponse = serde_json::from_str(body)?;
    let Some(package) = response.package else {
        return Ok(None);
    };
    if package.killmail.attackers.is_empty() {
        anyhow::bail!("package {} has no attackers", package.kill_id);
    }
    Ok(Some(Event {
        kill_id: package.kill_id,
        timestamp: package.killmail.killmail_time,
        system_id: package.killmail.solar_system_id,
        victim: Victim {
            character_id: package.killmail.victim.character_id,
            corporation_id: package.killmail.victim.corporation_id,
            alliance_id: package.killmail.victim.alliance_id,
            faction_id: package.killmail.victim.faction_id,
            ship_type_id: package.killmail.victim.ship_type_id,
        },
        attackers: package
            .killmail
            .attackers
            .into_iter()
            .map(|a| Attacker {
                character_id: a.character_id,
                corporation_id: a.corporation_id,
                alliance_id: a.alliance_id,
                faction_id: a.faction_id,
                ship_type_id: a.ship_type_id,
                weapon_type_id: a.weapon_type_id,
                final_blow: a.final_blow,
            })
            .collect(),
        zkb: ZkbMeta {
            total_value: package.zkb.total_value,
            npc: package.zkb.npc,
            solo: package.zkb.solo,
        },
    }))
}

// ============================================================================
// Relay Source (long-poll HTTP)
// ============================================================================

/// Long-poll consumer of the upstream relay. Tolerates 5xx, transient
/// disconnects, and empty responses; backs off exponentially with jitter,
/// capped at one minute.
pub struct RelaySource {
    http: reqwest::Client,
    url: String,
    queue_id: String,
    consecutive_failures: u32,
}

impl RelaySource {
    pub fn new(url: &str, queue_id: &str) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(RELAY_POLL_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            http,
            url: url.to_string(),
            queue_id: queue_id.to_string(),
            consecutive_failures: 0,
        })
    }

    async fn backoff(&mut self) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        let exp = RELAY_BACKOFF_BASE_MS.saturating_mul(1 << self.consecutive_failures.min(6));
        let capped = exp.min(RELAY_BACKOFF_CAP_MS);
        let jitter = rand::thread_rng().gen_range(0..=capped / 4);
        let delay = std::time::Duration::from_millis(capped + jitter);
        debug!(
            failures = self.consecutive_failures,
            delay_ms = delay.as_millis() as u64,
            "Relay backoff"
        );
        tokio::time::sleep(delay).await;
    }
}

#[async_trait]
impl EventSource for RelaySource {
    async fn next_event(&mut self) -> anyhow::Result<SourceEvent> {
        let request = self
            .http
            .get(&self.url)
            .query(&[("queueID", self.queue_id.as_str())]);

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "Relay poll transport error");
                self.backoff().await;
                return Ok(SourceEvent::Empty);
            }
        };

        if response.status().is_server_error() {
            warn!(status = %response.status(), "Relay returned server error");
            self.backoff().await;
            return Ok(SourceEvent::Empty);
        }

        let body = match response.text().await {
            Ok(b) => b,
            Err(e) => {
                warn!(error = %e, "Relay body read failed");
                self.backoff().await;
                return Ok(SourceEvent::Empty);
            }
        };

        self.consecutive_failures = 0;
        match parse_relay_body(&body) {
            Ok(Some(event)) => Ok(SourceEvent::Event(event)),
            Ok(None) => Ok(SourceEvent::Empty),
            Err(e) => {
                // Malformed payloads are logged and skipped, never fatal.
                warn!(error = %e, "Malformed relay package, skipping");
                Ok(SourceEvent::Empty)
            }
        }
    }

    fn source_name(&self) -> &str {
        "relay"
    }
}

// ============================================================================
// Replay Source (captured events)
// ============================================================================

/// Replays pre-loaded events in order. Used by simulate and tests.
pub struct ReplaySource {
    events: std::vec::IntoIter<Event>,
}

impl ReplaySource {
    pub fn new(events: Vec<Event>) -> Self {
        Self {
            events: events.into_iter(),
        }
    }
}

#[async_trait]
impl EventSource for ReplaySource {
    async fn next_event(&mut self) -> anyhow::Result<SourceEvent> {
        Ok(match self.events.next() {
            Some(event) => SourceEvent::Event(event),
            None => SourceEvent::Eof,
        })
    }

    fn source_name(&self) -> &str {
        "replay"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_empty_package() {
        assert!(parse_relay_body(r#"{"package": null}"#).unwrap().is_none());
    }

    #[test]
    fn parses_full_package() {
        let body = r#"{
            "package": {
                "killID": 12345,
                "killmail": {
                    "killmail_time": "2025-06-01T20:30:00Z",
                    "solar_system_id": 30000142,
                    "victim": {
                        "character_id": 90000001,
                        "corporation_id": 98000001,
                        "ship_type_id": 587
                    },
                    "attackers": [
                        { "character_id": 90000002, "corporation_id": 98000002, "final_blow": true }
                    ]
                },
                "zkb": { "totalValue": 65000000.5, "npc": false, "solo": true }
            }
        }"#;
        let event = parse_relay_body(body).unwrap().unwrap();
        assert_eq!(event.kill_id, 12345);
        assert_eq!(event.system_id, 30000142);
        assert_eq!(event.victim.corporation_id, 98000001);
        assert_eq!(event.attackers.len(), 1);
        assert!((event.zkb.total_value - 65_000_000.5).abs() < 1e-6);
        assert!(event.zkb.solo);
    }

    #[test]
    fn rejects_attackerless_package() {
        let body = r#"{
            "package": {
                "killID": 1,
                "killmail": {
                    "killmail_time": "2025-06-01T20:30:00Z",
                    "solar_system_id": 1,
                    "victim": { "corporation_id": 1, "ship_type_id": 587 },
                    "attackers": []
                },
                "zkb": {}
            }
        }"#;
        assert!(parse_relay_body(body).is_err());
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_relay_body("not json").is_err());
    }

    #[tokio::test]
    async fn replay_source_yields_then_eof() {
        use crate::types::{Victim, ZkbMeta};
        let event = Event {
            kill_id: 1,
            timestamp: Utc::now(),
            system_id: 1,
            victim: Victim {
                corporation_id: 1,
                ship_type_id: 587,
                ..Victim::default()
            },
            attackers: vec![Attacker::default()],
            zkb: ZkbMeta::default(),
        };
        let mut source = ReplaySource::new(vec![event]);
        assert!(matches!(
            source.next_event().await.unwrap(),
            SourceEvent::Event(_)
        ));
        assert!(matches!(source.next_event().await.unwrap(), SourceEvent::Eof));
    }
}

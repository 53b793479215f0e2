//! Delivery router - per-(profile, tier) routing with rate limiting and
//! digest batching
//!
//! The router owns one task per provider, fed by a bounded channel.
//! Retryable send failures back off inside the provider task up to a
//! cap; a failing provider never blocks its siblings (fan-out is
//! per-channel) and never blocks ingestion (the route call only enqueues).

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::defaults::{DELIVERY_MAX_RETRIES, DELIVERY_RETRY_BASE_MS};
use crate::types::{Decision, Profile, RuleAction, Tier};

use super::{DigestBuffer, ProviderRegistry, TokenBucket};

/// What happened to a decision at the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteResult {
    /// Enqueued to at least one provider.
    Delivered,
    /// Buffered into the digest window.
    Buffered,
    /// Token bucket exhausted; not delivered.
    RateLimited,
    /// Tier routes nowhere (drop/log, or no route configured).
    NotRouted,
}

struct ProfileRouting {
    profile: Arc<Profile>,
    bucket: TokenBucket,
    digest: DigestBuffer,
}

pub struct DeliveryRouter {
    profiles: HashMap<String, ProfileRouting>,
    senders: HashMap<String, mpsc::Sender<Decision>>,
    workers: JoinSet<()>,
}

impl DeliveryRouter {
    /// Spawn one worker task per registered provider and set up
    /// per-profile routing state.
    pub fn new(registry: &ProviderRegistry, profiles: &[Arc<Profile>]) -> Self {
        let mut senders = HashMap::new();
        let mut workers = JoinSet::new();

        for (name, provider) in registry {
            let (tx, rx) = mpsc::channel::<Decision>(256);
            senders.insert(name.clone(), tx);
            let provider = provider.clone();
            workers.spawn(provider_worker(provider, rx));
        }

        let profiles = profiles
            .iter()
            .map(|profile| {
                (
                    profile.name.clone(),
                    ProfileRouting {
                        bucket: TokenBucket::new(profile.rate_limit),
                        digest: DigestBuffer::new(
                            profile.delivery.digest_window_minutes,
                            profile.delivery.digest_max_size,
                        ),
                        profile: profile.clone(),
                    },
                )
            })
            .collect();

        Self {
            profiles,
            senders,
            workers,
        }
    }

    /// Route one decision. Mutates `decision.rate_limited` when the
    /// bucket rejects it.
    pub async fn route(&mut self, decision: &mut Decision, now: DateTime<Utc>) -> RouteResult {
        let Some(routing) = self.profiles.get_mut(&decision.profile) else {
            warn!(profile = %decision.profile, "Decision for unknown profile, not routed");
            return RouteResult::NotRouted;
        };

        match decision.tier {
            Tier::Drop | Tier::Log => RouteResult::NotRouted,
            Tier::Digest => {
                let summary = routing.digest.push(decision.clone(), now);
                if let Some(summary) = summary {
                    Self::fan_out(&self.senders, &routing.profile, summary).await;
                }
                RouteResult::Buffered
            }
            Tier::Notify | Tier::Priority => {
                let bypass = Self::bypasses_rate_limit(&routing.profile, decision);
                if !bypass && !routing.bucket.try_acquire(now) {
                    decision.rate_limited = true;
                    debug!(
                        profile = %decision.profile,
                        kill_id = decision.kill_id,
                        "Rate limited, not delivered"
                    );
                    return RouteResult::RateLimited;
                }
                Self::fan_out(&self.senders, &routing.profile, decision.clone()).await;
                RouteResult::Delivered
            }
        }
    }

    /// Close digest windows whose time has elapsed. Call periodically.
    pub async fn tick(&mut self, now: DateTime<Utc>) {
        let mut summaries = Vec::new();
        for routing in self.profiles.values_mut() {
            if let Some(summary) = routing.digest.tick(now) {
                summaries.push((routing.profile.clone(), summary));
            }
        }
        for (profile, summary) in summaries {
            Self::fan_out(&self.senders, &profile, summary).await;
        }
    }

    /// Flush all digest buffers and stop provider workers. Shutdown
    /// step 5; reports whether workers drained cleanly.
    pub async fn shutdown(mut self, now: DateTime<Utc>) -> bool {
        let mut summaries = Vec::new();
        for routing in self.profiles.values_mut() {
            if let Some(summary) = routing.digest.flush(now) {
                summaries.push((routing.profile.clone(), summary));
            }
        }
        for (profile, summary) in summaries {
            Self::fan_out(&self.senders, &profile, summary).await;
        }

        // Dropping the senders lets workers drain and exit.
        self.senders.clear();
        let mut clean = true;
        while let Some(result) = self.workers.join_next().await {
            if let Err(e) = result {
                warn!(error = %e, "Delivery worker exited uncleanly");
                clean = false;
            }
        }
        info!(clean, "Delivery router closed");
        clean
    }

    /// An always-notify match bypasses the bucket when the profile says
    /// so globally or the specific rule carries the bypass flag.
    fn bypasses_rate_limit(profile: &Profile, decision: &Decision) -> bool {
        let notify_rules: Vec<&str> = decision
            .rule_matches
            .iter()
            .filter(|m| {
                matches!(
                    m.action,
                    RuleAction::AlwaysNotify | RuleAction::AlwaysPriority
                )
            })
            .map(|m| m.rule.as_str())
            .collect();
        if notify_rules.is_empty() {
            return false;
        }
        if profile.rate_limit.bypass_for_always_notify {
            return true;
        }
        profile
            .rules
            .iter()
            .any(|r| r.bypass_rate_limit && notify_rules.contains(&r.name.as_str()))
    }

    async fn fan_out(
        senders: &HashMap<String, mpsc::Sender<Decision>>,
        profile: &Profile,
        decision: Decision,
    ) {
        let Some(route) = profile.delivery.routes.get(&decision.tier) else {
            debug!(
                profile = %profile.name,
                tier = %decision.tier,
                "No route configured for tier"
            );
            return;
        };
        for provider_name in route {
            match senders.get(provider_name) {
                Some(sender) => {
                    if sender.send(decision.clone()).await.is_err() {
                        warn!(provider = %provider_name, "Provider channel closed");
                    }
                }
                None => {
                    // Profile validation checks names at load; reaching
                    // here means the registry changed underneath us.
                    warn!(provider = %provider_name, "Unknown provider at fan-out");
                }
            }
        }
    }
}

/// One provider's worker loop: deliver with bounded retries.
async fn provider_worker(
    provider: Arc<dyn super::DeliveryProvider>,
    mut rx: mpsc::Receiver<Decision>,
) {
    while let Some(decision) = rx.recv().await {
        let mut attempt = 0u32;
        loop {
            let result = provider.send(&decision).await;
            if result.ok {
                break;
            }
            if !result.retryable || attempt >= DELIVERY_MAX_RETRIES {
                warn!(
                    provider = %provider.name(),
                    kill_id = decision.kill_id,
                    attempts = attempt + 1,
                    reason = result.reason.as_deref().unwrap_or("unknown"),
                    "Delivery failed, dropping"
                );
                break;
            }
            attempt += 1;
            let backoff = DELIVERY_RETRY_BASE_MS * (1 << attempt.min(6));
            tokio::time::sleep(std::time::Duration::from_millis(backoff)).await;
        }
    }
}

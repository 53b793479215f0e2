//! Delivery providers and the per-profile router
//!
//! Providers are looked up by name from a registry built at startup;
//! unknown provider names fail profile validation. Each provider runs as
//! an independent task fed by a channel, so one slow or failing sink
//! cannot starve ingestion or its siblings.

mod digest;
mod log_sink;
mod rate_limit;
mod router;
mod webhook;

pub use digest::DigestBuffer;
pub use log_sink::LogProvider;
pub use rate_limit::TokenBucket;
pub use router::{DeliveryRouter, RouteResult};
pub use webhook::WebhookProvider;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{AppConfig, FeatureFlags, ProviderConfig};
use crate::types::Decision;

/// Outcome of one provider send.
#[derive(Debug, Clone)]
pub struct SendResult {
    pub ok: bool,
    pub retryable: bool,
    pub reason: Option<String>,
}

impl SendResult {
    pub fn ok() -> Self {
        Self {
            ok: true,
            retryable: false,
            reason: None,
        }
    }
}

/// A pluggable notification sink.
#[async_trait]
pub trait DeliveryProvider: std::fmt::Debug + Send + Sync {
    fn name(&self) -> &str;

    /// Config validation at registry build time.
    fn validate(&self, config: &ProviderConfig) -> Vec<String>;

    async fn send(&self, decision: &Decision) -> SendResult;
}

pub type ProviderRegistry = HashMap<String, Arc<dyn DeliveryProvider>>;

/// Build the provider registry from the app config, honoring feature
/// flags. Configuration errors are collected and fail startup together.
pub fn build_registry(
    config: &AppConfig,
    flags: &FeatureFlags,
) -> Result<ProviderRegistry, Vec<String>> {
    let mut registry: ProviderRegistry = HashMap::new();
    let mut errors = Vec::new();

    for (name, provider_config) in &config.providers {
        match provider_config.kind.as_str() {
            "log" => {
                let provider = LogProvider::new(name);
                errors.extend(
                    provider
                        .validate(provider_config)
                        .into_iter()
                        .map(|e| format!("providers.{name}: {e}")),
                );
                registry.insert(name.clone(), Arc::new(provider));
            }
            "webhook" => {
                if !flags.delivery_webhook() {
                    errors.push(format!(
                        "providers.{name}: kind 'webhook' requires the 'delivery_webhook' feature flag"
                    ));
                    continue;
                }
                let url = provider_config.url.clone().unwrap_or_default();
                match WebhookProvider::new(name, &url) {
                    Ok(provider) => {
                        errors.extend(
                            provider
                                .validate(provider_config)
                                .into_iter()
                                .map(|e| format!("providers.{name}: {e}")),
                        );
                        registry.insert(name.clone(), Arc::new(provider));
                    }
                    Err(e) => errors.push(format!("providers.{name}: {e}")),
                }
            }
            // Recognized but not shipped in this build.
            "slack" | "email" => {
                errors.push(format!(
                    "providers.{name}: kind '{}' is reserved and not available",
                    provider_config.kind
                ));
            }
            other => {
                errors.push(format!("providers.{name}: unknown provider kind '{other}'"));
            }
        }
    }

    // A bare config still gets a log sink so profiles have something to
    // route to.
    if registry.is_empty() && errors.is_empty() {
        registry.insert("log".to_string(), Arc::new(LogProvider::new("log")));
    }

    if errors.is_empty() {
        Ok(registry)
    } else {
        Err(errors)
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use std::sync::Mutex;

    /// Test sink that records everything it is asked to send.
    #[derive(Debug)]
    pub struct RecordingProvider {
        name: String,
        pub sent: Arc<Mutex<Vec<Decision>>>,
        pub fail_times: Mutex<u32>,
    }

    impl RecordingProvider {
        pub fn new(name: &str) -> (Arc<Self>, Arc<Mutex<Vec<Decision>>>) {
            let sent = Arc::new(Mutex::new(Vec::new()));
            (
                Arc::new(Self {
                    name: name.to_string(),
                    sent: sent.clone(),
                    fail_times: Mutex::new(0),
                }),
                sent,
            )
        }

        /// Fail the next `n` sends with a retryable error.
        pub fn fail_next(&self, n: u32) {
            if let Ok(mut fails) = self.fail_times.lock() {
                *fails = n;
            }
        }
    }

    #[async_trait]
    impl DeliveryProvider for RecordingProvider {
        fn name(&self) -> &str {
            &self.name
        }

        fn validate(&self, _config: &ProviderConfig) -> Vec<String> {
            Vec::new()
        }

        async fn send(&self, decision: &Decision) -> SendResult {
            if let Ok(mut fails) = self.fail_times.lock() {
                if *fails > 0 {
                    *fails -= 1;
                    return SendResult {
                        ok: false,
                        retryable: true,
                        reason: Some("induced failure".to_string()),
                    };
                }
            }
            if let Ok(mut sent) = self.sent.lock() {
                sent.push(decision.clone());
            }
            SendResult::ok()
        }
    }
}

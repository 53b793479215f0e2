//! Webhook delivery provider - JSON POST of the decision
//!
//! Registered only when the `delivery_webhook` feature flag is on.
//! 5xx and transport errors are retryable; 4xx are not.

use async_trait::async_trait;
use tracing::debug;

use crate::config::defaults::WEBHOOK_TIMEOUT_SECS;
use crate::config::ProviderConfig;
use crate::types::Decision;

use super::{DeliveryProvider, SendResult};

#[derive(Debug)]
pub struct WebhookProvider {
    name: String,
    url: String,
    http: reqwest::Client,
}

impl WebhookProvider {
    pub fn new(name: &str, url: &str) -> Result<Self, String> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(WEBHOOK_TIMEOUT_SECS))
            .build()
            .map_err(|e| format!("failed to build HTTP client: {e}"))?;
        Ok(Self {
            name: name.to_string(),
            url: url.to_string(),
            http,
        })
    }
}

#[async_trait]
impl DeliveryProvider for WebhookProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn validate(&self, config: &ProviderConfig) -> Vec<String> {
        let mut errors = Vec::new();
        match &config.url {
            None => errors.push("webhook provider requires a url".to_string()),
            Some(url) if !url.starts_with("http://") && !url.starts_with("https://") => {
                errors.push(format!("webhook url '{url}' must be http(s)"));
            }
            _ => {}
        }
        errors
    }

    async fn send(&self, decision: &Decision) -> SendResult {
        let response = self.http.post(&self.url).json(decision).send().await;
        match response {
            Ok(resp) if resp.status().is_success() => {
                debug!(sink = %self.name, kill_id = decision.kill_id, "Webhook delivered");
                SendResult::ok()
            }
            Ok(resp) => {
                let status = resp.status();
                SendResult {
                    ok: false,
                    retryable: status.is_server_error(),
                    reason: Some(format!("webhook returned {status}")),
                }
            }
            Err(e) => SendResult {
                ok: false,
                retryable: true,
                reason: Some(format!("webhook transport error: {e}")),
            },
        }
    }
}

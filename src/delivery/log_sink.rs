//! Log delivery provider - structured tracing output, always available

use async_trait::async_trait;
use tracing::info;

use crate::config::ProviderConfig;
use crate::types::Decision;

use super::{DeliveryProvider, SendResult};

#[derive(Debug)]
pub struct LogProvider {
    name: String,
}

impl LogProvider {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

#[async_trait]
impl DeliveryProvider for LogProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn validate(&self, _config: &ProviderConfig) -> Vec<String> {
        Vec::new()
    }

    async fn send(&self, decision: &Decision) -> SendResult {
        info!(
            sink = %self.name,
            kill_id = decision.kill_id,
            profile = %decision.profile,
            tier = %decision.tier,
            interest = decision.interest,
            dominant = decision
                .dominant_category
                .map(|c| c.as_str())
                .unwrap_or("none"),
            digest_size = decision.digest_kill_ids.len(),
            "Decision delivered"
        );
        SendResult::ok()
    }
}

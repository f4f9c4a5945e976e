//! Discord webhook channel.

use async_trait::async_trait;
use pulse_core::error::{DeliveryError, DeliveryResult};
use pulse_core::traits::DeliveryChannel;
use pulse_core::types::Report;
use std::time::Duration;

use crate::classify;

pub const MAX_CONTENT_CHARS: usize = 2000;

pub struct DiscordChannel {
    webhook_url: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl DiscordChannel {
    pub fn new(webhook_url: &str, timeout_secs: u64) -> Self {
        Self {
            webhook_url: webhook_url.to_string(),
            timeout: Duration::from_secs(timeout_secs),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl DeliveryChannel for DiscordChannel {
    fn name(&self) -> &str {
        "discord"
    }

    async fn send(&self, report: &Report) -> DeliveryResult {
        if report.text.chars().count() > MAX_CONTENT_CHARS {
            return Err(DeliveryError::permanent(format!(
                "report exceeds Discord limit of {MAX_CONTENT_CHARS} characters"
            )));
        }

        let resp = self
            .client
            .post(&self.webhook_url)
            .json(&serde_json::json!({ "content": report.text }))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| classify::from_reqwest("discord", &e))?;

        let status = resp.status();
        if status.is_success() {
            tracing::info!("✅ Discord report sent");
            Ok(())
        } else {
            let body = resp.text().await.unwrap_or_default();
            Err(classify::from_status("discord", status, body.trim()))
        }
    }
}

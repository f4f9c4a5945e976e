//! Generic HTTP webhook channel — POST with JSON body.

use async_trait::async_trait;
use pulse_core::error::DeliveryResult;
use pulse_core::traits::DeliveryChannel;
use pulse_core::types::Report;
use std::time::Duration;

use crate::classify;

pub struct WebhookChannel {
    url: String,
    token: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl WebhookChannel {
    pub fn new(url: &str, token: &str, timeout_secs: u64) -> Self {
        Self {
            url: url.to_string(),
            token: token.to_string(),
            timeout: Duration::from_secs(timeout_secs),
            client: reqwest::Client::new(),
        }
    }

    fn payload(report: &Report) -> serde_json::Value {
        serde_json::json!({
            "text": report.text,
            "date": report.date.format("%Y-%m-%d").to_string(),
            "sync_status": report.sync_status.as_str(),
            "generated_at": report.generated_at.to_rfc3339(),
        })
    }
}

#[async_trait]
impl DeliveryChannel for WebhookChannel {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn send(&self, report: &Report) -> DeliveryResult {
        let mut req = self
            .client
            .post(&self.url)
            .json(&Self::payload(report))
            .timeout(self.timeout);
        if !self.token.is_empty() {
            req = req.bearer_auth(&self.token);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| classify::from_reqwest("webhook", &e))?;

        let status = resp.status();
        if status.is_success() {
            tracing::info!("✅ Webhook report sent to {}", self.url);
            Ok(())
        } else {
            Err(classify::from_status("webhook", status, ""))
        }
    }
}

//! Telegram Bot channel — report delivery via `sendMessage`.

use async_trait::async_trait;
use pulse_core::error::{DeliveryError, DeliveryResult};
use pulse_core::traits::DeliveryChannel;
use pulse_core::types::Report;
use serde::Deserialize;
use std::time::Duration;

use crate::classify;

/// Telegram rejects messages longer than this many characters.
pub const MAX_MESSAGE_CHARS: usize = 4096;

pub struct TelegramChannel {
    bot_token: String,
    chat_id: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl TelegramChannel {
    pub fn new(bot_token: &str, chat_id: &str, timeout_secs: u64) -> Self {
        Self {
            bot_token: bot_token.to_string(),
            chat_id: chat_id.to_string(),
            timeout: Duration::from_secs(timeout_secs),
            client: reqwest::Client::new(),
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!("https://api.telegram.org/bot{}/{}", self.bot_token, method)
    }

    /// Plain text payload; no parse_mode so report text needs no escaping.
    fn payload(&self, text: &str) -> serde_json::Value {
        serde_json::json!({
            "chat_id": self.chat_id,
            "text": text,
            "disable_web_page_preview": true,
        })
    }
}

#[async_trait]
impl DeliveryChannel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn send(&self, report: &Report) -> DeliveryResult {
        if report.text.chars().count() > MAX_MESSAGE_CHARS {
            return Err(DeliveryError::permanent(format!(
                "report exceeds Telegram limit of {MAX_MESSAGE_CHARS} characters"
            )));
        }

        let resp = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&self.payload(&report.text))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| classify::from_reqwest("telegram", &e))?;

        let status = resp.status();
        let body: Option<TelegramApiResponse> = resp.json().await.ok();
        let ok = body.as_ref().is_some_and(|b| b.ok);
        if status.is_success() && ok {
            tracing::info!("✅ Telegram report sent to chat {}", self.chat_id);
            return Ok(());
        }

        let detail = body.and_then(|b| b.description).unwrap_or_default();
        if status.is_success() {
            // 200 with ok=false: Telegram refused the payload itself.
            return Err(DeliveryError::permanent(format!(
                "telegram rejected message: {detail}"
            )));
        }
        Err(classify::from_status("telegram", status, &detail))
    }
}

#[derive(Debug, Deserialize)]
struct TelegramApiResponse {
    ok: bool,
    description: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};
    use pulse_core::error::DeliveryErrorKind;
    use pulse_core::types::SyncStatus;

    #[test]
    fn test_api_url_and_payload() {
        let ch = TelegramChannel::new("123:abc", "-1001", 10);
        assert_eq!(
            ch.api_url("sendMessage"),
            "https://api.telegram.org/bot123:abc/sendMessage"
        );
        let p = ch.payload("hello");
        assert_eq!(p["chat_id"], "-1001");
        assert_eq!(p["text"], "hello");
        assert!(p.get("parse_mode").is_none());
    }

    #[tokio::test]
    async fn test_oversized_report_is_permanent() {
        let ch = TelegramChannel::new("123:abc", "-1001", 1);
        let report = Report {
            date: NaiveDate::from_ymd_opt(2026, 10, 16).unwrap(),
            generated_at: Utc::now(),
            sync_status: SyncStatus::Fresh,
            text: "x".repeat(MAX_MESSAGE_CHARS + 1),
        };
        let err = ch.send(&report).await.unwrap_err();
        assert_eq!(err.kind, DeliveryErrorKind::Permanent);
    }

    #[test]
    fn test_api_response_parse() {
        let r: TelegramApiResponse =
            serde_json::from_str(r#"{"ok":false,"error_code":400,"description":"Bad Request: chat not found"}"#)
                .unwrap();
        assert!(!r.ok);
        assert_eq!(r.description.as_deref(), Some("Bad Request: chat not found"));
    }
}

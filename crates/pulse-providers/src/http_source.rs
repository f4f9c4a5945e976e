//! HTTP metrics source.
//!
//! `GET {base_url}/metrics?date=YYYY-MM-DD` with an optional bearer token,
//! answering a JSON body shaped like `SourceMetrics`. Only responses that
//! parse and pass `SourceMetrics::verify` are handed back; everything else is a
//! `SourceError` the sync layer can classify.

use async_trait::async_trait;
use chrono::NaiveDate;
use pulse_core::config::SourceConfig;
use pulse_core::error::SourceError;
use pulse_core::traits::MetricsSource;
use pulse_core::types::SourceMetrics;
use std::time::Duration;

pub struct HttpMetricsSource {
    base_url: String,
    api_token: String,
    timeout_secs: u64,
    client: reqwest::Client,
}

impl HttpMetricsSource {
    pub fn new(base_url: &str, api_token: &str, timeout_secs: u64) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token: api_token.to_string(),
            timeout_secs,
            client: reqwest::Client::new(),
        }
    }

    pub fn from_config(config: &SourceConfig) -> Self {
        Self::new(&config.base_url, &config.api_token, config.timeout_secs)
    }

    fn metrics_url(&self) -> String {
        format!("{}/metrics", self.base_url)
    }

    fn map_error(&self, e: reqwest::Error) -> SourceError {
        if e.is_timeout() {
            SourceError::Timeout(self.timeout_secs)
        } else if e.is_decode() {
            SourceError::Malformed(e.to_string())
        } else if let Some(status) = e.status() {
            SourceError::Status(status.as_u16())
        } else {
            SourceError::Unreachable(e.to_string())
        }
    }
}

#[async_trait]
impl MetricsSource for HttpMetricsSource {
    fn name(&self) -> &str {
        "http"
    }

    async fn fetch(&self, date: NaiveDate) -> Result<SourceMetrics, SourceError> {
        let mut req = self
            .client
            .get(self.metrics_url())
            .query(&[("date", date.format("%Y-%m-%d").to_string())])
            .timeout(Duration::from_secs(self.timeout_secs));
        if !self.api_token.is_empty() {
            req = req.bearer_auth(&self.api_token);
        }

        let resp = req.send().await.map_err(|e| self.map_error(e))?;
        let status = resp.status();
        if !status.is_success() {
            tracing::warn!("⚠️ Metrics API returned {status} for {date}");
            return Err(SourceError::Status(status.as_u16()));
        }

        let metrics: SourceMetrics = resp.json().await.map_err(|e| self.map_error(e))?;
        metrics.verify()?;
        tracing::debug!("📥 Metrics fetched for {date}: total={:?}", metrics.total);
        Ok(metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_trailing_slash() {
        let src = HttpMetricsSource::new("https://ops.example.com/api/", "", 5);
        assert_eq!(src.metrics_url(), "https://ops.example.com/api/metrics");
    }

    #[tokio::test]
    async fn test_unreachable_is_transient() {
        // Nothing listens on the discard port locally.
        let src = HttpMetricsSource::new("http://127.0.0.1:9", "", 2);
        let date = NaiveDate::from_ymd_opt(2026, 10, 16).unwrap();
        let err = src.fetch(date).await.unwrap_err();
        assert!(err.is_transient(), "unexpected error: {err:?}");
    }
}

//! Collaborator traits — implemented by the providers and channels crates.

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::{DeliveryResult, SourceError};
use crate::types::{Report, SourceMetrics};

/// Upstream provider of per-date work-item figures.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    fn name(&self) -> &str;

    /// Fetch figures for `date` (today or any historical date).
    async fn fetch(&self, date: NaiveDate) -> Result<SourceMetrics, SourceError>;
}

/// Outbound messaging endpoint for finished reports.
/// The only place allowed to perform delivery I/O.
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, report: &Report) -> DeliveryResult;
}

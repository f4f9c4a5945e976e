//! Sync → build → deliver.
//!
//! The pipeline never touches the dispatch guard; the engine owns slot
//! bookkeeping and forced sends bypass it entirely.

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use pulse_core::error::{DeliveryError, DeliveryResult};
use pulse_core::traits::DeliveryChannel;
use pulse_core::types::{DispatchSlot, Report, SyncResult};
use std::sync::Arc;
use std::time::Duration;

use crate::persistence::{DeliveryRecord, StateDb};
use crate::report::ReportBuilder;
use crate::sync::SyncService;

/// Why a cycle is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    Scheduled,
    /// Operator-triggered, no slot eligibility check.
    Forced,
}

impl DispatchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchMode::Scheduled => "scheduled",
            DispatchMode::Forced => "forced",
        }
    }
}

/// What one full cycle did.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub slot: Option<DispatchSlot>,
    pub sync: SyncResult,
    pub report: Report,
    pub attempts: u32,
    pub result: DeliveryResult,
}

/// Refresh (unless skipped) and render the report for `date`.
pub async fn build_report(
    sync: &mut SyncService,
    builder: &ReportBuilder,
    date: NaiveDate,
    now: DateTime<Utc>,
    skip_sync: bool,
) -> (SyncResult, Report) {
    let result = if skip_sync {
        tracing::info!("⏭️ Sync skipped, using cached data for {date}");
        sync.cached(date, now)
    } else {
        sync.sync(date, now, false).await
    };
    let snapshot = sync.snapshot(date, now, &result);
    let report = builder.build(&snapshot, &result);
    (result, report)
}

pub struct Pipeline {
    sync: SyncService,
    builder: ReportBuilder,
    channel: Box<dyn DeliveryChannel>,
    state: Arc<StateDb>,
    offset: FixedOffset,
    send_timeout: Duration,
    retry_backoff: Duration,
    skip_sync: bool,
}

impl Pipeline {
    pub fn new(
        sync: SyncService,
        channel: Box<dyn DeliveryChannel>,
        state: Arc<StateDb>,
        offset: FixedOffset,
    ) -> Self {
        Self {
            sync,
            builder: ReportBuilder::new(offset),
            channel,
            state,
            offset,
            send_timeout: Duration::from_secs(30),
            retry_backoff: Duration::from_secs(5),
            skip_sync: false,
        }
    }

    /// Upper bound on a single `send` call, whatever the adapter does.
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn with_skip_sync(mut self, skip: bool) -> Self {
        self.skip_sync = skip;
        self
    }

    pub fn channel_name(&self) -> &str {
        self.channel.name()
    }

    /// Run one full cycle. The report date is the slot's date, or today in
    /// the operating timezone for forced sends.
    pub async fn run_cycle(
        &mut self,
        slot: Option<DispatchSlot>,
        now: DateTime<Utc>,
        mode: DispatchMode,
    ) -> CycleReport {
        let date = slot
            .map(|s| s.date())
            .unwrap_or_else(|| now.with_timezone(&self.offset).date_naive());
        let (sync, report) =
            build_report(&mut self.sync, &self.builder, date, now, self.skip_sync).await;

        let (attempts, result) = self.deliver_with_retry(&report).await;
        self.record(slot, mode, attempts, &result, now);

        CycleReport {
            slot,
            sync,
            report,
            attempts,
            result,
        }
    }

    /// One attempt, plus a single retry after a backoff when the failure is
    /// transient. Permanent failures return immediately.
    async fn deliver_with_retry(&self, report: &Report) -> (u32, DeliveryResult) {
        let mut attempts = 1;
        let mut result = self.send_once(report).await;
        if let Err(e) = &result
            && e.is_transient() {
                tracing::warn!(
                    "⚠️ {} delivery failed ({e}), retrying in {}s",
                    self.channel.name(),
                    self.retry_backoff.as_secs()
                );
                tokio::time::sleep(self.retry_backoff).await;
                attempts += 1;
                result = self.send_once(report).await;
            }
        (attempts, result)
    }

    async fn send_once(&self, report: &Report) -> DeliveryResult {
        match tokio::time::timeout(self.send_timeout, self.channel.send(report)).await {
            Ok(result) => result,
            Err(_) => Err(DeliveryError::transient(format!(
                "{} send timed out after {}s",
                self.channel.name(),
                self.send_timeout.as_secs()
            ))),
        }
    }

    fn record(
        &self,
        slot: Option<DispatchSlot>,
        mode: DispatchMode,
        attempts: u32,
        result: &DeliveryResult,
        now: DateTime<Utc>,
    ) {
        let (status, error_kind, message) = match result {
            Ok(()) => ("sent", None, None),
            Err(e) => (
                "failed",
                Some(e.kind.as_str().to_string()),
                Some(e.message.clone()),
            ),
        };
        let record = DeliveryRecord {
            slot: slot.map(|s| s.key()),
            mode: mode.as_str().to_string(),
            channel: self.channel.name().to_string(),
            status: status.to_string(),
            error_kind,
            message,
            attempts,
            created_at: now,
        };
        if let Err(e) = self.state.record_delivery(&record) {
            tracing::warn!("⚠️ Failed to record delivery: {e}");
        }
    }
}

//! Sync service — keeps a verified copy of the upstream figures per date.
//!
//! The in-memory cache is written through to `metrics_cache`, so the stale
//! fallback (and `--skip-sync`) still work right after a restart. The cache
//! is only replaced after a fetch that completes within the timeout and
//! passes `SourceMetrics::verify`.

use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use pulse_core::error::{SourceError, SyncFailure};
use pulse_core::traits::MetricsSource;
use pulse_core::types::{MetricsSnapshot, SourceMetrics, SyncResult, SyncStatus};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::persistence::StateDb;

/// Dates older than this are dropped from memory and disk.
const CACHE_RETENTION_DAYS: i64 = 7;

#[derive(Debug, Clone)]
struct CachedMetrics {
    metrics: SourceMetrics,
    synced_at: DateTime<Utc>,
}

pub struct SyncService {
    source: Box<dyn MetricsSource>,
    state: Arc<StateDb>,
    cache: HashMap<NaiveDate, CachedMetrics>,
    freshness: Duration,
    timeout: Duration,
}

impl SyncService {
    pub fn new(
        source: Box<dyn MetricsSource>,
        state: Arc<StateDb>,
        freshness: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            source,
            state,
            cache: HashMap::new(),
            freshness,
            timeout,
        }
    }

    /// Refresh figures for `date`. Never fails: upstream problems are
    /// reported through the returned status.
    pub async fn sync(&mut self, date: NaiveDate, now: DateTime<Utc>, force: bool) -> SyncResult {
        self.warm(date);

        if !force
            && let Some(cached) = self.cache.get(&date)
            && self.is_fresh(cached.synced_at, now) {
                tracing::debug!(
                    "♻️ Reusing cached metrics for {date} (synced {})",
                    cached.synced_at.format("%H:%M:%S")
                );
                return SyncResult {
                    status: SyncStatus::Fresh,
                    last_synced_at: Some(cached.synced_at),
                    failure: None,
                };
            }

        let fetched = match tokio::time::timeout(self.timeout, self.source.fetch(date)).await {
            Ok(Ok(metrics)) => metrics.verify().map(|_| metrics),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(SourceError::Timeout(self.timeout.as_secs())),
        };

        match fetched {
            Ok(metrics) => {
                self.store(date, metrics, now);
                tracing::info!("🔄 Metrics synced for {date} from {}", self.source.name());
                SyncResult {
                    status: SyncStatus::Fresh,
                    last_synced_at: Some(now),
                    failure: None,
                }
            }
            Err(e) => self.fallback(date, e),
        }
    }

    /// Status of the cached copy without contacting upstream.
    pub fn cached(&mut self, date: NaiveDate, now: DateTime<Utc>) -> SyncResult {
        self.warm(date);
        match self.cache.get(&date) {
            Some(c) => SyncResult {
                status: if self.is_fresh(c.synced_at, now) {
                    SyncStatus::Fresh
                } else {
                    SyncStatus::Stale
                },
                last_synced_at: Some(c.synced_at),
                failure: None,
            },
            None => SyncResult {
                status: SyncStatus::Unavailable,
                last_synced_at: None,
                failure: None,
            },
        }
    }

    /// Build the immutable snapshot for a report from the current cache.
    pub fn snapshot(&self, date: NaiveDate, now: DateTime<Utc>, result: &SyncResult) -> MetricsSnapshot {
        let metrics = match result.status {
            SyncStatus::Unavailable => None,
            SyncStatus::Fresh | SyncStatus::Stale => self.cache.get(&date).map(|c| &c.metrics),
        };
        MetricsSnapshot::from_source(date, now, metrics, result.status)
    }

    fn is_fresh(&self, synced_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match ChronoDuration::from_std(self.freshness) {
            Ok(window) => now - synced_at < window,
            Err(_) => false,
        }
    }

    fn fallback(&self, date: NaiveDate, error: SourceError) -> SyncResult {
        let kind = if error.is_transient() { "transient" } else { "permanent" };
        match self.cache.get(&date) {
            Some(cached) => {
                tracing::warn!(
                    stage = "sync",
                    kind,
                    "⚠️ Sync from {} failed for {date}, reusing data from {}: {error}",
                    self.source.name(),
                    cached.synced_at.format("%H:%M:%S")
                );
                SyncResult {
                    status: SyncStatus::Stale,
                    last_synced_at: Some(cached.synced_at),
                    failure: Some(SyncFailure::Transient(error)),
                }
            }
            None => {
                tracing::warn!(
                    stage = "sync",
                    kind,
                    "⚠️ Sync from {} failed for {date} and nothing is cached: {error}",
                    self.source.name()
                );
                SyncResult {
                    status: SyncStatus::Unavailable,
                    last_synced_at: None,
                    failure: Some(SyncFailure::Unavailable(error)),
                }
            }
        }
    }

    /// Load the persisted copy for `date` if memory has none.
    fn warm(&mut self, date: NaiveDate) {
        if self.cache.contains_key(&date) {
            return;
        }
        match self.state.load_metrics(date) {
            Ok(Some((metrics, synced_at))) => {
                self.cache.insert(date, CachedMetrics { metrics, synced_at });
            }
            Ok(None) => {}
            Err(e) => tracing::warn!("⚠️ Failed to load cached metrics for {date}: {e}"),
        }
    }

    fn store(&mut self, date: NaiveDate, metrics: SourceMetrics, now: DateTime<Utc>) {
        if let Err(e) = self.state.save_metrics(date, &metrics, now) {
            tracing::warn!("⚠️ Failed to persist metrics for {date}: {e}");
        }
        self.cache.insert(
            date,
            CachedMetrics {
                metrics,
                synced_at: now,
            },
        );

        let keep_from = date - ChronoDuration::days(CACHE_RETENTION_DAYS);
        self.cache.retain(|d, _| *d >= keep_from);
        if let Err(e) = self.state.prune_metrics(keep_from) {
            tracing::debug!("Failed to prune metrics cache: {e}");
        }
    }
}

//! Report builder — renders a snapshot into the fixed digest layout.
//!
//! Pure and total: no I/O, and every well-typed snapshot renders.
//!
//! ```text
//! 📊 Dispatch report 2026-10-16 09:00
//! Total items: 120
//! Attempted: 100
//! Delivered: 95
//! Failed: 3
//! Recovered: 2
//! Success rate: 95.0%
//! Best performer: amy (99.4%)
//! Weekly efficiency: 87.3%
//! 🟢 Sync status: fresh, data synced at 08:59
//! ```

use chrono::{DateTime, FixedOffset, Utc};
use pulse_core::types::{MetricsSnapshot, Report, SyncResult, SyncStatus};

/// Rendered in place of values the source did not provide.
pub const PLACEHOLDER: &str = "N/A";

pub struct ReportBuilder {
    offset: FixedOffset,
}

impl ReportBuilder {
    /// `offset` is the operating timezone used for the header and sync times.
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    pub fn build(&self, snapshot: &MetricsSnapshot, sync: &SyncResult) -> Report {
        let lines = [
            self.header(snapshot),
            format!("Total items: {}", count(snapshot.total)),
            format!("Attempted: {}", count(snapshot.attempted)),
            format!("Delivered: {}", count(snapshot.delivered)),
            format!("Failed: {}", count(snapshot.failed)),
            format!("Recovered: {}", count(snapshot.recovered)),
            format!("Success rate: {}", percent(snapshot.success_rate)),
            match &snapshot.best_performer {
                Some(p) => format!("Best performer: {} ({})", p.id, percent(Some(p.rate))),
                None => format!("Best performer: {PLACEHOLDER}"),
            },
            format!("Weekly efficiency: {}", percent(snapshot.weekly_efficiency)),
            self.sync_line(snapshot, sync),
        ];

        Report {
            date: snapshot.date,
            generated_at: snapshot.taken_at,
            sync_status: snapshot.sync_status,
            text: lines.join("\n"),
        }
    }

    fn local(&self, t: DateTime<Utc>) -> DateTime<FixedOffset> {
        t.with_timezone(&self.offset)
    }

    fn header(&self, snapshot: &MetricsSnapshot) -> String {
        let taken = self.local(snapshot.taken_at);
        if taken.date_naive() == snapshot.date {
            format!("📊 Dispatch report {}", taken.format("%Y-%m-%d %H:%M"))
        } else {
            format!(
                "📊 Dispatch report {} (generated {})",
                snapshot.date.format("%Y-%m-%d"),
                taken.format("%Y-%m-%d %H:%M")
            )
        }
    }

    /// Exactly one line, one of three fixed forms.
    fn sync_line(&self, snapshot: &MetricsSnapshot, sync: &SyncResult) -> String {
        match snapshot.sync_status {
            SyncStatus::Fresh => match sync.last_synced_at {
                Some(at) => format!(
                    "🟢 Sync status: fresh, data synced at {}",
                    self.local(at).format("%H:%M")
                ),
                None => "🟢 Sync status: fresh".to_string(),
            },
            SyncStatus::Stale => match sync.last_synced_at {
                Some(at) => {
                    let age = (snapshot.taken_at - at).num_minutes().max(0);
                    format!(
                        "🟡 Sync status: stale, showing data from {} ({age} min old)",
                        self.local(at).format("%H:%M")
                    )
                }
                None => "🟡 Sync status: stale, showing previously cached data".to_string(),
            },
            SyncStatus::Unavailable => {
                "🔴 Sync status: unavailable, live data could not be loaded".to_string()
            }
        }
    }
}

fn count(v: Option<u64>) -> String {
    v.map(|n| n.to_string())
        .unwrap_or_else(|| PLACEHOLDER.to_string())
}

fn percent(v: Option<f64>) -> String {
    match v {
        Some(p) if p.is_finite() => format!("{p:.1}%"),
        _ => PLACEHOLDER.to_string(),
    }
}

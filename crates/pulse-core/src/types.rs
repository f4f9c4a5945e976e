//! Metrics data model shared across crates.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{SourceError, SyncFailure};

/// Raw per-date figures as returned by the upstream provider.
/// Every field is optional: "no data" is not the same as zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceMetrics {
    #[serde(default)]
    pub total: Option<u64>,
    #[serde(default)]
    pub attempted: Option<u64>,
    #[serde(default)]
    pub delivered: Option<u64>,
    #[serde(default)]
    pub failed: Option<u64>,
    #[serde(default)]
    pub recovered: Option<u64>,
    #[serde(default)]
    pub performers: Vec<Performer>,
    /// Rolling 7-day efficiency, 0..=100.
    #[serde(default)]
    pub weekly_efficiency: Option<f64>,
}

impl SourceMetrics {
    /// Reject internally inconsistent payloads so they never replace a good cache.
    pub fn verify(&self) -> Result<(), SourceError> {
        if let Some(total) = self.total {
            let parts = [
                ("attempted", self.attempted),
                ("delivered", self.delivered),
                ("failed", self.failed),
                ("recovered", self.recovered),
            ];
            for (name, value) in parts {
                if let Some(v) = value
                    && v > total {
                        return Err(SourceError::Malformed(format!(
                            "{name} ({v}) exceeds total ({total})"
                        )));
                    }
            }
        }
        for p in &self.performers {
            if !(0.0..=100.0).contains(&p.rate) {
                return Err(SourceError::Malformed(format!(
                    "performer '{}' rate out of range: {}",
                    p.id, p.rate
                )));
            }
        }
        if let Some(eff) = self.weekly_efficiency
            && !(0.0..=100.0).contains(&eff) {
                return Err(SourceError::Malformed(format!(
                    "weekly efficiency out of range: {eff}"
                )));
            }
        Ok(())
    }
}

/// A courier/driver (or team) with its success rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Performer {
    pub id: String,
    /// Success rate, 0..=100.
    pub rate: f64,
}

/// Freshness of the data a snapshot was built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Fresh,
    Stale,
    Unavailable,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Fresh => "fresh",
            SyncStatus::Stale => "stale",
            SyncStatus::Unavailable => "unavailable",
        }
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a sync attempt achieved.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncResult {
    pub status: SyncStatus,
    /// Time of the last verified sync for the requested date, if any.
    pub last_synced_at: Option<DateTime<Utc>>,
    /// Set when this attempt hit the upstream and failed.
    pub failure: Option<SyncFailure>,
}

/// Immutable point-in-time view of the metrics used for one report.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsSnapshot {
    pub taken_at: DateTime<Utc>,
    pub date: NaiveDate,
    pub total: Option<u64>,
    pub attempted: Option<u64>,
    pub delivered: Option<u64>,
    pub failed: Option<u64>,
    pub recovered: Option<u64>,
    /// Delivered / attempted, percent, one decimal.
    pub success_rate: Option<f64>,
    pub best_performer: Option<Performer>,
    pub weekly_efficiency: Option<f64>,
    pub sync_status: SyncStatus,
}

impl MetricsSnapshot {
    /// Build a snapshot from source figures. `None` yields an all-missing
    /// snapshot (nothing was ever synced for the date).
    pub fn from_source(
        date: NaiveDate,
        taken_at: DateTime<Utc>,
        metrics: Option<&SourceMetrics>,
        sync_status: SyncStatus,
    ) -> Self {
        let Some(m) = metrics else {
            return Self::missing(date, taken_at, sync_status);
        };
        let success_rate = match (m.delivered, m.attempted) {
            (Some(delivered), Some(attempted)) if attempted > 0 => {
                Some(round1(delivered as f64 * 100.0 / attempted as f64))
            }
            _ => None,
        };
        Self {
            taken_at,
            date,
            total: m.total,
            attempted: m.attempted,
            delivered: m.delivered,
            failed: m.failed,
            recovered: m.recovered,
            success_rate,
            best_performer: best_performer(&m.performers),
            weekly_efficiency: m.weekly_efficiency.map(round1),
            sync_status,
        }
    }

    pub fn missing(date: NaiveDate, taken_at: DateTime<Utc>, sync_status: SyncStatus) -> Self {
        Self {
            taken_at,
            date,
            total: None,
            attempted: None,
            delivered: None,
            failed: None,
            recovered: None,
            success_rate: None,
            best_performer: None,
            weekly_efficiency: None,
            sync_status,
        }
    }
}

/// Highest rate wins; ties go to the smaller identifier.
fn best_performer(performers: &[Performer]) -> Option<Performer> {
    performers
        .iter()
        .filter(|p| p.rate.is_finite())
        .max_by(|a, b| {
            a.rate
                .total_cmp(&b.rate)
                .then_with(|| b.id.cmp(&a.id))
        })
        .map(|p| Performer {
            id: p.id.clone(),
            rate: round1(p.rate),
        })
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

/// A discrete dispatch bucket, identified by its local start time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DispatchSlot {
    pub start: NaiveDateTime,
}

impl DispatchSlot {
    pub fn new(start: NaiveDateTime) -> Self {
        Self { start }
    }

    pub fn date(&self) -> NaiveDate {
        self.start.date()
    }

    /// Stable identity used as the persistence key, e.g. `2026-10-16T09:00`.
    pub fn key(&self) -> String {
        self.start.format("%Y-%m-%dT%H:%M").to_string()
    }
}

impl std::fmt::Display for DispatchSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.key())
    }
}

/// Rendered report text, built from exactly one snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub date: NaiveDate,
    pub generated_at: DateTime<Utc>,
    pub sync_status: SyncStatus,
    pub text: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 16).unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 16, 9, 0, 0).unwrap()
    }

    #[test]
    fn test_success_rate_one_decimal() {
        let m = SourceMetrics {
            attempted: Some(161),
            delivered: Some(160),
            ..Default::default()
        };
        let snap = MetricsSnapshot::from_source(date(), now(), Some(&m), SyncStatus::Fresh);
        assert_eq!(snap.success_rate, Some(99.4));
    }

    #[test]
    fn test_zero_attempts_has_no_rate() {
        let m = SourceMetrics {
            total: Some(0),
            attempted: Some(0),
            delivered: Some(0),
            ..Default::default()
        };
        let snap = MetricsSnapshot::from_source(date(), now(), Some(&m), SyncStatus::Fresh);
        assert_eq!(snap.total, Some(0));
        assert_eq!(snap.success_rate, None);
    }

    #[test]
    fn test_best_performer_tie_break() {
        let m = SourceMetrics {
            performers: vec![
                Performer { id: "zed".into(), rate: 98.0 },
                Performer { id: "amy".into(), rate: 98.0 },
                Performer { id: "bob".into(), rate: 91.25 },
            ],
            ..Default::default()
        };
        let snap = MetricsSnapshot::from_source(date(), now(), Some(&m), SyncStatus::Fresh);
        assert_eq!(snap.best_performer.unwrap().id, "amy");
    }

    #[test]
    fn test_missing_snapshot() {
        let snap = MetricsSnapshot::from_source(date(), now(), None, SyncStatus::Unavailable);
        assert_eq!(snap.total, None);
        assert_eq!(snap.best_performer, None);
        assert_eq!(snap.sync_status, SyncStatus::Unavailable);
    }

    #[test]
    fn test_verify_accepts_consistent() {
        let m = SourceMetrics {
            total: Some(10),
            attempted: Some(9),
            delivered: Some(8),
            failed: Some(1),
            recovered: Some(0),
            performers: vec![Performer { id: "d-7".into(), rate: 100.0 }],
            weekly_efficiency: Some(88.5),
        };
        assert!(m.verify().is_ok());
        assert!(SourceMetrics::default().verify().is_ok());
    }

    #[test]
    fn test_verify_rejects_inconsistent() {
        let m = SourceMetrics {
            total: Some(5),
            delivered: Some(6),
            ..Default::default()
        };
        assert!(matches!(m.verify(), Err(SourceError::Malformed(_))));

        let m = SourceMetrics {
            performers: vec![Performer { id: "x".into(), rate: 140.0 }],
            ..Default::default()
        };
        assert!(m.verify().is_err());

        let m = SourceMetrics {
            weekly_efficiency: Some(-1.0),
            ..Default::default()
        };
        assert!(m.verify().is_err());
    }

    #[test]
    fn test_slot_key() {
        let slot = DispatchSlot::new(date().and_hms_opt(9, 0, 0).unwrap());
        assert_eq!(slot.key(), "2026-10-16T09:00");
        assert_eq!(slot.date(), date());
    }

    #[test]
    fn test_source_metrics_partial_json() {
        let m: SourceMetrics = serde_json::from_str(r#"{"total": 12, "performers": []}"#).unwrap();
        assert_eq!(m.total, Some(12));
        assert_eq!(m.delivered, None);
    }
}

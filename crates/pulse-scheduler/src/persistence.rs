//! SQLite-backed state for the engine — survives restarts.
//!
//! Three tables:
//! - `served_slots`: the only fact needed for at-most-once dispatch
//! - `metrics_cache`: last verified upstream figures per report date
//! - `delivery_log`: one row per delivery attempt chain

use chrono::{DateTime, NaiveDate, Utc};
use pulse_core::error::{PulseError, Result};
use pulse_core::types::SourceMetrics;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// One delivery attempt chain (first try plus optional retry).
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryRecord {
    /// Slot key, `None` for forced sends.
    pub slot: Option<String>,
    /// "scheduled" or "forced".
    pub mode: String,
    pub channel: String,
    /// "sent" or "failed".
    pub status: String,
    pub error_kind: Option<String>,
    pub message: Option<String>,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
}

/// Persistent state shared by the guard, the sync cache and the delivery log.
pub struct StateDb {
    conn: Mutex<rusqlite::Connection>,
}

fn db_err(context: &str, e: rusqlite::Error) -> PulseError {
    PulseError::State(format!("{context}: {e}"))
}

fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

impl StateDb {
    /// Open or create the state database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        let conn = rusqlite::Connection::open(path).map_err(|e| db_err("DB open", e))?;
        let db = Self { conn: Mutex::new(conn) };
        db.migrate()?;
        tracing::debug!("🗄️ State DB ready at {}", path.display());
        Ok(db)
    }

    /// Throwaway database for tests and previews.
    pub fn open_in_memory() -> Result<Self> {
        let conn = rusqlite::Connection::open_in_memory().map_err(|e| db_err("DB open", e))?;
        let db = Self { conn: Mutex::new(conn) };
        db.migrate()?;
        Ok(db)
    }

    fn conn(&self) -> Result<MutexGuard<'_, rusqlite::Connection>> {
        self.conn
            .lock()
            .map_err(|_| PulseError::State("state DB lock poisoned".into()))
    }

    fn migrate(&self) -> Result<()> {
        self.conn()?
            .execute_batch(
                "
            CREATE TABLE IF NOT EXISTS served_slots (
                slot TEXT PRIMARY KEY,           -- e.g. 2026-10-16T09:00 (local)
                channel TEXT NOT NULL,
                served_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS metrics_cache (
                date TEXT PRIMARY KEY,           -- report date, YYYY-MM-DD
                payload TEXT NOT NULL,           -- JSON SourceMetrics
                synced_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS delivery_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                slot TEXT,
                mode TEXT NOT NULL,              -- 'scheduled', 'forced'
                channel TEXT NOT NULL,
                status TEXT NOT NULL,            -- 'sent', 'failed'
                error_kind TEXT,                 -- 'transient', 'permanent'
                message TEXT,
                attempts INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL
            );
         ",
            )
            .map_err(|e| db_err("Migration", e))
    }

    // ─── Served slots ─────────────────────────────────────────

    pub fn is_served(&self, slot_key: &str) -> Result<bool> {
        let conn = self.conn()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM served_slots WHERE slot = ?1",
                [slot_key],
                |r| r.get(0),
            )
            .map_err(|e| db_err("Check slot", e))?;
        Ok(count > 0)
    }

    /// Record a slot as served. Idempotent.
    pub fn mark_served(&self, slot_key: &str, channel: &str, at: DateTime<Utc>) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT OR IGNORE INTO served_slots (slot, channel, served_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![slot_key, channel, at.to_rfc3339()],
            )
            .map_err(|e| db_err("Mark slot", e))?;
        Ok(())
    }

    /// Most recently served slot key and when it was served.
    pub fn last_served(&self) -> Result<Option<(String, DateTime<Utc>)>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT slot, served_at FROM served_slots ORDER BY slot DESC LIMIT 1")
            .map_err(|e| db_err("Last slot", e))?;
        let mut rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(|e| db_err("Last slot", e))?;
        match rows.next() {
            Some(row) => {
                let (slot, at) = row.map_err(|e| db_err("Last slot", e))?;
                Ok(parse_ts(&at).map(|at| (slot, at)))
            }
            None => Ok(None),
        }
    }

    // ─── Metrics cache ────────────────────────────────────────

    pub fn save_metrics(
        &self,
        date: NaiveDate,
        metrics: &SourceMetrics,
        synced_at: DateTime<Utc>,
    ) -> Result<()> {
        let payload = serde_json::to_string(metrics)?;
        self.conn()?
            .execute(
                "INSERT OR REPLACE INTO metrics_cache (date, payload, synced_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![
                    date.format("%Y-%m-%d").to_string(),
                    payload,
                    synced_at.to_rfc3339()
                ],
            )
            .map_err(|e| db_err("Save metrics", e))?;
        Ok(())
    }

    pub fn load_metrics(&self, date: NaiveDate) -> Result<Option<(SourceMetrics, DateTime<Utc>)>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT payload, synced_at FROM metrics_cache WHERE date = ?1")
            .map_err(|e| db_err("Load metrics", e))?;
        let mut rows = stmt
            .query_map([date.format("%Y-%m-%d").to_string()], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(|e| db_err("Load metrics", e))?;
        let Some(row) = rows.next() else {
            return Ok(None);
        };
        let (payload, synced_at) = row.map_err(|e| db_err("Load metrics", e))?;
        let metrics: SourceMetrics = serde_json::from_str(&payload)?;
        Ok(parse_ts(&synced_at).map(|at| (metrics, at)))
    }

    /// Time of the most recent verified sync, any date.
    pub fn last_sync(&self) -> Result<Option<DateTime<Utc>>> {
        let conn = self.conn()?;
        let latest: Option<String> = conn
            .query_row("SELECT MAX(synced_at) FROM metrics_cache", [], |r| r.get(0))
            .map_err(|e| db_err("Last sync", e))?;
        Ok(latest.as_deref().and_then(parse_ts))
    }

    /// Drop cached figures for dates before `keep_from`.
    pub fn prune_metrics(&self, keep_from: NaiveDate) -> Result<usize> {
        self.conn()?
            .execute(
                "DELETE FROM metrics_cache WHERE date < ?1",
                [keep_from.format("%Y-%m-%d").to_string()],
            )
            .map_err(|e| db_err("Prune metrics", e))
    }

    // ─── Delivery log ─────────────────────────────────────────

    pub fn record_delivery(&self, record: &DeliveryRecord) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT INTO delivery_log
                 (slot, mode, channel, status, error_kind, message, attempts, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    record.slot,
                    record.mode,
                    record.channel,
                    record.status,
                    record.error_kind,
                    record.message,
                    record.attempts,
                    record.created_at.to_rfc3339(),
                ],
            )
            .map_err(|e| db_err("Record delivery", e))?;
        Ok(())
    }

    /// Most recent delivery records, newest first.
    pub fn recent_deliveries(&self, limit: usize) -> Result<Vec<DeliveryRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT slot, mode, channel, status, error_kind, message, attempts, created_at
                 FROM delivery_log ORDER BY id DESC LIMIT ?1",
            )
            .map_err(|e| db_err("Recent deliveries", e))?;
        let rows = stmt
            .query_map([limit as i64], |row| {
                let created_at: String = row.get(7)?;
                Ok(DeliveryRecord {
                    slot: row.get(0)?,
                    mode: row.get(1)?,
                    channel: row.get(2)?,
                    status: row.get(3)?,
                    error_kind: row.get(4)?,
                    message: row.get(5)?,
                    attempts: row.get(6)?,
                    created_at: parse_ts(&created_at).unwrap_or_else(Utc::now),
                })
            })
            .map_err(|e| db_err("Recent deliveries", e))?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| db_err("Recent deliveries", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 16, h, m, 0).unwrap()
    }

    #[test]
    fn test_open_and_migrate() {
        let dir = std::env::temp_dir().join("pulse-state-db-test");
        std::fs::remove_dir_all(&dir).ok();
        let db = StateDb::open(&dir.join("state.db")).unwrap();
        assert!(db.last_served().unwrap().is_none());
        assert!(db.last_sync().unwrap().is_none());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_served_slots() {
        let db = StateDb::open_in_memory().unwrap();
        assert!(!db.is_served("2026-10-16T09:00").unwrap());
        db.mark_served("2026-10-16T09:00", "telegram", ts(9, 0)).unwrap();
        db.mark_served("2026-10-16T09:00", "telegram", ts(9, 1)).unwrap();
        db.mark_served("2026-10-16T10:00", "telegram", ts(10, 0)).unwrap();
        assert!(db.is_served("2026-10-16T09:00").unwrap());
        let (slot, at) = db.last_served().unwrap().unwrap();
        assert_eq!(slot, "2026-10-16T10:00");
        assert_eq!(at, ts(10, 0));
    }

    #[test]
    fn test_metrics_cache_roundtrip_and_prune() {
        let db = StateDb::open_in_memory().unwrap();
        let d1 = NaiveDate::from_ymd_opt(2026, 10, 15).unwrap();
        let d2 = NaiveDate::from_ymd_opt(2026, 10, 16).unwrap();
        let m = SourceMetrics {
            total: Some(42),
            ..Default::default()
        };
        db.save_metrics(d1, &m, ts(8, 0)).unwrap();
        db.save_metrics(d2, &m, ts(9, 0)).unwrap();

        let (loaded, at) = db.load_metrics(d2).unwrap().unwrap();
        assert_eq!(loaded.total, Some(42));
        assert_eq!(at, ts(9, 0));
        assert_eq!(db.last_sync().unwrap(), Some(ts(9, 0)));

        assert_eq!(db.prune_metrics(d2).unwrap(), 1);
        assert!(db.load_metrics(d1).unwrap().is_none());
    }

    #[test]
    fn test_delivery_log_newest_first() {
        let db = StateDb::open_in_memory().unwrap();
        for (i, status) in ["failed", "sent"].iter().enumerate() {
            db.record_delivery(&DeliveryRecord {
                slot: Some(format!("2026-10-16T0{}:00", 8 + i)),
                mode: "scheduled".into(),
                channel: "telegram".into(),
                status: status.to_string(),
                error_kind: None,
                message: None,
                attempts: 1,
                created_at: ts(8 + i as u32, 0),
            })
            .unwrap();
        }
        let recent = db.recent_deliveries(10).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].status, "sent");
        assert_eq!(db.recent_deliveries(1).unwrap().len(), 1);
    }
}

//! End-to-end: engine + file-backed state across a simulated restart.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use pulse_core::config::{OperatingWindow, ScheduleConfig};
use pulse_core::error::{DeliveryResult, SourceError};
use pulse_core::traits::{DeliveryChannel, MetricsSource};
use pulse_core::types::{Performer, Report, SourceMetrics};
use pulse_scheduler::{
    Clock, DispatchGuard, Pipeline, SchedulerEngine, SlotCalendar, StateDb, SyncService,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct Upstream {
    up: bool,
}

#[async_trait]
impl MetricsSource for Upstream {
    fn name(&self) -> &str {
        "upstream"
    }

    async fn fetch(&self, _date: NaiveDate) -> Result<SourceMetrics, SourceError> {
        if !self.up {
            return Err(SourceError::Status(503));
        }
        Ok(SourceMetrics {
            total: Some(200),
            attempted: Some(161),
            delivered: Some(160),
            failed: Some(1),
            recovered: Some(3),
            performers: vec![
                Performer { id: "zed".into(), rate: 98.0 },
                Performer { id: "amy".into(), rate: 98.0 },
            ],
            weekly_efficiency: Some(88.8),
        })
    }
}

#[derive(Clone, Default)]
struct Outbox {
    sent: Arc<Mutex<Vec<String>>>,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl DeliveryChannel for Outbox {
    fn name(&self) -> &str {
        "outbox"
    }

    async fn send(&self, report: &Report) -> DeliveryResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.sent.lock().unwrap().push(report.text.clone());
        Ok(())
    }
}

struct FixedClock(DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

fn engine(path: &std::path::Path, now: DateTime<Utc>, up: bool, outbox: Outbox) -> SchedulerEngine {
    let window = OperatingWindow {
        utc_offset_minutes: 7 * 60,
        ..OperatingWindow::new(8, 22, 60)
    };
    let state = Arc::new(StateDb::open(path).unwrap());
    let sync = SyncService::new(
        Box::new(Upstream { up }),
        state.clone(),
        Duration::from_secs(300),
        Duration::from_secs(1),
    );
    let pipeline = Pipeline::new(sync, Box::new(outbox), state.clone(), window.offset())
        .with_retry_backoff(Duration::ZERO);
    SchedulerEngine::new(
        SlotCalendar::new(window),
        ScheduleConfig::default(),
        pipeline,
        DispatchGuard::new(state),
        Arc::new(FixedClock(now)),
    )
}

#[tokio::test]
async fn test_restart_keeps_at_most_once_and_stale_fallback() {
    let dir = std::env::temp_dir().join("pulse-engine-restart-test");
    std::fs::remove_dir_all(&dir).ok();
    let path = dir.join("state.db");
    let outbox = Outbox::default();

    // 09:00 local (UTC+7) is 02:00 UTC.
    let nine = Utc.with_ymd_and_hms(2026, 10, 16, 2, 0, 0).unwrap();
    let mut first = engine(&path, nine, true, outbox.clone());
    let cycle = first.step().await.ran.expect("09:00 slot should run");
    assert!(cycle.result.is_ok());
    drop(first);

    {
        let sent = outbox.sent.lock().unwrap();
        assert!(sent[0].starts_with("📊 Dispatch report 2026-10-16 09:00"));
        assert!(sent[0].contains("Success rate: 99.4%"));
        // Tie on rate goes to the smaller id.
        assert!(sent[0].contains("Best performer: amy (98.0%)"));
        assert!(sent[0].contains("🟢 Sync status: fresh"));
    }

    // Restart 30s later with upstream down: the slot is already served.
    let mut second = engine(&path, nine + chrono::Duration::seconds(30), false, outbox.clone());
    assert!(second.step().await.ran.is_none());
    assert_eq!(outbox.calls.load(Ordering::SeqCst), 1);
    drop(second);

    // 10:00 with upstream still down: the persisted cache keeps the numbers.
    let ten = nine + chrono::Duration::hours(1);
    let mut third = engine(&path, ten, false, outbox.clone());
    let cycle = third.step().await.ran.expect("10:00 slot should run");
    assert!(cycle.result.is_ok());
    assert!(cycle.report.text.contains("Total items: 200"));
    assert!(cycle.report.text.contains("🟡 Sync status: stale, showing data from 09:00 (60 min old)"));
    assert_eq!(outbox.calls.load(Ordering::SeqCst), 2);

    let state = StateDb::open(&path).unwrap();
    let log = state.recent_deliveries(10).unwrap();
    assert_eq!(log.len(), 2);
    assert_eq!(log[0].slot.as_deref(), Some("2026-10-16T10:00"));
    assert_eq!(log[0].mode, "scheduled");

    std::fs::remove_dir_all(&dir).ok();
}

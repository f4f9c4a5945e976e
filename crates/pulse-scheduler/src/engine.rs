//! Scheduler Engine — the main loop that decides when a report goes out.
//! Sleeps adaptively between checks instead of ticking at a fixed rate.

use chrono::{DateTime, Duration as ChronoDuration, FixedOffset, NaiveDateTime, Utc};
use pulse_core::config::ScheduleConfig;
use pulse_core::types::DispatchSlot;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::guard::DispatchGuard;
use crate::pipeline::{CycleReport, DispatchMode, Pipeline};
use crate::window::{SleepTier, SlotCalendar};

/// Source of "now". Tests drive the engine with a manual clock.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Result of a single engine check.
#[derive(Debug)]
pub struct StepOutcome {
    /// The cycle that ran for a due slot, if any.
    pub ran: Option<CycleReport>,
    pub sleep: Duration,
    pub tier: SleepTier,
    /// Slots that passed unserved since the previous check.
    pub missed: Vec<DispatchSlot>,
}

pub struct SchedulerEngine {
    calendar: SlotCalendar,
    schedule: ScheduleConfig,
    offset: FixedOffset,
    pipeline: Pipeline,
    guard: DispatchGuard,
    clock: Arc<dyn Clock>,
    last_checked: Option<NaiveDateTime>,
    /// Slots this process has already tried, successful or not.
    attempted: HashSet<DispatchSlot>,
}

impl SchedulerEngine {
    pub fn new(
        calendar: SlotCalendar,
        schedule: ScheduleConfig,
        pipeline: Pipeline,
        guard: DispatchGuard,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let offset = calendar.window().offset();
        Self {
            calendar,
            schedule,
            offset,
            pipeline,
            guard,
            clock,
            last_checked: None,
            attempted: HashSet::new(),
        }
    }

    fn local_now(&self) -> (DateTime<Utc>, NaiveDateTime) {
        let now = self.clock.now();
        (now, now.with_timezone(&self.offset).naive_local())
    }

    /// Check once: note missed slots, dispatch a due slot, plan the next sleep.
    pub async fn step(&mut self) -> StepOutcome {
        let (_, now) = self.local_now();
        let grace = self.schedule.grace();

        let missed = match self.last_checked {
            Some(prev) => self.missed_since(prev, now, grace),
            None => {
                self.note_startup(now, grace);
                Vec::new()
            }
        };
        self.last_checked = Some(now);

        let mut ran = None;
        if let Some(slot) = self.calendar.latest_at_or_before(now)
            && self.calendar.is_due(&slot, now, grace)
            && !self.attempted.contains(&slot)
        {
            ran = self.dispatch(slot).await;
        }

        let keep_from = now - ChronoDuration::days(2);
        self.attempted.retain(|s| s.start >= keep_from);

        // Re-read the clock: a cycle can take a while.
        let (_, after) = self.local_now();
        let (sleep, tier) = self.calendar.plan_sleep(after, &self.schedule);
        StepOutcome {
            ran,
            sleep,
            tier,
            missed,
        }
    }

    fn missed_since(&self, prev: NaiveDateTime, now: NaiveDateTime, grace: Duration) -> Vec<DispatchSlot> {
        let mut missed = Vec::new();
        for slot in self.calendar.between(prev, now) {
            if self.calendar.is_due(&slot, now, grace) || self.attempted.contains(&slot) {
                continue;
            }
            if let Ok(true) = self.guard.is_served(slot) {
                continue;
            }
            tracing::warn!(
                slot = %slot,
                stage = "schedule",
                "⏭️ Slot {slot} passed while the scheduler was not checking, it will not be sent"
            );
            missed.push(slot);
        }
        missed
    }

    fn note_startup(&self, now: NaiveDateTime, grace: Duration) {
        if let Some(slot) = self.calendar.latest_at_or_before(now)
            && slot.date() == now.date()
            && !self.calendar.is_due(&slot, now, grace)
            && let Ok(false) = self.guard.is_served(slot)
        {
            tracing::info!("⏭️ Slot {slot} already passed before startup, waiting for the next one");
        }
    }

    async fn dispatch(&mut self, slot: DispatchSlot) -> Option<CycleReport> {
        self.attempted.insert(slot);
        match self.guard.try_acquire(slot) {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!("Slot {slot} already served");
                return None;
            }
            Err(e) => {
                tracing::error!(slot = %slot, stage = "guard", "❌ Could not check slot {slot}: {e}");
                return None;
            }
        }

        tracing::info!("🚀 Dispatching report for slot {slot}");
        let cycle = self
            .pipeline
            .run_cycle(Some(slot), self.clock.now(), DispatchMode::Scheduled)
            .await;

        if let Some(failure) = &cycle.sync.failure {
            tracing::warn!(
                slot = %slot,
                stage = "sync",
                kind = failure.kind(),
                "⚠️ Slot {slot} report built with {} data: {failure}",
                cycle.sync.status
            );
        }

        match &cycle.result {
            Ok(()) => {
                let channel = self.pipeline.channel_name().to_string();
                match self.guard.commit(slot, &channel, self.clock.now()) {
                    Ok(()) => tracing::info!(
                        "✅ Report for slot {slot} delivered via {channel} (sync: {})",
                        cycle.sync.status
                    ),
                    Err(e) => tracing::error!(
                        slot = %slot,
                        stage = "guard",
                        "❌ Report for slot {slot} was delivered but could not be marked served: {e}"
                    ),
                }
            }
            Err(e) => {
                self.guard.release(slot);
                tracing::error!(
                    slot = %slot,
                    stage = "delivery",
                    kind = e.kind.as_str(),
                    attempts = cycle.attempts,
                    "❌ Delivery failed for slot {slot}: {}",
                    e.message
                );
            }
        }
        Some(cycle)
    }

    /// Loop until `shutdown` flips. A cycle in flight gets up to
    /// `shutdown_grace_secs` to finish before it is abandoned.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        let window = *self.calendar.window();
        tracing::info!(
            "⏰ Scheduler started: {:02}:00-{:02}:00 every {} min via {}",
            window.start_hour,
            window.end_hour,
            window.interval_minutes,
            self.pipeline.channel_name()
        );
        let shutdown_grace = Duration::from_secs(self.schedule.shutdown_grace_secs);

        loop {
            if *shutdown.borrow() {
                break;
            }

            let step = self.step();
            tokio::pin!(step);
            let finished = tokio::select! {
                outcome = &mut step => Some(outcome),
                _ = shutdown.changed() => None,
            };
            let Some(outcome) = finished else {
                tracing::info!(
                    "🛑 Shutdown requested, giving the current cycle up to {}s",
                    shutdown_grace.as_secs()
                );
                if tokio::time::timeout(shutdown_grace, step).await.is_err() {
                    tracing::warn!("⚠️ Cycle did not finish in time, abandoning it");
                }
                break;
            };

            tracing::debug!(
                tier = outcome.tier.as_str(),
                "💤 Sleeping {:.1}s",
                outcome.sleep.as_secs_f64()
            );
            tokio::select! {
                _ = tokio::time::sleep(outcome.sleep) => {}
                _ = shutdown.changed() => {
                    tracing::info!("🛑 Shutdown requested");
                    break;
                }
            }
        }

        tracing::info!("👋 Scheduler stopped");
    }
}

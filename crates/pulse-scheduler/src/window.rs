//! Slot arithmetic over the operating window, and the three sleep tiers.
//!
//! All times here are naive *local* times; the engine converts wall-clock
//! UTC using the window's fixed offset before asking.

use chrono::{Duration as ChronoDuration, NaiveDate, NaiveDateTime};
use pulse_core::config::{OperatingWindow, ScheduleConfig};
use pulse_core::types::DispatchSlot;
use std::time::Duration;

/// Upper bound on how many days `between` will scan.
const MAX_SCAN_DAYS: i64 = 7;

/// How the scheduler is sleeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepTier {
    /// Outside the operating window.
    Coarse,
    /// Inside the window, far from the next boundary.
    Medium,
    /// Close to the next boundary.
    Fine,
}

impl SleepTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            SleepTier::Coarse => "coarse",
            SleepTier::Medium => "medium",
            SleepTier::Fine => "fine",
        }
    }
}

/// Enumerates the dispatch slots defined by an `OperatingWindow`.
#[derive(Debug, Clone, Copy)]
pub struct SlotCalendar {
    window: OperatingWindow,
}

impl SlotCalendar {
    pub fn new(window: OperatingWindow) -> Self {
        Self { window }
    }

    pub fn window(&self) -> &OperatingWindow {
        &self.window
    }

    fn interval(&self) -> ChronoDuration {
        ChronoDuration::minutes(self.window.interval_minutes.max(1) as i64)
    }

    /// All slot starts on `date`, in order. End hour is inclusive.
    pub fn slots_on(&self, date: NaiveDate) -> Vec<DispatchSlot> {
        let first = self.window.start_hour * 60;
        let last = self.window.end_hour * 60;
        let step = self.window.interval_minutes.max(1) as usize;
        (first..=last)
            .step_by(step)
            .filter_map(|m| date.and_hms_opt(m / 60, m % 60, 0))
            .map(DispatchSlot::new)
            .collect()
    }

    /// Most recent slot that started at or before `now` (today or yesterday).
    pub fn latest_at_or_before(&self, now: NaiveDateTime) -> Option<DispatchSlot> {
        self.slots_on(now.date())
            .into_iter()
            .rev()
            .find(|s| s.start <= now)
            .or_else(|| {
                now.date()
                    .pred_opt()
                    .and_then(|d| self.slots_on(d).last().copied())
            })
    }

    /// First slot strictly after `now`.
    pub fn next_after(&self, now: NaiveDateTime) -> Option<DispatchSlot> {
        self.slots_on(now.date())
            .into_iter()
            .find(|s| s.start > now)
            .or_else(|| {
                now.date()
                    .succ_opt()
                    .and_then(|d| self.slots_on(d).first().copied())
            })
    }

    /// Slots with `after < start <= until`, oldest first.
    pub fn between(&self, after: NaiveDateTime, until: NaiveDateTime) -> Vec<DispatchSlot> {
        if until <= after {
            return Vec::new();
        }
        let earliest = until.date() - ChronoDuration::days(MAX_SCAN_DAYS);
        let mut day = after.date().max(earliest);
        let mut out = Vec::new();
        while day <= until.date() {
            out.extend(
                self.slots_on(day)
                    .into_iter()
                    .filter(|s| s.start > after && s.start <= until),
            );
            match day.succ_opt() {
                Some(next) => day = next,
                None => break,
            }
        }
        out
    }

    /// Whether `now` falls between the first slot start and the end of the
    /// last slot of its day.
    pub fn contains(&self, now: NaiveDateTime) -> bool {
        let slots = self.slots_on(now.date());
        match (slots.first(), slots.last()) {
            (Some(first), Some(last)) => now >= first.start && now < last.start + self.interval(),
            _ => false,
        }
    }

    /// A slot is due from its start until `grace` has elapsed.
    pub fn is_due(&self, slot: &DispatchSlot, now: NaiveDateTime, grace: Duration) -> bool {
        let Ok(grace) = ChronoDuration::from_std(grace) else {
            return false;
        };
        now >= slot.start && now - slot.start < grace
    }

    /// Decide how long to sleep from `now`.
    ///
    /// Far from the next boundary the coarse (outside window) or medium
    /// (inside) interval applies, capped so we wake no later than
    /// `approach_secs` before the boundary. Within the approach distance the
    /// fine interval applies, capped to land exactly on the boundary.
    pub fn plan_sleep(&self, now: NaiveDateTime, schedule: &ScheduleConfig) -> (Duration, SleepTier) {
        let coarse = Duration::from_secs(schedule.coarse_secs);
        let Some(next) = self.next_after(now) else {
            return (coarse, SleepTier::Coarse);
        };
        let until = (next.start - now).to_std().unwrap_or_default();
        let approach = Duration::from_secs(schedule.approach_secs);

        if until > approach {
            let (base, tier) = if self.contains(now) {
                (Duration::from_secs(schedule.medium_secs), SleepTier::Medium)
            } else {
                (coarse, SleepTier::Coarse)
            };
            (base.min(until - approach), tier)
        } else {
            (Duration::from_secs(schedule.fine_secs).min(until), SleepTier::Fine)
        }
    }
}

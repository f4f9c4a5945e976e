//! At-most-once dispatch per slot.
//!
//! A slot moves through `try_acquire` → (`commit` | `release`). Only a
//! committed slot is persisted, so a failed delivery leaves the slot
//! available for a later attempt inside its grace period, and a restart
//! after a successful delivery never sends it again. A single scheduler
//! process per state DB is assumed.

use chrono::{DateTime, Utc};
use pulse_core::error::Result;
use pulse_core::types::DispatchSlot;
use std::collections::HashSet;
use std::sync::Arc;

use crate::persistence::StateDb;

pub struct DispatchGuard {
    state: Arc<StateDb>,
    /// Acquired but not yet committed or released.
    held: HashSet<DispatchSlot>,
}

impl DispatchGuard {
    pub fn new(state: Arc<StateDb>) -> Self {
        Self {
            state,
            held: HashSet::new(),
        }
    }

    /// `true` if the caller may deliver for `slot`; `false` if it is already
    /// served or currently held.
    pub fn try_acquire(&mut self, slot: DispatchSlot) -> Result<bool> {
        if self.held.contains(&slot) || self.state.is_served(&slot.key())? {
            return Ok(false);
        }
        self.held.insert(slot);
        Ok(true)
    }

    /// Delivery succeeded: persist the slot as served.
    pub fn commit(&mut self, slot: DispatchSlot, channel: &str, at: DateTime<Utc>) -> Result<()> {
        self.state.mark_served(&slot.key(), channel, at)?;
        self.held.remove(&slot);
        Ok(())
    }

    /// Delivery failed: give the slot back.
    pub fn release(&mut self, slot: DispatchSlot) {
        self.held.remove(&slot);
    }

    pub fn is_served(&self, slot: DispatchSlot) -> Result<bool> {
        self.state.is_served(&slot.key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn slot(h: u32) -> DispatchSlot {
        DispatchSlot::new(
            NaiveDate::from_ymd_opt(2026, 10, 16)
                .unwrap()
                .and_hms_opt(h, 0, 0)
                .unwrap(),
        )
    }

    #[test]
    fn test_acquire_once_per_slot() {
        let db = Arc::new(StateDb::open_in_memory().unwrap());
        let mut guard = DispatchGuard::new(db);
        assert!(guard.try_acquire(slot(9)).unwrap());
        assert!(!guard.try_acquire(slot(9)).unwrap());
        guard.commit(slot(9), "telegram", Utc::now()).unwrap();
        for _ in 0..5 {
            assert!(!guard.try_acquire(slot(9)).unwrap());
        }
        assert!(guard.try_acquire(slot(10)).unwrap());
    }

    #[test]
    fn test_release_allows_retry() {
        let db = Arc::new(StateDb::open_in_memory().unwrap());
        let mut guard = DispatchGuard::new(db);
        assert!(guard.try_acquire(slot(9)).unwrap());
        guard.release(slot(9));
        assert!(!guard.is_served(slot(9)).unwrap());
        assert!(guard.try_acquire(slot(9)).unwrap());
    }

    #[test]
    fn test_served_state_survives_restart() {
        let dir = std::env::temp_dir().join("pulse-guard-restart-test");
        std::fs::remove_dir_all(&dir).ok();
        let path = dir.join("state.db");

        {
            let mut guard = DispatchGuard::new(Arc::new(StateDb::open(&path).unwrap()));
            assert!(guard.try_acquire(slot(9)).unwrap());
            guard.commit(slot(9), "telegram", Utc::now()).unwrap();
        }

        // Simulated restart: fresh process state, same file.
        let mut guard = DispatchGuard::new(Arc::new(StateDb::open(&path).unwrap()));
        assert!(!guard.try_acquire(slot(9)).unwrap());
        assert!(guard.try_acquire(slot(11)).unwrap());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_uncommitted_slot_not_persisted() {
        let dir = std::env::temp_dir().join("pulse-guard-uncommitted-test");
        std::fs::remove_dir_all(&dir).ok();
        let path = dir.join("state.db");

        {
            let mut guard = DispatchGuard::new(Arc::new(StateDb::open(&path).unwrap()));
            assert!(guard.try_acquire(slot(9)).unwrap());
        }

        let mut guard = DispatchGuard::new(Arc::new(StateDb::open(&path).unwrap()));
        assert!(guard.try_acquire(slot(9)).unwrap());
        std::fs::remove_dir_all(&dir).ok();
    }
}

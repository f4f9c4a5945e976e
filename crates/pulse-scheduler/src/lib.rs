//! # DispatchPulse Scheduler
//!
//! The report scheduling & delivery engine: decides *when* to run, refreshes
//! upstream metrics, renders the digest and hands it to the delivery channel,
//! at most once per dispatch slot.
//!
//! ## Architecture
//! ```text
//! SchedulerEngine (adaptive sleep: coarse / medium / fine)
//!   ├── OperatingWindow → DispatchSlot due?
//!   ├── DispatchGuard.try_acquire(slot)   (SQLite served_slots)
//!   └── Pipeline
//!         ├── SyncService.sync()          (metrics_cache, freshness window)
//!         ├── ReportBuilder.build()       (pure, total)
//!         └── DeliveryChannel.send()      (one retry on transient)
//! ```

pub mod engine;
pub mod guard;
pub mod persistence;
pub mod pipeline;
pub mod report;
pub mod sync;
pub mod window;

pub use engine::{Clock, SchedulerEngine, StepOutcome, SystemClock};
pub use guard::DispatchGuard;
pub use persistence::{DeliveryRecord, StateDb};
pub use pipeline::{CycleReport, DispatchMode, Pipeline};
pub use report::ReportBuilder;
pub use sync::SyncService;
pub use window::{SleepTier, SlotCalendar};

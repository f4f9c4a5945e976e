//! # DispatchPulse Core
//!
//! Shared building blocks for the report engine: configuration, the error
//! type, the metrics data model and the traits implemented by the external
//! collaborators (metrics source, delivery channel).

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use error::{PulseError, Result};
pub use traits::{DeliveryChannel, MetricsSource};

//! # DispatchPulse Providers
//!
//! Upstream metrics providers. The dispatch platform exposes per-date
//! counts over a small JSON API; `HttpMetricsSource` talks to it.

pub mod http_source;

use pulse_core::config::PulseConfig;
use pulse_core::traits::MetricsSource;

pub use http_source::HttpMetricsSource;

/// Create the metrics source from configuration.
pub fn create_source(config: &PulseConfig) -> Box<dyn MetricsSource> {
    Box::new(HttpMetricsSource::from_config(&config.source))
}

//! DispatchPulse configuration system.

use chrono::{FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{PulseError, Result};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PulseConfig {
    #[serde(default = "default_state_path")]
    pub state_path: String,
    #[serde(default)]
    pub window: OperatingWindow,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
}

fn default_state_path() -> String { "~/.dispatchpulse/state.db".into() }

impl Default for PulseConfig {
    fn default() -> Self {
        Self {
            state_path: default_state_path(),
            window: OperatingWindow::default(),
            schedule: ScheduleConfig::default(),
            source: SourceConfig::default(),
            delivery: DeliveryConfig::default(),
        }
    }
}

impl PulseConfig {
    /// Load config from the default path (~/.dispatchpulse/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            let mut config = Self::default();
            config.apply_env();
            Ok(config)
        }
    }

    /// Load config from a specific path, then apply environment overrides.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| PulseError::Config(format!("Failed to read {}: {e}", path.display())))?;
        let mut config: Self = toml::from_str(&content)
            .map_err(|e| PulseError::Config(format!("Failed to parse {}: {e}", path.display())))?;
        config.apply_env();
        Ok(config)
    }

    /// Secrets may come from the environment instead of the file.
    pub fn apply_env(&mut self) {
        if let Ok(token) = std::env::var("PULSE_SOURCE_TOKEN") {
            self.source.api_token = token;
        }
        if let Ok(token) = std::env::var("PULSE_TELEGRAM_BOT_TOKEN") {
            self.delivery.bot_token = token;
        }
        if let Ok(chat_id) = std::env::var("PULSE_TELEGRAM_CHAT_ID") {
            self.delivery.chat_id = chat_id;
        }
        if let Ok(url) = std::env::var("PULSE_WEBHOOK_URL") {
            self.delivery.webhook_url = url;
        }
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the DispatchPulse home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".dispatchpulse")
    }

    /// State database path with `~` expanded.
    pub fn state_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.state_path).to_string())
    }

    /// Check the window and loop tuning. Fatal at startup.
    pub fn validate(&self) -> Result<()> {
        self.window.validate()?;
        self.schedule.validate()?;
        let cycle = self.max_cycle_secs();
        if self.schedule.shutdown_grace_secs < cycle {
            return Err(PulseError::Config(format!(
                "schedule.shutdown_grace_secs ({}) must cover a full cycle ({cycle}s: sync, send, backoff, retry)",
                self.schedule.shutdown_grace_secs
            )));
        }
        Ok(())
    }

    /// Upper bound on one pipeline cycle: a sync plus two bounded sends
    /// separated by the retry backoff.
    pub fn max_cycle_secs(&self) -> u64 {
        self.source.timeout_secs
            + 2 * self.delivery.send_timeout().as_secs()
            + self.delivery.retry_backoff_secs
    }

    /// Check the upstream source settings; not needed when sync is skipped.
    pub fn validate_source(&self) -> Result<()> {
        if self.source.base_url.trim().is_empty() {
            return Err(PulseError::Config("source.base_url is required".into()));
        }
        if self.source.timeout_secs == 0 {
            return Err(PulseError::Config("source.timeout_secs must be > 0".into()));
        }
        Ok(())
    }

    /// Check that the selected delivery channel has its credentials.
    pub fn validate_delivery(&self) -> Result<()> {
        let d = &self.delivery;
        if d.timeout_secs == 0 {
            return Err(PulseError::Config("delivery.timeout_secs must be > 0".into()));
        }
        match d.kind {
            DeliveryKind::Telegram => {
                if d.bot_token.trim().is_empty() {
                    return Err(PulseError::Config(
                        "delivery.bot_token (or PULSE_TELEGRAM_BOT_TOKEN) is required".into(),
                    ));
                }
                if d.chat_id.trim().is_empty() {
                    return Err(PulseError::Config(
                        "delivery.chat_id (or PULSE_TELEGRAM_CHAT_ID) is required".into(),
                    ));
                }
            }
            DeliveryKind::Discord | DeliveryKind::Webhook => {
                let url = d.webhook_url.trim();
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(PulseError::Config(format!(
                        "delivery.webhook_url must be an http(s) URL for {:?}",
                        d.kind
                    )));
                }
            }
        }
        Ok(())
    }
}

fn default_start_hour() -> u32 { 8 }
fn default_end_hour() -> u32 { 22 }
fn default_interval_minutes() -> u32 { 60 }

/// Hours of the (local) day during which dispatch slots exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatingWindow {
    #[serde(default = "default_start_hour")]
    pub start_hour: u32,
    /// Inclusive: a slot starting exactly at `end_hour:00` still exists.
    #[serde(default = "default_end_hour")]
    pub end_hour: u32,
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u32,
    /// Offset of the operating timezone from UTC.
    #[serde(default)]
    pub utc_offset_minutes: i32,
}

impl Default for OperatingWindow {
    fn default() -> Self {
        Self {
            start_hour: default_start_hour(),
            end_hour: default_end_hour(),
            interval_minutes: default_interval_minutes(),
            utc_offset_minutes: 0,
        }
    }
}

impl OperatingWindow {
    pub fn new(start_hour: u32, end_hour: u32, interval_minutes: u32) -> Self {
        Self {
            start_hour,
            end_hour,
            interval_minutes,
            utc_offset_minutes: 0,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.end_hour > 23 {
            return Err(PulseError::Config(format!(
                "window.end_hour must be 0..=23, got {}",
                self.end_hour
            )));
        }
        if self.start_hour > self.end_hour {
            return Err(PulseError::Config(format!(
                "window.start_hour ({}) is after window.end_hour ({})",
                self.start_hour, self.end_hour
            )));
        }
        if self.interval_minutes == 0 || self.interval_minutes > 1440 {
            return Err(PulseError::Config(format!(
                "window.interval_minutes must be 1..=1440, got {}",
                self.interval_minutes
            )));
        }
        if self.utc_offset_minutes.abs() > 18 * 60 {
            return Err(PulseError::Config(format!(
                "window.utc_offset_minutes out of range: {}",
                self.utc_offset_minutes
            )));
        }
        Ok(())
    }

    /// Timezone of the window. Out-of-range offsets fall back to UTC;
    /// `validate` rejects them at startup.
    pub fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix())
    }
}

fn default_grace_secs() -> u64 { 60 }
fn default_coarse_secs() -> u64 { 300 }
fn default_medium_secs() -> u64 { 60 }
fn default_fine_secs() -> u64 { 1 }
fn default_approach_secs() -> u64 { 180 }
fn default_shutdown_grace_secs() -> u64 { 60 }

/// Scheduler loop tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// How long after its start a slot may still be dispatched.
    #[serde(default = "default_grace_secs")]
    pub grace_secs: u64,
    /// Sleep while outside the operating window.
    #[serde(default = "default_coarse_secs")]
    pub coarse_secs: u64,
    /// Sleep inside the window, far from the next boundary.
    #[serde(default = "default_medium_secs")]
    pub medium_secs: u64,
    /// Sleep when close to the next boundary.
    #[serde(default = "default_fine_secs")]
    pub fine_secs: u64,
    /// Distance to the next boundary at which the fine tier kicks in.
    #[serde(default = "default_approach_secs")]
    pub approach_secs: u64,
    /// How long an in-flight cycle may keep running after a stop request.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            grace_secs: default_grace_secs(),
            coarse_secs: default_coarse_secs(),
            medium_secs: default_medium_secs(),
            fine_secs: default_fine_secs(),
            approach_secs: default_approach_secs(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

impl ScheduleConfig {
    pub fn validate(&self) -> Result<()> {
        if self.grace_secs == 0 {
            return Err(PulseError::Config("schedule.grace_secs must be > 0".into()));
        }
        if self.coarse_secs == 0 || self.medium_secs == 0 || self.fine_secs == 0 {
            return Err(PulseError::Config("schedule sleep intervals must be > 0".into()));
        }
        Ok(())
    }

    pub fn grace(&self) -> Duration {
        Duration::from_secs(self.grace_secs)
    }
}

fn default_source_timeout() -> u64 { 15 }
fn default_freshness_secs() -> u64 { 300 }

/// Upstream metrics provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub api_token: String,
    #[serde(default = "default_source_timeout")]
    pub timeout_secs: u64,
    /// A cached snapshot younger than this is reused without a network call.
    #[serde(default = "default_freshness_secs")]
    pub freshness_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_token: String::new(),
            timeout_secs: default_source_timeout(),
            freshness_secs: default_freshness_secs(),
        }
    }
}

/// Which messaging endpoint receives the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryKind {
    #[default]
    Telegram,
    Discord,
    Webhook,
}

fn default_delivery_timeout() -> u64 { 10 }
fn default_retry_backoff() -> u64 { 5 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    #[serde(default)]
    pub kind: DeliveryKind,
    #[serde(default)]
    pub bot_token: String,
    #[serde(default)]
    pub chat_id: String,
    #[serde(default)]
    pub webhook_url: String,
    /// Optional bearer token for the generic webhook.
    #[serde(default)]
    pub webhook_token: String,
    #[serde(default = "default_delivery_timeout")]
    pub timeout_secs: u64,
    /// Pause before the single same-slot retry of a transient failure.
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_secs: u64,
}

impl DeliveryConfig {
    /// Outer bound on one `send` call, a little above the HTTP timeout.
    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs + 5)
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            kind: DeliveryKind::default(),
            bot_token: String::new(),
            chat_id: String::new(),
            webhook_url: String::new(),
            webhook_token: String::new(),
            timeout_secs: default_delivery_timeout(),
            retry_backoff_secs: default_retry_backoff(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PulseConfig::default();
        assert_eq!(config.window, OperatingWindow::new(8, 22, 60));
        assert_eq!(config.schedule.grace_secs, 60);
        assert_eq!(config.source.freshness_secs, 300);
        assert_eq!(config.delivery.kind, DeliveryKind::Telegram);
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            state_path = "/tmp/pulse.db"

            [window]
            start_hour = 7
            end_hour = 21
            interval_minutes = 30
            utc_offset_minutes = 420

            [source]
            base_url = "https://ops.example.com/api"

            [delivery]
            kind = "webhook"
            webhook_url = "https://hooks.example.com/x"
        "#;

        let config: PulseConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.window.start_hour, 7);
        assert_eq!(config.window.interval_minutes, 30);
        assert_eq!(config.window.offset().local_minus_utc(), 420 * 60);
        assert_eq!(config.delivery.kind, DeliveryKind::Webhook);
        assert!(config.validate().is_ok());
        assert!(config.validate_source().is_ok());
        assert!(config.validate_delivery().is_ok());
    }

    #[test]
    fn test_config_missing_fields_use_defaults() {
        let config: PulseConfig = toml::from_str("").unwrap();
        assert_eq!(config.window.end_hour, 22);
        assert_eq!(config.delivery.retry_backoff_secs, 5);
    }

    #[test]
    fn test_malformed_window_rejected() {
        assert!(OperatingWindow::new(22, 8, 60).validate().is_err());
        assert!(OperatingWindow::new(8, 24, 60).validate().is_err());
        assert!(OperatingWindow::new(8, 22, 0).validate().is_err());
        assert!(OperatingWindow::new(8, 22, 60).validate().is_ok());
        assert!(OperatingWindow::new(0, 0, 1440).validate().is_ok());
    }

    #[test]
    fn test_missing_credentials_rejected() {
        let mut config = PulseConfig::default();
        config.delivery.bot_token = "123:abc".into();
        assert!(matches!(config.validate_delivery(), Err(PulseError::Config(_))));
        config.delivery.chat_id = "-100200".into();
        assert!(config.validate_delivery().is_ok());

        config.delivery.kind = DeliveryKind::Discord;
        assert!(config.validate_delivery().is_err());
    }

    #[test]
    fn test_default_shutdown_grace_covers_a_cycle() {
        let config = PulseConfig::default();
        assert_eq!(config.delivery.send_timeout(), Duration::from_secs(15));
        assert_eq!(config.max_cycle_secs(), 15 + 2 * 15 + 5);
        assert!(config.schedule.shutdown_grace_secs >= config.max_cycle_secs());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_short_shutdown_grace_rejected() {
        let mut config = PulseConfig::default();
        config.schedule.shutdown_grace_secs = 30;
        assert!(matches!(config.validate(), Err(PulseError::Config(_))));

        config.delivery.timeout_secs = 3;
        config.source.timeout_secs = 5;
        // 5 + 2 * 8 + 5
        assert_eq!(config.max_cycle_secs(), 26);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_base_url_rejected() {
        let config = PulseConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.validate_source().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = std::env::temp_dir().join("pulse-config-test");
        std::fs::create_dir_all(&dir).ok();
        let path = dir.join("config.toml");
        std::fs::write(&path, "[window]\nstart_hour = 9\n").unwrap();
        let config = PulseConfig::load_from(&path).unwrap();
        assert_eq!(config.window.start_hour, 9);
        assert!(PulseConfig::load_from(&dir.join("missing.toml")).is_err());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_unparsable_file_is_config_error() {
        let dir = std::env::temp_dir().join("pulse-config-bad-toml-test");
        std::fs::create_dir_all(&dir).ok();
        let path = dir.join("config.toml");
        std::fs::write(&path, "[window\nstart_hour = ").unwrap();
        match PulseConfig::load_from(&path) {
            Err(PulseError::Config(msg)) => assert!(msg.contains("Failed to parse")),
            other => panic!("expected a configuration error, got {other:?}"),
        }
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_home_dir() {
        let home = PulseConfig::home_dir();
        assert!(home.to_string_lossy().contains("dispatchpulse"));
    }
}

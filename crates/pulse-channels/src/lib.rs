//! # DispatchPulse Channels
//! Outbound delivery adapters for finished reports.
//!
//! Each adapter classifies its failures as transient or permanent so the
//! pipeline can decide whether a same-slot retry makes sense.

pub mod classify;
pub mod discord;
pub mod telegram;
pub mod webhook;

use pulse_core::config::{DeliveryConfig, DeliveryKind};
use pulse_core::traits::DeliveryChannel;

pub use discord::DiscordChannel;
pub use telegram::TelegramChannel;
pub use webhook::WebhookChannel;

/// Build the configured delivery channel.
/// Credentials are checked by `PulseConfig::validate_delivery` at startup.
pub fn create_channel(config: &DeliveryConfig) -> Box<dyn DeliveryChannel> {
    match config.kind {
        DeliveryKind::Telegram => Box::new(TelegramChannel::new(
            &config.bot_token,
            &config.chat_id,
            config.timeout_secs,
        )),
        DeliveryKind::Discord => {
            Box::new(DiscordChannel::new(&config.webhook_url, config.timeout_secs))
        }
        DeliveryKind::Webhook => Box::new(WebhookChannel::new(
            &config.webhook_url,
            &config.webhook_token,
            config.timeout_secs,
        )),
    }
}
